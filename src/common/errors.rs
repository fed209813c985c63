use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::Path;
use thiserror::Error;

/// Kinds of failure surfaced by the repository store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Root directory missing, not a directory, not writable or not creatable
    Initialization,
    /// Name contains illegal characters or is reserved
    IllegalName,
    /// A sibling already uses the name (compared case-insensitively)
    DuplicateName,
    /// A non-connection entry targeted the Connections folder
    ConnectionsFolderTypeViolation,
    /// A connection entry targeted a folder other than the Connections folder
    ConnectionOutsideConnectionsFolder,
    /// Rename, move or delete of the Connections folder itself
    ConnectionsFolderImmutable,
    /// A second Connections folder below the repository root
    DuplicateConnectionsFolder,
    /// Entry, payload or metadata file does not exist
    NotFound,
    /// Folder moved into itself or one of its descendants
    InvalidMove,
    /// Rename, move or delete of the repository root
    RootFolderImmutable,
    /// Operation does not apply to this entry variant
    UnsupportedOperation,
    /// Underlying filesystem failure
    Io,
    /// A folder lock could not be acquired
    Lock,
    /// Payload, metadata or properties could not be (de)serialized
    Serialization,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ErrorKind::Initialization => write!(f, "Repository Initialization"),
            ErrorKind::IllegalName => write!(f, "Illegal Name"),
            ErrorKind::DuplicateName => write!(f, "Duplicate Name"),
            ErrorKind::ConnectionsFolderTypeViolation => write!(f, "Wrong Entry Type For Connections Folder"),
            ErrorKind::ConnectionOutsideConnectionsFolder => write!(f, "Connection Outside Connections Folder"),
            ErrorKind::ConnectionsFolderImmutable => write!(f, "Connections Folder Immutable"),
            ErrorKind::DuplicateConnectionsFolder => write!(f, "Duplicate Connections Folder"),
            ErrorKind::NotFound => write!(f, "Not Found"),
            ErrorKind::InvalidMove => write!(f, "Invalid Move"),
            ErrorKind::RootFolderImmutable => write!(f, "Root Folder Immutable"),
            ErrorKind::UnsupportedOperation => write!(f, "Unsupported Operation"),
            ErrorKind::Io => write!(f, "IO"),
            ErrorKind::Lock => write!(f, "Lock"),
            ErrorKind::Serialization => write!(f, "Serialization"),
        }
    }
}

/// Error returned by every fallible repository operation
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct RepositoryError {
    /// Kind of failure
    pub kind: ErrorKind,
    /// Location of the affected entry, when known
    pub location: Option<String>,
    /// Descriptive message
    pub message: String,
    /// Underlying cause
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, RepositoryError>;

impl RepositoryError {
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            location: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn initialization<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Initialization, message)
    }

    pub fn illegal_name<S: Into<String>>(name: S, reason: &str) -> Self {
        let name = name.into();
        Self::new(ErrorKind::IllegalName, format!("'{}' {}", name, reason))
    }

    pub fn duplicate_name<S: Into<String>>(name: S, folder_location: &str) -> Self {
        let name = name.into();
        Self {
            kind: ErrorKind::DuplicateName,
            location: Some(folder_location.to_string()),
            message: format!("an entry named '{}' already exists in {}", name, folder_location),
            source: None,
        }
    }

    pub fn not_found<S: Into<String>>(what: &str, location: S) -> Self {
        let location = location.into();
        Self {
            kind: ErrorKind::NotFound,
            message: format!("{} not found: {}", what, location),
            location: Some(location),
            source: None,
        }
    }

    pub fn lock<S: Into<String>>(location: S) -> Self {
        let location = location.into();
        Self {
            kind: ErrorKind::Lock,
            message: format!("failed to acquire folder lock for {}", location),
            location: Some(location),
            source: None,
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self {
            kind: ErrorKind::Io,
            location: None,
            message: format!("{} ({})", source, path.display()),
            source: Some(Box::new(source)),
        }
    }

    /// Sets the location of the affected entry
    pub fn with_location<S: Into<String>>(mut self, location: S) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the underlying cause
    pub fn with_source<E: StdError + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

/// Adds repository context to foreign errors
pub trait ErrorContext<T> {
    /// Wraps the error as an I/O failure on `path`
    fn with_path(self, path: &Path) -> Result<T>;

    fn with_error_kind<C, F>(self, kind: ErrorKind, context: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E: StdError + Send + Sync + 'static> ErrorContext<T> for std::result::Result<T, E> {
    fn with_path(self, path: &Path) -> Result<T> {
        self.map_err(|e| RepositoryError {
            kind: ErrorKind::Io,
            location: None,
            message: format!("{} ({})", e, path.display()),
            source: Some(Box::new(e)),
        })
    }

    fn with_error_kind<C, F>(self, kind: ErrorKind, context: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| RepositoryError {
            kind,
            location: None,
            message: format!("{}: {}", context().into(), e),
            source: Some(Box::new(e)),
        })
    }
}

/// Generates a `From` conversion into `RepositoryError` for a foreign error
#[macro_export]
macro_rules! impl_from_error {
    ($error_type:ty, $kind:expr) => {
        impl From<$error_type> for $crate::common::errors::RepositoryError {
            fn from(err: $error_type) -> Self {
                $crate::common::errors::RepositoryError {
                    kind: $kind,
                    location: None,
                    message: format!("{}", err),
                    source: Some(Box::new(err)),
                }
            }
        }
    };
}

impl_from_error!(std::io::Error, ErrorKind::Io);
impl_from_error!(serde_json::Error, ErrorKind::Serialization);
impl_from_error!(plist::Error, ErrorKind::Serialization);
