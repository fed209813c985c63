use std::collections::BTreeMap;
use std::path::Path;

use crate::common::errors::{ErrorContext, ErrorKind, Result};

/// Key of the owner property written on creation
pub const OWNER_KEY: &str = "owner";
/// Key of the creation timestamp (RFC 3339)
pub const CREATED_KEY: &str = "created";
/// Key of the class hint recorded by object stores
pub const CLASS_KEY: &str = "class";
/// Key of the cached connection type
pub const CONNECTION_TYPE_KEY: &str = "connection_type";
/// Key of a blob's MIME type
pub const MIME_TYPE_KEY: &str = "mime_type";

pub type Properties = BTreeMap<String, String>;

/// Reads the XML properties sidecar; a missing file yields no properties
pub fn load(path: &Path) -> Result<Properties> {
    if !path.exists() {
        return Ok(Properties::new());
    }
    match plist::from_file::<_, Properties>(path) {
        Ok(properties) => Ok(properties),
        Err(e) => {
            tracing::warn!("Ignoring unreadable properties file {}: {}", path.display(), e);
            Ok(Properties::new())
        }
    }
}

pub fn save(path: &Path, properties: &Properties) -> Result<()> {
    plist::to_file_xml(path, properties)
        .with_error_kind(ErrorKind::Io, || format!("failed to write properties {}", path.display()))
}

/// Sets one key, keeping the others
pub fn update(path: &Path, key: &str, value: &str) -> Result<()> {
    let mut properties = load(path)?;
    properties.insert(key.to_string(), value.to_string());
    save(path, &properties)
}
