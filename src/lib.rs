// Main modules of the repository store
pub mod common;
pub mod domain;
pub mod infrastructure;

// Common public re-exports
pub use common::config::{CacheConfig, RepositoryConfig};
pub use common::errors::{ErrorKind, RepositoryError, Result};
pub use domain::entities::data_entry::{DataEntry, DataKind};
pub use domain::entities::entry::{Entry, EntryType};
pub use domain::entities::folder::Folder;
pub use domain::entities::payload::{
    ConnectionConfiguration, ConnectionInformation, IoObject, MetaData, ObjectMetaData,
};
pub use domain::repositories::repository_listener::{ListenerId, RepositoryListener};
pub use domain::services::path_service::Location;
pub use infrastructure::repositories::{Repository, RepositoryBuilder};
pub use infrastructure::services::{EntryCreator, EntryCreatorRegistry, JsonObjectCodec, ObjectCodec};
