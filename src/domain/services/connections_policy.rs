//! Placement rules around the Connections folder.
//!
//! The Connections folder sits directly below the repository root, holds
//! connection entries only, and can be neither renamed, moved nor deleted.
//! Connection entries live nowhere else.

use crate::common::errors::{ErrorKind, RepositoryError, Result};
use crate::domain::entities::entry::{Entry, EntryType};
use crate::domain::entities::folder::Folder;

/// Name the folder is created with when it is missing
pub const CONNECTIONS_FOLDER_NAME: &str = "Connections";

pub fn is_connections_folder_name(name: &str) -> bool {
    name.to_lowercase() == CONNECTIONS_FOLDER_NAME.to_lowercase()
}

/// Whether an entry of `entry_type` may live directly inside `folder`
pub fn is_allowed_in(folder: &Folder, entry_type: EntryType) -> bool {
    folder.is_connections_folder() == (entry_type == EntryType::Connection)
}

pub fn check_allowed_in(folder: &Folder, entry_type: EntryType) -> Result<()> {
    if folder.is_connections_folder() && entry_type != EntryType::Connection {
        return Err(RepositoryError::new(
            ErrorKind::ConnectionsFolderTypeViolation,
            format!("a {} entry cannot be placed in the Connections folder", entry_type),
        )
        .with_location(folder.location().to_string()));
    }
    if !folder.is_connections_folder() && entry_type == EntryType::Connection {
        return Err(RepositoryError::new(
            ErrorKind::ConnectionOutsideConnectionsFolder,
            "connection entries can only be placed in the Connections folder",
        )
        .with_location(folder.location().to_string()));
    }
    Ok(())
}

/// Rejects a folder name that would shadow the Connections folder
pub fn check_folder_name(parent: &Folder, name: &str) -> Result<()> {
    if parent.is_root() && is_connections_folder_name(name) {
        return Err(RepositoryError::new(
            ErrorKind::DuplicateConnectionsFolder,
            format!("'{}' is reserved for the Connections folder", name),
        )
        .with_location(parent.location().to_string()));
    }
    Ok(())
}

/// The root and the Connections folder are fixed in place
pub fn check_mutable(entry: &Entry) -> Result<()> {
    if let Entry::Folder(folder) = entry {
        if folder.is_root() {
            return Err(RepositoryError::new(
                ErrorKind::RootFolderImmutable,
                "the repository root cannot be renamed, moved or deleted",
            )
            .with_location(folder.location().to_string()));
        }
        if folder.is_connections_folder() {
            return Err(RepositoryError::new(
                ErrorKind::ConnectionsFolderImmutable,
                "the Connections folder cannot be renamed, moved or deleted",
            )
            .with_location(folder.location().to_string()));
        }
    }
    Ok(())
}

pub fn check_rename(entry: &Entry, new_name: &str) -> Result<()> {
    check_mutable(entry)?;
    if let (Entry::Folder(_), Some(parent)) = (entry, entry.containing_folder()) {
        check_folder_name(&parent, new_name)?;
    }
    Ok(())
}

pub fn check_move(entry: &Entry, target: &Folder, target_name: &str) -> Result<()> {
    check_mutable(entry)?;
    check_allowed_in(target, entry.entry_type())?;
    if let Entry::Folder(_) = entry {
        check_folder_name(target, target_name)?;
    }
    Ok(())
}
