//! Filesystem side of rename, move and delete.
//!
//! A data entry is backed by up to three files sharing its name: the primary
//! file, the derived metadata file and the properties sidecar. They are
//! handled one at a time without any rollback, but only after checking that no
//! untracked file sits where one of them would land.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::common::errors::{ErrorContext, RepositoryError, Result};
use crate::domain::entities::entry::{EntryType, PROPERTIES_SUFFIX};

/// Every file that may back a data entry, primary file first
pub fn artifact_paths(dir: &Path, name: &str, entry_type: EntryType) -> Vec<PathBuf> {
    [entry_type.suffix(), entry_type.metadata_suffix(), Some(PROPERTIES_SUFFIX)]
        .into_iter()
        .flatten()
        .map(|suffix| dir.join(format!("{}{}", name, suffix)))
        .collect()
}

/// Renames the primary, metadata and properties files in that order.
///
/// The primary file must exist; missing metadata or properties files are
/// skipped. Nothing is renamed if a file already occupies one of the targets.
/// Stops at the first failure.
pub fn relocate_data_artifacts(
    from_dir: &Path,
    from_name: &str,
    to_dir: &Path,
    to_name: &str,
    entry_type: EntryType,
) -> Result<()> {
    let sources = artifact_paths(from_dir, from_name, entry_type);
    let targets = artifact_paths(to_dir, to_name, entry_type);

    let primary = &sources[0];
    if !primary.exists() {
        return Err(RepositoryError::not_found("data file", primary.display().to_string()));
    }
    for (source, target) in sources.iter().zip(targets.iter()) {
        if source.exists() {
            check_target_free(source, target, to_name)?;
        }
    }

    for (source, target) in sources.iter().zip(targets.iter()) {
        match fs::rename(source, target) {
            Ok(()) => debug!("Renamed {} to {}", source.display(), target.display()),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                debug!("Skipping missing artifact {}", source.display());
            }
            Err(e) => return Err(RepositoryError::io(source, e)),
        }
    }
    Ok(())
}

pub fn relocate_folder(from: &Path, to: &Path) -> Result<()> {
    let name = to.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    check_target_free(from, to, &name)?;
    fs::rename(from, to).with_path(from)?;
    debug!("Renamed directory {} to {}", from.display(), to.display());
    Ok(())
}

/// Fails with `DuplicateName` if `target` exists and is not `source` itself,
/// as happens for a case-only rename on a case-insensitive filesystem
fn check_target_free(source: &Path, target: &Path, name: &str) -> Result<()> {
    if fs::symlink_metadata(target).is_err() {
        return Ok(());
    }
    let same_file = match (fs::canonicalize(source), fs::canonicalize(target)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if same_file {
        return Ok(());
    }
    let folder = target.parent().map(|p| p.display().to_string()).unwrap_or_default();
    warn!("Refusing to overwrite {}", target.display());
    Err(RepositoryError::duplicate_name(name, &folder)
        .with_location(target.display().to_string()))
}

/// Removes every file of a data entry. Missing files are fine; the first
/// real failure is returned after all removals have been attempted.
pub fn remove_data_artifacts(dir: &Path, name: &str, entry_type: EntryType) -> Result<()> {
    let mut first_error = None;
    for path in artifact_paths(dir, name, entry_type) {
        match fs::remove_file(&path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                debug!("Nothing to remove at {}", path.display());
            }
            Err(e) => {
                warn!("Failed to remove {}: {}", path.display(), e);
                first_error.get_or_insert(RepositoryError::io(&path, e));
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Removes a directory tree; a directory that is already gone is fine
pub fn remove_folder(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            debug!("Removed directory {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            warn!("Directory {} was already gone", path.display());
            Ok(())
        }
        Err(e) => Err(RepositoryError::io(path, e)),
    }
}

/// Creates `path` empty unless it already exists
pub fn ensure_file(path: &Path) -> Result<()> {
    OpenOptions::new().write(true).create(true).open(path).with_path(path)?;
    Ok(())
}
