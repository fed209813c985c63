use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::path::Path;
use std::sync::{Arc, RwLock, Weak};

use tracing::info;
use uuid::Uuid;

use crate::common::errors::{ErrorKind, RepositoryError, Result};
use crate::domain::entities::data_entry::DataEntry;
use crate::domain::entities::folder::Folder;
use crate::domain::services::connections_policy;
use crate::domain::services::path_service::{validate_name, Location};
use crate::infrastructure::repositories::entry_fs_repository;
use crate::infrastructure::repositories::local_repository::RepositoryContext;

/// Suffix of the XML properties sidecar every data entry carries
pub const PROPERTIES_SUFFIX: &str = ".properties";

/// Variant tag of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    Folder,
    GenericObject,
    Process,
    Blob,
    Connection,
}

impl EntryType {
    /// Suffix of the primary file, `None` for folders
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            EntryType::Folder => None,
            EntryType::GenericObject => Some(".ioo"),
            EntryType::Process => Some(".rmp"),
            EntryType::Blob => Some(".blob"),
            EntryType::Connection => Some(".conninfo"),
        }
    }

    /// Suffix of the derived metadata file, for types that have one
    pub fn metadata_suffix(self) -> Option<&'static str> {
        match self {
            EntryType::GenericObject => Some(".md"),
            EntryType::Connection => Some(".conninfomd"),
            EntryType::Folder | EntryType::Process | EntryType::Blob => None,
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            EntryType::Folder => "folder",
            EntryType::GenericObject => "data",
            EntryType::Process => "process",
            EntryType::Blob => "blob",
            EntryType::Connection => "connection",
        }
    }
}

impl Display for EntryType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.type_name())
    }
}

/// Identity shared by folders and data entries
pub(crate) struct EntryCore {
    id: Uuid,
    name: RwLock<String>,
    parent: RwLock<Weak<Folder>>,
    context: Arc<RepositoryContext>,
}

impl EntryCore {
    pub(crate) fn new(name: &str, parent: Weak<Folder>, context: Arc<RepositoryContext>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: RwLock::new(name.to_string()),
            parent: RwLock::new(parent),
            context,
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn name(&self) -> String {
        self.name.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = name.to_string();
    }

    pub(crate) fn parent(&self) -> Option<Arc<Folder>> {
        self.parent.read().unwrap_or_else(|poisoned| poisoned.into_inner()).upgrade()
    }

    pub(crate) fn set_parent(&self, parent: &Arc<Folder>) {
        *self.parent.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::downgrade(parent);
    }

    pub(crate) fn context(&self) -> &Arc<RepositoryContext> {
        &self.context
    }

    /// Location below the parent; an entry whose parent is gone hangs off the root
    pub(crate) fn location(&self) -> Location {
        match self.parent() {
            Some(parent) => parent.location().join(&self.name()),
            None => Location::root(self.context.config.name.clone()).join(&self.name()),
        }
    }
}

/// A node of the repository tree
#[derive(Clone)]
pub enum Entry {
    Folder(Arc<Folder>),
    Data(Arc<DataEntry>),
}

impl Entry {
    pub fn name(&self) -> String {
        self.core().name()
    }

    pub fn location(&self) -> Location {
        match self {
            Entry::Folder(folder) => folder.location(),
            Entry::Data(data) => data.location(),
        }
    }

    pub fn entry_type(&self) -> EntryType {
        match self {
            Entry::Folder(_) => EntryType::Folder,
            Entry::Data(data) => data.entry_type(),
        }
    }

    pub fn containing_folder(&self) -> Option<Arc<Folder>> {
        self.core().parent()
    }

    pub fn as_folder(&self) -> Option<&Arc<Folder>> {
        match self {
            Entry::Folder(folder) => Some(folder),
            Entry::Data(_) => None,
        }
    }

    pub fn as_data(&self) -> Option<&Arc<DataEntry>> {
        match self {
            Entry::Data(data) => Some(data),
            Entry::Folder(_) => None,
        }
    }

    /// Identity comparison
    pub fn is_same(&self, other: &Entry) -> bool {
        match (self, other) {
            (Entry::Folder(a), Entry::Folder(b)) => Arc::ptr_eq(a, b),
            (Entry::Data(a), Entry::Data(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Renames the entry within its current folder.
    ///
    /// Returns `Ok(false)` when `new_name` equals the current name. The backing
    /// files are renamed one after another; a failure part way through leaves
    /// the earlier renames in place.
    pub fn rename(&self, new_name: &str) -> Result<bool> {
        validate_name(new_name)?;
        connections_policy::check_rename(self, new_name)?;

        let (parent, old_name) = self.with_parent_locked(|parent| {
            let old_name = self.name();
            if old_name == new_name {
                return Ok(None);
            }
            let location = parent.location();
            parent.with_children(|children| children.check_available(new_name, Some(self), &location))??;
            let dir = parent.directory()?;
            self.relocate_artifacts(&dir, &old_name, &dir, new_name)?;
            self.core().set_name(new_name);
            parent.with_children_mut(|children| children.sort())?;
            Ok(Some(old_name))
        })?;
        let Some(old_name) = old_name else {
            return Ok(false);
        };

        info!("Renamed {} '{}' to {}", self.entry_type(), old_name, self.location());
        self.core().context().listeners.fire_entry_moved(self, &parent, &old_name);
        Ok(true)
    }

    /// Moves the entry into `new_parent`, optionally renaming it on the way.
    ///
    /// Source and target folder are both locked while the files move and the
    /// entry changes folders.
    pub fn move_to(&self, new_parent: &Arc<Folder>, new_name: Option<&str>) -> Result<bool> {
        loop {
            let source = self.parent_or_err()?;
            if Arc::ptr_eq(&source, new_parent) {
                return match new_name {
                    Some(name) => self.rename(name),
                    None => Ok(false),
                };
            }

            let moved = Folder::with_both_locked(&source, new_parent, || {
                if !self.is_child_of(&source) {
                    return Ok(None);
                }
                let former_name = self.name();
                let target_name = new_name.unwrap_or(former_name.as_str()).to_string();
                validate_name(&target_name)?;
                connections_policy::check_move(self, new_parent, &target_name)?;
                if let Entry::Folder(folder) = self {
                    if new_parent.is_within(folder) {
                        return Err(RepositoryError::new(
                            ErrorKind::InvalidMove,
                            format!("cannot move {} into itself or a descendant", folder.location()),
                        )
                        .with_location(new_parent.location().to_string()));
                    }
                }

                let target_location = new_parent.location();
                new_parent
                    .with_children(|children| children.check_available(&target_name, None, &target_location))??;
                let source_dir = source.directory()?;
                let target_dir = new_parent.directory()?;
                self.relocate_artifacts(&source_dir, &former_name, &target_dir, &target_name)?;
                self.core().set_name(&target_name);
                self.core().set_parent(new_parent);
                new_parent.with_children_mut(|children| children.insert(self.clone()))?;
                source.with_children_mut(|children| children.remove(self))?;
                Ok(Some(former_name))
            })?;

            // Moved elsewhere before the locks were acquired; start over
            let Some(former_name) = moved else {
                continue;
            };
            info!(
                "Moved {} '{}' from {} to {}",
                self.entry_type(),
                former_name,
                source.location(),
                self.location()
            );
            self.core().context().listeners.fire_entry_moved(self, &source, &former_name);
            return Ok(true);
        }
    }

    /// Removes every backing file, then detaches the entry from its folder.
    ///
    /// Files that are already gone are not an error, so deleting twice is fine.
    pub fn delete(&self) -> Result<()> {
        connections_policy::check_mutable(self)?;

        let (parent, index) = self.with_parent_locked(|parent| {
            let dir = parent.directory()?;
            match self {
                Entry::Folder(folder) => entry_fs_repository::remove_folder(&dir.join(folder.name()))?,
                Entry::Data(data) => {
                    entry_fs_repository::remove_data_artifacts(&dir, &data.name(), data.entry_type())?
                }
            }
            parent.with_children_mut(|children| children.remove(self))
        })?;

        if let Entry::Data(data) = self {
            self.core().context().metadata_cache.invalidate(&data.id());
        }

        match index {
            Some(index) => {
                info!("Deleted {} {}", self.entry_type(), self.location());
                self.core().context().listeners.fire_entry_removed(self, &parent, index);
            }
            None => tracing::debug!("{} was already detached", self.location()),
        }
        Ok(())
    }

    pub(crate) fn core(&self) -> &EntryCore {
        match self {
            Entry::Folder(folder) => folder.core(),
            Entry::Data(data) => data.core(),
        }
    }

    /// Runs `f` with the containing folder exclusively locked. Retries when a
    /// concurrent move changed the folder before the lock was acquired.
    fn with_parent_locked<T>(&self, f: impl Fn(&Arc<Folder>) -> Result<T>) -> Result<(Arc<Folder>, T)> {
        loop {
            let parent = self.parent_or_err()?;
            let _exclusive = parent.lock_exclusive()?;
            if self.is_child_of(&parent) {
                let value = f(&parent)?;
                return Ok((parent.clone(), value));
            }
        }
    }

    fn is_child_of(&self, folder: &Arc<Folder>) -> bool {
        self.containing_folder().map_or(false, |parent| Arc::ptr_eq(&parent, folder))
    }

    fn parent_or_err(&self) -> Result<Arc<Folder>> {
        self.containing_folder().ok_or_else(|| match self {
            Entry::Folder(folder) if folder.is_root() => RepositoryError::new(
                ErrorKind::RootFolderImmutable,
                "the repository root cannot be renamed, moved or deleted",
            )
            .with_location(folder.location().to_string()),
            _ => RepositoryError::not_found("containing folder", self.location().to_string()),
        })
    }

    fn relocate_artifacts(&self, from_dir: &Path, from_name: &str, to_dir: &Path, to_name: &str) -> Result<()> {
        match self {
            Entry::Folder(_) => entry_fs_repository::relocate_folder(&from_dir.join(from_name), &to_dir.join(to_name)),
            Entry::Data(data) => entry_fs_repository::relocate_data_artifacts(
                from_dir,
                from_name,
                to_dir,
                to_name,
                data.entry_type(),
            ),
        }
    }
}

impl Debug for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Entry({} {})", self.entry_type(), self.location())
    }
}

impl From<Arc<Folder>> for Entry {
    fn from(folder: Arc<Folder>) -> Self {
        Entry::Folder(folder)
    }
}

impl From<Arc<DataEntry>> for Entry {
    fn from(data: Arc<DataEntry>) -> Self {
        Entry::Data(data)
    }
}
