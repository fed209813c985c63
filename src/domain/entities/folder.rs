use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::errors::{ErrorContext, ErrorKind, RepositoryError, Result};
use crate::common::folder_lock::{FolderLock, FolderLockGuard};
use crate::domain::entities::data_entry::{DataEntry, DataKind};
use crate::domain::entities::entry::{Entry, EntryCore, EntryType, PROPERTIES_SUFFIX};
use crate::domain::entities::payload::{ConnectionInformation, IoObject};
use crate::domain::services::connections_policy;
use crate::domain::services::path_service::{is_hidden, names_collide, validate_name, Location};
use crate::infrastructure::repositories::entry_fs_repository;
use crate::infrastructure::repositories::local_repository::RepositoryContext;

/// Children of a loaded folder, each list sorted by name
#[derive(Default)]
pub(crate) struct FolderChildren {
    subfolders: Vec<Arc<Folder>>,
    data_entries: Vec<Arc<DataEntry>>,
}

impl FolderChildren {
    /// Fails if a child other than `except` already uses `name`, ignoring case
    pub(crate) fn check_available(&self, name: &str, except: Option<&Entry>, folder_location: &Location) -> Result<()> {
        let is_except = |candidate: Entry| except.map_or(false, |e| e.is_same(&candidate));

        let folder_clash = self
            .subfolders
            .iter()
            .any(|f| names_collide(&f.name(), name) && !is_except(Entry::Folder(f.clone())));
        let data_clash = self
            .data_entries
            .iter()
            .any(|d| names_collide(&d.name(), name) && !is_except(Entry::Data(d.clone())));

        if folder_clash || data_clash {
            return Err(RepositoryError::duplicate_name(name, &folder_location.to_string()));
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, entry: Entry) {
        match entry {
            Entry::Folder(folder) => self.subfolders.push(folder),
            Entry::Data(data) => self.data_entries.push(data),
        }
        self.sort();
    }

    /// Removes `entry`, returning its index in the combined list
    /// (subfolders first, then data entries)
    pub(crate) fn remove(&mut self, entry: &Entry) -> Option<usize> {
        match entry {
            Entry::Folder(folder) => {
                let pos = self.subfolders.iter().position(|f| Arc::ptr_eq(f, folder))?;
                self.subfolders.remove(pos);
                Some(pos)
            }
            Entry::Data(data) => {
                let pos = self.data_entries.iter().position(|d| Arc::ptr_eq(d, data))?;
                self.data_entries.remove(pos);
                Some(self.subfolders.len() + pos)
            }
        }
    }

    pub(crate) fn sort(&mut self) {
        self.subfolders.sort_by_cached_key(|f| sort_key(&f.name()));
        self.data_entries.sort_by_cached_key(|d| sort_key(&d.name()));
    }

    fn find(&self, name: &str) -> Option<Entry> {
        self.subfolders
            .iter()
            .find(|f| names_collide(&f.name(), name))
            .map(|f| Entry::Folder(f.clone()))
            .or_else(|| {
                self.data_entries
                    .iter()
                    .find(|d| names_collide(&d.name(), name))
                    .map(|d| Entry::Data(d.clone()))
            })
    }
}

fn sort_key(name: &str) -> (String, String) {
    (name.to_lowercase(), name.to_string())
}

/// `Loading` is only ever visible to the thread running the scan
enum ChildrenState {
    Unloaded,
    Loading(FolderChildren),
    Loaded(FolderChildren),
}

impl ChildrenState {
    fn children(&self) -> Option<&FolderChildren> {
        match self {
            ChildrenState::Unloaded => None,
            ChildrenState::Loading(children) | ChildrenState::Loaded(children) => Some(children),
        }
    }

    fn children_mut(&mut self) -> Option<&mut FolderChildren> {
        match self {
            ChildrenState::Unloaded => None,
            ChildrenState::Loading(children) | ChildrenState::Loaded(children) => Some(children),
        }
    }
}

/// A directory in the repository whose children are read on first access
pub struct Folder {
    core: EntryCore,
    /// Set for the repository root only
    root_path: Option<PathBuf>,
    /// Held across every read and every structural change of the children
    lock: FolderLock,
    /// Only touched while `lock` is held, never across calls out of the folder
    children: Mutex<ChildrenState>,
    load_count: AtomicUsize,
}

impl Folder {
    pub(crate) fn new_root(root_path: PathBuf, context: Arc<RepositoryContext>) -> Arc<Self> {
        let name = context.config.name.clone();
        Arc::new(Self {
            core: EntryCore::new(&name, Weak::new(), context),
            root_path: Some(root_path),
            lock: FolderLock::new(),
            children: Mutex::new(ChildrenState::Unloaded),
            load_count: AtomicUsize::new(0),
        })
    }

    pub(crate) fn new_child(name: &str, parent: &Arc<Folder>) -> Arc<Self> {
        Arc::new(Self {
            core: EntryCore::new(name, Arc::downgrade(parent), parent.core.context().clone()),
            root_path: None,
            lock: FolderLock::new(),
            children: Mutex::new(ChildrenState::Unloaded),
            load_count: AtomicUsize::new(0),
        })
    }

    pub(crate) fn core(&self) -> &EntryCore {
        &self.core
    }

    pub(crate) fn context(&self) -> &Arc<RepositoryContext> {
        self.core.context()
    }

    pub fn id(&self) -> Uuid {
        self.core.id()
    }

    pub fn name(&self) -> String {
        self.core.name()
    }

    pub fn location(&self) -> Location {
        if self.is_root() {
            Location::root(self.context().config.name.clone())
        } else {
            self.core.location()
        }
    }

    pub fn is_root(&self) -> bool {
        self.root_path.is_some()
    }

    /// Whether this is the Connections folder directly below the root
    pub fn is_connections_folder(&self) -> bool {
        !self.is_root()
            && self.core.parent().map_or(false, |parent| parent.is_root())
            && connections_policy::is_connections_folder_name(&self.name())
    }

    pub fn containing_folder(&self) -> Option<Arc<Folder>> {
        self.core.parent()
    }

    /// Backing directory on disk
    pub fn directory(&self) -> Result<PathBuf> {
        if let Some(root_path) = &self.root_path {
            return Ok(root_path.clone());
        }
        match self.core.parent() {
            Some(parent) => Ok(parent.directory()?.join(self.name())),
            None => Err(RepositoryError::not_found("containing folder", self.location().to_string())),
        }
    }

    /// Whether the children have been read; a poisoned lock reads as unloaded
    pub fn is_loaded(&self) -> bool {
        self.children
            .lock()
            .map(|state| matches!(*state, ChildrenState::Loaded(_)))
            .unwrap_or(false)
    }

    /// Number of directory scans performed so far
    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::SeqCst)
    }

    pub fn get_subfolders(self: &Arc<Self>) -> Result<Vec<Arc<Folder>>> {
        self.snapshot(|children| children.subfolders.clone())
    }

    pub fn get_data_entries(self: &Arc<Self>) -> Result<Vec<Arc<DataEntry>>> {
        self.snapshot(|children| children.data_entries.clone())
    }

    /// Subfolders followed by data entries
    pub fn get_entries(self: &Arc<Self>) -> Result<Vec<Entry>> {
        self.snapshot(|children| {
            children
                .subfolders
                .iter()
                .map(|f| Entry::Folder(f.clone()))
                .chain(children.data_entries.iter().map(|d| Entry::Data(d.clone())))
                .collect()
        })
    }

    /// Whether a child named `name` exists, ignoring case
    pub fn contains_entry(self: &Arc<Self>, name: &str) -> Result<bool> {
        self.snapshot(|children| children.find(name).is_some())
    }

    /// Looks up a child by name, ignoring case
    pub fn get_entry(self: &Arc<Self>, name: &str) -> Result<Option<Entry>> {
        self.snapshot(|children| children.find(name))
    }

    /// Forgets the loaded children; the next read scans the directory again
    pub fn refresh(self: &Arc<Self>) -> Result<()> {
        {
            let _exclusive = self.write_lock()?;
            *self.state()? = ChildrenState::Unloaded;
        }
        info!("Refreshed folder {}", self.location());
        self.context().listeners.fire_folder_refreshed(self);
        Ok(())
    }

    pub fn create_folder(self: &Arc<Self>, name: &str) -> Result<Arc<Folder>> {
        validate_name(name)?;
        connections_policy::check_allowed_in(self, EntryType::Folder)?;
        connections_policy::check_folder_name(self, name)?;

        let folder = {
            let _exclusive = self.lock_exclusive()?;
            let location = self.location();
            self.with_children(|children| children.check_available(name, None, &location))??;
            let path = self.directory()?.join(name);
            fs::create_dir(&path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    RepositoryError::duplicate_name(name, &location.to_string()).with_source(e)
                } else {
                    RepositoryError::io(&path, e)
                }
            })?;
            let folder = Folder::new_child(name, self);
            self.with_children_mut(|children| children.insert(Entry::Folder(folder.clone())))?;
            folder
        };

        info!("Created folder {}", folder.location());
        self.context().listeners.fire_entry_added(&Entry::Folder(folder.clone()), self);
        Ok(folder)
    }

    pub fn create_io_object_entry(self: &Arc<Self>, name: &str, object: &IoObject) -> Result<Arc<DataEntry>> {
        self.create_entry(
            name,
            EntryType::GenericObject,
            |name, parent| Ok(DataEntry::new(name, DataKind::GenericObject, parent)),
            |entry| entry.write_object(object),
        )
    }

    pub fn create_process_entry(self: &Arc<Self>, name: &str, process_xml: &str) -> Result<Arc<DataEntry>> {
        self.create_entry(
            name,
            EntryType::Process,
            |name, parent| Ok(DataEntry::new(name, DataKind::Process, parent)),
            |entry| entry.write_xml(process_xml),
        )
    }

    /// Creates a blob entry; its empty primary file exists as soon as the
    /// entry does. Without `mime_type` the type is guessed from the name.
    pub fn create_blob_entry(self: &Arc<Self>, name: &str, mime_type: Option<&str>) -> Result<Arc<DataEntry>> {
        self.create_entry(
            name,
            EntryType::Blob,
            |name, parent| {
                let entry = DataEntry::new(name, DataKind::Blob, parent);
                entry_fs_repository::ensure_file(&entry.primary_file()?)?;
                Ok(entry)
            },
            |entry| match mime_type {
                Some(mime_type) => entry.set_mime_type(mime_type),
                None => entry.set_mime_type(&entry.guess_mime_type()),
            },
        )
    }

    pub fn create_connection_entry(
        self: &Arc<Self>,
        name: &str,
        connection: &ConnectionInformation,
    ) -> Result<Arc<DataEntry>> {
        self.create_entry(
            name,
            EntryType::Connection,
            |name, parent| Ok(DataEntry::new(name, DataKind::connection(), parent)),
            |entry| entry.write_connection(connection),
        )
    }

    /// Creates a data entry: the entry is instantiated by `creator` and
    /// attached, then `store` writes its payload. A failed store detaches the
    /// entry again and removes whatever files it left behind.
    ///
    /// The folder stays exclusively locked throughout; `creator` and `store`
    /// may read or change this folder again from the same thread.
    pub(crate) fn create_entry<C, S>(
        self: &Arc<Self>,
        name: &str,
        entry_type: EntryType,
        creator: C,
        store: S,
    ) -> Result<Arc<DataEntry>>
    where
        C: FnOnce(&str, &Arc<Folder>) -> Result<Arc<DataEntry>>,
        S: FnOnce(&DataEntry) -> Result<()>,
    {
        validate_name(name)?;
        connections_policy::check_allowed_in(self, entry_type)?;

        let entry = {
            let _exclusive = self.lock_exclusive()?;
            let location = self.location();
            let dir = self.directory()?;
            self.with_children(|children| children.check_available(name, None, &location))??;
            let entry = creator(name, self)?;
            self.with_children_mut(|children| children.insert(Entry::Data(entry.clone())))?;

            let stored = entry.write_initial_properties().and_then(|_| store(entry.as_ref()));
            if let Err(e) = stored {
                if let Err(detach) = self.with_children_mut(|children| children.remove(&Entry::Data(entry.clone()))) {
                    warn!("Could not detach {} after failed store: {}", entry.location(), detach);
                }
                if let Err(cleanup) = entry_fs_repository::remove_data_artifacts(&dir, name, entry_type) {
                    warn!("Could not clean up after failed store of {}: {}", entry.location(), cleanup);
                }
                self.context().metadata_cache.invalidate(&entry.id());
                return Err(e.with_location(entry.location().to_string()));
            }
            entry
        };

        info!("Created {} entry {}", entry_type, entry.location());
        self.context().listeners.fire_entry_added(&Entry::Data(entry.clone()), self);
        Ok(entry)
    }

    /// Cheap check whether `child_name` exists on disk with exactly this
    /// capitalization, as a subfolder or through its properties file
    pub fn can_refresh_child(&self, child_name: &str) -> Result<bool> {
        let dir = self.directory()?;
        let candidates = [
            dir.join(child_name),
            dir.join(format!("{}{}", child_name, PROPERTIES_SUFFIX)),
        ];
        for path in candidates.iter() {
            if let Ok(canonical) = fs::canonicalize(path) {
                if canonical.file_name() == path.file_name() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    pub fn rename(self: &Arc<Self>, new_name: &str) -> Result<bool> {
        Entry::Folder(self.clone()).rename(new_name)
    }

    pub fn move_to(self: &Arc<Self>, new_parent: &Arc<Folder>, new_name: Option<&str>) -> Result<bool> {
        Entry::Folder(self.clone()).move_to(new_parent, new_name)
    }

    /// Deletes the folder and everything below it
    pub fn delete(self: &Arc<Self>) -> Result<()> {
        Entry::Folder(self.clone()).delete()
    }

    /// Whether this folder is `ancestor` or lies below it
    pub fn is_within(&self, ancestor: &Arc<Folder>) -> bool {
        if std::ptr::eq(self, Arc::as_ptr(ancestor)) {
            return true;
        }
        let mut current = self.core.parent();
        while let Some(folder) = current {
            if Arc::ptr_eq(&folder, ancestor) {
                return true;
            }
            current = folder.core.parent();
        }
        false
    }

    /// Takes the exclusive lock, loading the children first if needed
    pub(crate) fn lock_exclusive(self: &Arc<Self>) -> Result<FolderLockGuard<'_>> {
        let guard = self.write_lock()?;
        self.ensure_loaded()?;
        Ok(guard)
    }

    /// Runs `f` with two distinct folders exclusively locked. The locks are
    /// always taken in folder id order.
    pub(crate) fn with_both_locked<T>(
        first: &Arc<Folder>,
        second: &Arc<Folder>,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let (a, b) = if first.id() <= second.id() {
            (first, second)
        } else {
            (second, first)
        };
        let _a = a.lock_exclusive()?;
        let _b = b.lock_exclusive()?;
        f()
    }

    /// Reads the loaded children; the caller holds the lock
    pub(crate) fn with_children<T>(&self, f: impl FnOnce(&FolderChildren) -> T) -> Result<T> {
        let state = self.state()?;
        match state.children() {
            Some(children) => Ok(f(children)),
            None => Err(self.dropped_while_locked()),
        }
    }

    /// Changes the loaded children; the caller holds the exclusive lock
    pub(crate) fn with_children_mut<T>(&self, f: impl FnOnce(&mut FolderChildren) -> T) -> Result<T> {
        let mut state = self.state()?;
        match state.children_mut() {
            Some(children) => Ok(f(children)),
            None => Err(self.dropped_while_locked()),
        }
    }

    /// Optimistic read under the shared lock; on a miss the exclusive lock is
    /// taken and the directory scanned once
    fn snapshot<T>(self: &Arc<Self>, f: impl Fn(&FolderChildren) -> T) -> Result<T> {
        {
            let _shared = self.read_lock()?;
            let state = self.state()?;
            if let Some(children) = state.children() {
                return Ok(f(children));
            }
        }
        let _exclusive = self.lock_exclusive()?;
        self.with_children(f)
    }

    /// Scans the directory unless the children are loaded or being loaded by
    /// this thread. Entry creators run without the state mutex held, so they
    /// may read this folder and see the children found so far.
    fn ensure_loaded(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state()?;
            if !matches!(*state, ChildrenState::Unloaded) {
                return Ok(());
            }
            *state = ChildrenState::Loading(FolderChildren::default());
        }

        let scanned = self.scan();
        let mut state = self.state()?;
        match (scanned, std::mem::replace(&mut *state, ChildrenState::Unloaded)) {
            (Ok(()), ChildrenState::Loading(mut children)) => {
                children.sort();
                self.load_count.fetch_add(1, Ordering::SeqCst);
                debug!(
                    "Loaded folder {}: {} subfolders, {} data entries",
                    self.location(),
                    children.subfolders.len(),
                    children.data_entries.len()
                );
                *state = ChildrenState::Loaded(children);
                Ok(())
            }
            // Refreshed from inside the scan
            (Ok(()), other) => {
                *state = other;
                Ok(())
            }
            (Err(e), _) => Err(e),
        }
    }

    fn scan(self: &Arc<Self>) -> Result<()> {
        let dir = self.directory()?;
        let listing: Vec<_> = fs::read_dir(&dir).with_path(&dir)?.collect();
        let registry = &self.context().registry;

        for item in listing {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    warn!("Error reading directory entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            let file_name = match item.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!("Skipping non UTF-8 file name {:?} in {}", raw, dir.display());
                    continue;
                }
            };
            if is_hidden(&file_name) {
                continue;
            }

            let path = item.path();
            if path.is_dir() {
                if connections_policy::is_allowed_in(self, EntryType::Folder) {
                    let folder = Folder::new_child(&file_name, self);
                    self.with_children_mut(|children| children.subfolders.push(folder))?;
                } else {
                    debug!("Skipping subdirectory {} of the Connections folder", file_name);
                }
                continue;
            }

            let Some((name, creator)) = registry.match_file_name(&file_name) else {
                continue;
            };
            if !connections_policy::is_allowed_in(self, creator.entry_type()) {
                debug!("Skipping {} entry {} in {}", creator.entry_type(), name, self.location());
                continue;
            }
            match creator.create(name, self) {
                Ok(entry) => self.with_children_mut(|children| children.data_entries.push(entry))?,
                Err(e) => warn!("Could not instantiate entry for {}: {}", path.display(), e),
            }
        }
        Ok(())
    }

    fn dropped_while_locked(&self) -> RepositoryError {
        RepositoryError::new(
            ErrorKind::Lock,
            format!("children of {} were dropped while the folder was locked", self.location()),
        )
    }

    fn read_lock(&self) -> Result<FolderLockGuard<'_>> {
        self.lock
            .read()
            .map_err(|_| RepositoryError::lock(self.location().to_string()))
    }

    fn write_lock(&self) -> Result<FolderLockGuard<'_>> {
        self.lock
            .write()
            .map_err(|_| RepositoryError::lock(self.location().to_string()))
    }

    fn state(&self) -> Result<MutexGuard<'_, ChildrenState>> {
        self.children
            .lock()
            .map_err(|_| RepositoryError::lock(self.location().to_string()))
    }
}

impl std::fmt::Debug for Folder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Folder({})", self.location())
    }
}
