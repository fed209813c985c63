use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::domain::entities::entry::Entry;
use crate::domain::entities::folder::Folder;

/// Observer of structural and content changes in a repository.
///
/// Callbacks run synchronously on the mutating thread after every folder lock
/// has been released, so they may call back into the repository.
pub trait RepositoryListener: Send + Sync {
    fn entry_added(&self, _entry: &Entry, _parent: &Arc<Folder>) {}

    /// `index` is the former position in the parent's combined list
    /// (subfolders first, then data entries)
    fn entry_removed(&self, _entry: &Entry, _parent: &Arc<Folder>, _index: usize) {}

    fn entry_moved(&self, _entry: &Entry, _former_parent: &Arc<Folder>, _former_name: &str) {}

    fn entry_changed(&self, _entry: &Entry) {}

    fn folder_refreshed(&self, _folder: &Arc<Folder>) {}
}

/// Handle returned on registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Publish/subscribe hub owned by a repository
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn RepositoryListener>)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn RepositoryListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write().push((id, listener));
        id
    }

    /// Returns false if `id` was not registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.write();
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fire_entry_added(&self, entry: &Entry, parent: &Arc<Folder>) {
        for listener in self.snapshot() {
            listener.entry_added(entry, parent);
        }
    }

    pub fn fire_entry_removed(&self, entry: &Entry, parent: &Arc<Folder>, index: usize) {
        for listener in self.snapshot() {
            listener.entry_removed(entry, parent, index);
        }
    }

    pub fn fire_entry_moved(&self, entry: &Entry, former_parent: &Arc<Folder>, former_name: &str) {
        for listener in self.snapshot() {
            listener.entry_moved(entry, former_parent, former_name);
        }
    }

    pub fn fire_entry_changed(&self, entry: &Entry) {
        for listener in self.snapshot() {
            listener.entry_changed(entry);
        }
    }

    pub fn fire_folder_refreshed(&self, folder: &Arc<Folder>) {
        for listener in self.snapshot() {
            listener.folder_refreshed(folder);
        }
    }

    // Listeners run on a copy so they can register or unregister others
    fn snapshot(&self) -> Vec<Arc<dyn RepositoryListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<(ListenerId, Arc<dyn RepositoryListener>)>> {
        self.listeners.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
