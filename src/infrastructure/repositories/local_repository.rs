use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::common::config::RepositoryConfig;
use crate::common::errors::{ErrorContext, RepositoryError, Result};
use crate::domain::entities::entry::Entry;
use crate::domain::entities::folder::Folder;
use crate::domain::entities::payload::MetaData;
use crate::domain::repositories::repository_listener::{ListenerId, ListenerRegistry, RepositoryListener};
use crate::domain::services::connections_policy::{is_connections_folder_name, CONNECTIONS_FOLDER_NAME};
use crate::domain::services::path_service::Location;
use crate::infrastructure::services::entry_creator_registry::EntryCreatorRegistry;
use crate::infrastructure::services::metadata_cache::MetadataCache;
use crate::infrastructure::services::payload_codec::{JsonObjectCodec, ObjectCodec};

/// State shared by every entry of one repository
pub(crate) struct RepositoryContext {
    pub(crate) config: RepositoryConfig,
    pub(crate) registry: EntryCreatorRegistry,
    pub(crate) listeners: ListenerRegistry,
    pub(crate) metadata_cache: MetadataCache<Uuid, MetaData>,
    pub(crate) codec: Arc<dyn ObjectCodec>,
}

/// A repository rooted at a local directory
pub struct Repository {
    context: Arc<RepositoryContext>,
    root: Arc<Folder>,
}

impl Repository {
    /// Opens the repository with the default entry types and codec
    pub fn open(config: RepositoryConfig) -> Result<Self> {
        Self::builder(config).open()
    }

    pub fn builder(config: RepositoryConfig) -> RepositoryBuilder {
        RepositoryBuilder {
            config,
            registry: EntryCreatorRegistry::with_defaults(),
            codec: Arc::new(JsonObjectCodec),
        }
    }

    pub fn name(&self) -> &str {
        &self.context.config.name
    }

    pub fn root(&self) -> &Arc<Folder> {
        &self.root
    }

    pub fn root_path(&self) -> &Path {
        &self.context.config.root_path
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.context.config
    }

    pub fn add_listener(&self, listener: Arc<dyn RepositoryListener>) -> ListenerId {
        self.context.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.context.listeners.remove(id)
    }

    pub fn metadata_cache(&self) -> &MetadataCache<Uuid, MetaData> {
        &self.context.metadata_cache
    }

    pub fn connections_folder(&self) -> Result<Arc<Folder>> {
        self.root
            .get_subfolders()?
            .into_iter()
            .find(|folder| folder.is_connections_folder())
            .ok_or_else(|| RepositoryError::not_found("Connections folder", self.root.location().to_string()))
    }

    /// Resolves a location such as `//Local Repository/Data/Set1`, loading
    /// folders along the way. Locations of other repositories resolve to `None`.
    pub fn locate(&self, location: &str) -> Result<Option<Entry>> {
        let Some(location) = Location::parse(location) else {
            return Ok(None);
        };
        if location.repository() != self.name() {
            return Ok(None);
        }

        let mut current = Entry::Folder(self.root.clone());
        for segment in location.segments() {
            let Entry::Folder(folder) = &current else {
                return Ok(None);
            };
            match folder.get_entry(segment)? {
                Some(entry) => current = entry,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    pub fn refresh(&self) -> Result<()> {
        self.root.refresh()
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.context.config.name)
            .field("root_path", &self.context.config.root_path)
            .finish()
    }
}

/// Opens a repository with a custom entry-type registry or object codec
pub struct RepositoryBuilder {
    config: RepositoryConfig,
    registry: EntryCreatorRegistry,
    codec: Arc<dyn ObjectCodec>,
}

impl RepositoryBuilder {
    pub fn with_registry(mut self, registry: EntryCreatorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn ObjectCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn open(self) -> Result<Repository> {
        let root_path = self.config.root_path.clone();
        ensure_root_directory(&root_path)?;
        ensure_connections_folder(&root_path)?;

        let context = Arc::new(RepositoryContext {
            metadata_cache: MetadataCache::new(self.config.cache.max_entries),
            config: self.config,
            registry: self.registry,
            listeners: ListenerRegistry::new(),
            codec: self.codec,
        });
        let root = Folder::new_root(root_path, context.clone());

        info!("Opened repository {} at {}", root.location(), context.config.root_path.display());
        Ok(Repository { context, root })
    }
}

fn ensure_root_directory(path: &Path) -> Result<()> {
    if path.exists() && !path.is_dir() {
        return Err(RepositoryError::initialization(format!(
            "{} is not a directory",
            path.display()
        )));
    }
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            RepositoryError::initialization(format!("cannot create {}", path.display())).with_source(e)
        })?;
        info!("Created repository directory {}", path.display());
    }

    // Check writability with a file that removes itself on drop
    tempfile::Builder::new()
        .prefix(".localrepo-writable")
        .tempfile_in(path)
        .map_err(|e| RepositoryError::initialization(format!("{} is not writable", path.display())).with_source(e))?;
    Ok(())
}

/// Makes sure the root has a Connections folder. Windows resolves the name
/// case-insensitively on its own; elsewhere the root is searched for any
/// capitalization before one is created.
fn ensure_connections_folder(root_path: &Path) -> Result<()> {
    let found: Vec<String> = if cfg!(windows) {
        let path = root_path.join(CONNECTIONS_FOLDER_NAME);
        if path.is_dir() {
            vec![CONNECTIONS_FOLDER_NAME.to_string()]
        } else {
            Vec::new()
        }
    } else {
        fs::read_dir(root_path)
            .with_path(root_path)?
            .filter_map(|item| item.ok())
            .filter(|item| item.path().is_dir())
            .filter_map(|item| item.file_name().into_string().ok())
            .filter(|name| is_connections_folder_name(name))
            .collect()
    };

    match found.len() {
        0 => {
            let path = root_path.join(CONNECTIONS_FOLDER_NAME);
            fs::create_dir(&path).with_path(&path)?;
            info!("Created Connections folder at {}", path.display());
        }
        1 => {}
        _ => warn!("Found several Connections folders in {}: {:?}", root_path.display(), found),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::errors::ErrorKind;
    use crate::domain::entities::entry::EntryType;
    use crate::domain::entities::payload::{ConnectionInformation, IoObject};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};
    use std::thread;
    use tempfile::tempdir;

    fn open(path: &Path) -> Repository {
        Repository::open(RepositoryConfig::new("Local", path)).unwrap()
    }

    fn payload() -> IoObject {
        IoObject::new("ExampleSet", json!([[1.0, 2.0], [3.0, 4.0]])).with_annotation("rows", "2")
    }

    #[test]
    fn test_open_creates_root_and_connections_folder() {
        let dir = tempdir().unwrap();
        let root_path = dir.path().join("nested").join("repo");
        let repo = open(&root_path);

        assert!(root_path.join("Connections").is_dir());
        let connections = repo.connections_folder().unwrap();
        assert!(connections.is_connections_folder());
        assert_eq!(connections.location().to_string(), "//Local/Connections");
        // No scratch file is left behind
        assert_eq!(fs::read_dir(&root_path).unwrap().count(), 1);
    }

    #[test]
    fn test_open_reuses_connections_folder_in_any_case() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("connections")).unwrap();
        let repo = open(dir.path());

        let subfolders = repo.root().get_subfolders().unwrap();
        assert_eq!(subfolders.len(), 1);
        assert_eq!(subfolders[0].name(), "connections");
        assert!(subfolders[0].is_connections_folder());
    }

    #[test]
    fn test_open_rejects_file_as_root() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain-file");
        fs::write(&file, b"x").unwrap();

        let err = Repository::open(RepositoryConfig::new("Local", &file)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Initialization);
    }

    #[test]
    fn test_create_and_retrieve_object() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());

        let data = repo.root().create_folder("Data").unwrap();
        data.create_io_object_entry("Set1", &payload()).unwrap();

        let entries = data.get_data_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), "Set1");
        assert_eq!(entries[0].retrieve_data().unwrap(), payload());
        assert!(dir.path().join("Data").join("Set1.ioo").exists());
        assert!(dir.path().join("Data").join("Set1.md").exists());
        assert!(dir.path().join("Data").join("Set1.properties").exists());
    }

    #[test]
    fn test_duplicate_names_are_rejected_case_insensitively() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let data = repo.root().create_folder("Data").unwrap();
        data.create_io_object_entry("Set1", &payload()).unwrap();

        let err = data.create_folder("set1").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateName);
        let err = data.create_process_entry("SET1", "<process/>").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateName);

        data.create_folder("Data").unwrap();
        let err = data.create_folder("DATA").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateName);
        assert_eq!(err.location.as_deref(), Some("//Local/Data"));
    }

    #[test]
    fn test_connections_folder_rejects_other_types() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let connections = repo.connections_folder().unwrap();

        let err = connections.create_io_object_entry("leak", &payload()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConnectionsFolderTypeViolation);
        assert!(!dir.path().join("Connections").join("leak.ioo").exists());
        assert!(!dir.path().join("Connections").join("leak.properties").exists());

        let err = connections.create_folder("nested").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConnectionsFolderTypeViolation);

        let err = repo
            .root()
            .create_connection_entry("db", &ConnectionInformation::new("db", "jdbc"))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConnectionOutsideConnectionsFolder);
    }

    #[test]
    fn test_connections_folder_is_immutable_and_unique() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let connections = repo.connections_folder().unwrap();
        let other = repo.root().create_folder("Other").unwrap();

        assert_eq!(connections.rename("Links").unwrap_err().kind, ErrorKind::ConnectionsFolderImmutable);
        assert_eq!(connections.delete().unwrap_err().kind, ErrorKind::ConnectionsFolderImmutable);
        assert_eq!(
            connections.move_to(&other, None).unwrap_err().kind,
            ErrorKind::ConnectionsFolderImmutable
        );
        assert_eq!(
            repo.root().create_folder("CONNECTIONS").unwrap_err().kind,
            ErrorKind::DuplicateConnectionsFolder
        );
        assert_eq!(other.rename("connections").unwrap_err().kind, ErrorKind::DuplicateConnectionsFolder);
        // Below the root the name is ordinary
        other.create_folder("Connections").unwrap();

        assert_eq!(repo.root().delete().unwrap_err().kind, ErrorKind::RootFolderImmutable);
    }

    #[test]
    fn test_rename_keeps_suffixes() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let data = repo.root().create_folder("Data").unwrap();
        let set = data.create_io_object_entry("Set1", &payload()).unwrap();

        assert!(set.rename("Set2").unwrap());

        let folder_dir = dir.path().join("Data");
        for suffix in [".ioo", ".md", ".properties"] {
            assert!(!folder_dir.join(format!("Set1{}", suffix)).exists());
            assert!(folder_dir.join(format!("Set2{}", suffix)).exists());
        }
        assert_eq!(set.location().to_string(), "//Local/Data/Set2");
        assert_eq!(set.retrieve_data().unwrap(), payload());
        assert!(!set.rename("Set2").unwrap());
    }

    #[test]
    fn test_move_into_connections_folder_fails_without_side_effects() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let data = repo.root().create_folder("Data").unwrap();
        let set = data.create_io_object_entry("Set1", &payload()).unwrap();
        let connections = repo.connections_folder().unwrap();

        let err = set.move_to(&connections, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConnectionsFolderTypeViolation);
        assert!(Arc::ptr_eq(&set.containing_folder().unwrap(), &data));
        assert!(dir.path().join("Data").join("Set1.ioo").exists());
        assert_eq!(fs::read_dir(dir.path().join("Connections")).unwrap().count(), 0);
        assert!(data.contains_entry("Set1").unwrap());
    }

    #[test]
    fn test_connection_cannot_leave_connections_folder() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let connections = repo.connections_folder().unwrap();
        let other = repo.root().create_folder("Other").unwrap();
        let db = connections
            .create_connection_entry("db", &ConnectionInformation::new("db", "jdbc"))
            .unwrap();

        let err = db.move_to(&other, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConnectionOutsideConnectionsFolder);

        for suffix in [".conninfo", ".conninfomd", ".properties"] {
            assert!(dir.path().join("Connections").join(format!("db{}", suffix)).exists());
        }
        assert_eq!(fs::read_dir(dir.path().join("Other")).unwrap().count(), 0);
        assert!(connections.contains_entry("db").unwrap());
        assert!(Arc::ptr_eq(&db.containing_folder().unwrap(), &connections));
    }

    #[test]
    fn test_rename_and_move_keep_names_unique_ignoring_case() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let data = repo.root().create_folder("Data").unwrap();
        let target = repo.root().create_folder("Target").unwrap();
        let a = data.create_process_entry("a", "<process/>").unwrap();
        data.create_process_entry("b", "<process/>").unwrap();
        let x = data.create_process_entry("x", "<process id=\"x\"/>").unwrap();
        target.create_process_entry("X", "<process id=\"X\"/>").unwrap();

        let err = a.rename("B").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateName);
        assert_eq!(a.name(), "a");
        assert!(dir.path().join("Data").join("a.rmp").exists());
        assert!(dir.path().join("Data").join("b.rmp").exists());
        assert!(!dir.path().join("Data").join("B.rmp").exists());

        let err = x.move_to(&target, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateName);
        assert!(Arc::ptr_eq(&x.containing_folder().unwrap(), &data));
        assert!(data.contains_entry("x").unwrap());
        assert_eq!(x.retrieve_xml().unwrap(), "<process id=\"x\"/>");
        assert_eq!(
            fs::read_to_string(dir.path().join("Target").join("X.rmp")).unwrap(),
            "<process id=\"X\"/>"
        );
        assert_eq!(target.get_data_entries().unwrap().len(), 1);

        // Changing only the case of its own name is fine
        assert!(a.rename("A").unwrap());
        assert!(dir.path().join("Data").join("A.rmp").exists());
    }

    #[test]
    fn test_move_between_folders() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let source = repo.root().create_folder("Source").unwrap();
        let target = repo.root().create_folder("Target").unwrap();
        let set = source.create_io_object_entry("Set1", &payload()).unwrap();

        assert!(set.move_to(&target, Some("Moved")).unwrap());

        assert!(source.get_data_entries().unwrap().is_empty());
        assert_eq!(target.get_data_entries().unwrap()[0].name(), "Moved");
        assert!(dir.path().join("Target").join("Moved.ioo").exists());
        assert!(!dir.path().join("Source").join("Set1.ioo").exists());
        assert_eq!(set.location().to_string(), "//Local/Target/Moved");
    }

    #[test]
    fn test_folder_cannot_move_below_itself() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let outer = repo.root().create_folder("Outer").unwrap();
        let inner = outer.create_folder("Inner").unwrap();

        assert_eq!(outer.move_to(&inner, None).unwrap_err().kind, ErrorKind::InvalidMove);
        assert!(dir.path().join("Outer").join("Inner").is_dir());

        assert!(inner.move_to(repo.root(), None).unwrap());
        assert!(dir.path().join("Inner").is_dir());
        assert_eq!(inner.location().to_string(), "//Local/Inner");
    }

    #[test]
    fn test_delete_twice_is_tolerated() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let data = repo.root().create_folder("Data").unwrap();
        let flow = data.create_process_entry("flow", "<process/>").unwrap();
        let blob = data.create_blob_entry("notes.txt", None).unwrap();

        fs::remove_file(dir.path().join("Data").join("notes.txt.blob")).unwrap();
        blob.delete().unwrap();
        flow.delete().unwrap();
        flow.delete().unwrap();

        assert!(data.get_data_entries().unwrap().is_empty());
        assert_eq!(fs::read_dir(dir.path().join("Data")).unwrap().count(), 0);

        data.delete().unwrap();
        assert!(!dir.path().join("Data").exists());
        assert!(!repo.root().contains_entry("Data").unwrap());
    }

    #[test]
    fn test_metadata_survives_eviction() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let data = repo.root().create_folder("Data").unwrap();
        let set = data.create_io_object_entry("Set1", &payload()).unwrap();

        repo.metadata_cache().clear();
        match set.retrieve_metadata().unwrap() {
            MetaData::Object(md) => {
                assert_eq!(md.object_class, "ExampleSet");
                assert_eq!(md.description, "ExampleSet (2 items)");
            }
            other => panic!("unexpected metadata {:?}", other),
        }
        assert_eq!(repo.metadata_cache().stats().misses, 1);

        set.retrieve_metadata().unwrap();
        assert_eq!(repo.metadata_cache().stats().hits, 1);

        fs::remove_file(dir.path().join("Data").join("Set1.md")).unwrap();
        repo.metadata_cache().clear();
        assert_eq!(set.retrieve_metadata().unwrap_err().kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_connection_metadata_is_restored_from_payload() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let connections = repo.connections_folder().unwrap();
        let info = ConnectionInformation::new("warehouse", "jdbc")
            .with_parameter("host", "db.internal")
            .with_credential("password", "hunter2");
        let entry = connections.create_connection_entry("warehouse", &info).unwrap();
        assert_eq!(entry.connection_type().unwrap().as_deref(), Some("jdbc"));

        let md_path = dir.path().join("Connections").join("warehouse.conninfomd");
        fs::remove_file(&md_path).unwrap();
        repo.metadata_cache().clear();

        match entry.retrieve_metadata().unwrap() {
            MetaData::Connection(config) => assert_eq!(config, info.configuration),
            other => panic!("unexpected metadata {:?}", other),
        }
        assert!(md_path.exists());
        assert!(!fs::read_to_string(&md_path).unwrap().contains("hunter2"));
        assert!(!entry.check_metadata_file().unwrap());
        assert_eq!(entry.retrieve_connection().unwrap(), info);
    }

    #[test]
    fn test_reopened_repository_sees_existing_entries() {
        let dir = tempdir().unwrap();
        {
            let repo = open(dir.path());
            let data = repo.root().create_folder("Data").unwrap();
            data.create_io_object_entry("Set1", &payload()).unwrap();
            data.create_process_entry("flow", "<process/>").unwrap();
            repo.connections_folder()
                .unwrap()
                .create_connection_entry("db", &ConnectionInformation::new("db", "jdbc"))
                .unwrap();
        }
        // Stray files that map to no entry
        fs::write(dir.path().join("Data").join("readme.txt"), b"hi").unwrap();
        fs::write(dir.path().join("Data").join(".hidden.ioo"), b"{}").unwrap();
        fs::write(dir.path().join("Data").join("sneaky.conninfo"), b"{}").unwrap();

        let repo = open(dir.path());
        let data = repo.locate("//Local/Data").unwrap().unwrap();
        let data = data.as_folder().unwrap();
        let types: Vec<EntryType> = data.get_data_entries().unwrap().iter().map(|e| e.entry_type()).collect();
        assert_eq!(types, vec![EntryType::Process, EntryType::GenericObject]);

        let db = repo.locate("//Local/connections/DB").unwrap().unwrap();
        assert_eq!(db.entry_type(), EntryType::Connection);
        assert_eq!(db.as_data().unwrap().connection_type().unwrap().as_deref(), Some("jdbc"));

        assert!(repo.locate("//Local/Data/missing").unwrap().is_none());
        assert!(repo.locate("//Elsewhere/Data").unwrap().is_none());
        assert!(repo.locate("//Local").unwrap().unwrap().as_folder().unwrap().is_root());
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl RepositoryListener for Recorder {
        fn entry_added(&self, entry: &Entry, parent: &Arc<Folder>) {
            self.push(format!("added {} to {}", entry.name(), parent.name()));
        }

        fn entry_removed(&self, entry: &Entry, _parent: &Arc<Folder>, index: usize) {
            self.push(format!("removed {} at {}", entry.name(), index));
        }

        fn entry_moved(&self, entry: &Entry, _former_parent: &Arc<Folder>, former_name: &str) {
            self.push(format!("moved {} to {}", former_name, entry.name()));
        }

        fn entry_changed(&self, entry: &Entry) {
            self.push(format!("changed {}", entry.name()));
        }

        fn folder_refreshed(&self, folder: &Arc<Folder>) {
            self.push(format!("refreshed {}", folder.name()));
        }
    }

    impl Recorder {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    #[test]
    fn test_listeners_hear_every_change() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let recorder = Arc::new(Recorder::default());
        let id = repo.add_listener(recorder.clone());

        let data = repo.root().create_folder("Data").unwrap();
        data.create_folder("Sub").unwrap();
        let flow = data.create_process_entry("flow", "<process/>").unwrap();
        flow.store_xml("<process version=\"2\"/>").unwrap();
        flow.rename("flow2").unwrap();
        flow.delete().unwrap();
        data.refresh().unwrap();

        assert_eq!(
            recorder.take(),
            vec![
                "added Data to Local",
                "added Sub to Data",
                "added flow to Data",
                "changed flow",
                "moved flow to flow2",
                "removed flow2 at 1",
                "refreshed Data",
            ]
        );

        assert!(repo.remove_listener(id));
        repo.root().create_folder("Quiet").unwrap();
        assert!(recorder.take().is_empty());
    }

    struct Reentrant {
        seen: AtomicUsize,
    }

    impl RepositoryListener for Reentrant {
        fn entry_added(&self, _entry: &Entry, parent: &Arc<Folder>) {
            // Locks are released before listeners run
            let count = parent.get_entries().map(|entries| entries.len()).unwrap_or(0);
            self.seen.store(count, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_listener_may_read_the_folder_it_hears_about() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let listener = Arc::new(Reentrant { seen: AtomicUsize::new(0) });
        repo.add_listener(listener.clone());

        repo.root().create_folder("Data").unwrap();
        assert_eq!(listener.seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_first_reads_scan_once() {
        let dir = tempdir().unwrap();
        for name in ["gamma", "Alpha", "beta"] {
            fs::create_dir_all(dir.path().join("Data").join(name)).unwrap();
        }
        let repo = Arc::new(open(dir.path()));
        let data = repo.root().get_entry("Data").unwrap().unwrap();
        let data = data.as_folder().unwrap().clone();
        assert!(!data.is_loaded());

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let data = data.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    data.get_subfolders()
                        .unwrap()
                        .iter()
                        .map(|f| f.name())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<Vec<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results[0], vec!["Alpha", "beta", "gamma"]);
        assert_eq!(results[0], results[1]);
        assert_eq!(data.load_count(), 1);
    }

    #[test]
    fn test_concurrent_creates_in_one_folder() {
        let dir = tempdir().unwrap();
        let repo = Arc::new(open(dir.path()));
        let data = repo.root().create_folder("Data").unwrap();

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let data = data.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    // Pairs of threads race for the same name
                    data.create_process_entry(&format!("flow{}", i / 2), "<process/>").is_ok()
                })
            })
            .collect();
        let created = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();

        assert_eq!(created, 4);
        assert_eq!(data.get_data_entries().unwrap().len(), 4);
    }

    #[test]
    fn test_move_racing_rename_keeps_files_and_entry_in_step() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let source = repo.root().create_folder("Source").unwrap();
        let target = repo.root().create_folder("Target").unwrap();

        for i in 0..50 {
            let flow = source.create_process_entry(&format!("flow{}", i), "<process/>").unwrap();
            let barrier = Arc::new(Barrier::new(2));

            let mover = {
                let (flow, target, barrier) = (flow.clone(), target.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    flow.move_to(&target, None)
                })
            };
            let renamer = {
                let (flow, barrier) = (flow.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    flow.rename(&format!("R{}", i))
                })
            };
            assert!(mover.join().unwrap().unwrap());
            assert!(renamer.join().unwrap().unwrap());

            assert_eq!(flow.name(), format!("R{}", i));
            assert!(Arc::ptr_eq(&flow.containing_folder().unwrap(), &target));
            assert!(flow.primary_file().unwrap().exists(), "no file behind {}", flow.location());
            assert_eq!(flow.retrieve_xml().unwrap(), "<process/>");
        }

        assert!(source.get_data_entries().unwrap().is_empty());
        assert_eq!(target.get_data_entries().unwrap().len(), 50);
        assert_eq!(fs::read_dir(dir.path().join("Source")).unwrap().count(), 0);
    }
}
