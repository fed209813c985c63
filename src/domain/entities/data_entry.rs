use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::common::errors::{ErrorContext, ErrorKind, RepositoryError, Result};
use crate::domain::entities::entry::{Entry, EntryCore, EntryType, PROPERTIES_SUFFIX};
use crate::domain::entities::folder::Folder;
use crate::domain::entities::payload::{ConnectionInformation, IoObject, MetaData};
use crate::domain::services::path_service::Location;
use crate::infrastructure::services::payload_codec;
use crate::infrastructure::services::properties_store::{
    self, Properties, CLASS_KEY, CONNECTION_TYPE_KEY, CREATED_KEY, MIME_TYPE_KEY, OWNER_KEY,
};

/// State only connection entries carry
#[derive(Debug, Default)]
pub struct ConnectionState {
    connection_type: RwLock<Option<String>>,
}

/// Variant of a data entry
#[derive(Debug)]
pub enum DataKind {
    GenericObject,
    Process,
    Blob,
    Connection(ConnectionState),
}

impl DataKind {
    pub fn connection() -> Self {
        DataKind::Connection(ConnectionState::default())
    }

    /// Kind for a data entry type, `None` for folders
    pub fn for_type(entry_type: EntryType) -> Option<Self> {
        match entry_type {
            EntryType::Folder => None,
            EntryType::GenericObject => Some(DataKind::GenericObject),
            EntryType::Process => Some(DataKind::Process),
            EntryType::Blob => Some(DataKind::Blob),
            EntryType::Connection => Some(DataKind::connection()),
        }
    }

    pub fn entry_type(&self) -> EntryType {
        match self {
            DataKind::GenericObject => EntryType::GenericObject,
            DataKind::Process => EntryType::Process,
            DataKind::Blob => EntryType::Blob,
            DataKind::Connection(_) => EntryType::Connection,
        }
    }
}

/// A typed leaf of the repository tree backed by a primary file, an optional
/// metadata file and a properties sidecar
pub struct DataEntry {
    core: EntryCore,
    kind: DataKind,
    /// Serializes read-modify-write cycles on the properties file
    properties_lock: Mutex<()>,
}

impl DataEntry {
    pub(crate) fn new(name: &str, kind: DataKind, parent: &Arc<Folder>) -> Arc<Self> {
        Arc::new(Self {
            core: EntryCore::new(name, Arc::downgrade(parent), parent.context().clone()),
            kind,
            properties_lock: Mutex::new(()),
        })
    }

    pub(crate) fn core(&self) -> &EntryCore {
        &self.core
    }

    pub fn id(&self) -> Uuid {
        self.core.id()
    }

    pub fn name(&self) -> String {
        self.core.name()
    }

    pub fn location(&self) -> Location {
        self.core.location()
    }

    pub fn kind(&self) -> &DataKind {
        &self.kind
    }

    pub fn entry_type(&self) -> EntryType {
        self.kind.entry_type()
    }

    /// Suffix of the primary file
    pub fn suffix(&self) -> &'static str {
        self.entry_type().suffix().unwrap_or_default()
    }

    pub fn containing_folder(&self) -> Option<Arc<Folder>> {
        self.core.parent()
    }

    pub fn primary_file(&self) -> Result<PathBuf> {
        Ok(self.directory()?.join(format!("{}{}", self.name(), self.suffix())))
    }

    /// Derived metadata file, for generic objects and connections
    pub fn metadata_file(&self) -> Result<Option<PathBuf>> {
        match self.entry_type().metadata_suffix() {
            Some(suffix) => Ok(Some(self.directory()?.join(format!("{}{}", self.name(), suffix)))),
            None => Ok(None),
        }
    }

    pub fn properties_file(&self) -> Result<PathBuf> {
        Ok(self.directory()?.join(format!("{}{}", self.name(), PROPERTIES_SUFFIX)))
    }

    pub fn properties(&self) -> Result<Properties> {
        let _guard = self.lock_properties()?;
        properties_store::load(&self.properties_file()?)
    }

    pub fn get_property(&self, key: &str) -> Result<Option<String>> {
        Ok(self.properties()?.remove(key))
    }

    pub fn set_property(self: &Arc<Self>, key: &str, value: &str) -> Result<()> {
        self.update_property(key, value)?;
        self.fire_changed();
        Ok(())
    }

    /// User recorded when the entry was created
    pub fn owner(&self) -> Result<Option<String>> {
        self.get_property(OWNER_KEY)
    }

    pub(crate) fn write_initial_properties(&self) -> Result<()> {
        let _guard = self.lock_properties()?;
        let path = self.properties_file()?;
        let mut properties = properties_store::load(&path)?;
        properties.insert(OWNER_KEY.to_string(), self.core.context().config.owner.clone());
        properties.insert(CREATED_KEY.to_string(), Utc::now().to_rfc3339());
        properties_store::save(&path, &properties)
    }

    /// Writes the payload and its derived metadata, then notifies listeners
    pub fn store_data(self: &Arc<Self>, object: &IoObject) -> Result<()> {
        self.write_object(object)?;
        self.fire_changed();
        Ok(())
    }

    /// Primary file first, then the metadata file. A failed metadata write
    /// leaves the new payload in place.
    pub(crate) fn write_object(&self, object: &IoObject) -> Result<()> {
        self.require(EntryType::GenericObject, "store_data")?;
        let context = self.core.context();
        context.metadata_cache.invalidate(&self.id());

        let primary = self.primary_file()?;
        let mut writer = BufWriter::new(File::create(&primary).with_path(&primary)?);
        context.codec.encode(object, &mut writer)?;
        writer.flush().with_path(&primary)?;

        let metadata = context.codec.derive_metadata(object);
        let metadata_path = self.metadata_path()?;
        let mut writer = BufWriter::new(File::create(&metadata_path).with_path(&metadata_path)?);
        payload_codec::write_object_metadata(&metadata, &mut writer)?;
        writer.flush().with_path(&metadata_path)?;

        context.metadata_cache.insert(self.id(), MetaData::Object(metadata));
        self.update_property(CLASS_KEY, &object.class_name)?;
        debug!("Stored object {} of class {}", self.location(), object.class_name);
        Ok(())
    }

    pub fn retrieve_data(&self) -> Result<IoObject> {
        self.require(EntryType::GenericObject, "retrieve_data")?;
        let primary = self.existing_primary_file()?;
        let mut reader = BufReader::new(File::open(&primary).with_path(&primary)?);
        self.core.context().codec.decode(&mut reader)
    }

    /// Cached descriptor, regenerated from the metadata file after eviction
    pub fn retrieve_metadata(&self) -> Result<MetaData> {
        if !matches!(self.entry_type(), EntryType::GenericObject | EntryType::Connection) {
            return Err(self.unsupported("retrieve_metadata"));
        }
        let cache = &self.core.context().metadata_cache;
        if let Some(metadata) = cache.get(&self.id()) {
            return Ok(metadata);
        }

        if self.entry_type() == EntryType::Connection {
            self.check_metadata_file()?;
        }

        let path = self.metadata_path()?;
        if !path.exists() {
            return Err(RepositoryError::not_found("metadata file", self.location().to_string()));
        }
        let mut reader = BufReader::new(File::open(&path).with_path(&path)?);
        let metadata = match self.entry_type() {
            EntryType::Connection => MetaData::Connection(payload_codec::read_connection_configuration(&mut reader)?),
            _ => MetaData::Object(payload_codec::read_object_metadata(&mut reader)?),
        };
        cache.insert(self.id(), metadata.clone());
        Ok(metadata)
    }

    pub fn store_connection(self: &Arc<Self>, connection: &ConnectionInformation) -> Result<()> {
        self.write_connection(connection)?;
        self.fire_changed();
        Ok(())
    }

    /// Full payload with credentials to the primary file, configuration alone
    /// to the metadata file
    pub(crate) fn write_connection(&self, connection: &ConnectionInformation) -> Result<()> {
        let state = self.connection_state("store_connection")?;
        let context = self.core.context();
        context.metadata_cache.invalidate(&self.id());

        let primary = self.primary_file()?;
        let mut writer = BufWriter::new(File::create(&primary).with_path(&primary)?);
        payload_codec::write_connection(connection, &mut writer)?;
        writer.flush().with_path(&primary)?;

        self.write_connection_metadata(connection)?;

        let connection_type = connection.configuration.connection_type.clone();
        self.update_property(CONNECTION_TYPE_KEY, &connection_type)?;
        *state.connection_type.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(connection_type);
        Ok(())
    }

    pub fn retrieve_connection(&self) -> Result<ConnectionInformation> {
        self.connection_state("retrieve_connection")?;
        let primary = self.existing_primary_file()?;
        let mut reader = BufReader::new(File::open(&primary).with_path(&primary)?);
        payload_codec::read_connection(&mut reader)
    }

    /// Connection type, resolved from the properties or the payload on first use
    pub fn connection_type(&self) -> Result<Option<String>> {
        let state = self.connection_state("connection_type")?;
        if let Some(cached) = state.connection_type.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone() {
            return Ok(Some(cached));
        }

        let resolved = match self.get_property(CONNECTION_TYPE_KEY)? {
            Some(connection_type) => Some(connection_type),
            None if self.primary_file()?.exists() => {
                let connection_type = self.retrieve_connection()?.configuration.connection_type;
                self.update_property(CONNECTION_TYPE_KEY, &connection_type)?;
                Some(connection_type)
            }
            None => None,
        };
        if let Some(connection_type) = &resolved {
            *state.connection_type.write().unwrap_or_else(|poisoned| poisoned.into_inner()) =
                Some(connection_type.clone());
        }
        Ok(resolved)
    }

    /// Writes a missing connection metadata file from the payload. Returns
    /// whether a file was written.
    pub fn check_metadata_file(&self) -> Result<bool> {
        self.connection_state("check_metadata_file")?;
        let metadata_path = self.metadata_path()?;
        if metadata_path.exists() || !self.primary_file()?.exists() {
            return Ok(false);
        }
        let connection = self.retrieve_connection()?;
        self.write_connection_metadata(&connection)?;
        info!("Restored missing connection metadata for {}", self.location());
        Ok(true)
    }

    /// Replaces the process XML; listeners hear about updates, not the
    /// initial write
    pub fn store_xml(self: &Arc<Self>, xml: &str) -> Result<()> {
        let existed = self.primary_file()?.exists();
        self.write_xml(xml)?;
        if existed {
            self.fire_changed();
        }
        Ok(())
    }

    pub(crate) fn write_xml(&self, xml: &str) -> Result<()> {
        self.require(EntryType::Process, "store_xml")?;
        let primary = self.primary_file()?;
        fs::write(&primary, xml).with_path(&primary)
    }

    pub fn retrieve_xml(&self) -> Result<String> {
        self.require(EntryType::Process, "retrieve_xml")?;
        let primary = self.existing_primary_file()?;
        fs::read_to_string(&primary).with_path(&primary)
    }

    pub fn open_input_stream(&self) -> Result<BufReader<File>> {
        self.require(EntryType::Blob, "open_input_stream")?;
        let primary = self.existing_primary_file()?;
        Ok(BufReader::new(File::open(&primary).with_path(&primary)?))
    }

    /// Truncates the blob and returns a writer over it
    pub fn open_output_stream(&self) -> Result<BufWriter<File>> {
        self.require(EntryType::Blob, "open_output_stream")?;
        let primary = self.primary_file()?;
        Ok(BufWriter::new(File::create(&primary).with_path(&primary)?))
    }

    /// Stored MIME type, or a guess from the entry name
    pub fn mime_type(&self) -> Result<String> {
        self.require(EntryType::Blob, "mime_type")?;
        Ok(self.get_property(MIME_TYPE_KEY)?.unwrap_or_else(|| self.guess_mime_type()))
    }

    pub fn set_mime_type(&self, mime_type: &str) -> Result<()> {
        self.require(EntryType::Blob, "set_mime_type")?;
        self.update_property(MIME_TYPE_KEY, mime_type)
    }

    pub(crate) fn guess_mime_type(&self) -> String {
        mime_guess::from_path(self.name()).first_or_octet_stream().to_string()
    }

    pub fn rename(self: &Arc<Self>, new_name: &str) -> Result<bool> {
        Entry::Data(self.clone()).rename(new_name)
    }

    pub fn move_to(self: &Arc<Self>, new_parent: &Arc<Folder>, new_name: Option<&str>) -> Result<bool> {
        Entry::Data(self.clone()).move_to(new_parent, new_name)
    }

    pub fn delete(self: &Arc<Self>) -> Result<()> {
        Entry::Data(self.clone()).delete()
    }

    fn write_connection_metadata(&self, connection: &ConnectionInformation) -> Result<()> {
        let metadata_path = self.metadata_path()?;
        let mut writer = BufWriter::new(File::create(&metadata_path).with_path(&metadata_path)?);
        payload_codec::write_connection_configuration(&connection.configuration, &mut writer)?;
        writer.flush().with_path(&metadata_path)?;
        self.core
            .context()
            .metadata_cache
            .insert(self.id(), MetaData::Connection(connection.configuration.clone()));
        Ok(())
    }

    fn update_property(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock_properties()?;
        properties_store::update(&self.properties_file()?, key, value)
    }

    fn directory(&self) -> Result<PathBuf> {
        match self.core.parent() {
            Some(parent) => parent.directory(),
            None => Err(RepositoryError::not_found("containing folder", self.location().to_string())),
        }
    }

    fn metadata_path(&self) -> Result<PathBuf> {
        self.metadata_file()?.ok_or_else(|| self.unsupported("metadata"))
    }

    fn existing_primary_file(&self) -> Result<PathBuf> {
        let primary = self.primary_file()?;
        if !primary.exists() {
            return Err(RepositoryError::not_found("data file", self.location().to_string()));
        }
        Ok(primary)
    }

    fn connection_state(&self, operation: &str) -> Result<&ConnectionState> {
        match &self.kind {
            DataKind::Connection(state) => Ok(state),
            _ => Err(self.unsupported(operation)),
        }
    }

    fn require(&self, entry_type: EntryType, operation: &str) -> Result<()> {
        if self.entry_type() == entry_type {
            Ok(())
        } else {
            Err(self.unsupported(operation))
        }
    }

    fn unsupported(&self, operation: &str) -> RepositoryError {
        RepositoryError::new(
            ErrorKind::UnsupportedOperation,
            format!("{} is not supported by {} entries", operation, self.entry_type()),
        )
        .with_location(self.location().to_string())
    }

    fn lock_properties(&self) -> Result<MutexGuard<'_, ()>> {
        self.properties_lock
            .lock()
            .map_err(|_| RepositoryError::lock(self.location().to_string()))
    }

    fn fire_changed(self: &Arc<Self>) {
        self.core.context().listeners.fire_entry_changed(&Entry::Data(self.clone()));
    }
}

impl std::fmt::Debug for DataEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DataEntry({} {})", self.entry_type(), self.location())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::RepositoryConfig;
    use crate::infrastructure::repositories::local_repository::Repository;
    use serde_json::json;
    use std::io::Read;
    use tempfile::tempdir;

    fn open(path: &std::path::Path) -> Repository {
        let mut config = RepositoryConfig::new("Local", path);
        config.owner = "alice".to_string();
        Repository::open(config).unwrap()
    }

    #[test]
    fn test_new_entries_record_owner_and_creation_time() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let data = repo.root().create_folder("Data").unwrap();
        let set = data
            .create_io_object_entry("Set1", &IoObject::new("ExampleSet", json!({"a": 1})))
            .unwrap();

        assert_eq!(set.owner().unwrap().as_deref(), Some("alice"));
        assert_eq!(set.get_property(CLASS_KEY).unwrap().as_deref(), Some("ExampleSet"));
        let created = set.get_property(CREATED_KEY).unwrap().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&created).is_ok());

        set.set_property("comment", "first run").unwrap();
        assert_eq!(set.get_property("comment").unwrap().as_deref(), Some("first run"));
        assert_eq!(set.properties().unwrap().len(), 4);
    }

    #[test]
    fn test_store_data_replaces_payload_and_metadata() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let data = repo.root().create_folder("Data").unwrap();
        let set = data
            .create_io_object_entry("Set1", &IoObject::new("ExampleSet", json!([1])))
            .unwrap();

        let model = IoObject::new("Model", json!({"weights": [0.5, 0.25]}));
        set.store_data(&model).unwrap();

        assert_eq!(set.retrieve_data().unwrap(), model);
        assert_eq!(set.retrieve_metadata().unwrap().object_class(), "Model");
        assert_eq!(set.get_property(CLASS_KEY).unwrap().as_deref(), Some("Model"));
    }

    #[test]
    fn test_process_xml_round_trip() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let data = repo.root().create_folder("Data").unwrap();
        let flow = data.create_process_entry("flow", "<process version=\"1\"/>").unwrap();

        assert_eq!(flow.retrieve_xml().unwrap(), "<process version=\"1\"/>");
        flow.store_xml("<process version=\"2\"/>").unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("Data").join("flow.rmp")).unwrap(),
            "<process version=\"2\"/>"
        );
        assert!(flow.metadata_file().unwrap().is_none());
    }

    #[test]
    fn test_blob_streams() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let data = repo.root().create_folder("Data").unwrap();
        let blob = data.create_blob_entry("raw", Some("image/png")).unwrap();

        let mut input = String::new();
        blob.open_input_stream().unwrap().read_to_string(&mut input).unwrap();
        assert!(input.is_empty());

        {
            let mut output = blob.open_output_stream().unwrap();
            output.write_all(b"\x89PNG").unwrap();
        }
        let mut bytes = Vec::new();
        blob.open_input_stream().unwrap().read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"\x89PNG");
        assert_eq!(blob.mime_type().unwrap(), "image/png");
    }

    #[test]
    fn test_typed_operations_reject_other_variants() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let data = repo.root().create_folder("Data").unwrap();
        let blob = data.create_blob_entry("raw", None).unwrap();
        let flow = data.create_process_entry("flow", "<process/>").unwrap();

        assert_eq!(blob.retrieve_xml().unwrap_err().kind, ErrorKind::UnsupportedOperation);
        assert_eq!(blob.retrieve_metadata().unwrap_err().kind, ErrorKind::UnsupportedOperation);
        assert_eq!(flow.retrieve_data().unwrap_err().kind, ErrorKind::UnsupportedOperation);
        assert_eq!(flow.connection_type().unwrap_err().kind, ErrorKind::UnsupportedOperation);
        assert_eq!(flow.open_output_stream().unwrap_err().kind, ErrorKind::UnsupportedOperation);
        assert_eq!(blob.mime_type().unwrap(), "application/octet-stream");
    }

    #[test]
    fn test_missing_payload_is_not_found() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let data = repo.root().create_folder("Data").unwrap();
        let flow = data.create_process_entry("flow", "<process/>").unwrap();
        fs::remove_file(dir.path().join("Data").join("flow.rmp")).unwrap();

        let err = flow.retrieve_xml().unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.location.as_deref(), Some("//Local/Data/flow"));
    }

    #[test]
    fn test_connection_type_falls_back_to_payload() {
        let dir = tempdir().unwrap();
        let repo = open(dir.path());
        let connections = repo.connections_folder().unwrap();
        connections
            .create_connection_entry("db", &ConnectionInformation::new("db", "jdbc"))
            .unwrap();
        fs::remove_file(dir.path().join("Connections").join("db.properties")).unwrap();

        repo.refresh().unwrap();
        let entry = repo.locate("//Local/Connections/db").unwrap().unwrap();
        let entry = entry.as_data().unwrap();
        assert_eq!(entry.connection_type().unwrap().as_deref(), Some("jdbc"));
        assert_eq!(entry.get_property(CONNECTION_TYPE_KEY).unwrap().as_deref(), Some("jdbc"));
    }
}
