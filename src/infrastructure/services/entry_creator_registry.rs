use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use tracing::debug;

use crate::common::errors::{RepositoryError, Result};
use crate::domain::entities::data_entry::{DataEntry, DataKind};
use crate::domain::entities::entry::EntryType;
use crate::domain::entities::folder::Folder;
use crate::domain::services::path_service::split_suffix;

type CreateFn = dyn Fn(&str, &Arc<Folder>) -> Result<Arc<DataEntry>> + Send + Sync;

/// Instantiates in-memory entries for files found while scanning a folder
#[derive(Clone)]
pub struct EntryCreator {
    entry_type: EntryType,
    create: Arc<CreateFn>,
}

impl EntryCreator {
    pub fn new<F>(entry_type: EntryType, create: F) -> Self
    where
        F: Fn(&str, &Arc<Folder>) -> Result<Arc<DataEntry>> + Send + Sync + 'static,
    {
        Self {
            entry_type,
            create: Arc::new(create),
        }
    }

    /// Plain creator for one of the built-in data entry types
    pub fn for_type(entry_type: EntryType) -> Option<Self> {
        DataKind::for_type(entry_type)?;
        Some(Self::new(entry_type, move |name, parent| {
            let kind = DataKind::for_type(entry_type).unwrap_or(DataKind::GenericObject);
            Ok(DataEntry::new(name, kind, parent))
        }))
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    pub fn create(&self, name: &str, parent: &Arc<Folder>) -> Result<Arc<DataEntry>> {
        (self.create)(name, parent)
    }
}

impl Debug for EntryCreator {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("EntryCreator").field("entry_type", &self.entry_type).finish()
    }
}

/// Maps primary-file suffixes (with their dot) to entry creators
#[derive(Debug, Clone, Default)]
pub struct EntryCreatorRegistry {
    creators: HashMap<String, EntryCreator>,
}

impl EntryCreatorRegistry {
    /// Empty registry; scanning with it yields folders only
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry knowing the generic-object, process, blob and connection types
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for entry_type in [
            EntryType::GenericObject,
            EntryType::Process,
            EntryType::Blob,
            EntryType::Connection,
        ] {
            if let (Some(suffix), Some(creator)) = (entry_type.suffix(), EntryCreator::for_type(entry_type)) {
                registry.creators.insert(normalize(suffix), creator);
            }
        }
        registry
    }

    /// Registers `creator` for `suffix`, returning the creator it replaces.
    ///
    /// File names are split at their last dot, so a suffix must be a single
    /// dot followed by at least one character and no further dot.
    pub fn register(&mut self, suffix: &str, creator: EntryCreator) -> Result<Option<EntryCreator>> {
        let suffix = normalize(suffix);
        if suffix.len() < 2 || suffix[1..].contains('.') {
            return Err(RepositoryError::illegal_name(
                suffix,
                "is not a suffix: it must start with its only dot",
            ));
        }
        debug!("Registering {} creator for suffix {}", creator.entry_type(), suffix);
        Ok(self.creators.insert(suffix, creator))
    }

    pub fn lookup(&self, suffix: &str) -> Option<&EntryCreator> {
        self.creators.get(&normalize(suffix))
    }

    /// Splits a scanned file name into entry name and creator
    pub fn match_file_name<'a>(&self, file_name: &'a str) -> Option<(&'a str, &EntryCreator)> {
        let (name, suffix) = split_suffix(file_name)?;
        Some((name, self.lookup(suffix)?))
    }

    pub fn suffixes(&self) -> Vec<&str> {
        let mut suffixes: Vec<&str> = self.creators.keys().map(String::as_str).collect();
        suffixes.sort_unstable();
        suffixes
    }

    pub fn len(&self) -> usize {
        self.creators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.creators.is_empty()
    }
}

fn normalize(suffix: &str) -> String {
    if suffix.starts_with('.') {
        suffix.to_string()
    } else {
        format!(".{}", suffix)
    }
}
