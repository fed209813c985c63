use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Arbitrary object stored in a generic-object entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoObject {
    /// Declared class of the object, recorded as a property hint on store
    pub class_name: String,
    /// Where the object came from, if known
    #[serde(default)]
    pub source: Option<String>,
    /// Free-form annotations carried into the derived metadata
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Object body
    pub body: serde_json::Value,
}

impl IoObject {
    pub fn new<S: Into<String>>(class_name: S, body: serde_json::Value) -> Self {
        Self {
            class_name: class_name.into(),
            source: None,
            annotations: BTreeMap::new(),
            body,
        }
    }

    pub fn with_annotation<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// Descriptor derived from an `IoObject`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetaData {
    pub object_class: String,
    pub description: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Connection configuration: everything but the credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfiguration {
    pub name: String,
    pub connection_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// Payload of a connection entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInformation {
    pub configuration: ConnectionConfiguration,
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
}

impl ConnectionInformation {
    pub fn new<N: Into<String>, T: Into<String>>(name: N, connection_type: T) -> Self {
        Self {
            configuration: ConnectionConfiguration {
                name: name.into(),
                connection_type: connection_type.into(),
                description: String::new(),
                parameters: BTreeMap::new(),
            },
            credentials: BTreeMap::new(),
        }
    }

    pub fn with_parameter<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.configuration.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_credential<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }
}

/// Metadata cached for an entry, one variant per metadata-carrying entry type
#[derive(Debug, Clone, PartialEq)]
pub enum MetaData {
    Object(ObjectMetaData),
    Connection(ConnectionConfiguration),
}

impl MetaData {
    /// Declared class of the described payload
    pub fn object_class(&self) -> &str {
        match self {
            MetaData::Object(md) => &md.object_class,
            MetaData::Connection(_) => "ConnectionInformation",
        }
    }
}
