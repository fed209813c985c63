use std::io::{Read, Write};

use crate::common::errors::Result;
use crate::domain::entities::payload::{ConnectionConfiguration, ConnectionInformation, IoObject, ObjectMetaData};

/// Serializer and metadata deriver for generic-object payloads
pub trait ObjectCodec: Send + Sync + 'static {
    /// Writes `object` to `out`
    fn encode(&self, object: &IoObject, out: &mut dyn Write) -> Result<()>;

    /// Reads an object back
    fn decode(&self, input: &mut dyn Read) -> Result<IoObject>;

    /// Derives the descriptor stored in the metadata file
    fn derive_metadata(&self, object: &IoObject) -> ObjectMetaData;
}

/// Default codec: JSON payload, descriptor from class name and body shape
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonObjectCodec;

impl ObjectCodec for JsonObjectCodec {
    fn encode(&self, object: &IoObject, out: &mut dyn Write) -> Result<()> {
        serde_json::to_writer(out, object)?;
        Ok(())
    }

    fn decode(&self, input: &mut dyn Read) -> Result<IoObject> {
        Ok(serde_json::from_reader(input)?)
    }

    fn derive_metadata(&self, object: &IoObject) -> ObjectMetaData {
        let shape = match &object.body {
            serde_json::Value::Array(items) => format!("{} items", items.len()),
            serde_json::Value::Object(fields) => format!("{} fields", fields.len()),
            serde_json::Value::Null => "empty".to_string(),
            _ => "scalar".to_string(),
        };
        let description = match &object.source {
            Some(source) => format!("{} ({}) from {}", object.class_name, shape, source),
            None => format!("{} ({})", object.class_name, shape),
        };
        ObjectMetaData {
            object_class: object.class_name.clone(),
            description,
            annotations: object.annotations.clone(),
        }
    }
}

pub fn write_object_metadata(metadata: &ObjectMetaData, out: &mut dyn Write) -> Result<()> {
    serde_json::to_writer_pretty(out, metadata)?;
    Ok(())
}

pub fn read_object_metadata(input: &mut dyn Read) -> Result<ObjectMetaData> {
    Ok(serde_json::from_reader(input)?)
}

/// Connection payload: configuration plus credentials
pub fn write_connection(info: &ConnectionInformation, out: &mut dyn Write) -> Result<()> {
    serde_json::to_writer_pretty(out, info)?;
    Ok(())
}

pub fn read_connection(input: &mut dyn Read) -> Result<ConnectionInformation> {
    Ok(serde_json::from_reader(input)?)
}

/// Connection metadata: the configuration alone, as an XML property list
pub fn write_connection_configuration(config: &ConnectionConfiguration, out: &mut dyn Write) -> Result<()> {
    plist::to_writer_xml(out, config)?;
    Ok(())
}

pub fn read_connection_configuration(input: &mut dyn Read) -> Result<ConnectionConfiguration> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    Ok(plist::from_bytes(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_describes_body_shape() {
        let object = IoObject::new("ExampleSet", json!([[1, 2], [3, 4], [5, 6]]))
            .with_annotation("rows", "3");
        let md = JsonObjectCodec.derive_metadata(&object);
        assert_eq!(md.object_class, "ExampleSet");
        assert_eq!(md.description, "ExampleSet (3 items)");
        assert_eq!(md.annotations.get("rows").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_connection_metadata_omits_credentials() {
        let info = ConnectionInformation::new("warehouse", "jdbc")
            .with_parameter("host", "db.internal")
            .with_credential("password", "hunter2");

        let mut buffer = Vec::new();
        write_connection_configuration(&info.configuration, &mut buffer).unwrap();
        let xml = String::from_utf8(buffer.clone()).unwrap();
        assert!(xml.contains("<plist"));
        assert!(xml.contains("db.internal"));
        assert!(!xml.contains("hunter2"));

        let config = read_connection_configuration(&mut buffer.as_slice()).unwrap();
        assert_eq!(config, info.configuration);
    }
}
