//! Records stored in a container.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum identifier length in bytes.
pub const MAX_ID_LEN: usize = 255;

/// Characters that may not appear in a record identifier.
pub const FORBIDDEN_ID_CHARS: [char; 4] = ['/', '\\', '?', '#'];

/// A JSON document addressed by `(partition_key, id)`.
///
/// Two records with the same identifier and partition key denote the same
/// logical entity; writes to it are last-writer-wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier, unique within a partition.
    pub id: String,
    /// Partition key value.
    pub partition_key: String,
    /// Document fields.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Record {
    /// Creates a record with an empty payload.
    pub fn new(id: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            partition_key: partition_key.into(),
            payload: Map::new(),
        }
    }

    /// Sets a payload field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(name.into(), value.into());
        self
    }

    /// Returns a payload field.
    ///
    /// The name `id` resolves to the identifier so predicates can filter on it.
    pub fn field(&self, name: &str) -> Option<Value> {
        if name == "id" {
            return Some(Value::String(self.id.clone()));
        }
        self.payload.get(name).cloned()
    }

    /// Returns a payload field as a string slice.
    pub fn text(&self, name: &str) -> Option<&str> {
        if name == "id" {
            return Some(&self.id);
        }
        self.payload.get(name).and_then(Value::as_str)
    }

    /// Builds a record from any serializable document.
    ///
    /// The document must serialize to a JSON object.
    pub fn from_document<T: Serialize>(
        id: impl Into<String>,
        partition_key: impl Into<String>,
        document: &T,
    ) -> ProtocolResult<Self> {
        match serde_json::to_value(document) {
            Ok(Value::Object(payload)) => Ok(Self {
                id: id.into(),
                partition_key: partition_key.into(),
                payload,
            }),
            Ok(other) => Err(ProtocolError::Document(format!(
                "expected an object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(ProtocolError::Document(e.to_string())),
        }
    }

    /// Converts the payload back into a typed document.
    pub fn to_document<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        serde_json::from_value(Value::Object(self.payload.clone()))
            .map_err(|e| ProtocolError::Document(e.to_string()))
    }

    /// Size of the record's CBOR encoding in bytes.
    pub fn encoded_len(&self) -> usize {
        let mut buf = Vec::new();
        match ciborium::into_writer(self, &mut buf) {
            Ok(()) => buf.len(),
            Err(_) => usize::MAX,
        }
    }

    /// Checks the identifier and partition key rules.
    ///
    /// Returns a human readable reason when the record is not storable.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("identifier must not be empty".into());
        }
        if self.id.len() > MAX_ID_LEN {
            return Err(format!(
                "identifier is {} bytes, limit is {MAX_ID_LEN}",
                self.id.len()
            ));
        }
        if let Some(c) = self.id.chars().find(|c| FORBIDDEN_ID_CHARS.contains(c)) {
            return Err(format!("identifier contains forbidden character {c:?}"));
        }
        if self.partition_key.is_empty() {
            return Err("partition key must not be empty".into());
        }
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Asset {
        asset_id: String,
        file_name: String,
    }

    #[test]
    fn record_fields() {
        let record = Record::new("1", "a_1").with_field("fileName", "b_1.png");
        assert_eq!(record.text("fileName"), Some("b_1.png"));
        assert_eq!(record.text("id"), Some("1"));
        assert_eq!(record.field("missing"), None);
    }

    #[test]
    fn document_conversion() {
        let asset = Asset {
            asset_id: "a_2".into(),
            file_name: "a_2.png".into(),
        };
        let record = Record::from_document("2", "a_2", &asset).unwrap();
        assert_eq!(record.text("fileName"), Some("a_2.png"));

        let back: Asset = record.to_document().unwrap();
        assert_eq!(back, asset);
    }

    #[test]
    fn non_object_document_is_rejected() {
        let err = Record::from_document("1", "p", &42u32).unwrap_err();
        assert!(matches!(err, ProtocolError::Document(_)));
    }

    #[test]
    fn validation_rules() {
        assert!(Record::new("1", "p").validate().is_ok());
        assert!(Record::new("", "p").validate().is_err());
        assert!(Record::new("a/b", "p").validate().is_err());
        assert!(Record::new("a#b", "p").validate().is_err());
        assert!(Record::new("1", "").validate().is_err());
        assert!(Record::new("x".repeat(MAX_ID_LEN + 1), "p").validate().is_err());
    }

    #[test]
    fn encoded_len_grows_with_payload() {
        let small = Record::new("1", "p");
        let large = Record::new("1", "p").with_field("blob", "x".repeat(1024));
        assert!(large.encoded_len() > small.encoded_len() + 1000);
    }
}
