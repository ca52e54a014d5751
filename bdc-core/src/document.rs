//! Schema-notation (CSN) documents.
//!
//! A document holds named object definitions under a type-specific
//! top-level key (`definitions` for views and local tables,
//! `replicationflows` for replication flows) plus document-level metadata
//! (`version`, `meta`, `$version`). The service accepts exactly one object per
//! request, so [`SchemaDocument::extract`] cuts a single object out while
//! keeping the metadata verbatim.
//!
//! Key order is preserved as written in the source document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Top-level key for views and local tables.
pub const DEFINITIONS_KEY: &str = "definitions";

/// Top-level key for replication flows.
pub const REPLICATION_FLOWS_KEY: &str = "replicationflows";

/// Document-level metadata copied into every extracted document.
const METADATA_KEYS: [&str; 3] = ["version", "meta", "$version"];

/// Error type for schema document operations.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The requested top-level key is absent (or not an object).
    #[error("key \"{key}\" not found in document. Available keys: {available}")]
    KeyNotFound { key: String, available: String },

    /// The requested object is absent under its top-level key.
    #[error("object \"{name}\" not found under \"{key}\". Available: {available}")]
    ObjectNotFound {
        key: String,
        name: String,
        available: String,
    },

    /// The document does not have the expected structure.
    #[error("invalid document structure: {message}")]
    Invalid { message: String },

    /// The document is not valid JSON.
    #[error("failed to parse document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A schema-notation document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDocument(Map<String, Value>);

impl SchemaDocument {
    /// Parse and validate a document from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Validate a JSON value as a document.
    ///
    /// `definitions` and `replicationflows` must be objects when present and
    /// at least one of them must be non-empty. `version` must look like
    /// `{"csn": "<string>"}`, `meta` like `{"creator": "<string>"}` and
    /// `$version` must be a string. Other keys are kept untouched.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        let Value::Object(map) = value else {
            return Err(invalid("document must be a JSON object"));
        };

        let mut has_objects = false;
        for key in [DEFINITIONS_KEY, REPLICATION_FLOWS_KEY] {
            match map.get(key) {
                None => {}
                Some(Value::Object(entries)) => has_objects |= !entries.is_empty(),
                Some(_) => return Err(invalid(format!("\"{key}\" must be an object"))),
            }
        }

        check_string_field(&map, "version", "csn")?;
        check_string_field(&map, "meta", "creator")?;
        if let Some(v) = map.get("$version") {
            if !v.is_string() {
                return Err(invalid("\"$version\" must be a string"));
            }
        }

        if !has_objects {
            return Err(invalid(format!(
                "document must contain at least one \"{DEFINITIONS_KEY}\" or \"{REPLICATION_FLOWS_KEY}\" entry"
            )));
        }

        Ok(Self(map))
    }

    /// Wrap a map without validation.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Borrow the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Serialize the document as compact JSON.
    pub fn to_json_string(&self) -> Result<String, DocumentError> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Look up a single object definition.
    pub fn object(&self, key: &str, name: &str) -> Option<&Value> {
        self.0.get(key)?.as_object()?.get(name)
    }

    /// Names of all objects under a top-level key, in document order.
    pub fn object_names(&self, key: &str) -> Vec<&str> {
        self.0
            .get(key)
            .and_then(Value::as_object)
            .map(|entries| entries.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Build a document holding only the named object under `key`.
    ///
    /// `version`, `meta` and `$version` are copied unchanged when present.
    /// Fails if `key` is missing or `name` is absent (or `null`) under it.
    pub fn extract(&self, key: &str, name: &str) -> Result<SchemaDocument, DocumentError> {
        let entries = self
            .0
            .get(key)
            .and_then(Value::as_object)
            .ok_or_else(|| DocumentError::KeyNotFound {
                key: key.to_string(),
                available: join_keys(self.0.keys()),
            })?;

        let definition = entries
            .get(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| DocumentError::ObjectNotFound {
                key: key.to_string(),
                name: name.to_string(),
                available: join_keys(entries.keys()),
            })?;

        let mut single = Map::new();
        single.insert(name.to_string(), definition.clone());

        let mut out = Map::new();
        out.insert(key.to_string(), Value::Object(single));
        for meta_key in METADATA_KEYS {
            if let Some(v) = self.0.get(meta_key) {
                out.insert(meta_key.to_string(), v.clone());
            }
        }

        Ok(SchemaDocument(out))
    }

    /// Target names declared by a replication flow, in document order.
    ///
    /// Returns an empty list if the flow or its `targets` map is absent.
    pub fn replication_flow_targets(&self, flow_name: &str) -> Vec<String> {
        self.object(REPLICATION_FLOWS_KEY, flow_name)
            .and_then(|flow| flow.get("targets"))
            .and_then(Value::as_object)
            .map(|targets| targets.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl TryFrom<Value> for SchemaDocument {
    type Error = DocumentError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

fn invalid(message: impl Into<String>) -> DocumentError {
    DocumentError::Invalid {
        message: message.into(),
    }
}

fn check_string_field(
    map: &Map<String, Value>,
    key: &str,
    field: &str,
) -> Result<(), DocumentError> {
    match map.get(key) {
        None => Ok(()),
        Some(Value::Object(obj)) if obj.get(field).is_some_and(Value::is_string) => Ok(()),
        Some(_) => Err(invalid(format!(
            "\"{key}\" must be an object with a string \"{field}\""
        ))),
    }
}

fn join_keys<'a>(keys: impl Iterator<Item = &'a String>) -> String {
    keys.map(String::as_str).collect::<Vec<_>>().join(", ")
}
