//! Uniform record access
//!
//! The mapping engine reads from two kinds of input: keyed maps (JSON objects,
//! hash maps) and objects with named attributes (documents, field rules).
//! Both are read through the [`Record`] trait so the resolver never needs to
//! know which one it was handed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

/// Anything the resolver can read values from by key
pub trait Record {
    /// Get a value by key; `None` when the key or attribute is absent
    fn get(&self, key: &str) -> Option<Value>;

    /// JSON view of the whole record (exposed to expressions as `doc`)
    fn snapshot(&self) -> Value;
}

impl Record for Map<String, Value> {
    fn get(&self, key: &str) -> Option<Value> {
        Map::get(self, key).cloned()
    }

    fn snapshot(&self) -> Value {
        Value::Object(self.clone())
    }
}

impl Record for Value {
    fn get(&self, key: &str) -> Option<Value> {
        self.as_object().and_then(|obj| obj.get(key)).cloned()
    }

    fn snapshot(&self) -> Value {
        self.clone()
    }
}

impl Record for HashMap<String, Value> {
    fn get(&self, key: &str) -> Option<Value> {
        HashMap::get(self, key).cloned()
    }

    fn snapshot(&self) -> Value {
        let mut keys: Vec<&String> = self.keys().collect();
        keys.sort();
        Value::Object(keys.into_iter().map(|k| (k.clone(), self[k].clone())).collect())
    }
}

/// A document with named attributes
///
/// `doctype` and `name` are attributes of the document itself; everything
/// else lives in `fields`. Child tables are stored as JSON arrays of objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Schema the document belongs to
    #[serde(default)]
    pub doctype: String,

    /// Unique identifier
    #[serde(default)]
    pub name: String,

    /// All remaining field values
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Create a new empty document
    pub fn new(doctype: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            name: name.into(),
            fields: Map::new(),
        }
    }

    /// Set a field value
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Set a child table from a list of child documents
    pub fn with_children(mut self, field: impl Into<String>, children: Vec<Document>) -> Self {
        let rows = children.iter().map(Record::snapshot).collect();
        self.fields.insert(field.into(), Value::Array(rows));
        self
    }
}

impl Record for Document {
    fn get(&self, key: &str) -> Option<Value> {
        match key {
            "doctype" => Some(Value::String(self.doctype.clone())),
            "name" => Some(Value::String(self.name.clone())),
            _ => self.fields.get(key).cloned(),
        }
    }

    fn snapshot(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("doctype".to_string(), Value::String(self.doctype.clone()));
        obj.insert("name".to_string(), Value::String(self.name.clone()));
        for (k, v) in &self.fields {
            obj.insert(k.clone(), v.clone());
        }
        Value::Object(obj)
    }
}

/// The output of mapping one source record
///
/// Keys keep the order in which the field rules produced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappedRecord {
    fields: Map<String, Value>,
}

impl MappedRecord {
    /// Get a mapped value by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Number of mapped keys
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if nothing was mapped
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Keys in output order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    /// Borrow as a JSON object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Convert into a JSON object value
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl Record for MappedRecord {
    fn get(&self, key: &str) -> Option<Value> {
        self.fields.get(key).cloned()
    }

    fn snapshot(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

impl From<MappedRecord> for Value {
    fn from(record: MappedRecord) -> Self {
        record.into_value()
    }
}

/// Accumulates mapped values; nothing is visible until [`finish`](Self::finish)
#[derive(Debug, Default)]
pub(crate) struct MappedRecordBuilder {
    fields: Map<String, Value>,
}

impl MappedRecordBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Set a key; a repeated key keeps its first position and takes the newest value
    pub(crate) fn set(&mut self, key: String, value: Value) {
        debug!(%key, "MappedRecordBuilder::set: called");
        self.fields.insert(key, value);
    }

    pub(crate) fn finish(self) -> MappedRecord {
        debug!(count = self.fields.len(), "MappedRecordBuilder::finish: called");
        MappedRecord { fields: self.fields }
    }
}
