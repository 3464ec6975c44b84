//! Source schema introspection
//!
//! The resolver only needs one question answered about the local schema:
//! does a doctype have a given column. [`StaticSchema`] answers it from a
//! YAML table:
//!
//! ```yaml
//! Contact:
//!   - name
//!   - first_name
//!   - lead_id
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Answers column-existence questions about local doctypes
pub trait SchemaIntrospector: Send + Sync {
    /// Check whether `schema_id` has a column named `field_name`
    fn has_column(&self, schema_id: &str, field_name: &str) -> bool;
}

/// Fixed doctype -> columns table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticSchema {
    doctypes: BTreeMap<String, BTreeSet<String>>,
}

impl StaticSchema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a doctype with its columns
    pub fn with_doctype<I, S>(mut self, doctype: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.doctypes
            .entry(doctype.into())
            .or_default()
            .extend(columns.into_iter().map(Into::into));
        self
    }

    /// Load a schema table from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        debug!(?path, "StaticSchema::load: called");
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read schema: {}", path.display()))?;
        let schema: Self =
            serde_yaml::from_str(&content).with_context(|| format!("Failed to parse schema: {}", path.display()))?;
        info!(path = %path.display(), doctypes = schema.doctypes.len(), "Loaded schema");
        Ok(schema)
    }

    /// Names of known doctypes
    pub fn doctypes(&self) -> impl Iterator<Item = &str> {
        self.doctypes.keys().map(|s| s.as_str())
    }
}

impl SchemaIntrospector for StaticSchema {
    fn has_column(&self, schema_id: &str, field_name: &str) -> bool {
        if field_name.is_empty() {
            return false;
        }
        let found = self
            .doctypes
            .get(schema_id)
            .is_some_and(|columns| columns.contains(field_name));
        debug!(%schema_id, %field_name, found, "StaticSchema::has_column: called");
        found
    }
}
