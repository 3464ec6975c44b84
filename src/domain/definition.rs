//! Mapping definitions and field rules
//!
//! A [`MappingDefinition`] is an ordered table of [`FieldRule`]s plus the
//! direction (`Push` or `Pull`) and some source-schema metadata. Definitions
//! are authored as YAML:
//!
//! ```yaml
//! mapping-name: Contact to Lead
//! mapping-type: Push
//! local-doctype: Contact
//! migration-id-field: lead_id
//! fields:
//!   - local-fieldname: first_name
//!     remote-fieldname: FirstName
//!   - local-fieldname: '"Web"'
//!     remote-fieldname: LeadSource
//!   - local-fieldname: eval:doc.first_name .. " " .. doc.last_name
//!     remote-fieldname: FullName
//!   - local-fieldname: phone_nos
//!     remote-fieldname: Phones
//!     is-child-table: true
//!     child-table-mapping: Contact Phone to Phone
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::record::Record;
use crate::error::MappingError;

/// Prefix marking an expression value source
pub const EVAL_PREFIX: &str = "eval:";

/// Direction a mapping runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MappingType {
    /// Local record -> remote record
    #[default]
    Push,
    /// Remote record -> local record
    Pull,
}

impl MappingType {
    /// Rule attribute names used as (output key, value source) for this direction
    pub fn key_and_value_fields(&self) -> (&'static str, &'static str) {
        match self {
            MappingType::Push => ("remote_fieldname", "local_fieldname"),
            MappingType::Pull => ("local_fieldname", "remote_fieldname"),
        }
    }

    /// The opposite direction
    pub fn reversed(&self) -> Self {
        match self {
            MappingType::Push => MappingType::Pull,
            MappingType::Pull => MappingType::Push,
        }
    }
}

impl std::fmt::Display for MappingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "Push"),
            Self::Pull => write!(f, "Pull"),
        }
    }
}

/// How a value-source spec is interpreted, decided by its prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Field,
    Literal,
    Expression,
}

impl SourceKind {
    /// Classify a value-source spec without validating it
    pub fn of(spec: &str) -> Self {
        if spec.starts_with(EVAL_PREFIX) {
            SourceKind::Expression
        } else if spec.starts_with('"') || spec.starts_with('\'') {
            SourceKind::Literal
        } else {
            SourceKind::Field
        }
    }
}

/// A parsed value-source spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource<'a> {
    /// Look the field up on the source record
    Field(&'a str),
    /// Constant string, quotes already stripped
    Literal(&'a str),
    /// Expression text with the `eval:` prefix stripped
    Expression(&'a str),
}

impl<'a> ValueSource<'a> {
    /// Parse a value-source spec
    ///
    /// Literals lose exactly their first and last character. Embedded quotes
    /// are not unescaped.
    pub fn parse(spec: &'a str) -> Result<Self, MappingError> {
        match SourceKind::of(spec) {
            SourceKind::Expression => Ok(ValueSource::Expression(&spec[EVAL_PREFIX.len()..])),
            SourceKind::Literal => {
                let mut chars = spec.chars();
                match (chars.next(), chars.next_back()) {
                    (Some(_), Some(_)) => Ok(ValueSource::Literal(chars.as_str())),
                    _ => Err(MappingError::MalformedLiteral { spec: spec.to_string() }),
                }
            }
            SourceKind::Field => Ok(ValueSource::Field(spec)),
        }
    }
}

/// One row of a mapping: how a single target field (or child table) is derived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Field name (or literal/expression spec) on the local side
    #[serde(rename = "local-fieldname")]
    pub local_fieldname: String,

    /// Field name (or literal/expression spec) on the remote side
    #[serde(rename = "remote-fieldname")]
    pub remote_fieldname: String,

    /// Whether this rule maps a child table
    #[serde(rename = "is-child-table", default)]
    pub is_child_table: bool,

    /// Name of the mapping applied to each child row
    #[serde(rename = "child-table-mapping", default, skip_serializing_if = "Option::is_none")]
    pub child_table_mapping: Option<String>,
}

impl FieldRule {
    /// Create a plain field-to-field rule
    pub fn new(local_fieldname: impl Into<String>, remote_fieldname: impl Into<String>) -> Self {
        Self {
            local_fieldname: local_fieldname.into(),
            remote_fieldname: remote_fieldname.into(),
            is_child_table: false,
            child_table_mapping: None,
        }
    }

    /// Create a child-table rule
    pub fn child_table(
        local_fieldname: impl Into<String>,
        remote_fieldname: impl Into<String>,
        mapping: impl Into<String>,
    ) -> Self {
        Self {
            local_fieldname: local_fieldname.into(),
            remote_fieldname: remote_fieldname.into(),
            is_child_table: true,
            child_table_mapping: Some(mapping.into()),
        }
    }

    /// The same rule with local and remote sides swapped
    pub fn mirrored(&self) -> Self {
        Self {
            local_fieldname: self.remote_fieldname.clone(),
            remote_fieldname: self.local_fieldname.clone(),
            ..self.clone()
        }
    }

    /// Short `local -> remote` label for diagnostics
    pub fn label(&self) -> String {
        format!("{} -> {}", self.local_fieldname, self.remote_fieldname)
    }
}

impl Record for FieldRule {
    fn get(&self, key: &str) -> Option<Value> {
        match key {
            "local_fieldname" => Some(Value::String(self.local_fieldname.clone())),
            "remote_fieldname" => Some(Value::String(self.remote_fieldname.clone())),
            "is_child_table" => Some(Value::Bool(self.is_child_table)),
            "child_table_mapping" => self.child_table_mapping.clone().map(Value::String),
            _ => None,
        }
    }

    fn snapshot(&self) -> Value {
        serde_json::json!({
            "local_fieldname": self.local_fieldname,
            "remote_fieldname": self.remote_fieldname,
            "is_child_table": self.is_child_table,
            "child_table_mapping": self.child_table_mapping,
        })
    }
}

fn default_page_length() -> u32 {
    10
}

/// A named, ordered set of field rules plus direction and schema metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingDefinition {
    /// Name the definition is stored under
    #[serde(rename = "mapping-name", default)]
    pub mapping_name: String,

    /// Direction of the mapping
    #[serde(rename = "mapping-type", default)]
    pub mapping_type: MappingType,

    /// Local schema the source records belong to
    #[serde(rename = "local-doctype", default)]
    pub local_doctype: String,

    /// Column holding the remote identifier on local records
    #[serde(rename = "migration-id-field", default, skip_serializing_if = "Option::is_none")]
    pub migration_id_field: Option<String>,

    /// Remote object (table, endpoint) name
    #[serde(rename = "remote-objectname", default, skip_serializing_if = "Option::is_none")]
    pub remote_objectname: Option<String>,

    /// Identifier field on the remote side
    #[serde(rename = "remote-primary-key", default, skip_serializing_if = "Option::is_none")]
    pub remote_primary_key: Option<String>,

    /// Batch size hint for callers paging through source records
    #[serde(rename = "page-length", default = "default_page_length")]
    pub page_length: u32,

    /// Expression yielding query filters for the source side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Field rules, applied in order
    #[serde(default)]
    pub fields: Vec<FieldRule>,
}

impl MappingDefinition {
    /// Create an empty definition
    pub fn new(mapping_name: impl Into<String>, mapping_type: MappingType, local_doctype: impl Into<String>) -> Self {
        Self {
            mapping_name: mapping_name.into(),
            mapping_type,
            local_doctype: local_doctype.into(),
            migration_id_field: None,
            remote_objectname: None,
            remote_primary_key: None,
            page_length: default_page_length(),
            condition: None,
            fields: Vec::new(),
        }
    }

    /// Append a field rule
    pub fn with_rule(mut self, rule: FieldRule) -> Self {
        self.fields.push(rule);
        self
    }

    /// Set the migration id field
    pub fn with_migration_id_field(mut self, field: impl Into<String>) -> Self {
        self.migration_id_field = Some(field.into());
        self
    }

    /// Set the filter condition expression
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Names of child mappings referenced by this definition, in rule order
    pub fn child_mappings(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|rule| rule.is_child_table)
            .filter_map(|rule| rule.child_table_mapping.as_deref())
    }

    /// The definition with every rule mirrored and the direction reversed
    pub fn mirrored(&self) -> Self {
        Self {
            mapping_type: self.mapping_type.reversed(),
            fields: self.fields.iter().map(FieldRule::mirrored).collect(),
            ..self.clone()
        }
    }

    /// Check structural invariants
    pub fn validate(&self) -> Result<(), MappingError> {
        debug!(name = %self.mapping_name, rules = self.fields.len(), "MappingDefinition::validate: called");
        let invalid = |reason: String| MappingError::InvalidDefinition {
            name: self.mapping_name.clone(),
            reason,
        };

        if self.mapping_name.trim().is_empty() {
            return Err(invalid("mapping name is empty".to_string()));
        }

        for (idx, rule) in self.fields.iter().enumerate() {
            if rule.local_fieldname.is_empty() {
                return Err(invalid(format!("rule {} has an empty local fieldname", idx + 1)));
            }
            if rule.remote_fieldname.is_empty() {
                return Err(invalid(format!("rule {} has an empty remote fieldname", idx + 1)));
            }
            if rule.is_child_table && rule.child_table_mapping.as_deref().is_none_or(str::is_empty) {
                return Err(invalid(format!(
                    "rule {} ({}) is a child table without a child table mapping",
                    idx + 1,
                    rule.label()
                )));
            }
        }

        debug!(name = %self.mapping_name, "MappingDefinition::validate: ok");
        Ok(())
    }
}
