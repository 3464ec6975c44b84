//! Domain types for datamap
//!
//! Mapping definitions, field rules, and the uniform [`Record`] accessor the
//! resolver reads source values through.

mod definition;
mod record;

pub(crate) use record::MappedRecordBuilder;

pub use definition::{EVAL_PREFIX, FieldRule, MappingDefinition, MappingType, SourceKind, ValueSource};
pub use record::{Document, MappedRecord, Record};
