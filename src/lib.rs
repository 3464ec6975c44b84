//! datamap - declarative field mapping for data migration
//!
//! A mapping definition is an ordered table of field rules that translates
//! records between a local schema and a remote one. The same table works in
//! both directions: `Push` maps local -> remote, `Pull` maps remote -> local.
//!
//! # Core Concepts
//!
//! - **Field rules**: each rule pairs a local and a remote fieldname. One side
//!   is the output key, the other the value source.
//! - **Value sources**: a plain field name, a quoted literal (`'Open'`), or an
//!   `eval:` expression run in a sandboxed Lua state.
//! - **Child tables**: a rule can map a child collection row by row with
//!   another named mapping.
//!
//! # Modules
//!
//! - [`domain`] - Definitions, field rules, and the [`Record`] accessor
//! - [`resolver`] - The mapping engine
//! - [`store`] - Definition lookup by name
//! - [`schema`] - Column existence checks
//! - [`eval`] - Expression evaluation
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use datamap::{FieldRule, InMemoryStore, LuaEvaluator, MappingDefinition, MappingResolver, MappingType, StaticSchema};
//!
//! let def = MappingDefinition::new("ToDo Push", MappingType::Push, "ToDo")
//!     .with_rule(FieldRule::new("description", "subject"))
//!     .with_rule(FieldRule::new("'Open'", "status"));
//! let resolver = MappingResolver::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(StaticSchema::new()),
//!     Arc::new(LuaEvaluator::default()),
//! );
//! let mapped = resolver.map_record(&def, &serde_json::json!({"description": "Ship it"}))?;
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod eval;
pub mod resolver;
pub mod schema;
pub mod store;

// Re-export commonly used types
pub use config::{Config, EvaluatorConfig, MappingsConfig};
pub use domain::{Document, FieldRule, MappedRecord, MappingDefinition, MappingType, Record, ValueSource};
pub use error::MappingError;
pub use eval::{EvalContext, EvalError, ExpressionEvaluator, LuaEvaluator};
pub use resolver::MappingResolver;
pub use schema::{SchemaIntrospector, StaticSchema};
pub use store::{DefinitionStore, InMemoryStore, MappingLoader};
