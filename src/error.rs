//! Mapping error types

use thiserror::Error;

use crate::eval::EvalError;

/// Errors that can occur while resolving a mapping
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Mapping definition not found: {name}")]
    DefinitionNotFound { name: String },

    #[error("Failed to evaluate expression '{expression}' for rule {rule}: {source}")]
    ExpressionEvaluation {
        expression: String,
        rule: String,
        #[source]
        source: EvalError,
    },

    #[error("Malformed literal value source: {spec:?} (a quoted literal needs at least two characters)")]
    MalformedLiteral { spec: String },

    #[error("Child table source '{field}' is not a list (found {found})")]
    ChildSourceNotIterable { field: String, found: String },

    #[error("Field rule is missing attribute '{attribute}'")]
    MissingRuleAttribute { attribute: String },

    #[error("Invalid mapping definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },
}

impl MappingError {
    /// Check if this error came from the expression evaluator
    pub fn is_evaluation(&self) -> bool {
        matches!(self, MappingError::ExpressionEvaluation { .. })
    }

    /// The mapping name this error refers to, if any
    pub fn mapping_name(&self) -> Option<&str> {
        match self {
            MappingError::DefinitionNotFound { name } | MappingError::InvalidDefinition { name, .. } => Some(name),
            _ => None,
        }
    }
}
