//! Expression evaluation for `eval:` value sources
//!
//! The resolver only depends on the [`ExpressionEvaluator`] trait. The
//! shipped implementation is [`LuaEvaluator`], which runs each expression in
//! a fresh, restricted Lua state.

mod lua;

use serde_json::Value;
use thiserror::Error;

use crate::domain::FieldRule;

pub use lua::LuaEvaluator;

/// Errors raised by an expression evaluator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("result conversion failed: {0}")]
    Conversion(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
}

/// Bindings visible to an expression
#[derive(Debug, Clone)]
pub struct EvalContext<'a> {
    /// Snapshot of the source record, bound as `doc`
    pub doc: Value,

    /// Rule being evaluated, bound as `rule`
    pub rule: Option<&'a FieldRule>,
}

impl<'a> EvalContext<'a> {
    /// Context for a rule evaluated against a record snapshot
    pub fn new(doc: Value, rule: &'a FieldRule) -> Self {
        Self { doc, rule: Some(rule) }
    }

    /// Context with an empty `doc` and no rule (used for filter conditions)
    pub fn empty() -> Self {
        Self {
            doc: Value::Object(serde_json::Map::new()),
            rule: None,
        }
    }
}

/// Evaluates expression text in a sandbox
///
/// Implementations must not give expressions access to the filesystem,
/// network, or process control.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate an expression and return its value
    fn evaluate(&self, expression: &str, ctx: &EvalContext<'_>) -> Result<Value, EvalError>;
}
