//! Sandboxed Lua expression evaluator
//!
//! Every call builds a fresh Lua 5.4 state with only the `string`, `table`,
//! `math` and `utf8` libraries. Base functions that reach the filesystem or
//! load code (`dofile`, `loadfile`, `load`, `require`) are removed. There is
//! no `io`, `os` or `package`.
//!
//! Bindings:
//! - `doc` - the source record
//! - `rule` - the field rule being evaluated (when there is one)
//! - `cstr(v)`, `cint(v)`, `flt(v)` - lenient conversions
//! - `today()`, `now()` - local date / datetime strings
//! - `null`, `is_null(v)` - JSON null sentinel and a nil-or-null test
//!
//! A null object field is bound as `nil`, so `doc.email == nil` holds for
//! both null and absent fields. Nulls inside arrays stay as the `null`
//! sentinel; a `nil` there would end the sequence.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mlua::{HookTriggers, Lua, LuaOptions, LuaSerdeExt, StdLib, Value as LuaValue, VmState};
use serde_json::Value;
use tracing::debug;

use super::{EvalContext, EvalError, ExpressionEvaluator};
use crate::config::EvaluatorConfig;
use crate::domain::Record;

/// Instructions between budget checks
const HOOK_INTERVAL: u32 = 1000;

const BUDGET_EXHAUSTED: &str = "instruction budget exhausted";

/// Globals removed from the base library
const REMOVED_GLOBALS: &[&str] = &["dofile", "loadfile", "load", "require", "collectgarbage", "print"];

/// Expression evaluator backed by a restricted Lua state
#[derive(Debug, Clone)]
pub struct LuaEvaluator {
    memory_limit: usize,
    instruction_limit: u64,
}

impl Default for LuaEvaluator {
    fn default() -> Self {
        Self::from_config(&EvaluatorConfig::default())
    }
}

impl LuaEvaluator {
    /// Create an evaluator with explicit limits
    pub fn new(memory_limit: usize, instruction_limit: u64) -> Self {
        debug!(memory_limit, instruction_limit, "LuaEvaluator::new: called");
        Self {
            memory_limit,
            instruction_limit,
        }
    }

    /// Create an evaluator from configuration
    pub fn from_config(config: &EvaluatorConfig) -> Self {
        Self::new(config.memory_limit_bytes, config.instruction_limit)
    }

    /// Build a fresh restricted Lua state
    fn sandbox(&self) -> mlua::Result<Lua> {
        debug!("LuaEvaluator::sandbox: called");
        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8,
            LuaOptions::default(),
        )?;
        lua.set_memory_limit(self.memory_limit)?;

        let budget = self.instruction_limit;
        let executed = Arc::new(AtomicU64::new(0));
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
            move |_lua, _debug| {
                let total = executed.fetch_add(u64::from(HOOK_INTERVAL), Ordering::Relaxed) + u64::from(HOOK_INTERVAL);
                if total > budget {
                    Err(mlua::Error::RuntimeError(format!("{BUDGET_EXHAUSTED} ({budget} instructions)")))
                } else {
                    Ok(VmState::Continue)
                }
            },
        );

        let globals = lua.globals();
        for name in REMOVED_GLOBALS {
            globals.raw_set(*name, LuaValue::Nil)?;
        }

        globals.set("null", lua.null())?;
        globals.set("is_null", lua.create_function(|_, v: LuaValue| Ok(is_null(&v)))?)?;
        globals.set("cstr", lua.create_function(|_, v: LuaValue| Ok(lua_to_string(&v)))?)?;
        globals.set("cint", lua.create_function(|_, v: LuaValue| Ok(lua_to_number(&v) as i64))?)?;
        globals.set("flt", lua.create_function(|_, v: LuaValue| Ok(lua_to_number(&v)))?)?;
        globals.set(
            "today",
            lua.create_function(|_, ()| Ok(chrono::Local::now().format("%Y-%m-%d").to_string()))?,
        )?;
        globals.set(
            "now",
            lua.create_function(|_, ()| Ok(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()))?,
        )?;

        Ok(lua)
    }

    /// Bind `doc` and `rule` into the state
    fn bind(&self, lua: &Lua, ctx: &EvalContext<'_>) -> mlua::Result<()> {
        debug!(has_rule = ctx.rule.is_some(), "LuaEvaluator::bind: called");
        let globals = lua.globals();
        globals.set("doc", lua.to_value(&drop_null_fields(&ctx.doc))?)?;
        if let Some(rule) = ctx.rule {
            globals.set("rule", lua.to_value(&drop_null_fields(&rule.snapshot()))?)?;
        }
        Ok(())
    }
}

impl ExpressionEvaluator for LuaEvaluator {
    fn evaluate(&self, expression: &str, ctx: &EvalContext<'_>) -> Result<Value, EvalError> {
        debug!(%expression, "LuaEvaluator::evaluate: called");
        let lua = self.sandbox().map_err(classify)?;
        self.bind(&lua, ctx).map_err(classify)?;

        let result: LuaValue = lua
            .load(format!("return {expression}"))
            .set_name("=expression")
            .eval()
            .map_err(classify)?;

        let value: Value = lua
            .from_value(result)
            .map_err(|e| EvalError::Conversion(e.to_string()))?;
        debug!(%expression, ?value, "LuaEvaluator::evaluate: complete");
        Ok(value)
    }
}

/// Map an mlua error onto the evaluator error kinds
fn classify(err: mlua::Error) -> EvalError {
    let message = err.to_string();
    if message.contains(BUDGET_EXHAUSTED) {
        return EvalError::LimitExceeded(message);
    }
    match err {
        mlua::Error::SyntaxError { message, .. } => EvalError::Syntax(message),
        mlua::Error::MemoryError(msg) => EvalError::LimitExceeded(msg),
        mlua::Error::SerializeError(msg) | mlua::Error::DeserializeError(msg) => EvalError::Conversion(msg),
        _ => EvalError::Runtime(message),
    }
}

/// Remove null-valued object fields at every depth; array elements are kept
fn drop_null_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), drop_null_fields(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(drop_null_fields).collect()),
        other => other.clone(),
    }
}

fn is_null(value: &LuaValue) -> bool {
    match value {
        LuaValue::Nil => true,
        LuaValue::LightUserData(ud) => ud.0.is_null(),
        _ => false,
    }
}

fn lua_to_string(value: &LuaValue) -> String {
    match value {
        LuaValue::String(s) => s.to_str().map(|s| String::from(&*s)).unwrap_or_default(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        _ => String::new(),
    }
}

fn lua_to_number(value: &LuaValue) -> f64 {
    match value {
        LuaValue::Integer(i) => *i as f64,
        LuaValue::Number(n) => *n,
        LuaValue::Boolean(b) => f64::from(u8::from(*b)),
        LuaValue::String(s) => s
            .to_str()
            .ok()
            .and_then(|s| s.trim().replace(',', "").parse::<f64>().ok())
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FieldRule;
    use serde_json::json;

    fn eval(expression: &str, doc: Value) -> Result<Value, EvalError> {
        let rule = FieldRule::new("eval:x", "X");
        LuaEvaluator::default().evaluate(expression, &EvalContext::new(doc, &rule))
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1+1", json!({})).unwrap(), json!(2));
        assert_eq!(eval("10 / 4", json!({})).unwrap(), json!(2.5));
    }

    #[test]
    fn test_doc_binding() {
        let doc = json!({"first_name": "Ada", "last_name": "Lovelace", "qty": 3});
        assert_eq!(
            eval("doc.first_name .. ' ' .. doc.last_name", doc.clone()).unwrap(),
            json!("Ada Lovelace")
        );
        assert_eq!(eval("doc.qty * 2", doc).unwrap(), json!(6));
    }

    #[test]
    fn test_null_fields_are_nil() {
        let doc = json!({"email": null});
        assert_eq!(eval("doc.email == nil", doc.clone()).unwrap(), json!(true));
        assert_eq!(eval("doc.missing", doc).unwrap(), Value::Null);
    }

    #[test]
    fn test_array_nulls_are_kept() {
        let doc = json!({"items": [1, null, 3], "rows": [{"a": null, "b": 2}]});

        assert_eq!(eval("doc.items", doc.clone()).unwrap(), json!([1, null, 3]));
        assert_eq!(eval("#doc.items", doc.clone()).unwrap(), json!(3));
        assert_eq!(eval("is_null(doc.items[2])", doc.clone()).unwrap(), json!(true));
        assert_eq!(eval("doc.items[2] == null", doc.clone()).unwrap(), json!(true));
        assert_eq!(eval("doc.rows[1].a == nil", doc).unwrap(), json!(true));
    }

    #[test]
    fn test_is_null() {
        assert_eq!(eval("is_null(doc.missing)", json!({})).unwrap(), json!(true));
        assert_eq!(eval("is_null(null)", json!({})).unwrap(), json!(true));
        assert_eq!(eval("is_null(0)", json!({})).unwrap(), json!(false));
        assert_eq!(eval("null", json!({})).unwrap(), Value::Null);
    }

    #[test]
    fn test_rule_binding() {
        assert_eq!(eval("rule.remote_fieldname", json!({})).unwrap(), json!("X"));
    }

    #[test]
    fn test_tables_convert_back() {
        let value = eval("{ status = 'Open', n = 1 }", json!({})).unwrap();
        assert_eq!(value["status"], json!("Open"));
        assert_eq!(value["n"], json!(1));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(eval("cint('42')", json!({})).unwrap(), json!(42));
        assert_eq!(eval("flt('1,250.5')", json!({})).unwrap(), json!(1250.5));
        assert_eq!(eval("cstr(7)", json!({})).unwrap(), json!("7"));
        assert_eq!(eval("cint(nil)", json!({})).unwrap(), json!(0));

        let today = eval("today()", json!({})).unwrap();
        assert_eq!(today.as_str().unwrap().len(), 10);
    }

    #[test]
    fn test_sandbox_has_no_io_or_os() {
        assert!(matches!(eval("io.open('/etc/passwd')", json!({})), Err(EvalError::Runtime(_))));
        assert!(matches!(eval("os.execute('ls')", json!({})), Err(EvalError::Runtime(_))));
        assert!(matches!(eval("require('os')", json!({})), Err(EvalError::Runtime(_))));
        assert!(matches!(eval("dofile('/etc/passwd')", json!({})), Err(EvalError::Runtime(_))));
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(eval("doc.qty *", json!({})), Err(EvalError::Syntax(_))));
    }

    #[test]
    fn test_instruction_budget() {
        let evaluator = LuaEvaluator::new(8 * 1024 * 1024, 10_000);
        let result = evaluator.evaluate("(function() while true do end end)()", &EvalContext::empty());
        assert!(matches!(result, Err(EvalError::LimitExceeded(_))));
    }

    #[test]
    fn test_functions_do_not_convert() {
        assert!(matches!(eval("string.upper", json!({})), Err(EvalError::Conversion(_))));
    }
}
