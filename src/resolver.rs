//! Mapping resolution
//!
//! [`MappingResolver`] applies a [`MappingDefinition`] to a source record.
//! For every field rule, in order:
//!
//! 1. The direction picks which fieldname is the output key and which is the
//!    value source (`Push`: key = remote, source = local; `Pull`: swapped).
//! 2. A plain rule's value source is a field name, a quoted literal, or an
//!    `eval:` expression.
//! 3. A child-table rule maps every row of the named child collection with
//!    the child mapping, recursively.
//!
//! Output is built off to the side and only returned once every rule has
//! succeeded.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::domain::{FieldRule, MappedRecord, MappedRecordBuilder, MappingDefinition, Record, SourceKind, ValueSource};
use crate::error::MappingError;
use crate::eval::{EvalContext, ExpressionEvaluator};
use crate::schema::SchemaIntrospector;
use crate::store::DefinitionStore;

/// Universal identifier field, always fetched
pub const NAME_FIELD: &str = "name";

/// Applies mapping definitions to records
#[derive(Clone)]
pub struct MappingResolver {
    store: Arc<dyn DefinitionStore>,
    schema: Arc<dyn SchemaIntrospector>,
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl MappingResolver {
    /// Create a resolver from its collaborators
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        schema: Arc<dyn SchemaIntrospector>,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> Self {
        debug!("MappingResolver::new: called");
        Self {
            store,
            schema,
            evaluator,
        }
    }

    /// Source fields to select before mapping records with `definition`
    ///
    /// Literal and expression rules are left out since they don't name a
    /// column. The migration id field is added when the local doctype has it,
    /// and `name` is always present. Other duplicates are kept.
    pub fn derive_field_list(&self, definition: &MappingDefinition) -> Vec<String> {
        debug!(name = %definition.mapping_name, "derive_field_list: called");
        let mut fields: Vec<String> = definition
            .fields
            .iter()
            .map(|rule| rule.local_fieldname.as_str())
            .filter(|spec| !spec.is_empty() && SourceKind::of(spec) == SourceKind::Field)
            .map(str::to_string)
            .collect();

        if let Some(migration_id) = definition.migration_id_field.as_deref()
            && self.schema.has_column(&definition.local_doctype, migration_id)
        {
            debug!(%migration_id, "derive_field_list: adding migration id field");
            fields.push(migration_id.to_string());
        }

        if !fields.iter().any(|f| f == NAME_FIELD) {
            fields.push(NAME_FIELD.to_string());
        }

        debug!(?fields, "derive_field_list: complete");
        fields
    }

    /// Build the mapped record for `source`
    pub fn map_record(
        &self,
        definition: &MappingDefinition,
        source: &dyn Record,
    ) -> Result<MappedRecord, MappingError> {
        debug!(
            name = %definition.mapping_name,
            mapping_type = %definition.mapping_type,
            rules = definition.fields.len(),
            "map_record: called"
        );
        // Definitions built in code never went through a loader
        definition.validate()?;

        let (key_field, value_field) = definition.mapping_type.key_and_value_fields();
        let mut mapped = MappedRecordBuilder::new();

        for rule in &definition.fields {
            let key = rule_attribute(rule, key_field)?;

            let value = if !rule.is_child_table {
                let spec = rule_attribute(rule, value_field)?;
                self.resolve_value(rule, &spec, source)?
            } else {
                let mapping_name = rule_attribute(rule, "child_table_mapping")?;
                let child_field = rule_attribute(rule, value_field)?;
                self.map_child_records(&mapping_name, &child_field, source)?
            };

            mapped.set(key, value);
        }

        let record = mapped.finish();
        debug!(name = %definition.mapping_name, keys = record.len(), "map_record: complete");
        Ok(record)
    }

    /// Map a batch of records; any failure fails the whole batch
    pub fn map_records<R: Record>(
        &self,
        definition: &MappingDefinition,
        records: &[R],
    ) -> Result<Vec<MappedRecord>, MappingError> {
        debug!(name = %definition.mapping_name, count = records.len(), "map_records: called");
        let mapped = records
            .iter()
            .map(|record| self.map_record(definition, record))
            .collect::<Result<Vec<_>, _>>()?;
        info!(name = %definition.mapping_name, count = mapped.len(), "Mapped records");
        Ok(mapped)
    }

    /// Evaluate the definition's filter condition, if it has one
    pub fn filters(&self, definition: &MappingDefinition) -> Result<Option<Value>, MappingError> {
        debug!(name = %definition.mapping_name, "filters: called");
        let Some(condition) = definition.condition.as_deref().filter(|c| !c.trim().is_empty()) else {
            debug!("filters: no condition");
            return Ok(None);
        };

        self.evaluator
            .evaluate(condition, &EvalContext::empty())
            .map(Some)
            .map_err(|source| MappingError::ExpressionEvaluation {
                expression: condition.to_string(),
                rule: format!("{} condition", definition.mapping_name),
                source,
            })
    }

    /// Resolve a plain (non child-table) rule's value
    fn resolve_value(&self, rule: &FieldRule, spec: &str, source: &dyn Record) -> Result<Value, MappingError> {
        match ValueSource::parse(spec)? {
            ValueSource::Expression(expression) => {
                debug!(%expression, "resolve_value: evaluating expression");
                let ctx = EvalContext::new(source.snapshot(), rule);
                self.evaluator
                    .evaluate(expression, &ctx)
                    .map_err(|source| MappingError::ExpressionEvaluation {
                        expression: expression.to_string(),
                        rule: rule.label(),
                        source,
                    })
            }
            ValueSource::Literal(literal) => {
                debug!(%literal, "resolve_value: literal");
                Ok(Value::String(literal.to_string()))
            }
            ValueSource::Field(field) => {
                let value = source.get(field);
                debug!(%field, found = value.is_some(), "resolve_value: field lookup");
                Ok(value.unwrap_or(Value::Null))
            }
        }
    }

    /// Map every row of a child collection with the named mapping
    fn map_child_records(
        &self,
        mapping_name: &str,
        child_field: &str,
        source: &dyn Record,
    ) -> Result<Value, MappingError> {
        debug!(%mapping_name, %child_field, "map_child_records: called");
        let mapping = self.store.load_mapping_by_name(mapping_name)?;

        let rows = match source.get(child_field) {
            Some(Value::Array(rows)) => rows,
            other => {
                return Err(MappingError::ChildSourceNotIterable {
                    field: child_field.to_string(),
                    found: describe(other.as_ref()),
                });
            }
        };

        let mapped = rows
            .iter()
            .map(|row| self.map_record(&mapping, row).map(Value::from))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(%mapping_name, count = mapped.len(), "map_child_records: complete");
        Ok(Value::Array(mapped))
    }
}

/// Read a string attribute of a field rule
fn rule_attribute(rule: &FieldRule, attribute: &str) -> Result<String, MappingError> {
    match rule.get(attribute) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(MappingError::MissingRuleAttribute {
            attribute: attribute.to_string(),
        }),
    }
}

fn describe(value: Option<&Value>) -> String {
    match value {
        None => "nothing".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(_)) => "a boolean".to_string(),
        Some(Value::Number(_)) => "a number".to_string(),
        Some(Value::String(_)) => "a string".to_string(),
        Some(Value::Object(_)) => "an object".to_string(),
        Some(Value::Array(_)) => "a list".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Document, MappingType};
    use crate::eval::{EvalError, LuaEvaluator};
    use crate::schema::StaticSchema;
    use crate::store::InMemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Evaluator that always fails
    struct FailingEvaluator;

    impl ExpressionEvaluator for FailingEvaluator {
        fn evaluate(&self, _expression: &str, _ctx: &EvalContext<'_>) -> Result<Value, EvalError> {
            Err(EvalError::Runtime("boom".to_string()))
        }
    }

    /// Evaluator that counts calls and echoes the expression text
    #[derive(Default)]
    struct CountingEvaluator {
        calls: AtomicUsize,
    }

    impl ExpressionEvaluator for CountingEvaluator {
        fn evaluate(&self, expression: &str, _ctx: &EvalContext<'_>) -> Result<Value, EvalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!(expression))
        }
    }

    fn resolver_with(store: InMemoryStore, evaluator: Arc<dyn ExpressionEvaluator>) -> MappingResolver {
        let schema = StaticSchema::new().with_doctype("ToDo", ["name", "description", "migration_id"]);
        MappingResolver::new(Arc::new(store), Arc::new(schema), evaluator)
    }

    fn resolver(store: InMemoryStore) -> MappingResolver {
        resolver_with(store, Arc::new(LuaEvaluator::default()))
    }

    fn todo_push() -> MappingDefinition {
        MappingDefinition::new("ToDo Push", MappingType::Push, "ToDo")
            .with_rule(FieldRule::new("description", "subject"))
            .with_rule(FieldRule::new("'Open'", "status"))
            .with_rule(FieldRule::new("eval:doc.priority .. '!'", "priority"))
    }

    #[test]
    fn test_derive_field_list_excludes_literals_and_expressions() {
        let def = MappingDefinition::new("m", MappingType::Push, "Note")
            .with_rule(FieldRule::new("title", "Title"))
            .with_rule(FieldRule::new("\"fixed\"", "Fixed"))
            .with_rule(FieldRule::new("eval:1+1", "Two"));

        assert_eq!(resolver(InMemoryStore::new()).derive_field_list(&def), vec!["title", "name"]);
    }

    #[test]
    fn test_derive_field_list_migration_id() {
        let resolver = resolver(InMemoryStore::new());

        let def = todo_push().with_migration_id_field("migration_id");
        assert_eq!(resolver.derive_field_list(&def), vec!["description", "migration_id", "name"]);

        // column absent from the doctype
        let def = todo_push().with_migration_id_field("remote_id");
        assert_eq!(resolver.derive_field_list(&def), vec!["description", "name"]);
    }

    #[test]
    fn test_derive_field_list_name_once_duplicates_kept() {
        let def = MappingDefinition::new("m", MappingType::Push, "ToDo")
            .with_rule(FieldRule::new("name", "id"))
            .with_rule(FieldRule::new("title", "a"))
            .with_rule(FieldRule::new("title", "b"));

        assert_eq!(
            resolver(InMemoryStore::new()).derive_field_list(&def),
            vec!["name", "title", "title"]
        );
    }

    #[test]
    fn test_map_record_push() {
        let source = Document::new("ToDo", "TD-1")
            .with_field("description", "Write docs")
            .with_field("priority", "High");

        let mapped = resolver(InMemoryStore::new()).map_record(&todo_push(), &source).unwrap();

        assert_eq!(mapped.keys().collect::<Vec<_>>(), vec!["subject", "status", "priority"]);
        assert_eq!(mapped.get("subject"), Some(&json!("Write docs")));
        assert_eq!(mapped.get("status"), Some(&json!("Open")));
        assert_eq!(mapped.get("priority"), Some(&json!("High!")));
    }

    #[test]
    fn test_map_record_pull_swaps_roles() {
        let def = MappingDefinition::new("ToDo Pull", MappingType::Pull, "ToDo")
            .with_rule(FieldRule::new("description", "subject"))
            .with_rule(FieldRule::new("status", "'Imported'"));
        let remote = json!({"subject": "Remote task", "description": "ignored"});

        let mapped = resolver(InMemoryStore::new()).map_record(&def, &remote).unwrap();

        assert_eq!(mapped.get("description"), Some(&json!("Remote task")));
        assert_eq!(mapped.get("status"), Some(&json!("Imported")));
        assert_eq!(mapped.len(), 2);
    }

    #[test]
    fn test_literal_ignores_source() {
        let def = MappingDefinition::new("m", MappingType::Push, "ToDo").with_rule(FieldRule::new("\"hello\"", "greeting"));
        let resolver = resolver(InMemoryStore::new());

        for source in [json!({}), json!({"hello": "world"}), json!({"greeting": 1})] {
            let mapped = resolver.map_record(&def, &source).unwrap();
            assert_eq!(mapped.get("greeting"), Some(&json!("hello")));
        }
    }

    #[test]
    fn test_missing_field_maps_to_null() {
        let def = MappingDefinition::new("m", MappingType::Push, "ToDo")
            .with_rule(FieldRule::new("missing", "a"))
            .with_rule(FieldRule::new("present", "b"));

        let mapped = resolver(InMemoryStore::new())
            .map_record(&def, &json!({"present": 5}))
            .unwrap();

        assert_eq!(mapped.get("a"), Some(&Value::Null));
        assert_eq!(mapped.get("b"), Some(&json!(5)));
    }

    #[test]
    fn test_malformed_literal() {
        let def = MappingDefinition::new("m", MappingType::Push, "ToDo").with_rule(FieldRule::new("'", "a"));

        let err = resolver(InMemoryStore::new()).map_record(&def, &json!({})).unwrap_err();
        assert!(matches!(err, MappingError::MalformedLiteral { .. }));
    }

    #[test]
    fn test_expression_failure_is_fatal() {
        let def = MappingDefinition::new("m", MappingType::Push, "ToDo")
            .with_rule(FieldRule::new("title", "Title"))
            .with_rule(FieldRule::new("eval:anything", "X"));

        let resolver = resolver_with(InMemoryStore::new(), Arc::new(FailingEvaluator));
        let err = resolver.map_record(&def, &json!({"title": "t"})).unwrap_err();

        match err {
            MappingError::ExpressionEvaluation { expression, rule, source } => {
                assert_eq!(expression, "anything");
                assert_eq!(rule, "eval:anything -> X");
                assert_eq!(source, EvalError::Runtime("boom".to_string()));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_expression_sees_doc_in_pull() {
        let def = MappingDefinition::new("m", MappingType::Pull, "ToDo")
            .with_rule(FieldRule::new("total", "eval:doc.Qty * doc.Rate"));

        let mapped = resolver(InMemoryStore::new())
            .map_record(&def, &json!({"Qty": 3, "Rate": 4}))
            .unwrap();

        assert_eq!(mapped.get("total"), Some(&json!(12)));
    }

    fn order_store() -> InMemoryStore {
        InMemoryStore::new().with(
            MappingDefinition::new("Order Item", MappingType::Push, "Sales Order Item")
                .with_rule(FieldRule::new("item_code", "sku")),
        )
    }

    fn order_definition() -> MappingDefinition {
        MappingDefinition::new("Order", MappingType::Push, "Sales Order")
            .with_rule(FieldRule::new("customer", "account"))
            .with_rule(FieldRule::child_table("items", "lines", "Order Item"))
    }

    #[test]
    fn test_child_table_order_and_count() {
        let source = Document::new("Sales Order", "SO-1")
            .with_field("customer", "ACME")
            .with_children(
                "items",
                vec![
                    Document::new("Sales Order Item", "1").with_field("item_code", "A"),
                    Document::new("Sales Order Item", "2").with_field("item_code", "B"),
                    Document::new("Sales Order Item", "3").with_field("item_code", "C"),
                ],
            );

        let mapped = resolver(order_store()).map_record(&order_definition(), &source).unwrap();

        assert_eq!(
            mapped.get("lines"),
            Some(&json!([{"sku": "A"}, {"sku": "B"}, {"sku": "C"}]))
        );
        assert_eq!(mapped.get("account"), Some(&json!("ACME")));
    }

    #[test]
    fn test_empty_child_table() {
        let source = json!({"customer": "ACME", "items": []});
        let mapped = resolver(order_store()).map_record(&order_definition(), &source).unwrap();
        assert_eq!(mapped.get("lines"), Some(&json!([])));
    }

    #[test]
    fn test_nested_child_tables() {
        let store = order_store().with(order_definition()).with(
            MappingDefinition::new("Shipment", MappingType::Push, "Shipment")
                .with_rule(FieldRule::new("carrier", "Carrier"))
                .with_rule(FieldRule::child_table("orders", "Orders", "Order")),
        );
        let source = json!({
            "carrier": "DHL",
            "orders": [
                {"customer": "A", "items": [{"item_code": "x"}]},
                {"customer": "B", "items": []}
            ]
        });

        let def = store.load_mapping_by_name("Shipment").unwrap();
        let mapped = resolver(store).map_record(&def, &source).unwrap();

        assert_eq!(
            mapped.into_value(),
            json!({
                "Carrier": "DHL",
                "Orders": [
                    {"account": "A", "lines": [{"sku": "x"}]},
                    {"account": "B", "lines": []}
                ]
            })
        );
    }

    #[test]
    fn test_unknown_child_mapping_fails() {
        let def = MappingDefinition::new("Order", MappingType::Push, "Sales Order")
            .with_rule(FieldRule::new("customer", "account"))
            .with_rule(FieldRule::child_table("items", "lines", "Missing"));

        let err = resolver(InMemoryStore::new())
            .map_record(&def, &json!({"customer": "A", "items": [{}]}))
            .unwrap_err();

        assert!(matches!(err, MappingError::DefinitionNotFound { ref name } if name == "Missing"));
    }

    #[test]
    fn test_empty_source_spec_is_rejected() {
        let def = MappingDefinition::new("Blank", MappingType::Push, "ToDo").with_rule(FieldRule::new("", "a"));
        let resolver = resolver(InMemoryStore::new().with(def.clone()));

        assert_eq!(resolver.derive_field_list(&def), vec!["name"]);

        let err = resolver.map_record(&def, &json!({"": 1})).unwrap_err();
        assert!(matches!(err, MappingError::InvalidDefinition { ref name, .. } if name == "Blank"));
    }

    #[test]
    fn test_invalid_child_definition_is_rejected() {
        let store = InMemoryStore::new()
            .with(MappingDefinition::new("Order Item", MappingType::Push, "Sales Order Item").with_rule(FieldRule::new("item_code", "")));

        let err = resolver(store)
            .map_record(&order_definition(), &json!({"customer": "A", "items": [{"item_code": "x"}]}))
            .unwrap_err();

        assert!(matches!(err, MappingError::InvalidDefinition { ref name, .. } if name == "Order Item"));
    }

    #[test]
    fn test_child_source_not_iterable() {
        let resolver = resolver(order_store());

        let err = resolver
            .map_record(&order_definition(), &json!({"customer": "A"}))
            .unwrap_err();
        assert!(matches!(err, MappingError::ChildSourceNotIterable { ref found, .. } if found == "nothing"));

        let err = resolver
            .map_record(&order_definition(), &json!({"customer": "A", "items": "A,B"}))
            .unwrap_err();
        assert!(matches!(err, MappingError::ChildSourceNotIterable { ref found, .. } if found == "a string"));
    }

    #[test]
    fn test_nested_failure_aborts_parent() {
        let store = InMemoryStore::new().with(
            MappingDefinition::new("Order Item", MappingType::Push, "Sales Order Item")
                .with_rule(FieldRule::new("'", "broken")),
        );

        let result = resolver(store).map_record(&order_definition(), &json!({"customer": "A", "items": [{}]}));
        assert!(matches!(result, Err(MappingError::MalformedLiteral { .. })));
    }

    #[test]
    fn test_idempotent() {
        let source = json!({"description": "d", "priority": "Low"});
        let resolver = resolver(InMemoryStore::new());

        let first = resolver.map_record(&todo_push(), &source).unwrap();
        let second = resolver.map_record(&todo_push(), &source).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_expressions_only_evaluated_for_eval_rules() {
        let evaluator = Arc::new(CountingEvaluator::default());
        let resolver = resolver_with(InMemoryStore::new(), evaluator.clone());

        let mapped = resolver.map_record(&todo_push(), &json!({"description": "d"})).unwrap();

        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(mapped.get("priority"), Some(&json!("doc.priority .. '!'")));
    }

    #[test]
    fn test_map_records_all_or_nothing() {
        let resolver = resolver(order_store());
        let good = json!({"customer": "A", "items": []});
        let bad = json!({"customer": "B"});

        let mapped = resolver.map_records(&order_definition(), &[good.clone(), good.clone()]).unwrap();
        assert_eq!(mapped.len(), 2);

        assert!(resolver.map_records(&order_definition(), &[good, bad]).is_err());
    }

    #[test]
    fn test_filters() {
        let resolver = resolver(InMemoryStore::new());

        assert_eq!(resolver.filters(&todo_push()).unwrap(), None);

        let def = todo_push().with_condition("{ status = 'Open' }");
        assert_eq!(resolver.filters(&def).unwrap(), Some(json!({"status": "Open"})));

        let def = todo_push().with_condition("{ status = ");
        assert!(resolver.filters(&def).unwrap_err().is_evaluation());
    }
}
