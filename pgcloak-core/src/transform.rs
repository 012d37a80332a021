//! Row exclusion and per-row field transformation.
//!
//! A row is dropped when an exclude rule matches it, and also when none of
//! the table's fields found a value to alter: only rows in which at least
//! one field produced a value reach staging. Their primary keys are the only
//! ones that appear in a new materialized table, and in-place updates leave
//! every other row untouched.

use std::num::NonZeroUsize;

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::Result;
use crate::error::PgCloakError;
use crate::path::{FieldPath, Row};
use crate::providers::{Provider, ProviderContext, ProviderRegistry, value_text};
use crate::schema::{ExcludeRule, FieldDefinition};
use crate::template::FormatTemplate;

/// Worker count used when none is configured.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

#[derive(Debug)]
struct CompiledExclude {
    column: String,
    patterns: Vec<Regex>,
}

/// Exclude rules with patterns compiled once per table.
///
/// Patterns match case-insensitively from the start of the value.
#[derive(Debug, Default)]
pub struct ExcludeFilter {
    rules: Vec<CompiledExclude>,
}

impl ExcludeFilter {
    /// Compiles the rules of one table.
    ///
    /// # Errors
    /// `BadSchemaFormat` when a pattern is not a valid regular expression.
    pub fn compile(rules: &[ExcludeRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let patterns = rule
                    .patterns
                    .iter()
                    .map(|pattern| {
                        RegexBuilder::new(&format!("^(?:{})", pattern))
                            .case_insensitive(true)
                            .build()
                            .map_err(|e| {
                                PgCloakError::bad_schema(format!(
                                    "invalid exclude pattern '{}' for column '{}': {}",
                                    pattern, rule.column, e
                                ))
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(CompiledExclude {
                    column: rule.column.clone(),
                    patterns,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Columns the rules read.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|rule| rule.column.as_str())
    }

    /// True when any rule's column is non-null and matches one of its patterns.
    pub fn should_exclude(&self, row: &Row) -> bool {
        self.rules.iter().any(|rule| match row.get(&rule.column) {
            None | Some(Value::Null) => false,
            Some(value) => {
                let text = value_text(value);
                rule.patterns.iter().any(|pattern| pattern.is_match(&text))
            }
        })
    }
}

/// One field definition, ready to run.
#[derive(Debug)]
pub struct FieldPlan {
    path: FieldPath,
    provider_name: String,
    provider: Box<dyn Provider>,
    append: Option<String>,
    format: Option<FormatTemplate>,
}

impl FieldPlan {
    /// Parses the path and template and instantiates the provider.
    pub fn compile(
        definition: &FieldDefinition,
        registry: &ProviderRegistry,
        context: &ProviderContext,
    ) -> Result<Self> {
        let path = FieldPath::parse(&definition.path)?;
        let provider = registry.instantiate(&definition.provider, context)?;
        let format = definition
            .format
            .as_deref()
            .map(FormatTemplate::parse)
            .transpose()?;

        Ok(Self {
            path,
            provider_name: definition.provider.name.clone(),
            provider,
            append: definition.append.clone(),
            format,
        })
    }

    /// Builds a plan around an existing provider.
    pub fn with_provider(path: FieldPath, provider: Box<dyn Provider>) -> Self {
        Self {
            path,
            provider_name: String::new(),
            provider,
            append: None,
            format: None,
        }
    }

    /// The field's dotted path.
    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    /// The `format` template, if any.
    pub fn format(&self) -> Option<&FormatTemplate> {
        self.format.as_ref()
    }

    /// Alters the field in `row`. Returns false when the row holds no value for it.
    fn apply(&self, row: &mut Row) -> std::result::Result<bool, String> {
        let original = match self.path.get(row) {
            None | Some(Value::Null) => return Ok(false),
            Some(value) => value.clone(),
        };

        let mut value = self.provider.alter_value(&original).map_err(|e| {
            if self.provider_name.is_empty() {
                format!("field '{}': {}", self.path, e)
            } else {
                format!(
                    "field '{}' (provider '{}'): {}",
                    self.path, self.provider_name, e
                )
            }
        })?;

        if !value.is_null() {
            if let Some(append) = &self.append {
                value = Value::String(value_text(&value) + append);
            }
            if let Some(format) = &self.format {
                value = Value::String(
                    format
                        .render(&value, row)
                        .map_err(|e| format!("field '{}': {}", self.path, e))?,
                );
            }
        }

        self.path.set(row, value);
        Ok(true)
    }
}

/// Rows of one batch after transformation.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Rows to stage.
    pub rows: Vec<Row>,
    /// Rows dropped by exclude rules or because no field applied.
    pub excluded: usize,
}

/// Applies a table's exclude rules and fields to rows.
#[derive(Debug)]
pub struct RowTransformer {
    table: String,
    excludes: ExcludeFilter,
    fields: Vec<FieldPlan>,
}

impl RowTransformer {
    /// Creates a transformer for `table`.
    pub fn new(table: impl Into<String>, excludes: ExcludeFilter, fields: Vec<FieldPlan>) -> Self {
        Self {
            table: table.into(),
            excludes,
            fields,
        }
    }

    /// Field plans in schema order.
    pub fn fields(&self) -> &[FieldPlan] {
        &self.fields
    }

    /// Exclude rules of the table.
    pub fn excludes(&self) -> &ExcludeFilter {
        &self.excludes
    }

    /// Transforms one row; `None` means the row is dropped.
    ///
    /// Fields run in schema order, each seeing the values written by the
    /// fields before it.
    pub fn transform_row(&self, mut row: Row) -> Result<Option<Row>> {
        if self.excludes.should_exclude(&row) {
            return Ok(None);
        }

        let mut produced = false;
        for field in &self.fields {
            produced |= field
                .apply(&mut row)
                .map_err(|message| PgCloakError::transform(&self.table, message))?;
        }

        Ok(produced.then_some(row))
    }

    /// Transforms a batch on up to `workers` threads.
    ///
    /// Every row is attempted; if any fail the whole batch fails with a
    /// `BatchTransform` error carrying the first failure.
    pub fn transform_batch(&self, rows: Vec<Row>, workers: usize) -> Result<BatchOutcome> {
        let total = rows.len();
        let workers = workers.clamp(1, total.max(1));

        let results: Vec<Result<Option<Row>>> = if workers == 1 {
            rows.into_iter().map(|row| self.transform_row(row)).collect()
        } else {
            self.transform_parallel(rows, workers)
        };

        let mut outcome = BatchOutcome::default();
        let mut failed = 0usize;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(Some(row)) => outcome.rows.push(row),
                Ok(None) => outcome.excluded = outcome.excluded.saturating_add(1),
                Err(error) => {
                    failed = failed.saturating_add(1);
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }

        match first_error {
            Some(source) => {
                tracing::warn!(
                    "{} of {} rows of '{}' failed to transform",
                    failed,
                    total,
                    self.table
                );
                Err(PgCloakError::BatchTransform {
                    table: self.table.clone(),
                    failed,
                    total,
                    source: Box::new(source),
                })
            }
            None => Ok(outcome),
        }
    }

    fn transform_parallel(&self, rows: Vec<Row>, workers: usize) -> Vec<Result<Option<Row>>> {
        let per_worker = rows.len().div_ceil(workers).max(1);
        let mut remaining = rows.into_iter();
        let mut slices: Vec<Vec<Row>> = Vec::with_capacity(workers);
        loop {
            let slice: Vec<Row> = remaining.by_ref().take(per_worker).collect();
            if slice.is_empty() {
                break;
            }
            slices.push(slice);
        }

        std::thread::scope(|scope| {
            let handles: Vec<_> = slices
                .into_iter()
                .map(|slice| {
                    let count = slice.len();
                    let handle = scope.spawn(move || {
                        slice
                            .into_iter()
                            .map(|row| self.transform_row(row))
                            .collect::<Vec<_>>()
                    });
                    (handle, count)
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|(handle, count)| {
                    handle.join().unwrap_or_else(|_| {
                        (0..count)
                            .map(|_| {
                                Err(PgCloakError::transform(
                                    &self.table,
                                    "transform worker panicked",
                                ))
                            })
                            .collect()
                    })
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ProviderSpec;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    fn field(path: &str, spec: ProviderSpec) -> FieldDefinition {
        FieldDefinition {
            path: path.to_string(),
            provider: spec,
            append: None,
            format: None,
        }
    }

    fn compile(fields: &[FieldDefinition], excludes: &[ExcludeRule]) -> RowTransformer {
        let registry = ProviderRegistry::with_builtin_providers();
        let context = ProviderContext::default();
        let plans = fields
            .iter()
            .map(|f| FieldPlan::compile(f, &registry, &context))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        RowTransformer::new("t", ExcludeFilter::compile(excludes).unwrap(), plans)
    }

    fn email_excludes() -> Vec<ExcludeRule> {
        vec![ExcludeRule {
            column: "email".to_string(),
            patterns: vec![r"\S[^@]*@example\.com".to_string()],
        }]
    }

    #[test]
    fn test_should_exclude() {
        let filter = ExcludeFilter::compile(&email_excludes()).unwrap();
        assert!(filter.should_exclude(&row(json!({"email": "john@example.com"}))));
        assert!(filter.should_exclude(&row(json!({"email": "JOHN@EXAMPLE.COM"}))));
        assert!(!filter.should_exclude(&row(json!({"email": "john@foobar.com"}))));
        // anchored at the start
        assert!(!filter.should_exclude(&row(json!({"email": " x@example.com"}))));
        assert!(!filter.should_exclude(&row(json!({"email": null}))));
        assert!(!filter.should_exclude(&row(json!({"other": "john@example.com"}))));
        assert!(!ExcludeFilter::default().should_exclude(&row(json!({"email": "a"}))));
    }

    #[test]
    fn test_exclude_matches_prefix_only() {
        let filter = ExcludeFilter::compile(&[ExcludeRule {
            column: "name".to_string(),
            patterns: vec!["foo|bar".to_string()],
        }])
        .unwrap();
        assert!(filter.should_exclude(&row(json!({"name": "barbecue"}))));
        assert!(!filter.should_exclude(&row(json!({"name": "rebar"}))));
    }

    #[test]
    fn test_exclude_numeric_values_use_text() {
        let filter = ExcludeFilter::compile(&[ExcludeRule {
            column: "age".to_string(),
            patterns: vec!["4".to_string()],
        }])
        .unwrap();
        assert!(filter.should_exclude(&row(json!({"age": 42}))));
        assert!(!filter.should_exclude(&row(json!({"age": 24}))));
    }

    #[test]
    fn test_invalid_exclude_pattern() {
        let result = ExcludeFilter::compile(&[ExcludeRule {
            column: "email".to_string(),
            patterns: vec!["(".to_string()],
        }]);
        assert!(matches!(result, Err(PgCloakError::BadSchemaFormat { .. })));
    }

    #[test]
    fn test_transform_row_with_format() {
        let mut first_name = field("first_name", ProviderSpec::new("set").with_arg("value", "dummy name"));
        first_name.format = Some("hello-{pga_value}-world".to_string());
        let mut phone = field("phone", ProviderSpec::new("md5").with_arg("as_number", true));
        phone.format = Some("+65-{pga_value}".to_string());
        let mut templated = field("templated", ProviderSpec::new("set").with_arg("value", "hello"));
        templated.format = Some("{pga_value}-{phone}-{first_name}".to_string());

        let transformer = compile(&[first_name, phone, templated], &[]);
        let result = transformer
            .transform_row(row(json!({
                "first_name": "John",
                "phone": "2354223432",
                "templated": "",
            })))
            .unwrap();

        assert_eq!(
            result.map(Value::Object),
            Some(json!({
                "first_name": "hello-dummy name-world",
                "phone": "+65-91042872",
                "templated": "hello-+65-91042872-hello-dummy name-world",
            }))
        );
    }

    #[test]
    fn test_transform_row_append() {
        let mut email = field("email", ProviderSpec::new("md5"));
        email.append = Some("@localhost".to_string());
        let transformer = compile(&[email], &[]);

        let result = transformer
            .transform_row(row(json!({"id": 1, "email": "foo"})))
            .unwrap()
            .unwrap();
        assert_eq!(result["email"], json!("acbd18db4cc2f85cedef654fccc4a4d8@localhost"));
        assert_eq!(result["id"], json!(1));
    }

    #[test]
    fn test_cleared_value_skips_append_and_format() {
        let mut email = field("email", ProviderSpec::new("clear"));
        email.append = Some("@localhost".to_string());
        email.format = Some("<{pga_value}>".to_string());
        let transformer = compile(&[email], &[]);

        let result = transformer
            .transform_row(row(json!({"id": 1, "email": "foo"})))
            .unwrap()
            .unwrap();
        assert_eq!(result["email"], Value::Null);
    }

    #[test]
    fn test_row_without_values_is_dropped() {
        let transformer = compile(
            &[
                field("first_name", ProviderSpec::new("keep")),
                field("metadata.email", ProviderSpec::new("keep")),
            ],
            &[],
        );
        let result = transformer
            .transform_row(row(json!({"id": 1, "first_name": null, "metadata": {}})))
            .unwrap();
        assert_eq!(result, None);

        let result = transformer
            .transform_row(row(json!({"id": 1, "first_name": "Jane", "metadata": {}})))
            .unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn test_excluded_row_is_dropped() {
        let transformer = compile(&[field("email", ProviderSpec::new("md5"))], &email_excludes());
        let result = transformer
            .transform_row(row(json!({"id": 1, "email": "john@example.com"})))
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_nested_field() {
        let transformer = compile(
            &[field(
                "metadata.contacts[0].email",
                ProviderSpec::new("set").with_arg("value", "x@localhost"),
            )],
            &[],
        );
        let result = transformer
            .transform_row(row(json!({
                "id": 1,
                "metadata": {"contacts": [{"email": "a@b.c", "phone": "1"}], "age": 3}
            })))
            .unwrap()
            .unwrap();
        assert_eq!(
            result["metadata"],
            json!({"contacts": [{"email": "x@localhost", "phone": "1"}], "age": 3})
        );
    }

    #[test]
    fn test_unknown_template_column_fails_row() {
        let mut email = field("email", ProviderSpec::new("keep"));
        email.format = Some("{pga_value}@{domain}".to_string());
        let transformer = compile(&[email], &[]);
        let error = transformer
            .transform_row(row(json!({"email": "a"})))
            .unwrap_err();
        assert!(matches!(error, PgCloakError::Transform { ref table, .. } if table == "t"));
        assert!(error.to_string().contains("t"));
    }

    #[derive(Debug)]
    struct FailOn(&'static str);

    impl Provider for FailOn {
        fn alter_value(&self, value: &Value) -> Result<Value> {
            if value == &json!(self.0) {
                Err(PgCloakError::provider("fail_on", "rejected"))
            } else {
                Ok(value.clone())
            }
        }
    }

    #[test]
    fn test_transform_batch_parallel() {
        let transformer = compile(&[field("email", ProviderSpec::new("md5"))], &email_excludes());
        let rows: Vec<Row> = (0..100)
            .map(|i| {
                let email = if i % 10 == 0 {
                    format!("user{}@example.com", i)
                } else {
                    format!("user{}@other.com", i)
                };
                row(json!({"id": i, "email": email}))
            })
            .collect();

        let outcome = transformer.transform_batch(rows, 4).unwrap();
        assert_eq!(outcome.rows.len(), 90);
        assert_eq!(outcome.excluded, 10);
        let ids: Vec<i64> = outcome.rows.iter().filter_map(|r| r["id"].as_i64()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted, "slices are rejoined in order");
    }

    #[test]
    fn test_transform_batch_aggregates_failures() {
        let path = FieldPath::parse("name").unwrap();
        let transformer = RowTransformer::new(
            "people",
            ExcludeFilter::default(),
            vec![FieldPlan::with_provider(path, Box::new(FailOn("bad")))],
        );
        let rows: Vec<Row> = ["ok", "bad", "ok", "bad", "bad", "ok"]
            .iter()
            .map(|name| row(json!({"name": name})))
            .collect();

        for workers in [1, 3] {
            let error = transformer.transform_batch(rows.clone(), workers).unwrap_err();
            match error {
                PgCloakError::BatchTransform {
                    table,
                    failed,
                    total,
                    source,
                } => {
                    assert_eq!(table, "people");
                    assert_eq!(failed, 3);
                    assert_eq!(total, 6);
                    assert!(source.to_string().contains("rejected"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_transform_empty_batch() {
        let transformer = compile(&[field("email", ProviderSpec::new("md5"))], &[]);
        let outcome = transformer.transform_batch(Vec::new(), 8).unwrap();
        assert!(outcome.rows.is_empty());
        assert_eq!(outcome.excluded, 0);
    }

    #[test]
    fn test_unknown_provider_fails_compile() {
        let registry = ProviderRegistry::with_builtin_providers();
        let result = FieldPlan::compile(
            &field("email", ProviderSpec::new("nope")),
            &registry,
            &ProviderContext::default(),
        );
        assert!(matches!(result, Err(PgCloakError::UnknownProvider { .. })));
    }
}
