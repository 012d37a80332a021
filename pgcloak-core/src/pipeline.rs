//! Chunked extraction, transformation and staging of one table at a time.
//!
//! For each table the pipeline
//!
//! 1. opens a forward-only cursor over the primary key, the transformed
//!    columns and any column an exclude rule or `format` template reads,
//! 2. creates an empty temporary staging table shaped like the transformed
//!    columns of the source,
//! 3. fetches `chunk_size` rows at a time, transforms them and appends the
//!    surviving rows to staging in one bulk statement per batch,
//! 4. materializes the staged rows (see [`crate::materialize`]),
//! 5. closes the cursor and drops the staging table.
//!
//! A batch is fully staged before the next one is fetched, so memory holds
//! at most one chunk of rows. Every table plan is compiled before the first
//! row is read; configuration and provider errors never leave half-processed
//! tables behind.

use std::time::{Duration, Instant};

use crate::Result;
use crate::error::PgCloakError;
use crate::materialize;
use crate::path::Row;
use crate::providers::{ProviderContext, ProviderRegistry};
use crate::schema::{Materialization, MaterializationTarget, TableDefinition};
use crate::sql;
use crate::store::AnonymizationStore;
use crate::transform::{ExcludeFilter, FieldPlan, RowTransformer, default_workers};

/// Rows read per table in a dry run.
pub const DRY_RUN_ROW_CAP: usize = 100;

/// Run-wide pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Cap extraction at `dry_run_row_cap` rows and skip the up-front count.
    pub dry_run: bool,
    pub dry_run_row_cap: usize,
    /// Threads used to transform the rows of a batch.
    pub workers: usize,
    /// Write staged rows back; when false the run stops after staging.
    pub materialize: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            dry_run_row_cap: DRY_RUN_ROW_CAP,
            workers: default_workers(),
            materialize: true,
        }
    }
}

/// What happened to one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub table: String,
    /// Non-empty batches fetched.
    pub batches: usize,
    pub rows_read: usize,
    pub rows_staged: u64,
    /// Rows dropped by exclude rules or because no field applied.
    pub rows_excluded: usize,
    pub elapsed: Duration,
}

/// A table definition compiled against the provider registry.
#[derive(Debug)]
pub struct TablePlan {
    table: String,
    primary_key: String,
    chunk_size: usize,
    search: Option<String>,
    materialization: Materialization,
    transformer: RowTransformer,
    /// Transformed physical columns in first-use order, without the primary key.
    columns: Vec<String>,
    /// Primary key, transformed columns, then columns read by excludes and templates.
    fetch_columns: Vec<String>,
}

fn push_unique(columns: &mut Vec<String>, column: &str) {
    if !columns.iter().any(|c| c == column) {
        columns.push(column.to_string());
    }
}

impl TablePlan {
    /// Validates `table`, resolves its materialization target and
    /// instantiates every field's provider.
    ///
    /// # Errors
    /// - `AmbiguousMaterializationTarget` when the table (or `defaults`)
    ///   selects neither or both modes
    /// - `BadSchemaFormat` for invalid paths, patterns or templates, a table
    ///   without fields, a transformed primary key, or a column transformed
    ///   both whole and through nested paths
    /// - `UnknownProvider` / `InvalidProviderArgument` from the registry
    pub fn compile(
        table: &TableDefinition,
        defaults: &MaterializationTarget,
        registry: &ProviderRegistry,
        context: &ProviderContext,
    ) -> Result<Self> {
        table.validate()?;
        let materialization = table.materialization(defaults)?;

        if table.fields.is_empty() {
            return Err(PgCloakError::bad_schema(format!(
                "table '{}': no fields to anonymize",
                table.name
            )));
        }

        let fields = table
            .fields
            .iter()
            .map(|field| FieldPlan::compile(field, registry, context))
            .collect::<Result<Vec<_>>>()?;
        let excludes = ExcludeFilter::compile(&table.excludes)?;

        let mut columns = Vec::new();
        for field in &fields {
            let root = field.path().root();
            if root == table.primary_key {
                return Err(PgCloakError::bad_schema(format!(
                    "table '{}': primary key '{}' cannot be anonymized",
                    table.name, root
                )));
            }
            push_unique(&mut columns, root);
        }
        for column in &columns {
            let mut usages = fields.iter().filter(|f| f.path().root() == column);
            let whole = usages.clone().any(|f| !f.path().is_nested());
            let nested = usages.any(|f| f.path().is_nested());
            if whole && nested {
                return Err(PgCloakError::bad_schema(format!(
                    "table '{}': column '{}' is transformed both as a whole and through nested paths",
                    table.name, column
                )));
            }
        }

        let mut fetch_columns = vec![table.primary_key.clone()];
        for column in &columns {
            push_unique(&mut fetch_columns, column);
        }
        for column in excludes.columns() {
            push_unique(&mut fetch_columns, column);
        }
        for field in &fields {
            for column in field.format().into_iter().flat_map(|f| f.columns()) {
                push_unique(&mut fetch_columns, column);
            }
        }

        Ok(Self {
            table: table.name.clone(),
            primary_key: table.primary_key.clone(),
            chunk_size: table.chunk_size,
            search: table.search.clone(),
            materialization,
            transformer: RowTransformer::new(&table.name, excludes, fields),
            columns,
            fetch_columns,
        })
    }

    /// Source table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn materialization(&self) -> &Materialization {
        &self.materialization
    }

    pub fn transformer(&self) -> &RowTransformer {
        &self.transformer
    }

    /// Transformed physical columns, without the primary key.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Columns of the staging table: primary key first.
    pub fn staged_columns(&self) -> Vec<String> {
        std::iter::once(self.primary_key.clone())
            .chain(self.columns.iter().cloned())
            .collect()
    }

    /// Columns read from the source table.
    pub fn fetch_columns(&self) -> &[String] {
        &self.fetch_columns
    }

    /// Name of the staging table.
    pub fn staging_table(&self) -> String {
        sql::staging_table(&self.table)
    }

    /// The extraction query, capped in a dry run.
    pub fn select_statement(&self, options: &PipelineOptions) -> String {
        sql::select_columns(
            &self.table,
            &self.fetch_columns,
            self.search.as_deref(),
            options.dry_run.then_some(options.dry_run_row_cap),
        )
    }

    /// `SELECT COUNT(*)` honoring the table's search condition.
    pub fn count_statement(&self) -> String {
        sql::count_rows(&self.table, self.search.as_deref())
    }
}

/// Compiles every table of a schema.
///
/// # Errors
/// The first compilation error; nothing has been read at that point.
pub fn compile_tables(
    tables: &[TableDefinition],
    defaults: &MaterializationTarget,
    registry: &ProviderRegistry,
    context: &ProviderContext,
) -> Result<Vec<TablePlan>> {
    tables
        .iter()
        .map(|table| TablePlan::compile(table, defaults, registry, context))
        .collect()
}

/// Empties `tables` with a single `TRUNCATE`; does nothing for an empty list.
pub async fn truncate_tables<S>(store: &mut S, tables: &[String]) -> Result<()>
where
    S: AnonymizationStore + ?Sized,
{
    if let Some(statement) = sql::truncate(tables) {
        tracing::info!("Truncating tables: {}", tables.join(", "));
        store.execute(&statement).await?;
    }
    Ok(())
}

/// Compiles and anonymizes `tables` in order.
///
/// Plans for all tables are compiled before the first table is touched.
pub async fn anonymize_tables<S>(
    store: &mut S,
    tables: &[TableDefinition],
    defaults: &MaterializationTarget,
    registry: &ProviderRegistry,
    context: &ProviderContext,
    options: &PipelineOptions,
) -> Result<Vec<TableReport>>
where
    S: AnonymizationStore + ?Sized,
{
    let plans = compile_tables(tables, defaults, registry, context)?;
    let mut reports = Vec::with_capacity(plans.len());
    for plan in &plans {
        reports.push(run_table(store, plan, options).await?);
    }
    Ok(reports)
}

/// Runs the extraction, staging and materialization of one table.
pub async fn run_table<S>(
    store: &mut S,
    plan: &TablePlan,
    options: &PipelineOptions,
) -> Result<TableReport>
where
    S: AnonymizationStore + ?Sized,
{
    let started = Instant::now();
    let table = plan.table();
    tracing::info!("Anonymizing table '{}'", table);

    let select = plan.select_statement(options);
    let total_count = if options.dry_run {
        tracing::info!("{}", select);
        options.dry_run_row_cap as u64
    } else {
        store.query_count(&plan.count_statement()).await?
    };
    let chunk_size = plan.chunk_size().max(1);
    let expected_batches = total_count.div_ceil(chunk_size as u64);

    store.declare_cursor(sql::CURSOR_NAME, &select).await?;

    let staging = plan.staging_table();
    let staged_columns = plan.staged_columns();
    store
        .execute(&sql::create_staging(&staging, table, &staged_columns))
        .await?;

    let mut report = TableReport {
        table: table.to_string(),
        batches: 0,
        rows_read: 0,
        rows_staged: 0,
        rows_excluded: 0,
        elapsed: Duration::ZERO,
    };

    loop {
        let rows = store.fetch_rows(sql::CURSOR_NAME, chunk_size).await?;
        if rows.is_empty() {
            break;
        }
        report.batches = report.batches.saturating_add(1);
        report.rows_read = report.rows_read.saturating_add(rows.len());
        tracing::debug!(
            "Table '{}': batch {}/{} ({} rows)",
            table,
            report.batches,
            expected_batches,
            rows.len()
        );

        let outcome = plan.transformer().transform_batch(rows, options.workers)?;
        report.rows_excluded = report.rows_excluded.saturating_add(outcome.excluded);

        let rows: Vec<Row> = outcome
            .rows
            .into_iter()
            .map(|mut row| {
                row.retain(|column, _| staged_columns.iter().any(|c| c == column));
                row
            })
            .collect();
        if !rows.is_empty() {
            let written = store.bulk_append(&staging, &staged_columns, &rows).await?;
            report.rows_staged = report.rows_staged.saturating_add(written);
        }
    }

    if options.materialize {
        materialize::apply(store, plan).await?;
    } else {
        tracing::info!("Skipping materialization of '{}'", table);
    }

    store.close_cursor(sql::CURSOR_NAME).await?;
    store
        .execute(&sql::drop_table_if_exists(&sql::quote_ident(&staging)))
        .await?;

    report.elapsed = started.elapsed();
    tracing::info!(
        "Anonymization of '{}' took {:.2?} ({} read, {} staged, {} excluded)",
        table,
        report.elapsed,
        report.rows_read,
        report.rows_staged,
        report.rows_excluded
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ExcludeRule, FieldDefinition, ProviderSpec};

    fn field(path: &str, provider: &str) -> FieldDefinition {
        FieldDefinition {
            path: path.to_string(),
            provider: ProviderSpec::new(provider),
            append: None,
            format: None,
        }
    }

    fn in_place() -> MaterializationTarget {
        MaterializationTarget {
            target_schema: None,
            overwrite_values_in_source_tables: Some(true),
        }
    }

    fn compile(table: &TableDefinition) -> Result<TablePlan> {
        TablePlan::compile(
            table,
            &in_place(),
            &ProviderRegistry::with_builtin_providers(),
            &ProviderContext::default(),
        )
    }

    #[test]
    fn test_plan_columns() {
        let mut table = TableDefinition::new("auth_user");
        table.fields = vec![
            field("first_name", "keep"),
            field("email", "md5"),
            field("first_name", "mask"),
        ];
        table.fields[1].format = Some("{pga_value}@{domain}".to_string());
        table.excludes = vec![ExcludeRule {
            column: "email".to_string(),
            patterns: vec![".*@example.com".to_string()],
        }];
        table.excludes.push(ExcludeRule {
            column: "is_staff".to_string(),
            patterns: vec!["true".to_string()],
        });

        let plan = compile(&table).unwrap();
        assert_eq!(plan.columns(), ["first_name", "email"]);
        assert_eq!(plan.staged_columns(), ["id", "first_name", "email"]);
        assert_eq!(
            plan.fetch_columns(),
            ["id", "first_name", "email", "is_staff", "domain"]
        );
        assert_eq!(plan.staging_table(), "tmp_auth_user");
        assert_eq!(plan.materialization(), &Materialization::InPlace);
    }

    #[test]
    fn test_plan_statements() {
        let mut table = TableDefinition::new("auth_user");
        table.fields = vec![field("email", "clear")];
        table.search = Some("is_active = true".to_string());
        let plan = compile(&table).unwrap();

        assert_eq!(
            plan.select_statement(&PipelineOptions::default()),
            "SELECT \"id\", \"email\" FROM \"auth_user\" WHERE is_active = true"
        );
        let dry_run = PipelineOptions {
            dry_run: true,
            ..PipelineOptions::default()
        };
        assert_eq!(
            plan.select_statement(&dry_run),
            "SELECT \"id\", \"email\" FROM \"auth_user\" WHERE is_active = true LIMIT 100"
        );
        assert_eq!(
            plan.count_statement(),
            "SELECT COUNT(*) FROM \"auth_user\" WHERE is_active = true"
        );
    }

    #[test]
    fn test_ambiguous_target_fails_before_providers() {
        let mut table = TableDefinition::new("auth_user");
        table.fields = vec![field("email", "no_such_provider")];
        let error = TablePlan::compile(
            &table,
            &MaterializationTarget::default(),
            &ProviderRegistry::with_builtin_providers(),
            &ProviderContext::default(),
        )
        .unwrap_err();
        assert!(matches!(
            error,
            PgCloakError::AmbiguousMaterializationTarget { ref table } if table == "auth_user"
        ));
    }

    #[test]
    fn test_unknown_provider() {
        let mut table = TableDefinition::new("auth_user");
        table.fields = vec![field("email", "no_such_provider")];
        assert!(matches!(
            compile(&table),
            Err(PgCloakError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn test_rejected_plans() {
        let table = TableDefinition::new("empty");
        assert!(matches!(
            compile(&table),
            Err(PgCloakError::BadSchemaFormat { .. })
        ));

        let mut table = TableDefinition::new("pk");
        table.fields = vec![field("id", "uuid4")];
        assert!(matches!(
            compile(&table),
            Err(PgCloakError::BadSchemaFormat { .. })
        ));

        let mut table = TableDefinition::new("mixed");
        table.fields = vec![field("metadata", "clear"), field("metadata.email", "clear")];
        assert!(matches!(
            compile(&table),
            Err(PgCloakError::BadSchemaFormat { .. })
        ));
    }

    #[test]
    fn test_compile_tables_stops_at_first_error() {
        let mut good = TableDefinition::new("good");
        good.fields = vec![field("email", "clear")];
        let bad = TableDefinition::new("bad");
        let result = compile_tables(
            &[good, bad],
            &in_place(),
            &ProviderRegistry::with_builtin_providers(),
            &ProviderContext::default(),
        );
        assert!(result.is_err());
    }
}
