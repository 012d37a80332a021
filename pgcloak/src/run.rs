//! Per-schema orchestration.
//!
//! Each schema of the document gets its own connection and transaction:
//! search path, optional init SQL, truncation, then every table in order.
//! The transaction commits only when all of that succeeded and this is not
//! a dry run. A dump, when requested, follows each committed schema.

use std::time::Duration;

use anyhow::{Context, Result};
use pgcloak_core::{
    AnonymizationStore, Environment, EncryptingService, PipelineOptions, ProviderContext,
    ProviderRegistry, SchemaDefinition, TableReport, providers::looks_like_env_name, run_table,
    sql, truncate_tables,
};
use tracing::info;
use zeroize::Zeroizing;

#[cfg(feature = "postgresql")]
use crate::dump::DumpCommand;
#[cfg(feature = "postgresql")]
use pgcloak_core::{ConnectionConfig, Credentials, PostgresStore, SchemaDocument};
#[cfg(feature = "postgresql")]
use std::time::Instant;
#[cfg(feature = "postgresql")]
use tracing::warn;

/// What happened to one schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaReport {
    pub schema: String,
    pub tables: Vec<TableReport>,
    /// False for dry runs.
    pub committed: bool,
    pub elapsed: Duration,
}

/// Anonymizes one schema on an open transaction.
///
/// Every table is compiled before the first statement is sent, so a bad
/// provider or materialization target leaves the database untouched.
///
/// # Errors
/// The first compilation, statement or transformation error.
pub async fn anonymize_schema<S>(
    store: &mut S,
    schema: &SchemaDefinition,
    init_sql: Option<&str>,
    registry: &ProviderRegistry,
    context: &ProviderContext,
    options: &PipelineOptions,
) -> pgcloak_core::Result<Vec<TableReport>>
where
    S: AnonymizationStore + ?Sized,
{
    let plans = pgcloak_core::pipeline::compile_tables(
        &schema.tables,
        &schema.target,
        registry,
        context,
    )?;

    store.execute(&sql::set_search_path(&schema.name)).await?;
    if let Some(init_sql) = init_sql.filter(|s| !s.trim().is_empty()) {
        info!("Running init SQL for schema '{}'", schema.name);
        store.execute(init_sql).await?;
    }
    truncate_tables(store, &schema.truncate).await?;

    let mut reports = Vec::with_capacity(plans.len());
    for plan in &plans {
        reports.push(run_table(store, plan, options).await?);
    }
    Ok(reports)
}

/// Connection and behavior of a full run.
#[cfg(feature = "postgresql")]
#[derive(Debug)]
pub struct RunSettings {
    pub connection: ConnectionConfig,
    pub credentials: Credentials,
    pub options: PipelineOptions,
    pub init_sql: Option<String>,
    pub dump: Option<DumpCommand>,
}

/// Processes every schema of `document` in order, stopping at the first failure.
///
/// # Errors
/// Connection, transaction, pipeline or dump failures, with the schema name
/// as context.
#[cfg(feature = "postgresql")]
pub async fn run(
    document: &SchemaDocument,
    settings: &RunSettings,
    registry: &ProviderRegistry,
    context: &ProviderContext,
) -> Result<Vec<SchemaReport>> {
    settings.connection.validate()?;
    let mut reports = Vec::with_capacity(document.schemas.len());
    for schema in &document.schemas {
        reports.push(run_schema(schema, settings, registry, context).await?);
    }
    Ok(reports)
}

#[cfg(feature = "postgresql")]
async fn run_schema(
    schema: &SchemaDefinition,
    settings: &RunSettings,
    registry: &ProviderRegistry,
    context: &ProviderContext,
) -> Result<SchemaReport> {
    let started = Instant::now();
    info!("Processing schema '{}' on {}", schema.name, settings.connection);

    let mut store = PostgresStore::connect(&settings.connection, &settings.credentials).await?;
    store.begin().await?;

    let outcome = anonymize_schema(
        &mut store,
        schema,
        settings.init_sql.as_deref(),
        registry,
        context,
        &settings.options,
    )
    .await;

    let tables = match outcome {
        Ok(tables) => tables,
        Err(error) => {
            if let Err(rollback_error) = store.rollback().await {
                warn!("Rollback of schema '{}' failed: {}", schema.name, rollback_error);
            }
            if let Err(close_error) = store.close().await {
                warn!("Closing connection failed: {}", close_error);
            }
            return Err(error)
                .with_context(|| format!("Anonymization of schema '{}' failed", schema.name));
        }
    };

    let committed = if settings.options.dry_run {
        store.rollback().await?;
        info!("Dry run: changes to schema '{}' rolled back", schema.name);
        false
    } else {
        store.commit().await?;
        true
    };
    store.close().await?;

    let elapsed = started.elapsed();
    info!("Anonymization of schema '{}' took {:.2?}", schema.name, elapsed);

    if committed && let Some(dump) = &settings.dump {
        dump.run()
            .await
            .with_context(|| format!("Dump after schema '{}' failed", schema.name))?;
    }

    Ok(SchemaReport {
        schema: schema.name.clone(),
        tables,
        committed,
        elapsed,
    })
}

/// One line per provider: id padded to a column, then its description.
pub fn provider_listing(registry: &ProviderRegistry) -> String {
    let width = registry
        .entries()
        .map(|entry| entry.id().len())
        .max()
        .unwrap_or(0);
    let mut listing = String::from("Available providers:\n\n");
    for entry in registry.entries() {
        listing.push_str(&format!(
            "{:<width$}  {}\n",
            entry.id(),
            entry.description(),
            width = width
        ));
    }
    listing
}

/// Decrypts pbkdf2 pseudonyms. `secret` is the passphrase or, when it looks
/// like a variable name, the name of the variable holding it.
///
/// # Errors
/// The variable is unset, or a token does not decrypt with the passphrase.
pub fn decrypt_tokens(
    secret: &str,
    tokens: &[String],
    environment: &dyn Environment,
) -> Result<Vec<String>> {
    let passphrase = if looks_like_env_name(secret) {
        Zeroizing::new(
            environment
                .var(secret)
                .with_context(|| format!("Environment variable {} is not set", secret))?,
        )
    } else {
        Zeroizing::new(secret.to_string())
    };
    let service = EncryptingService::new(passphrase.as_str());
    tokens
        .iter()
        .map(|token| {
            service
                .decrypt(token)
                .with_context(|| format!("Failed to decrypt '{}'", token))
        })
        .collect()
}
