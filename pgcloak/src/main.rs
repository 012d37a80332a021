//! Bulk PostgreSQL anonymization tool.
//!
//! This binary reads a YAML schema file, streams the configured columns of
//! each table through value providers and writes the results back, either
//! in place or into tables of another schema.
//!
//! # Security Guarantees
//! - Every schema is processed inside one transaction
//! - Dry runs read at most 100 rows per table and are rolled back
//! - No credentials or pseudonym secrets are logged

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use pgcloak::{Cli, Command, DumpCommand, RunSettings};
use pgcloak_core::{ProcessEnvironment, ProviderContext, ProviderRegistry, logging::init_logging};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.global.verbose, cli.global.quiet)?;

    let registry = ProviderRegistry::with_builtin_providers();
    if cli.list_providers {
        print!("{}", pgcloak::provider_listing(&registry));
        return Ok(());
    }

    match &cli.command {
        Some(Command::Decrypt(args)) => {
            let plaintexts = pgcloak::decrypt_tokens(&args.secret, &args.tokens, &ProcessEnvironment)
                .inspect_err(|e| error!("{:#}", e))?;
            for plaintext in plaintexts {
                println!("{}", plaintext);
            }
            Ok(())
        }
        None => anonymize(&cli, &registry).await,
    }
}

/// Loads the schema file and anonymizes every schema it describes.
async fn anonymize(cli: &Cli, registry: &ProviderRegistry) -> Result<()> {
    let started = Instant::now();
    info!("Loading schema file {}", cli.schema.display());
    let document = pgcloak::load_schema(&cli.schema, &ProcessEnvironment)
        .inspect_err(|e| error!("{:#}", e))?;

    let connection = cli.connection_config();
    let credentials = cli.credentials();
    let dump = cli
        .dump_file
        .as_ref()
        .map(|file| DumpCommand::new(file.clone(), &connection, &credentials));
    let settings = RunSettings {
        connection,
        credentials,
        options: cli.pipeline_options(),
        init_sql: cli.init_sql.clone(),
        dump,
    };
    if settings.options.dry_run {
        info!("Dry run: changes will be rolled back");
    }

    let context = ProviderContext::new(Arc::new(ProcessEnvironment));
    let reports = pgcloak::run(&document, &settings, registry, &context)
        .await
        .inspect_err(|e| error!("{:#}", e))?;

    let tables: usize = reports.iter().map(|report| report.tables.len()).sum();
    info!(
        "✓ Anonymized {} tables in {} schemas in {:.2?}",
        tables,
        reports.len(),
        started.elapsed()
    );
    Ok(())
}
