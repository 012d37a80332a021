//! Core anonymization pipeline for pgcloak.
//!
//! This crate streams selected columns of PostgreSQL tables through
//! pluggable value providers and writes the results back, either in place or
//! into a new table in another schema. It is driven by a declarative
//! [`schema`] and talks to the database only through
//! [`store::AnonymizationStore`].
//!
//! # Security Guarantees
//! - Credentials and pseudonym secrets are held in zeroizing containers
//! - Connection descriptions never include passwords
//! - A run's writes happen inside one transaction that dry runs never commit
//! - Reversible pseudonyms use AES-GCM with a fresh salt and nonce per value
//!
//! # Architecture
//! - [`path`] addresses nested values with dotted paths
//! - [`providers`] is the registry of value transforms
//! - [`transform`] applies exclude rules and fields to rows on a worker pool
//! - [`pipeline`] runs the per-table cursor, staging and bulk-load loop
//! - [`materialize`] writes staged rows back

pub mod environment;
pub mod error;
pub mod logging;
pub mod materialize;
pub mod path;
pub mod pipeline;
pub mod providers;
pub mod schema;
pub mod security;
pub mod sql;
pub mod store;
pub mod template;
pub mod transform;

// Re-export commonly used types
pub use environment::{Environment, MapEnvironment, ProcessEnvironment, SharedEnvironment};
pub use error::{PgCloakError, Result};
pub use path::{FieldPath, PathTree, Row};
pub use pipeline::{
    PipelineOptions, TablePlan, TableReport, anonymize_tables, run_table, truncate_tables,
};
pub use providers::{Provider, ProviderContext, ProviderRegistry};
pub use schema::{
    ExcludeRule, FieldDefinition, Materialization, MaterializationTarget, ProviderSpec,
    SchemaDefinition, SchemaDocument, TableDefinition,
};
pub use security::{Credentials, EncryptingService};
pub use store::{AnonymizationStore, ConnectionConfig};
#[cfg(feature = "postgresql")]
pub use store::PostgresStore;
