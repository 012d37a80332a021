//! Command line front end for pgcloak.
//!
//! The binary in `main.rs` is a thin wrapper; argument parsing, schema file
//! loading, the per-schema run and the dump step live here so they can be
//! tested without a terminal.
//!
//! # Security Guarantees
//! - The database password is read from `--password` or `PGPASSWORD` and is
//!   only passed to the connection and to `pg_dump` through its environment
//! - Pseudonym secrets given by variable name are resolved at use, never logged

pub mod cli;
pub mod config;
pub mod dump;
pub mod run;

pub use cli::{Cli, Command, DecryptArgs, GlobalArgs};
pub use config::{interpolate, load_schema, parse_schema};
pub use dump::DumpCommand;
#[cfg(feature = "postgresql")]
pub use run::{RunSettings, run};
pub use run::{SchemaReport, anonymize_schema, decrypt_tokens, provider_listing};
