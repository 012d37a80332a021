//! Command line arguments.
//!
//! Connection flags fall back to the libpq environment variables
//! (`PGHOST`, `PGPORT`, `PGDATABASE`, `PGUSER`, `PGPASSWORD`) so the tool
//! behaves like `psql` and `pg_dump` in the same shell.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pgcloak_core::{ConnectionConfig, Credentials, PipelineOptions};

/// Username used when neither `--user` nor `PGUSER` is given.
pub const DEFAULT_USER: &str = "postgres";

#[derive(Debug, Parser)]
#[command(name = "pgcloak")]
#[command(about = "Anonymize PostgreSQL tables from a schema file")]
#[command(version)]
#[command(long_about = "
pgcloak - bulk PostgreSQL anonymization

Reads a YAML schema file describing which columns of which tables to
anonymize and with which provider, streams the rows through the providers
and writes the results back in place or into tables of another schema.

SAFETY:
- Each schema is processed inside a single transaction
- --dry-run reads at most 100 rows per table and never commits
- Reversible pseudonyms (pbkdf2) can be read back with `pgcloak decrypt`

EXAMPLES:
  pgcloak --schema schema.yml --dbname app --user app_admin
  pgcloak --schema schema.yml --dry-run -v
  pgcloak --schema schema.yml --dump-file app.dump
  pgcloak decrypt --secret DA_SECRET_PHRASE 1a2b...-...-...
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Schema file
    #[arg(long, default_value = "schema.yml", help = "Path to the YAML schema file")]
    pub schema: PathBuf,

    /// Database name
    #[arg(long, env = "PGDATABASE", help = "Name of the database")]
    pub dbname: Option<String>,

    /// Database user
    #[arg(long, env = "PGUSER", default_value = DEFAULT_USER, help = "Name of the database user")]
    pub user: String,

    /// Database password
    #[arg(
        long,
        env = "PGPASSWORD",
        default_value = "",
        hide_env_values = true,
        hide_default_value = true,
        help = "Password for the database user"
    )]
    pub password: String,

    /// Database host
    #[arg(long, env = "PGHOST", default_value = "localhost", help = "Database hostname")]
    pub host: String,

    /// Database port
    #[arg(long, env = "PGPORT", default_value_t = pgcloak_core::store::DEFAULT_PORT, help = "Port of the database")]
    pub port: u16,

    /// Dry run
    #[arg(
        long,
        help = "Read at most 100 rows per table and roll back instead of committing"
    )]
    pub dry_run: bool,

    /// Dump file
    #[arg(
        long,
        value_name = "FILE",
        help = "Create a pg_dump custom-format dump of the anonymized database"
    )]
    pub dump_file: Option<PathBuf>,

    /// Initialization SQL
    #[arg(
        long,
        value_name = "SQL",
        help = "SQL to run in each schema transaction before anonymization"
    )]
    pub init_sql: Option<String>,

    /// List providers
    #[arg(short, long, help = "List the available providers and exit")]
    pub list_providers: bool,

    /// Worker threads
    #[arg(long, help = "Worker threads used to transform each batch")]
    pub workers: Option<usize>,

    /// Skip materialization
    #[arg(
        long,
        help = "Stage anonymized rows without writing them back"
    )]
    pub skip_materialization: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decrypt pbkdf2 pseudonyms
    Decrypt(DecryptArgs),
}

#[derive(Debug, Args)]
pub struct DecryptArgs {
    /// Passphrase or the name of the environment variable holding it
    #[arg(
        long,
        env = "PGCLOAK_SECRET",
        hide_env_values = true,
        help = "Passphrase, or the name of the variable holding it (e.g. DA_SECRET_PHRASE)"
    )]
    pub secret: String,

    /// Tokens to decrypt
    #[arg(required = true, help = "Tokens produced by the pbkdf2 provider")]
    pub tokens: Vec<String>,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, help = "Suppress all output except errors")]
    pub quiet: bool,
}

impl Cli {
    /// Connection settings for the target database.
    pub fn connection_config(&self) -> ConnectionConfig {
        let config = ConnectionConfig::new(self.host.clone()).with_port(self.port);
        match &self.dbname {
            Some(dbname) => config.with_database(dbname.clone()),
            None => config,
        }
    }

    /// Credentials for the target database; an empty password means none.
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.user.clone(), Some(self.password.clone()))
    }

    /// Pipeline options derived from the flags.
    pub fn pipeline_options(&self) -> PipelineOptions {
        let defaults = PipelineOptions::default();
        PipelineOptions {
            dry_run: self.dry_run,
            workers: self.workers.filter(|&n| n > 0).unwrap_or(defaults.workers),
            materialize: !self.skip_materialization,
            ..defaults
        }
    }
}
