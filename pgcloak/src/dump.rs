//! `pg_dump` invocation after a successful run.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use pgcloak_core::{ConnectionConfig, Credentials};
use tracing::info;
use zeroize::Zeroizing;

/// Program invoked to create dumps.
pub const PG_DUMP: &str = "pg_dump";

/// A compressed custom-format dump of one database.
pub struct DumpCommand {
    file: PathBuf,
    database: String,
    username: String,
    host: String,
    port: u16,
    password: Option<Zeroizing<String>>,
}

impl fmt::Debug for DumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DumpCommand")
            .field("file", &self.file)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

impl DumpCommand {
    /// Dumps the database `config` points at into `file`.
    ///
    /// Without a database name the server default applies, which is the
    /// user's own database.
    pub fn new(file: impl Into<PathBuf>, config: &ConnectionConfig, credentials: &Credentials) -> Self {
        Self {
            file: file.into(),
            database: config
                .database
                .clone()
                .unwrap_or_else(|| credentials.username().to_string()),
            username: credentials.username().to_string(),
            host: config.host.clone(),
            port: config.port,
            password: credentials
                .password()
                .map(|password| Zeroizing::new(password.to_string())),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Arguments passed to `pg_dump`. The password is passed through the
    /// environment, never on the command line.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-Fc", "-Z", "9", "-d"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(self.database.clone().into());
        args.push("-U".into());
        args.push(self.username.clone().into());
        args.push("-h".into());
        args.push(self.host.clone().into());
        args.push("-p".into());
        args.push(self.port.to_string().into());
        args.push("-f".into());
        args.push(self.file.clone().into_os_string());
        args
    }

    /// Runs `pg_dump` and waits for it.
    ///
    /// # Errors
    /// `pg_dump` cannot be started or exits unsuccessfully.
    pub async fn run(&self) -> Result<()> {
        self.run_program(PG_DUMP).await
    }

    pub(crate) async fn run_program(&self, program: &str) -> Result<()> {
        info!("Creating database dump {}", self.file.display());
        let mut command = tokio::process::Command::new(program);
        command.args(self.args()).kill_on_drop(true);
        if let Some(password) = &self.password {
            command.env("PGPASSWORD", password.as_str());
        }

        let status = command
            .status()
            .await
            .with_context(|| format!("Failed to start {}", program))?;
        if !status.success() {
            bail!(
                "{} failed with {} while writing {}",
                program,
                status,
                self.file.display()
            );
        }
        info!("Dump written to {}", self.file.display());
        Ok(())
    }
}
