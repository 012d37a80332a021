//! Database connection configuration.
//!
//! This module provides the `ConnectionConfig` struct describing where the
//! anonymization run connects to.

use std::time::Duration;

use crate::error::PgCloakError;

/// Default PostgreSQL port.
pub const DEFAULT_PORT: u16 = 5432;

/// Configuration for the database connection.
///
/// # Security
/// This struct intentionally does NOT store usernames or passwords.
/// Those travel in [`crate::security::Credentials`] and are never logged.
///
/// # Example
/// ```rust
/// use pgcloak_core::store::ConnectionConfig;
///
/// let config = ConnectionConfig::new("localhost".to_string())
///     .with_port(5432)
///     .with_database("mydb".to_string());
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.to_string(), "ConnectionConfig(localhost:5432/mydb)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Database host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Optional database name
    pub database: Option<String>,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// `application_name` reported to the server
    pub application_name: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: None,
            connect_timeout: Duration::from_secs(30),
            application_name: format!("pgcloak-{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ConnectionConfig({}:{}{})",
            self.host,
            self.port,
            self.database
                .as_ref()
                .map_or_else(String::new, |db| format!("/{}", db))
        )
    }
}

impl ConnectionConfig {
    /// Validates connection configuration parameters.
    ///
    /// # Errors
    /// Returns a `Configuration` error if a value is unusable
    pub fn validate(&self) -> crate::Result<()> {
        if self.host.trim().is_empty() {
            return Err(PgCloakError::configuration("host cannot be empty"));
        }

        if self.port == 0 {
            return Err(PgCloakError::configuration("port must be greater than 0"));
        }

        if self.database.as_deref().is_some_and(|db| db.trim().is_empty()) {
            return Err(PgCloakError::configuration(
                "database name cannot be empty",
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(PgCloakError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Creates a new connection config with defaults.
    pub fn new(host: String) -> Self {
        Self {
            host,
            ..Default::default()
        }
    }

    /// Builder method to set port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder method to set database.
    pub fn with_database(mut self, database: String) -> Self {
        self.database = Some(database);
        self
    }

    /// Builder method to set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder method to set the application name.
    pub fn with_application_name(mut self, name: String) -> Self {
        self.application_name = name;
        self
    }
}
