//! Error types with credential sanitization.
//!
//! Error messages never carry database passwords, connection strings with
//! credentials, or pbkdf2 secrets. Provider and schema errors name the
//! offending provider id, argument or table so a schema author can fix them.

use thiserror::Error;

/// Main error type for pgcloak operations.
///
/// # Security
/// All error messages are sanitized to prevent credential leakage.
/// Connection strings and passwords are never included in error output.
#[derive(Debug, Error)]
pub enum PgCloakError {
    /// Database connection failed (credentials sanitized)
    #[error("Database connection failed: {context}")]
    Connection {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A statement, cursor fetch or bulk load failed
    #[error("Storage operation failed: {context}")]
    Storage {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Configuration or runtime setup error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Malformed table, field or exclude definition
    #[error("Bad schema format: {message}")]
    BadSchemaFormat { message: String },

    /// Neither (or both) of target_schema and the in-place flag resolved for a table
    #[error(
        "Table '{table}': one of target_schema or overwrite_values_in_source_tables parameters must be defined"
    )]
    AmbiguousMaterializationTarget { table: String },

    /// A provider id was registered twice
    #[error("Provider id '{id}' is already registered")]
    DuplicateProviderId { id: String },

    /// No registered provider matches the requested id
    #[error("Unknown provider '{id}'")]
    UnknownProvider { id: String },

    /// A provider argument is missing or invalid
    #[error("Invalid argument '{argument}' for provider '{provider}': {message}")]
    InvalidProviderArgument {
        provider: String,
        argument: String,
        message: String,
    },

    /// A provider could not produce a value
    #[error("Provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    /// A single row failed to transform
    #[error("Transform failed for table '{table}': {message}")]
    Transform { table: String, message: String },

    /// One or more rows of a batch failed; the batch is aborted
    #[error("{failed} of {total} rows failed to transform for table '{table}'")]
    BatchTransform {
        table: String,
        failed: usize,
        total: usize,
        #[source]
        source: Box<PgCloakError>,
    },

    /// Encryption failed
    #[error("Encryption operation failed: {context}")]
    Encryption { context: String },

    /// Token could not be decrypted (malformed or not authentic)
    #[error("Decryption failed: {reason}")]
    Decryption { reason: String },

    /// I/O operation failed
    #[error("I/O operation failed: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization or deserialization failed
    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results with PgCloakError
pub type Result<T> = std::result::Result<T, PgCloakError>;

impl PgCloakError {
    /// Creates a connection error with sanitized context
    pub fn connection_failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            context: "Database connection failed".to_string(),
            source: Box::new(error),
        }
    }

    /// Creates a storage error with context
    pub fn storage<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a schema format error
    pub fn bad_schema(message: impl Into<String>) -> Self {
        Self::BadSchemaFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid provider argument error
    pub fn invalid_argument(
        provider: impl Into<String>,
        argument: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidProviderArgument {
            provider: provider.into(),
            argument: argument.into(),
            message: message.into(),
        }
    }

    /// Creates a provider runtime error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a row transform error
    pub fn transform(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transform {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates a decryption error. The reason must not contain secret material.
    pub fn decryption(reason: impl Into<String>) -> Self {
        Self::Decryption {
            reason: reason.into(),
        }
    }

    /// Creates a serialization error with context
    pub fn serialization(context: impl Into<String>, error: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source: error,
        }
    }

    /// Creates an I/O error with context
    pub fn io(context: impl Into<String>, error: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source: error,
        }
    }
}
