//! PostgreSQL implementation of [`AnonymizationStore`].
//!
//! # Security Features
//! - The password is passed to the driver only and never logged
//! - Connection descriptions in errors come from `ConnectionConfig`'s `Display`
//! - All work happens inside an explicit transaction that callers commit or
//!   roll back as a whole

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPoolOptions};
use sqlx::{Executor, PgPool, Postgres, Row as _, Transaction};

use super::{AnonymizationStore, ConnectionConfig};
use crate::Result;
use crate::error::PgCloakError;
use crate::path::Row;
use crate::security::Credentials;
use crate::sql;

/// Longest statement prefix quoted in error context.
const STATEMENT_CONTEXT_CHARS: usize = 120;

fn statement_context(statement: &str) -> String {
    let mut context: String = statement.chars().take(STATEMENT_CONTEXT_CHARS).collect();
    if context.len() < statement.len() {
        context.push_str("...");
    }
    format!("Statement failed: {}", context)
}

/// A single PostgreSQL session with an optional open transaction.
///
/// Temporary tables and cursors live in the session, so the pool is capped
/// at one connection. Statements require an open transaction: cursors are
/// only valid inside one, and the run must be able to roll everything back.
pub struct PostgresStore {
    pool: PgPool,
    transaction: Option<Transaction<'static, Postgres>>,
    config: ConnectionConfig,
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("config", &self.config)
            .field("pool_size", &self.pool.size())
            .field("in_transaction", &self.transaction.is_some())
            .finish()
    }
}

impl PostgresStore {
    /// Connects to the server described by `config`.
    ///
    /// # Errors
    /// Returns `Configuration` for an invalid config and `Connection` if the
    /// server cannot be reached or rejects the credentials.
    pub async fn connect(config: &ConnectionConfig, credentials: &Credentials) -> Result<Self> {
        config.validate()?;

        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(credentials.username());
        if let Some(password) = credentials.password() {
            options = options.password(password);
        }
        if let Some(database) = &config.database {
            options = options.database(database);
        }

        let application_name = sql::quote_literal(&config.application_name);
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(config.connect_timeout)
            .after_connect(move |conn, _meta| {
                let statement = format!("SET application_name = {}", application_name);
                Box::pin(async move {
                    conn.execute(statement.as_str()).await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(|e| PgCloakError::Connection {
                context: format!("Failed to connect to {}", config),
                source: Box::new(e),
            })?;

        tracing::debug!("Connected to {}", config);
        Ok(Self {
            pool,
            transaction: None,
            config: config.clone(),
        })
    }

    /// The configuration this store connected with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Opens a transaction.
    ///
    /// # Errors
    /// Returns `Configuration` if one is already open.
    pub async fn begin(&mut self) -> Result<()> {
        if self.transaction.is_some() {
            return Err(PgCloakError::configuration("a transaction is already open"));
        }
        let transaction = self
            .pool
            .begin()
            .await
            .map_err(|e| PgCloakError::storage("Failed to begin transaction", e))?;
        self.transaction = Some(transaction);
        Ok(())
    }

    /// Commits the open transaction, if any.
    pub async fn commit(&mut self) -> Result<()> {
        if let Some(transaction) = self.transaction.take() {
            transaction
                .commit()
                .await
                .map_err(|e| PgCloakError::storage("Failed to commit transaction", e))?;
        }
        Ok(())
    }

    /// Rolls back the open transaction, if any.
    pub async fn rollback(&mut self) -> Result<()> {
        if let Some(transaction) = self.transaction.take() {
            transaction
                .rollback()
                .await
                .map_err(|e| PgCloakError::storage("Failed to roll back transaction", e))?;
        }
        Ok(())
    }

    /// Rolls back anything uncommitted and closes the pool.
    pub async fn close(mut self) -> Result<()> {
        let rolled_back = self.rollback().await;
        self.pool.close().await;
        rolled_back
    }

    fn connection(&mut self) -> Result<&mut PgConnection> {
        self.transaction
            .as_deref_mut()
            .ok_or_else(|| PgCloakError::configuration("no open transaction; call begin() first"))
    }
}

#[async_trait]
impl AnonymizationStore for PostgresStore {
    async fn execute(&mut self, statement: &str) -> Result<()> {
        tracing::trace!("{}", statement);
        let conn = self.connection()?;
        conn.execute(sqlx::raw_sql(statement))
            .await
            .map_err(|e| PgCloakError::storage(statement_context(statement), e))?;
        Ok(())
    }

    async fn query_count(&mut self, query: &str) -> Result<u64> {
        tracing::trace!("{}", query);
        let conn = self.connection()?;
        let count: i64 = sqlx::query_scalar(query)
            .fetch_one(conn)
            .await
            .map_err(|e| PgCloakError::storage(statement_context(query), e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn fetch_rows(&mut self, cursor: &str, limit: usize) -> Result<Vec<Row>> {
        let statement = sql::fetch_forward(cursor, limit);
        tracing::trace!("{}", statement);
        let conn = self.connection()?;
        let records = conn
            .fetch_all(sqlx::raw_sql(&statement))
            .await
            .map_err(|e| PgCloakError::storage(statement_context(&statement), e))?;

        records
            .iter()
            .map(|record| {
                let text: String = record
                    .try_get(0)
                    .map_err(|e| PgCloakError::storage("Failed to read fetched row", e))?;
                match serde_json::from_str::<Value>(&text)
                    .map_err(|e| PgCloakError::serialization("Failed to parse fetched row", e))?
                {
                    Value::Object(row) => Ok(row),
                    other => Err(PgCloakError::configuration(format!(
                        "cursor '{}' returned a non-object row: {}",
                        cursor, other
                    ))),
                }
            })
            .collect()
    }

    async fn bulk_append(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }

        let payload = Value::Array(
            rows.iter()
                .map(|row| {
                    Value::Object(
                        columns
                            .iter()
                            .map(|column| {
                                (column.clone(), row.get(column).cloned().unwrap_or(Value::Null))
                            })
                            .collect(),
                    )
                })
                .collect(),
        );
        let payload = serde_json::to_string(&payload)
            .map_err(|e| PgCloakError::serialization("Failed to encode staged rows", e))?;

        let statement = sql::bulk_insert_json(table, columns);
        tracing::trace!("{} ({} rows)", statement, rows.len());
        let conn = self.connection()?;
        let result = sqlx::query(&statement)
            .bind(payload)
            .execute(conn)
            .await
            .map_err(|e| PgCloakError::storage(statement_context(&statement), e))?;
        Ok(result.rows_affected())
    }
}
