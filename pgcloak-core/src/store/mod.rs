//! The database collaborator of the pipeline.
//!
//! The pipeline only needs to run statements, read through a named
//! server-side cursor, and append rows to a table in bulk. Anything that can
//! do that implements [`AnonymizationStore`]; [`PostgresStore`] is the real
//! one.
//!
//! # Object Safety
//! The trait is object-safe so callers can hold a
//! `Box<dyn AnonymizationStore>`.

mod config;
#[cfg(feature = "postgresql")]
mod postgres;

use async_trait::async_trait;

use crate::Result;
use crate::path::Row;
use crate::sql;

pub use config::{ConnectionConfig, DEFAULT_PORT};
#[cfg(feature = "postgresql")]
pub use postgres::PostgresStore;

/// Statement execution, cursor reads and bulk appends.
///
/// Every call runs on the same session, so temporary tables and cursors
/// created by one call are visible to the next.
#[async_trait]
pub trait AnonymizationStore: Send {
    /// Executes a statement that returns no rows.
    async fn execute(&mut self, statement: &str) -> Result<()>;

    /// Runs a query returning a single count.
    async fn query_count(&mut self, query: &str) -> Result<u64>;

    /// Fetches up to `limit` rows from an open cursor. An empty result means
    /// the cursor is exhausted.
    async fn fetch_rows(&mut self, cursor: &str, limit: usize) -> Result<Vec<Row>>;

    /// Appends `rows` to `table`, reading only `columns` from each row.
    ///
    /// Returns the number of rows written.
    async fn bulk_append(&mut self, table: &str, columns: &[String], rows: &[Row])
    -> Result<u64>;

    /// Declares a forward-only cursor over `select`.
    async fn declare_cursor(&mut self, cursor: &str, select: &str) -> Result<()> {
        self.execute(&sql::declare_cursor(cursor, select)).await
    }

    /// Closes a cursor opened by [`declare_cursor`](Self::declare_cursor).
    async fn close_cursor(&mut self, cursor: &str) -> Result<()> {
        self.execute(&sql::close_cursor(cursor)).await
    }
}

#[async_trait]
impl<S: AnonymizationStore + ?Sized> AnonymizationStore for Box<S> {
    async fn execute(&mut self, statement: &str) -> Result<()> {
        (**self).execute(statement).await
    }

    async fn query_count(&mut self, query: &str) -> Result<u64> {
        (**self).query_count(query).await
    }

    async fn fetch_rows(&mut self, cursor: &str, limit: usize) -> Result<Vec<Row>> {
        (**self).fetch_rows(cursor, limit).await
    }

    async fn bulk_append(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        (**self).bulk_append(table, columns, rows).await
    }

    async fn declare_cursor(&mut self, cursor: &str, select: &str) -> Result<()> {
        (**self).declare_cursor(cursor, select).await
    }

    async fn close_cursor(&mut self, cursor: &str) -> Result<()> {
        (**self).close_cursor(cursor).await
    }
}
