//! In-memory store that records every statement the pipeline issues.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use pgcloak_core::{
    AnonymizationStore, FieldDefinition, MapEnvironment, ProviderContext, ProviderSpec, Result,
    Row, sql,
};
use serde_json::Value;

/// Serves queued rows through the cursor and records everything else.
#[derive(Debug, Default)]
pub struct RecordingStore {
    /// Every statement in issue order; bulk appends show up as `APPEND <table> <rows>`.
    pub statements: Vec<String>,
    /// Rows appended per table, in order.
    pub appended: Vec<(String, Vec<String>, Vec<Row>)>,
    source: VecDeque<Row>,
    count: u64,
}

impl RecordingStore {
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            count: rows.len() as u64,
            source: rows.into(),
            ..Self::default()
        }
    }

    /// All rows appended to `table`.
    pub fn staged(&self, table: &str) -> Vec<Row> {
        self.appended
            .iter()
            .filter(|(t, _, _)| t == table)
            .flat_map(|(_, _, rows)| rows.iter().cloned())
            .collect()
    }

    pub fn executed(&self, prefix: &str) -> Vec<&str> {
        self.statements
            .iter()
            .map(String::as_str)
            .filter(|s| s.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl AnonymizationStore for RecordingStore {
    async fn execute(&mut self, statement: &str) -> Result<()> {
        self.statements.push(statement.to_string());
        Ok(())
    }

    async fn query_count(&mut self, query: &str) -> Result<u64> {
        self.statements.push(query.to_string());
        Ok(self.count)
    }

    async fn fetch_rows(&mut self, cursor: &str, limit: usize) -> Result<Vec<Row>> {
        self.statements.push(sql::fetch_forward(cursor, limit));
        let take = limit.min(self.source.len());
        Ok(self.source.drain(..take).collect())
    }

    async fn bulk_append(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        self.statements
            .push(format!("APPEND {} {}", table, rows.len()));
        self.appended
            .push((table.to_string(), columns.to_vec(), rows.to_vec()));
        Ok(rows.len() as u64)
    }
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

pub fn field(path: &str, provider: ProviderSpec) -> FieldDefinition {
    FieldDefinition {
        path: path.to_string(),
        provider,
        append: None,
        format: None,
    }
}

pub fn context(environment: MapEnvironment) -> ProviderContext {
    ProviderContext::new(Arc::new(environment))
}
