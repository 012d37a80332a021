//! SQL text for every statement the pipeline issues.
//!
//! Identifiers are always double-quoted. The only unquoted fragment is a
//! table's `search` expression, which is SQL written by the schema author.

/// Cursor used for chunked extraction.
pub const CURSOR_NAME: &str = "fetch_large_result";

/// Prefix of per-table staging tables.
pub const STAGING_PREFIX: &str = "tmp_";

/// Quotes an identifier: `a"b` becomes `"a""b"`.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal: `it's` becomes `'it''s'`.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quotes and comma-joins identifiers.
pub fn ident_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|name| quote_ident(name.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Name of the staging table for `table`.
pub fn staging_table(table: &str) -> String {
    format!("{}{}", STAGING_PREFIX, table)
}

fn with_search(mut sql: String, search: Option<&str>) -> String {
    if let Some(search) = search {
        sql.push_str(" WHERE ");
        sql.push_str(search);
    }
    sql
}

/// `SELECT "pk", "c1" FROM "t" [WHERE search] [LIMIT n]`
pub fn select_columns<S: AsRef<str>>(
    table: &str,
    columns: &[S],
    search: Option<&str>,
    limit: Option<usize>,
) -> String {
    let mut sql = with_search(
        format!("SELECT {} FROM {}", ident_list(columns), quote_ident(table)),
        search,
    );
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    sql
}

/// `SELECT COUNT(*) FROM "t" [WHERE search]`
pub fn count_rows(table: &str, search: Option<&str>) -> String {
    with_search(format!("SELECT COUNT(*) FROM {}", quote_ident(table)), search)
}

/// Declares a forward-only cursor yielding each row as JSON text.
pub fn declare_cursor(cursor: &str, select: &str) -> String {
    format!(
        "DECLARE {} NO SCROLL CURSOR FOR SELECT row_to_json(src)::text FROM ({}) src",
        quote_ident(cursor),
        select
    )
}

/// `FETCH FORWARD n FROM "cursor"`
pub fn fetch_forward(cursor: &str, count: usize) -> String {
    format!("FETCH FORWARD {} FROM {}", count, quote_ident(cursor))
}

/// `CLOSE "cursor"`
pub fn close_cursor(cursor: &str) -> String {
    format!("CLOSE {}", quote_ident(cursor))
}

/// Empty temporary table with the column types of the selected source columns.
pub fn create_staging<S: AsRef<str>>(staging: &str, source: &str, columns: &[S]) -> String {
    format!(
        "CREATE TEMP TABLE {} AS SELECT {} FROM {} WITH NO DATA",
        quote_ident(staging),
        ident_list(columns),
        quote_ident(source)
    )
}

/// Loads a JSON array of row objects, letting the server convert each value
/// to the staging column's type. The array is bound as `$1`.
pub fn bulk_insert_json<S: AsRef<str>>(table: &str, columns: &[S]) -> String {
    let columns = ident_list(columns);
    format!(
        "INSERT INTO {table} ({columns}) SELECT {columns} FROM json_populate_recordset(NULL::{table}, $1::json)",
        table = quote_ident(table),
        columns = columns
    )
}

/// `CREATE INDEX ON "staging" ("pk")`
pub fn create_index(table: &str, column: &str) -> String {
    format!(
        "CREATE INDEX ON {} ({})",
        quote_ident(table),
        quote_ident(column)
    )
}

/// Copies staged columns onto the source rows with the same primary key.
pub fn update_from_staging<S: AsRef<str>>(
    table: &str,
    staging: &str,
    primary_key: &str,
    columns: &[S],
) -> String {
    let assignments = columns
        .iter()
        .map(|column| {
            let column = quote_ident(column.as_ref());
            format!("{} = s.{}", column, column)
        })
        .collect::<Vec<_>>()
        .join(", ");
    let primary_key = quote_ident(primary_key);
    format!(
        "UPDATE {} t SET {} FROM {} s WHERE t.{} = s.{}",
        quote_ident(table),
        assignments,
        quote_ident(staging),
        primary_key,
        primary_key
    )
}

/// `"schema"."table"`
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// `DROP TABLE IF EXISTS <name>`; `name` must already be quoted.
pub fn drop_table_if_exists(name: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", name)
}

/// `CREATE TABLE <name> AS (SELECT <expressions> FROM "staging")`; `name` must already be quoted.
pub fn create_table_as(name: &str, expressions: &[String], staging: &str) -> String {
    format!(
        "CREATE TABLE {} AS (SELECT {} FROM {})",
        name,
        expressions.join(", "),
        quote_ident(staging)
    )
}

/// `TRUNCATE TABLE "a", "b"`, or `None` for an empty list.
pub fn truncate<S: AsRef<str>>(tables: &[S]) -> Option<String> {
    if tables.is_empty() {
        return None;
    }
    Some(format!("TRUNCATE TABLE {}", ident_list(tables)))
}

/// `SET search_path TO "schema"`
pub fn set_search_path(schema: &str) -> String {
    format!("SET search_path TO {}", quote_ident(schema))
}
