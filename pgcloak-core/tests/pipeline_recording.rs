//! Pipeline behavior against a recording store.
//!
//! This test suite covers:
//! - Statement order for in-place and new-table runs
//! - Chunked fetching and per-batch bulk appends
//! - Exclude rules, rows without values, and staged column projection
//! - Untouched nested siblings keep their exact numbers and key order
//! - Dry runs and skipped materialization
//! - Fail-fast plan compilation and batch failure aggregation

mod common;

use common::{RecordingStore, context, field, row};
use pgcloak_core::{
    MapEnvironment, MaterializationTarget, PgCloakError, PipelineOptions, ProviderRegistry,
    ProviderSpec, TableDefinition, anonymize_tables, schema::ExcludeRule, truncate_tables,
};
use serde_json::json;

fn in_place() -> MaterializationTarget {
    MaterializationTarget {
        target_schema: None,
        overwrite_values_in_source_tables: Some(true),
    }
}

fn auth_user() -> TableDefinition {
    let mut table = TableDefinition::new("auth_user");
    table.fields = vec![
        field("first_name", ProviderSpec::new("mask")),
        field("last_name", ProviderSpec::new("mask")),
        field("email", ProviderSpec::new("md5")),
    ];
    table
}

fn users() -> Vec<pgcloak_core::Row> {
    vec![
        row(json!({"id": 1, "first_name": "Jane", "last_name": "Doe", "email": "jane@corp.io"})),
        row(json!({"id": 2, "first_name": "John", "last_name": "Roe", "email": "john@example.com"})),
        row(json!({"id": 3, "first_name": "Ann", "last_name": "Poe", "email": null})),
    ]
}

fn options(workers: usize) -> PipelineOptions {
    PipelineOptions {
        workers,
        ..PipelineOptions::default()
    }
}

#[tokio::test]
async fn test_in_place_statement_sequence() {
    let mut store = RecordingStore::with_rows(users());
    let reports = anonymize_tables(
        &mut store,
        &[auth_user()],
        &in_place(),
        &ProviderRegistry::with_builtin_providers(),
        &context(MapEnvironment::new()),
        &options(1),
    )
    .await
    .unwrap();

    assert_eq!(
        store.statements,
        vec![
            "SELECT COUNT(*) FROM \"auth_user\"",
            "DECLARE \"fetch_large_result\" NO SCROLL CURSOR FOR SELECT row_to_json(src)::text FROM (SELECT \"id\", \"first_name\", \"last_name\", \"email\" FROM \"auth_user\") src",
            "CREATE TEMP TABLE \"tmp_auth_user\" AS SELECT \"id\", \"first_name\", \"last_name\", \"email\" FROM \"auth_user\" WITH NO DATA",
            "FETCH FORWARD 2000 FROM \"fetch_large_result\"",
            "APPEND tmp_auth_user 3",
            "FETCH FORWARD 2000 FROM \"fetch_large_result\"",
            "CREATE INDEX ON \"tmp_auth_user\" (\"id\")",
            "UPDATE \"auth_user\" t SET \"first_name\" = s.\"first_name\", \"last_name\" = s.\"last_name\", \"email\" = s.\"email\" FROM \"tmp_auth_user\" s WHERE t.\"id\" = s.\"id\"",
            "CLOSE \"fetch_large_result\"",
            "DROP TABLE IF EXISTS \"tmp_auth_user\"",
        ]
    );

    assert_eq!(
        store.staged("tmp_auth_user"),
        vec![
            row(json!({"id": 1, "first_name": "XXXX", "last_name": "XXX", "email": "a6ebc46e5f82d8be472f8d469eb59a1a"})),
            row(json!({"id": 2, "first_name": "XXXX", "last_name": "XXX", "email": "d4c74594d841139328695756648b6bd6"})),
            row(json!({"id": 3, "first_name": "XXX", "last_name": "XXX", "email": null})),
        ]
    );

    let report = &reports[0];
    assert_eq!(report.table, "auth_user");
    assert_eq!(report.batches, 1);
    assert_eq!(report.rows_read, 3);
    assert_eq!(report.rows_staged, 3);
    assert_eq!(report.rows_excluded, 0);
}

#[tokio::test]
async fn test_nested_update_keeps_sibling_numbers_and_key_order() {
    let source: serde_json::Value = serde_json::from_str(
        r#"{"id":1,"metadata":{"zip":"12345","email":"a@b.c","balance":12345678901234567890123.45,"ref":0.30000000000000000001}}"#,
    )
    .unwrap();
    let mut store = RecordingStore::with_rows(vec![row(source)]);
    let mut table = TableDefinition::new("account");
    table.fields = vec![field(
        "metadata.email",
        ProviderSpec::new("set").with_arg("value", "x"),
    )];

    anonymize_tables(
        &mut store,
        &[table],
        &in_place(),
        &ProviderRegistry::with_builtin_providers(),
        &context(MapEnvironment::new()),
        &options(1),
    )
    .await
    .unwrap();

    let staged = store.staged("tmp_account");
    assert_eq!(staged.len(), 1);
    assert_eq!(
        serde_json::to_string(&staged[0]["metadata"]).unwrap(),
        r#"{"zip":"12345","email":"x","balance":12345678901234567890123.45,"ref":0.30000000000000000001}"#
    );
    assert_eq!(serde_json::to_string(&staged[0]["id"]).unwrap(), "1");
}

#[tokio::test]
async fn test_chunked_batches() {
    let rows = (1..=5)
        .map(|id| row(json!({"id": id, "email": format!("user{}@corp.io", id)})))
        .collect();
    let mut store = RecordingStore::with_rows(rows);
    let mut table = TableDefinition::new("customer");
    table.chunk_size = 2;
    table.fields = vec![field("email", ProviderSpec::new("mask"))];

    let reports = anonymize_tables(
        &mut store,
        &[table],
        &in_place(),
        &ProviderRegistry::with_builtin_providers(),
        &context(MapEnvironment::new()),
        &options(4),
    )
    .await
    .unwrap();

    assert_eq!(store.executed("FETCH FORWARD 2 ").len(), 4);
    assert_eq!(
        store.executed("APPEND"),
        vec!["APPEND tmp_customer 2", "APPEND tmp_customer 2", "APPEND tmp_customer 1"]
    );
    assert_eq!(reports[0].batches, 3);
    assert_eq!(reports[0].rows_staged, 5);
    let mut ids: Vec<_> = store
        .staged("tmp_customer")
        .iter()
        .filter_map(|r| r.get("id").and_then(|v| v.as_i64()))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_excluded_and_empty_rows_are_not_staged() {
    let rows = vec![
        row(json!({"id": 1, "email": "jane@corp.io", "is_staff": false})),
        row(json!({"id": 2, "email": "John@Example.com", "is_staff": false})),
        row(json!({"id": 3, "email": "ann@corp.io", "is_staff": true})),
        row(json!({"id": 4, "email": null, "is_staff": false})),
    ];
    let mut store = RecordingStore::with_rows(rows);
    let mut table = TableDefinition::new("auth_user");
    table.fields = vec![field("email", ProviderSpec::new("mask"))];
    table.excludes = vec![
        ExcludeRule {
            column: "email".to_string(),
            patterns: vec!["\\S.*@example.com".to_string()],
        },
        ExcludeRule {
            column: "is_staff".to_string(),
            patterns: vec!["true".to_string()],
        },
    ];

    let reports = anonymize_tables(
        &mut store,
        &[table],
        &in_place(),
        &ProviderRegistry::with_builtin_providers(),
        &context(MapEnvironment::new()),
        &options(2),
    )
    .await
    .unwrap();

    assert!(store.statements[1].contains(
        "SELECT \"id\", \"email\", \"is_staff\" FROM \"auth_user\""
    ));
    assert!(store.statements[2].contains("AS SELECT \"id\", \"email\" FROM \"auth_user\""));

    let staged = store.staged("tmp_auth_user");
    assert_eq!(staged, vec![row(json!({"id": 1, "email": "XXXXXXXXXXXX"}))]);
    let (_, columns, _) = &store.appended[0];
    assert_eq!(columns, &vec!["id".to_string(), "email".to_string()]);
    assert_eq!(reports[0].rows_excluded, 3);
}

#[tokio::test]
async fn test_new_table_materialization() {
    let mut store = RecordingStore::with_rows(vec![row(json!({
        "id": 7,
        "first_name": "Jane",
        "metadata": {"contact": {"email": "jane@corp.io", "phone": "555"}, "note": "vip"}
    }))]);
    let mut table = TableDefinition::new("customer");
    table.target = MaterializationTarget {
        target_schema: Some("anonymized".to_string()),
        overwrite_values_in_source_tables: None,
    };
    table.fields = vec![
        field("metadata.contact.email", ProviderSpec::new("set").with_arg("value", "nobody@example.com")),
        field("first_name", ProviderSpec::new("mask")),
    ];

    anonymize_tables(
        &mut store,
        &[table],
        &MaterializationTarget::default(),
        &ProviderRegistry::with_builtin_providers(),
        &context(MapEnvironment::new()),
        &options(1),
    )
    .await
    .unwrap();

    assert_eq!(
        store.staged("tmp_customer"),
        vec![row(json!({
            "id": 7,
            "first_name": "XXXX",
            "metadata": {"contact": {"email": "nobody@example.com", "phone": "555"}, "note": "vip"}
        }))]
    );
    assert!(store.executed("UPDATE").is_empty());
    assert_eq!(
        store.executed("DROP TABLE IF EXISTS \"anonymized\""),
        vec!["DROP TABLE IF EXISTS \"anonymized\".\"customer\""]
    );
    assert_eq!(
        store.executed("CREATE TABLE"),
        vec!["CREATE TABLE \"anonymized\".\"customer\" AS (SELECT \"id\", \"first_name\", json_build_object('contact', json_build_object('email', \"metadata\"->'contact'->'email')) AS \"metadata\" FROM \"tmp_customer\")"]
    );
}

#[tokio::test]
async fn test_dry_run_caps_rows_and_skips_count() {
    let mut store = RecordingStore::with_rows(users());
    let options = PipelineOptions {
        dry_run: true,
        materialize: false,
        workers: 1,
        ..PipelineOptions::default()
    };
    let reports = anonymize_tables(
        &mut store,
        &[auth_user()],
        &in_place(),
        &ProviderRegistry::with_builtin_providers(),
        &context(MapEnvironment::new()),
        &options,
    )
    .await
    .unwrap();

    assert!(store.executed("SELECT COUNT").is_empty());
    assert!(store.statements[0].ends_with("FROM \"auth_user\" LIMIT 100) src"));
    assert!(store.executed("UPDATE").is_empty());
    assert!(store.executed("CREATE INDEX").is_empty());
    assert_eq!(store.executed("APPEND"), vec!["APPEND tmp_auth_user 3"]);
    assert_eq!(
        store.statements.last().map(String::as_str),
        Some("DROP TABLE IF EXISTS \"tmp_auth_user\"")
    );
    assert_eq!(reports[0].rows_read, 3);
}

#[tokio::test]
async fn test_compile_errors_happen_before_any_statement() {
    let mut store = RecordingStore::with_rows(users());
    let mut ambiguous = TableDefinition::new("second");
    ambiguous.fields = vec![field("email", ProviderSpec::new("clear"))];
    ambiguous.target = MaterializationTarget {
        target_schema: Some("anonymized".to_string()),
        overwrite_values_in_source_tables: Some(true),
    };

    let error = anonymize_tables(
        &mut store,
        &[auth_user(), ambiguous],
        &in_place(),
        &ProviderRegistry::with_builtin_providers(),
        &context(MapEnvironment::new()),
        &options(1),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        error,
        PgCloakError::AmbiguousMaterializationTarget { ref table } if table == "second"
    ));
    assert!(store.statements.is_empty());
}

#[tokio::test]
async fn test_row_failures_abort_the_batch() {
    let mut store = RecordingStore::with_rows(users());
    let mut table = TableDefinition::new("auth_user");
    table.fields = vec![field(
        "first_name",
        ProviderSpec::new("pbkdf2").with_arg("secret", "MISSING_SECRET"),
    )];

    let error = anonymize_tables(
        &mut store,
        &[table],
        &in_place(),
        &ProviderRegistry::with_builtin_providers(),
        &context(MapEnvironment::new()),
        &options(2),
    )
    .await
    .unwrap_err();

    match error {
        PgCloakError::BatchTransform {
            table,
            failed,
            total,
            ..
        } => {
            assert_eq!(table, "auth_user");
            assert_eq!(failed, 3);
            assert_eq!(total, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(store.appended.is_empty());
    assert!(store.executed("UPDATE").is_empty());
}

#[tokio::test]
async fn test_pbkdf2_secret_from_environment() {
    let mut store = RecordingStore::with_rows(users());
    let mut table = TableDefinition::new("auth_user");
    table.fields = vec![field(
        "first_name",
        ProviderSpec::new("pbkdf2").with_arg("secret", "DA_SECRET_PHRASE"),
    )];

    anonymize_tables(
        &mut store,
        &[table],
        &in_place(),
        &ProviderRegistry::with_builtin_providers(),
        &context(MapEnvironment::new().with_var("DA_SECRET_PHRASE", "secret_phrase")),
        &options(1),
    )
    .await
    .unwrap();

    let service = pgcloak_core::EncryptingService::new("secret_phrase");
    let mut names: Vec<String> = store
        .staged("tmp_auth_user")
        .iter()
        .filter_map(|r| r.get("first_name").and_then(|v| v.as_str()))
        .map(|token| service.decrypt(token).unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["Ann", "Jane", "John"]);
}

#[tokio::test]
async fn test_truncate_tables() {
    let mut store = RecordingStore::default();
    truncate_tables(&mut store, &["django_session".to_string(), "auth_token".to_string()])
        .await
        .unwrap();
    truncate_tables(&mut store, &[]).await.unwrap();
    assert_eq!(
        store.statements,
        vec!["TRUNCATE TABLE \"django_session\", \"auth_token\""]
    );
}
