//! Schema file loading through the real process environment.

use std::io::Write;
use std::path::PathBuf;

use pgcloak::load_schema;
use pgcloak_core::{Materialization, MaterializationTarget, ProcessEnvironment, ProviderSpec};
use tempfile::NamedTempFile;

const DOCUMENT: &str = r##"
public:
  truncate:
    - django_session
    - ${AUDIT_TABLE}
  tables:
    - auth_user:
        primary_key: id
        chunk_size: ${CHUNK}
        search: "is_staff = false"
        excludes:
          - email:
              - "\\S.*@example.com"
        fields:
          - first_name:
              provider:
                name: fake.first_name
          - email:
              provider:
                name: md5
              append: "@localhost"
          - password:
              provider:
                name: pbkdf2
                secret: DA_SECRET_PHRASE
    - customer:
        target_schema: anonymized
        fields:
          - metadata.contact.phone:
              provider:
                name: mask
                sign: "#"
reporting:
  overwrite_values_in_source_tables: "${OVERWRITE}"
"##;

fn write_schema(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn test_schema_file_with_environment_placeholders() {
    let file = write_schema(DOCUMENT);
    temp_env::with_vars(
        [
            ("AUDIT_TABLE", Some("audit_log")),
            ("CHUNK", Some("500")),
            ("OVERWRITE", Some("true")),
        ],
        || {
            let document = load_schema(file.path(), &ProcessEnvironment).unwrap();
            assert_eq!(document.schemas.len(), 2);

            let public = &document.schemas[0];
            assert_eq!(public.name, "public");
            assert_eq!(public.truncate, vec!["django_session", "audit_log"]);
            assert_eq!(public.tables.len(), 2);

            let auth_user = &public.tables[0];
            assert_eq!(auth_user.name, "auth_user");
            assert_eq!(auth_user.chunk_size, 500);
            assert_eq!(auth_user.search.as_deref(), Some("is_staff = false"));
            assert_eq!(auth_user.excludes[0].patterns, vec!["\\S.*@example.com"]);
            assert_eq!(auth_user.fields.len(), 3);
            assert_eq!(auth_user.fields[1].append.as_deref(), Some("@localhost"));
            // Secrets given by name stay names; they are resolved when used.
            assert_eq!(
                auth_user.fields[2].provider,
                ProviderSpec::new("pbkdf2").with_arg("secret", "DA_SECRET_PHRASE")
            );

            let customer = &public.tables[1];
            assert_eq!(customer.fields[0].path, "metadata.contact.phone");
            assert_eq!(
                customer
                    .materialization(&MaterializationTarget::default())
                    .unwrap(),
                Materialization::NewTable {
                    target_schema: "anonymized".to_string()
                }
            );

            let reporting = &document.schemas[1];
            assert!(reporting.tables.is_empty());
            assert_eq!(
                reporting.target.overwrite_values_in_source_tables,
                Some(true)
            );
        },
    );
}

#[test]
fn test_schema_file_unset_variable_becomes_its_name() {
    let file = write_schema("${SCHEMA_NAME_FOR_TEST}:\n  truncate:\n    - t\n");
    temp_env::with_var_unset("SCHEMA_NAME_FOR_TEST", || {
        let document = load_schema(file.path(), &ProcessEnvironment).unwrap();
        assert_eq!(document.schemas[0].name, "SCHEMA_NAME_FOR_TEST");
    });
}

#[test]
fn test_schema_file_invalid_chunk_size_from_environment() {
    let file = write_schema("public:\n  tables:\n    - t:\n        chunk_size: ${CHUNK_FOR_TEST}\n");
    temp_env::with_var("CHUNK_FOR_TEST", Some("lots"), || {
        let error = load_schema(file.path(), &ProcessEnvironment).unwrap_err();
        assert!(format!("{:#}", error).contains("lots"));
    });
}

#[test]
fn test_schema_file_fails_validation() {
    let file = write_schema("public:\n  tables:\n    - t:\n        chunk_size: 0\n");
    let error = load_schema(file.path(), &ProcessEnvironment).unwrap_err();
    assert!(format!("{:#}", error).contains("chunk_size"));
}

#[test]
fn test_missing_schema_file() {
    let path = PathBuf::from("/nonexistent/pgcloak/schema.yml");
    let error = load_schema(&path, &ProcessEnvironment).unwrap_err();
    assert!(error.to_string().contains("Failed to read schema file"));
}
