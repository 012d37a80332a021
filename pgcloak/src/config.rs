//! Schema file loading.
//!
//! Every string in the YAML document, keys included, may reference an
//! environment variable as `${NAME}`. Unset variables are replaced by their
//! bare name; placeholders whose name is not made of word characters are
//! kept as written.

use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use pgcloak_core::{Environment, SchemaDocument};
use regex::{Captures, Regex};
use serde_yaml::{Mapping, Value};

fn placeholder_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{(\w+)\}").ok())
        .as_ref()
}

/// Replaces `${NAME}` placeholders in `text`.
pub fn interpolate(text: &str, environment: &dyn Environment) -> String {
    let Some(pattern) = placeholder_pattern() else {
        return text.to_string();
    };
    pattern
        .replace_all(text, |captures: &Captures<'_>| {
            let name = &captures[1];
            environment.var(name).unwrap_or_else(|| name.to_string())
        })
        .into_owned()
}

fn interpolate_value(value: Value, environment: &dyn Environment) -> Value {
    match value {
        Value::String(text) => Value::String(interpolate(&text, environment)),
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(|item| interpolate_value(item, environment))
                .collect(),
        ),
        Value::Mapping(mapping) => Value::Mapping(
            mapping
                .into_iter()
                .map(|(key, value)| {
                    (
                        interpolate_value(key, environment),
                        interpolate_value(value, environment),
                    )
                })
                .collect::<Mapping>(),
        ),
        Value::Tagged(mut tagged) => {
            tagged.value = interpolate_value(tagged.value, environment);
            Value::Tagged(tagged)
        }
        other => other,
    }
}

/// Parses and validates a schema document.
///
/// # Errors
/// Malformed YAML, an empty document, or a document that fails validation.
pub fn parse_schema(text: &str, environment: &dyn Environment) -> Result<SchemaDocument> {
    if text.trim().is_empty() {
        bail!("Schema file is empty");
    }
    let raw: Value = serde_yaml::from_str(text).context("Schema file is not valid YAML")?;
    if raw.is_null() {
        bail!("Schema file is empty");
    }
    let document: SchemaDocument = serde_yaml::from_value(interpolate_value(raw, environment))
        .context("Schema file has an invalid structure")?;
    document.validate()?;
    Ok(document)
}

/// Reads `path` and parses it with [`parse_schema`].
///
/// # Errors
/// The file cannot be read, or [`parse_schema`] fails.
pub fn load_schema(path: &Path, environment: &dyn Environment) -> Result<SchemaDocument> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file {}", path.display()))?;
    parse_schema(&text, environment)
        .with_context(|| format!("Invalid schema file {}", path.display()))
}
