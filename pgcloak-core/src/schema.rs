//! Anonymization schema definitions.
//!
//! The schema document maps each database schema name to its truncate list
//! and table definitions:
//!
//! ```yaml
//! public:
//!   truncate: [django_session]
//!   tables:
//!     - auth_user:
//!         primary_key: id
//!         chunk_size: 5000
//!         overwrite_values_in_source_tables: true
//!         excludes:
//!           - email: ["\\S[^@]*@example\\.com"]
//!         fields:
//!           - first_name:
//!               provider:
//!                 name: fake.first_name
//!           - email:
//!               provider:
//!                 name: md5
//!               append: "@localhost"
//! ```
//!
//! Tables, fields and exclude rules are single-key mappings whose key is the
//! name; document order is preserved everywhere.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{self, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;
use crate::error::PgCloakError;

/// Default primary key column.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Default number of rows fetched per batch.
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// All schemas of a schema document, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDocument {
    pub schemas: Vec<SchemaDefinition>,
}

/// One database schema: tables to truncate and tables to anonymize.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDefinition {
    pub name: String,
    pub truncate: Vec<String>,
    pub tables: Vec<TableDefinition>,
    /// Schema-wide materialization defaults.
    pub target: MaterializationTarget,
}

/// Anonymization rules for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub primary_key: String,
    pub chunk_size: usize,
    /// SQL boolean expression restricting the rows read.
    pub search: Option<String>,
    pub target: MaterializationTarget,
    pub excludes: Vec<ExcludeRule>,
    pub fields: Vec<FieldDefinition>,
}

/// A transformed column or nested attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    /// Dotted path; the head is the physical column.
    pub path: String,
    pub provider: ProviderSpec,
    /// Suffix concatenated to the altered value.
    pub append: Option<String>,
    /// Template applied after `append`.
    pub format: Option<String>,
}

/// Provider name plus its constructor arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub name: String,
    #[serde(flatten)]
    pub args: Map<String, Value>,
}

impl ProviderSpec {
    /// Creates a spec without arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Map::new(),
        }
    }

    /// Adds an argument.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Rows whose `column` matches any pattern are left out of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludeRule {
    pub column: String,
    pub patterns: Vec<String>,
}

/// The raw `target_schema` / `overwrite_values_in_source_tables` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializationTarget {
    pub target_schema: Option<String>,
    pub overwrite_values_in_source_tables: Option<bool>,
}

/// How staged rows are written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialization {
    /// Update the source table from staging, joined on the primary key.
    InPlace,
    /// Create `target_schema.<table>` from staging.
    NewTable { target_schema: String },
}

impl MaterializationTarget {
    /// True when either key was given.
    pub fn is_set(&self) -> bool {
        self.target_schema.is_some() || self.overwrite_values_in_source_tables.is_some()
    }

    /// Resolves the pair into exactly one mode.
    ///
    /// # Errors
    /// `AmbiguousMaterializationTarget` when neither or both modes are selected.
    pub fn resolve(&self, table: &str) -> Result<Materialization> {
        let target_schema = self
            .target_schema
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let in_place = self.overwrite_values_in_source_tables.unwrap_or(false);

        match (target_schema, in_place) {
            (Some(target_schema), false) => Ok(Materialization::NewTable {
                target_schema: target_schema.to_string(),
            }),
            (None, true) => Ok(Materialization::InPlace),
            _ => Err(PgCloakError::AmbiguousMaterializationTarget {
                table: table.to_string(),
            }),
        }
    }
}

impl TableDefinition {
    /// Creates a table definition with defaults and no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            search: None,
            target: MaterializationTarget::default(),
            excludes: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Picks the table's own target when it sets one, else `defaults`.
    ///
    /// Table keys override schema keys as a unit.
    pub fn materialization(&self, defaults: &MaterializationTarget) -> Result<Materialization> {
        let target = if self.target.is_set() {
            &self.target
        } else {
            defaults
        };
        target.resolve(&self.name)
    }

    /// Structural checks that need no provider or database.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PgCloakError::bad_schema("table name must not be empty"));
        }
        if self.primary_key.trim().is_empty() {
            return Err(PgCloakError::bad_schema(format!(
                "table '{}': primary_key must not be empty",
                self.name
            )));
        }
        if self.chunk_size == 0 {
            return Err(PgCloakError::bad_schema(format!(
                "table '{}': chunk_size must be greater than zero",
                self.name
            )));
        }
        for field in &self.fields {
            if field.provider.name.trim().is_empty() {
                return Err(PgCloakError::bad_schema(format!(
                    "table '{}': field '{}' has no provider name",
                    self.name, field.path
                )));
            }
        }
        for rule in &self.excludes {
            if rule.column.trim().is_empty() {
                return Err(PgCloakError::bad_schema(format!(
                    "table '{}': exclude rule without a column",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

impl SchemaDefinition {
    /// Validates every table definition.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PgCloakError::bad_schema("schema name must not be empty"));
        }
        self.tables.iter().try_for_each(TableDefinition::validate)
    }
}

// ---------------------------------------------------------------------------
// Deserialization
// ---------------------------------------------------------------------------

/// A mapping with exactly one entry: `{name: value}`.
struct NamedEntry<T> {
    name: String,
    value: T,
}

impl<'de, T> Deserialize<'de> for NamedEntry<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NamedEntryVisitor<T>(PhantomData<T>);

        impl<'de, T> Visitor<'de> for NamedEntryVisitor<T>
        where
            T: Deserialize<'de>,
        {
            type Value = NamedEntry<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping with a single key")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let Some((name, value)) = map.next_entry::<String, T>()? else {
                    return Err(de::Error::invalid_length(0, &self));
                };
                if map.next_key::<IgnoredAny>()?.is_some() {
                    return Err(de::Error::custom(format!(
                        "'{}' must be the only key of its mapping",
                        name
                    )));
                }
                Ok(NamedEntry { name, value })
            }
        }

        deserializer.deserialize_map(NamedEntryVisitor(PhantomData))
    }
}

/// Accepts a native scalar or its string form (as produced by `${VAR}` interpolation).
///
/// `Number` catches JSON numbers, which reach untagged enums as a wrapped
/// string when serde_json keeps arbitrary precision.
#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient<T> {
    Native(T),
    Text(String),
    Number(serde_json::Number),
}

fn lenient_chunk_size<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    match Lenient::<usize>::deserialize(deserializer)? {
        Lenient::Native(n) => Ok(n),
        Lenient::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("chunk_size '{}' is not a number", s))),
        Lenient::Number(n) => n
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| de::Error::custom(format!("chunk_size {} is not a number", n))),
    }
}

fn lenient_flag<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Lenient<bool>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Lenient::Native(b)) => Ok(Some(b)),
        Some(Lenient::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Some(true)),
            "false" | "no" | "off" | "0" | "" => Ok(Some(false)),
            _ => Err(de::Error::custom(format!("'{}' is not a boolean", s))),
        },
        Some(Lenient::Number(n)) => match n.as_u64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(de::Error::custom(format!("{} is not a boolean", n))),
        },
    }
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

#[derive(Deserialize)]
struct SchemaBody {
    #[serde(default)]
    truncate: Option<Vec<String>>,
    #[serde(default)]
    tables: Option<Vec<TableDefinition>>,
    #[serde(default)]
    target_schema: Option<String>,
    #[serde(default, deserialize_with = "lenient_flag")]
    overwrite_values_in_source_tables: Option<bool>,
}

#[derive(Deserialize)]
struct TableBody {
    #[serde(default = "default_primary_key")]
    primary_key: String,
    #[serde(default = "default_chunk_size", deserialize_with = "lenient_chunk_size")]
    chunk_size: usize,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    target_schema: Option<String>,
    #[serde(default, deserialize_with = "lenient_flag")]
    overwrite_values_in_source_tables: Option<bool>,
    #[serde(default)]
    excludes: Option<Vec<ExcludeRule>>,
    #[serde(default)]
    fields: Option<Vec<FieldDefinition>>,
}

#[derive(Deserialize)]
struct FieldBody {
    provider: ProviderSpec,
    #[serde(default)]
    append: Option<String>,
    #[serde(default)]
    format: Option<String>,
}

impl<'de> Deserialize<'de> for TableDefinition {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let NamedEntry { name, value } = NamedEntry::<Option<TableBody>>::deserialize(deserializer)?;
        let Some(body) = value else {
            return Ok(Self::new(name));
        };
        Ok(Self {
            name,
            primary_key: body.primary_key,
            chunk_size: body.chunk_size,
            search: body.search.filter(|s| !s.trim().is_empty()),
            target: MaterializationTarget {
                target_schema: body.target_schema,
                overwrite_values_in_source_tables: body.overwrite_values_in_source_tables,
            },
            excludes: body.excludes.unwrap_or_default(),
            fields: body.fields.unwrap_or_default(),
        })
    }
}

impl<'de> Deserialize<'de> for FieldDefinition {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let NamedEntry { name, value } = NamedEntry::<FieldBody>::deserialize(deserializer)?;
        Ok(Self {
            path: name,
            provider: value.provider,
            append: value.append,
            format: value.format,
        })
    }
}

impl<'de> Deserialize<'de> for ExcludeRule {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let NamedEntry { name, value } =
            NamedEntry::<Option<Vec<String>>>::deserialize(deserializer)?;
        Ok(Self {
            column: name,
            patterns: value.unwrap_or_default(),
        })
    }
}

impl<'de> Deserialize<'de> for SchemaDocument {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = SchemaDocument;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of schema names to schema definitions")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut schemas = Vec::new();
                while let Some((name, body)) = map.next_entry::<String, Option<SchemaBody>>()? {
                    let definition = match body {
                        Some(body) => SchemaDefinition {
                            name,
                            truncate: body.truncate.unwrap_or_default(),
                            tables: body.tables.unwrap_or_default(),
                            target: MaterializationTarget {
                                target_schema: body.target_schema,
                                overwrite_values_in_source_tables: body
                                    .overwrite_values_in_source_tables,
                            },
                        },
                        None => SchemaDefinition {
                            name,
                            ..SchemaDefinition::default()
                        },
                    };
                    schemas.push(definition);
                }
                Ok(SchemaDocument { schemas })
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}

impl SchemaDocument {
    /// Validates every schema.
    pub fn validate(&self) -> Result<()> {
        self.schemas.iter().try_for_each(SchemaDefinition::validate)
    }
}
