//! Value transformation providers.
//!
//! A provider maps one column value to its replacement. Providers are built
//! from a [`ProviderSpec`](crate::schema::ProviderSpec) through the
//! [`ProviderRegistry`], once per field, before any row is read.
//!
//! | id | behavior |
//! |---|---|
//! | `choice` | random element of `values` |
//! | `clear` | `NULL` |
//! | `keep` | input unchanged |
//! | `set` | fixed `value` |
//! | `mask` | every character replaced by `sign` (default `X`) |
//! | `md5` | hex digest, or a bounded number with `as_number` |
//! | `uuid4` | random UUID |
//! | `datetime` | fixed or current date |
//! | `fake.*` | generated fake data, e.g. `fake.first_name`, `fake.unique.email` |
//! | `pbkdf2` | reversible AES-GCM token keyed by `secret` |

use std::fmt;

use serde_json::Value;

use crate::Result;
use crate::environment::{ProcessEnvironment, SharedEnvironment};

pub mod args;
mod builtin;
mod fake_data;
mod pseudonym;
mod registry;

pub use pseudonym::looks_like_env_name;
pub use registry::{ProviderEntry, ProviderFactory, ProviderRegistry};

/// A value transformation strategy.
///
/// `alter_value` depends only on its input and the construction arguments,
/// except for providers documented as random (`choice`, `uuid4`, `fake.*`,
/// `pbkdf2`). Implementations are shared across worker threads.
pub trait Provider: Send + Sync + fmt::Debug {
    /// Returns the replacement for `value`.
    fn alter_value(&self, value: &Value) -> Result<Value>;
}

/// Capabilities handed to provider constructors.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    environment: SharedEnvironment,
}

impl ProviderContext {
    /// Creates a context over the given environment.
    pub fn new(environment: SharedEnvironment) -> Self {
        Self { environment }
    }

    /// Environment used to resolve secrets.
    pub fn environment(&self) -> &SharedEnvironment {
        &self.environment
    }
}

impl Default for ProviderContext {
    fn default() -> Self {
        Self::new(std::sync::Arc::new(ProcessEnvironment))
    }
}

/// Textual form of a value as used by string-oriented providers.
///
/// Strings are taken as-is; other scalars use their JSON rendering.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
