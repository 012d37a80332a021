//! Typed access to provider constructor arguments.

use serde_json::Value;

use crate::Result;
use crate::error::PgCloakError;
use crate::schema::ProviderSpec;

/// Reads the arguments of one provider spec, naming the provider in errors.
#[derive(Debug, Clone, Copy)]
pub struct ProviderArgs<'a> {
    spec: &'a ProviderSpec,
}

impl<'a> ProviderArgs<'a> {
    /// Wraps a spec.
    pub fn new(spec: &'a ProviderSpec) -> Self {
        Self { spec }
    }

    /// The provider name as written in the schema.
    pub fn provider(&self) -> &'a str {
        &self.spec.name
    }

    /// Raw argument, `None` when absent. An explicit `null` is `Some(Null)`.
    pub fn raw(&self, key: &str) -> Option<&'a Value> {
        self.spec.args.get(key)
    }

    /// Argument error for `key`.
    pub fn invalid(&self, key: &str, message: impl Into<String>) -> PgCloakError {
        PgCloakError::invalid_argument(&self.spec.name, key, message)
    }

    /// A string argument; `null` counts as absent.
    pub fn string(&self, key: &str) -> Result<Option<&'a str>> {
        match self.raw(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(self.invalid(key, format!("expected a string, got {}", other))),
        }
    }

    /// A required string argument.
    pub fn required_string(&self, key: &str) -> Result<&'a str> {
        self.string(key)?
            .ok_or_else(|| self.invalid(key, "argument is required"))
    }

    /// A boolean argument, accepting `"true"`/`"false"` text. `null` is absent.
    pub fn flag(&self, key: &str) -> Result<Option<bool>> {
        match self.raw(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Some(true)),
                "false" | "no" | "0" => Ok(Some(false)),
                _ => Err(self.invalid(key, format!("'{}' is not a boolean", s))),
            },
            Some(other) => Err(self.invalid(key, format!("expected a boolean, got {}", other))),
        }
    }

    /// A non-negative integer argument, accepting numeric text. `null` is absent.
    pub fn unsigned(&self, key: &str) -> Result<Option<u64>> {
        match self.raw(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.invalid(key, format!("expected a non-negative integer, got {}", n))),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(key, format!("'{}' is not a non-negative integer", s))),
            Some(other) => Err(self.invalid(
                key,
                format!("expected a non-negative integer, got {}", other),
            )),
        }
    }

    /// A required, non-empty list argument.
    pub fn required_list(&self, key: &str) -> Result<&'a [Value]> {
        match self.raw(key) {
            None | Some(Value::Null) => Err(self.invalid(key, "argument is required")),
            Some(Value::Array(items)) if items.is_empty() => {
                Err(self.invalid(key, "list must not be empty"))
            }
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(self.invalid(key, format!("expected a list, got {}", other))),
        }
    }
}
