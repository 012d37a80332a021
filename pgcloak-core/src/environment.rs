//! Environment variable lookup as an injectable capability.
//!
//! Providers that resolve secrets from the environment receive an
//! [`Environment`] rather than reading process state directly, so tests can
//! hand them a fixed set of variables.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Read-only access to environment variables.
pub trait Environment: Send + Sync + fmt::Debug {
    /// Returns the value of `name`, or `None` when it is unset or not unicode.
    fn var(&self, name: &str) -> Option<String>;
}

/// Shared handle to an environment, cloned into every provider that needs it.
pub type SharedEnvironment = Arc<dyn Environment>;

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A fixed, in-memory set of variables.
#[derive(Debug, Clone, Default)]
pub struct MapEnvironment {
    vars: HashMap<String, String>,
}

impl MapEnvironment {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable, replacing any previous value.
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl Environment for MapEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

impl<K, V> FromIterator<(K, V)> for MapEnvironment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_environment_lookup() {
        let env = MapEnvironment::new().with_var("DA_SECRET_PHRASE", "hunter2");
        assert_eq!(env.var("DA_SECRET_PHRASE").as_deref(), Some("hunter2"));
        assert_eq!(env.var("MISSING"), None);
    }

    #[test]
    fn test_map_environment_from_iter() {
        let env: MapEnvironment = [("A", "1"), ("B", "2")].into_iter().collect();
        assert_eq!(env.var("A").as_deref(), Some("1"));
        assert_eq!(env.var("B").as_deref(), Some("2"));
    }

    #[test]
    fn test_process_environment_missing_var() {
        let env = ProcessEnvironment;
        assert_eq!(env.var("PGCLOAK_SURELY_UNSET_VARIABLE_1234"), None);
    }
}
