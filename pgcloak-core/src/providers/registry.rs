//! Provider catalog keyed by id.
//!
//! Ids ending in `*` are patterns: `fake.*` serves every `fake.<generator>`
//! name. Resolution tries an exact id first, then patterns in registration
//! order. The registry is filled once at startup and only read afterwards,
//! so it can be shared freely between worker threads.

use std::fmt;

use crate::Result;
use crate::error::PgCloakError;
use crate::schema::ProviderSpec;

use super::{Provider, ProviderContext, builtin, fake_data, pseudonym};

/// Builds a provider from its spec.
pub type ProviderFactory = fn(&ProviderSpec, &ProviderContext) -> Result<Box<dyn Provider>>;

const WILDCARD: char = '*';

/// One registered provider kind.
#[derive(Clone)]
pub struct ProviderEntry {
    id: String,
    description: String,
    factory: ProviderFactory,
}

impl ProviderEntry {
    /// Registered id, including any trailing `*`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// One-line description for `--list-providers`.
    pub fn description(&self) -> &str {
        &self.description
    }

    fn prefix(&self) -> Option<&str> {
        self.id.strip_suffix(WILDCARD)
    }

    fn matches_pattern(&self, id: &str) -> bool {
        let Some(prefix) = self.prefix() else {
            return false;
        };
        id.starts_with(prefix) || (!prefix.is_empty() && id == prefix.trim_end_matches('.'))
    }
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Ordered catalog of provider kinds.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in provider.
    pub fn with_builtin_providers() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, &str, ProviderFactory); 10] = [
            ("choice", "Random choice of one of the configured values", builtin::choice),
            ("clear", "Replace the value with NULL", builtin::clear),
            ("datetime", "Fixed or current date", builtin::datetime),
            ("fake.*", "Fake data generator selected by name, e.g. fake.first_name", fake_data::fake),
            ("keep", "Keep the original value", builtin::keep),
            ("mask", "Replace every character with a sign", builtin::mask),
            ("md5", "MD5 hex digest, or a bounded number with as_number", builtin::md5),
            ("pbkdf2", "Reversible AES-GCM pseudonym keyed by a secret", pseudonym::pbkdf2),
            ("set", "Replace the value with a fixed value", builtin::set),
            ("uuid4", "Random UUID", builtin::uuid4),
        ];
        for (id, description, factory) in builtins {
            // Built-in ids are distinct, so registration cannot fail.
            if let Err(error) = registry.register(id, description, factory) {
                tracing::error!("Skipping built-in provider: {}", error);
            }
        }
        registry
    }

    /// Registers a provider kind under `id`.
    ///
    /// # Errors
    /// `DuplicateProviderId` if `id` is already registered.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        description: impl Into<String>,
        factory: ProviderFactory,
    ) -> Result<()> {
        let id = id.into();
        if self.entries.iter().any(|entry| entry.id == id) {
            return Err(PgCloakError::DuplicateProviderId { id });
        }
        self.entries.push(ProviderEntry {
            id,
            description: description.into(),
            factory,
        });
        Ok(())
    }

    /// Finds the entry serving `id`.
    ///
    /// # Errors
    /// `UnknownProvider` when neither an exact id nor a pattern matches.
    pub fn resolve(&self, id: &str) -> Result<&ProviderEntry> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .or_else(|| self.entries.iter().find(|entry| entry.matches_pattern(id)))
            .ok_or_else(|| PgCloakError::UnknownProvider { id: id.to_string() })
    }

    /// Builds a provider instance for `spec`.
    pub fn instantiate(
        &self,
        spec: &ProviderSpec,
        context: &ProviderContext,
    ) -> Result<Box<dyn Provider>> {
        let entry = self.resolve(&spec.name)?;
        (entry.factory)(spec, context)
    }

    /// Registered entries in registration order.
    pub fn entries(&self) -> impl Iterator<Item = &ProviderEntry> {
        self.entries.iter()
    }

    /// Number of registered ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
