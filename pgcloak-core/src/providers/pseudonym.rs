//! The `pbkdf2` provider: reversible pseudonyms.
//!
//! The `secret` argument is either the passphrase itself or, when it looks
//! like an environment variable name (`DA_SECRET_PHRASE`), the name of the
//! variable holding it. Variables are looked up on every call so a missing
//! variable is reported against the row being processed.

use serde_json::Value;
use zeroize::Zeroizing;

use super::args::ProviderArgs;
use super::{Provider, ProviderContext};
use crate::Result;
use crate::environment::SharedEnvironment;
use crate::error::PgCloakError;
use crate::schema::ProviderSpec;
use crate::security::EncryptingService;

const SECRET_ARGUMENT: &str = "secret";

/// Whether `secret` names an environment variable: `[A-Z_][A-Z0-9_]*`.
pub fn looks_like_env_name(secret: &str) -> bool {
    let mut chars = secret.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_uppercase() || c == '_')
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

enum Secret {
    Literal(Zeroizing<String>),
    Variable(String),
}

pub(crate) struct Pbkdf2Provider {
    provider: String,
    secret: Secret,
    environment: SharedEnvironment,
}

impl std::fmt::Debug for Pbkdf2Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secret = match &self.secret {
            Secret::Literal(_) => "****".to_string(),
            Secret::Variable(name) => format!("${}", name),
        };
        f.debug_struct("Pbkdf2Provider")
            .field("secret", &secret)
            .finish_non_exhaustive()
    }
}

impl Pbkdf2Provider {
    fn service(&self) -> Result<EncryptingService> {
        match &self.secret {
            Secret::Literal(passphrase) => Ok(EncryptingService::new(passphrase.as_str())),
            Secret::Variable(name) => {
                let passphrase = Zeroizing::new(self.environment.var(name).ok_or_else(|| {
                    PgCloakError::invalid_argument(
                        &self.provider,
                        SECRET_ARGUMENT,
                        format!(
                            "cannot find environment variable {} check your .env file",
                            name
                        ),
                    )
                })?);
                Ok(EncryptingService::new(passphrase.as_str()))
            }
        }
    }
}

impl Provider for Pbkdf2Provider {
    fn alter_value(&self, value: &Value) -> Result<Value> {
        self.service()?.encrypt_value(value)
    }
}

pub(crate) fn pbkdf2(spec: &ProviderSpec, context: &ProviderContext) -> Result<Box<dyn Provider>> {
    let args = ProviderArgs::new(spec);
    let secret = args
        .string(SECRET_ARGUMENT)?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            args.invalid(
                SECRET_ARGUMENT,
                "attribute \"secret\" of pbkdf2 provider is not set",
            )
        })?;

    let secret = if looks_like_env_name(secret) {
        Secret::Variable(secret.to_string())
    } else {
        Secret::Literal(Zeroizing::new(secret.to_string()))
    };

    Ok(Box::new(Pbkdf2Provider {
        provider: spec.name.clone(),
        secret,
        environment: context.environment().clone(),
    }))
}
