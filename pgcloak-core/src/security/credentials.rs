//! Database credentials with automatic memory zeroing.
//!
//! The password never appears in `Debug` output, logs or error messages.
//! It is handed out only to the connection layer and to the `pg_dump`
//! child process environment.

use zeroize::{Zeroize, Zeroizing};

/// Username and optional password, zeroed on drop.
///
/// # Example
///
/// ```rust
/// use pgcloak_core::security::Credentials;
///
/// let creds = Credentials::new("postgres", Some("secret".to_string()));
/// assert_eq!(creds.username(), "postgres");
/// assert!(creds.has_password());
/// assert!(!format!("{:?}", creds).contains("secret"));
/// ```
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Credentials {
    username: Zeroizing<String>,
    password: Zeroizing<Option<String>>,
}

impl Credentials {
    /// Creates credentials. An empty password counts as no password.
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: Zeroizing::new(username.into()),
            password: Zeroizing::new(password.filter(|p| !p.is_empty())),
        }
    }

    /// Gets the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Checks if a password is present without exposing it.
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// The password, for the connection layer only.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username())
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}
