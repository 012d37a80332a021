//! Security utilities for credential protection and reversible pseudonyms.
//!
//! # Security Guarantees
//! - Credentials are stored in `Zeroizing` containers for automatic memory clearing
//! - Passwords and passphrases are redacted from `Debug` output and errors
//! - Pseudonym tokens use AES-GCM with a fresh salt and nonce per value
//!
//! # Module Structure
//! - `credentials`: Secure credential container with automatic memory zeroing
//! - `encryption`: AES-GCM encryption with PBKDF2-HMAC-SHA256 key derivation

mod credentials;
pub mod encryption;

pub use credentials::Credentials;
pub use encryption::EncryptingService;
