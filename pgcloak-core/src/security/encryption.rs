//! AES-GCM encryption with PBKDF2-HMAC-SHA256 key derivation.
//!
//! Produces reversible pseudonyms for the `pbkdf2` provider. Each token is
//! self-contained and hex encoded as `salt-nonce-ciphertext`, where the
//! ciphertext carries the 16-byte authentication tag at its end.
//!
//! # Security Guarantees
//! - AES-GCM-256 authenticated encryption with random 96-bit nonces
//! - Fresh random salt per token, so equal plaintexts never share a token
//! - Key material is zeroed on drop
//! - Errors never include the passphrase or derived key

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, rand_core::RngCore},
};
use serde_json::Value;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::Result;
use crate::error::PgCloakError;

/// AES-GCM nonce size: 96 bits (12 bytes)
///
/// **Standard:** NIST SP 800-38D §8.2.1
const AES_GCM_NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size: 128 bits (16 bytes)
const AES_GCM_TAG_SIZE: usize = 16;

/// AES key size: 256 bits (32 bytes)
const AES_KEY_SIZE: usize = 32;

/// PBKDF2 salt size: 64 bits (8 bytes)
///
/// Kept at 8 bytes so tokens stay decryptable by existing tooling.
pub const PBKDF2_SALT_SIZE: usize = 8;

/// PBKDF2-HMAC-SHA256 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 1000;

/// Separator between the hex encoded token parts.
const TOKEN_SEPARATOR: char = '-';

/// Symmetric encryption keyed by a passphrase.
///
/// # Example
/// ```rust
/// use pgcloak_core::security::EncryptingService;
///
/// let service = EncryptingService::new("secret_phrase");
/// let token = service.encrypt("some secret data")?;
/// assert_eq!(service.decrypt(&token)?, "some secret data");
/// # Ok::<(), pgcloak_core::PgCloakError>(())
/// ```
pub struct EncryptingService {
    passphrase: Zeroizing<String>,
}

impl std::fmt::Debug for EncryptingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptingService")
            .field("passphrase", &"****")
            .finish()
    }
}

impl EncryptingService {
    /// Creates a service for `passphrase`.
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }

    /// Derives a 256-bit key from the passphrase.
    ///
    /// When `salt` is `None` a fresh random 8-byte salt is generated. The salt
    /// used is returned with the key.
    pub fn derive_key(&self, salt: Option<&[u8]>) -> (Zeroizing<[u8; AES_KEY_SIZE]>, Vec<u8>) {
        let salt = match salt {
            Some(salt) => salt.to_vec(),
            None => {
                let mut salt = vec![0u8; PBKDF2_SALT_SIZE];
                OsRng.fill_bytes(&mut salt);
                salt
            }
        };

        let mut key = Zeroizing::new([0u8; AES_KEY_SIZE]);
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.passphrase.as_bytes(),
            &salt,
            PBKDF2_ITERATIONS,
            &mut *key,
        );
        (key, salt)
    }

    /// Encrypts `plaintext` into a `salt-nonce-ciphertext` token.
    ///
    /// Every call uses a fresh salt and nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let (key, salt) = self.derive_key(None);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext =
            cipher
                .encrypt(&nonce, plaintext.as_bytes())
                .map_err(|e| PgCloakError::Encryption {
                    context: format!("AES-GCM encryption failed: {}", e),
                })?;

        Ok(format!(
            "{}{sep}{}{sep}{}",
            hex::encode(&salt),
            hex::encode(nonce),
            hex::encode(ciphertext),
            sep = TOKEN_SEPARATOR
        ))
    }

    /// Decrypts a token produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    /// `Decryption` when the token is malformed, the passphrase is wrong, or
    /// the ciphertext was altered.
    pub fn decrypt(&self, token: &str) -> Result<String> {
        let parts: Vec<&str> = token.trim().split(TOKEN_SEPARATOR).collect();
        let [salt, nonce, ciphertext] = parts.as_slice() else {
            return Err(PgCloakError::decryption(format!(
                "malformed token: expected 3 '{}'-separated parts, found {}",
                TOKEN_SEPARATOR,
                parts.len()
            )));
        };

        let salt = decode_part("salt", salt)?;
        let nonce = decode_part("nonce", nonce)?;
        let ciphertext = decode_part("ciphertext", ciphertext)?;

        if salt.is_empty() {
            return Err(PgCloakError::decryption("malformed token: empty salt"));
        }
        if nonce.len() != AES_GCM_NONCE_SIZE {
            return Err(PgCloakError::decryption(format!(
                "malformed token: nonce must be {} bytes, got {}",
                AES_GCM_NONCE_SIZE,
                nonce.len()
            )));
        }
        if ciphertext.len() < AES_GCM_TAG_SIZE {
            return Err(PgCloakError::decryption(format!(
                "malformed token: ciphertext shorter than the {}-byte authentication tag",
                AES_GCM_TAG_SIZE
            )));
        }

        let (key, _) = self.derive_key(Some(&salt));
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
                .map_err(|_| {
                    PgCloakError::decryption(
                        "authentication failed: wrong secret or tampered token",
                    )
                })?,
        );

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| PgCloakError::decryption("decrypted data is not valid UTF-8"))
    }

    /// Encrypts string values; anything else passes through unchanged.
    pub fn encrypt_value(&self, value: &Value) -> Result<Value> {
        match value {
            Value::String(s) => self.encrypt(s).map(Value::String),
            other => Ok(other.clone()),
        }
    }

    /// Decrypts string values; anything else passes through unchanged.
    pub fn decrypt_value(&self, value: &Value) -> Result<Value> {
        match value {
            Value::String(s) => self.decrypt(s).map(Value::String),
            other => Ok(other.clone()),
        }
    }
}

fn decode_part(name: &str, part: &str) -> Result<Vec<u8>> {
    hex::decode(part)
        .map_err(|_| PgCloakError::decryption(format!("malformed token: {} is not valid hex", name)))
}
