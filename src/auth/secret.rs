//! Server-held symmetric key material
//!
//! The same secret signs session tokens and keys the password hash. It is
//! configured as base64 and never printed.

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;

/// Minimum decoded key length in bytes (HS256 block of entropy)
pub const MIN_SECRET_BYTES: usize = 32;

/// Decoded server secret
#[derive(Clone, PartialEq, Eq)]
pub struct ServerSecret(Vec<u8>);

impl ServerSecret {
    /// Decode a base64-encoded secret
    pub fn from_base64(encoded: &str) -> Result<Self, SecretError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SecretError::Decode(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    /// Wrap raw key bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, SecretError> {
        if bytes.len() < MIN_SECRET_BYTES {
            return Err(SecretError::TooShort(bytes.len()));
        }
        Ok(Self(bytes))
    }

    /// Generate a fresh random secret of [`MIN_SECRET_BYTES`] bytes
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; MIN_SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Base64 form, suitable for `auth.secret_key`
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for ServerSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ServerSecret").field(&"[redacted]").finish()
    }
}

/// Error type for secret decoding
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SecretError {
    /// Not valid base64
    #[error("invalid base64: {0}")]
    Decode(String),

    /// Decoded key is too short
    #[error("key is {0} bytes, need at least 32")]
    TooShort(usize),
}
