//! Credential store contract
//!
//! The gateway never owns user data. It looks principals up through
//! [`CredentialStore`]; [`InMemoryCredentialStore`] backs the binary and tests.

pub mod memory;

pub use memory::InMemoryCredentialStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Stored credential record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Login name, also the token subject
    pub username: String,

    /// Lowercase hex HMAC-SHA256 of the password keyed with the server secret
    pub password_hash: String,
}

impl UserRecord {
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
        }
    }
}

/// Lookup contract for the external credential store
///
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find the record for `username`
    ///
    /// Returns `Ok(None)` when the user does not exist.
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;
}
