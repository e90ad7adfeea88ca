//! Username/password verification against the credential store
//!
//! Passwords are stored as the hex HMAC-SHA256 of the password keyed with the
//! server secret. Comparison is constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::secret::ServerSecret;
use crate::store::CredentialStore;

type HmacSha256 = Hmac<Sha256>;

/// Hash a password with the server secret
///
/// Produces the lowercase hex string the credential store is expected to hold.
///
/// # Example
///
/// ```
/// use auth_gateway::auth::credentials::hash_password;
/// use auth_gateway::auth::secret::ServerSecret;
///
/// let secret = ServerSecret::from_bytes(vec![7u8; 32]).unwrap();
/// let hash = hash_password(&secret, "hunter2");
/// assert_eq!(hash.len(), 64);
/// assert_eq!(hash, hash_password(&secret, "hunter2"));
/// ```
pub fn hash_password(secret: &ServerSecret, password: &str) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(password.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Checks presented credentials against the credential store
pub struct CredentialVerifier<S: CredentialStore> {
    store: Arc<S>,
    secret: ServerSecret,
    // Compared against on lookup misses so both paths do the same work
    dummy_hash: String,
}

impl<S: CredentialStore> CredentialVerifier<S> {
    pub fn new(store: Arc<S>, secret: ServerSecret) -> Self {
        let dummy_hash = hash_password(&secret, "");
        Self {
            store,
            secret,
            dummy_hash,
        }
    }

    /// Verify a username/password pair
    ///
    /// Returns `false` for unknown users, wrong passwords and store failures.
    pub async fn verify(&self, username: &str, password: &str) -> bool {
        let record = match self.store.find_by_username(username).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Credential store lookup failed during login");
                None
            }
        };

        let presented = hash_password(&self.secret, password);

        match record {
            Some(record) => constant_time_eq(presented.as_bytes(), record.password_hash.as_bytes()),
            None => {
                let _ = constant_time_eq(presented.as_bytes(), self.dummy_hash.as_bytes());
                debug!(username = %username, "Login for unknown user");
                false
            }
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
