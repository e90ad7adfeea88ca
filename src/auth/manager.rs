//! Authentication manager
//!
//! This module ties the token authority, the brute-force guard and the
//! credential verifier together behind the login and logout operations. The
//! request gate borrows the same components through the accessors.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;
use tracing::{info, warn};

use crate::error::AuthError;
use crate::store::CredentialStore;

use super::credentials::CredentialVerifier;
use super::ratelimit::{BruteForceGuard, RateLimitConfig};
use super::secret::ServerSecret;
use super::token::{IssuedToken, TokenAuthority};

/// Configuration for the authentication manager
#[derive(Debug, Clone, PartialEq)]
pub struct AuthConfig {
    /// Lifetime of issued tokens
    pub token_ttl: Duration,

    /// Brute-force guard configuration
    pub rate_limit: RateLimitConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(60 * 60),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl From<&crate::config::AuthConfig> for AuthConfig {
    fn from(config: &crate::config::AuthConfig) -> Self {
        Self {
            token_ttl: Duration::from_secs(config.token_ttl_minutes.saturating_mul(60)),
            rate_limit: RateLimitConfig {
                max_failures: config.rate_limit.max_failures,
                block_duration: Duration::from_secs(config.rate_limit.block_duration_secs),
            },
        }
    }
}

/// Result of one login attempt
#[derive(Debug)]
pub struct LoginAttempt {
    pub result: Result<IssuedToken, AuthError>,
    /// The failure recorded by this attempt blocked the source IP
    pub blocked_ip: bool,
}

impl LoginAttempt {
    fn rejected(error: AuthError, blocked_ip: bool) -> Self {
        Self {
            result: Err(error),
            blocked_ip,
        }
    }
}

/// Authentication manager
///
/// Owns the shared authentication state. Wrap it in an `Arc` and hand clones
/// to every request task.
pub struct AuthManager<S: CredentialStore> {
    tokens: TokenAuthority,
    guard: BruteForceGuard,
    verifier: CredentialVerifier<S>,
}

impl<S: CredentialStore> AuthManager<S> {
    /// Create a new authentication manager
    pub fn new(store: Arc<S>, secret: ServerSecret, config: AuthConfig) -> Self {
        Self {
            tokens: TokenAuthority::new(&secret, config.token_ttl),
            guard: BruteForceGuard::new(config.rate_limit),
            verifier: CredentialVerifier::new(store, secret),
        }
    }

    /// Exchange a username and password for a session token
    ///
    /// A blocked IP is rejected before the credentials are looked at. A
    /// failure counts against `ip`; a success clears its count.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        ip: IpAddr,
    ) -> Result<IssuedToken, AuthError> {
        self.attempt_login(username, password, ip).await.result
    }

    /// [`AuthManager::login`], also reporting whether this attempt blocked `ip`
    pub async fn attempt_login(&self, username: &str, password: &str, ip: IpAddr) -> LoginAttempt {
        if self.guard.is_blocked(ip) {
            warn!(ip = %ip, "Login attempt from blocked IP");
            return LoginAttempt::rejected(AuthError::RateLimited, false);
        }

        if !self.verifier.verify(username, password).await {
            let blocked = self.guard.record_failure(ip);
            info!(ip = %ip, username = %username, blocked, "Login failed");
            return LoginAttempt::rejected(AuthError::InvalidCredentials, blocked);
        }

        self.guard.record_success(ip);
        let result = self.tokens.issue(username, Map::new());
        if let Ok(issued) = &result {
            info!(ip = %ip, username = %username, expires_at = %issued.expires_at, "Login succeeded");
        }

        LoginAttempt {
            result,
            blocked_ip: false,
        }
    }

    /// Revoke the presented token
    ///
    /// The token is not validated first; logging out an expired or foreign
    /// token is harmless.
    pub fn logout(&self, token: Option<&str>) -> Result<(), AuthError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedRequest("Invalid token".to_string()))?;

        let newly_revoked = self.tokens.revoke(token);
        info!(newly_revoked, "Logout");

        Ok(())
    }

    /// Whether `username` names a principal known to the credential store
    ///
    /// Store failures count as unknown.
    pub async fn principal_exists(&self, username: &str) -> bool {
        match self.verifier.store().find_by_username(username).await {
            Ok(record) => record.is_some(),
            Err(e) => {
                warn!(error = %e, "Credential store lookup failed while resolving identity");
                false
            }
        }
    }

    pub fn tokens(&self) -> &TokenAuthority {
        &self.tokens
    }

    pub fn guard(&self) -> &BruteForceGuard {
        &self.guard
    }

    pub fn store(&self) -> &Arc<S> {
        self.verifier.store()
    }

    /// Check if an IP is rate limited
    pub fn is_rate_limited(&self, ip: IpAddr) -> bool {
        self.guard.is_blocked(ip)
    }
}
