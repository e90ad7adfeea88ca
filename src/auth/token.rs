//! Session token issuance, validation and revocation
//!
//! Tokens are HS256 JWTs carrying `sub`, `iat`, `exp` and any custom claims.
//! The authority also owns the revocation set: a revoked token string is never
//! accepted again for the lifetime of the process.

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::secret::ServerSecret;
use crate::error::AuthError;

/// Claims that custom claims may not override
const RESERVED_CLAIMS: &[&str] = &["sub", "iat", "exp"];

/// Decoded token payload
///
/// Custom claims live in a sorted map so the serialized claim order is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject identity (username)
    pub sub: String,

    /// Issued-at, seconds since the Unix epoch
    pub iat: i64,

    /// Expiration, seconds since the Unix epoch
    pub exp: i64,

    /// Custom claims
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A freshly signed token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedToken {
    /// Compact JWT
    pub token: String,

    /// When the token stops validating
    pub expires_at: DateTime<Utc>,
}

/// Issues, validates and revokes session tokens
pub struct TokenAuthority {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
    revoked: DashSet<String>,
}

impl TokenAuthority {
    /// Create an authority signing with `secret` and issuing tokens valid for `ttl`
    pub fn new(secret: &ServerSecret, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against our own clock reading in `validate_at`.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["sub", "iat", "exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_secs: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
            revoked: DashSet::new(),
        }
    }

    /// Issue a token for `subject` starting now
    pub fn issue(
        &self,
        subject: &str,
        extra_claims: Map<String, Value>,
    ) -> Result<IssuedToken, AuthError> {
        self.issue_at(subject, extra_claims, Utc::now())
    }

    /// Issue a token for `subject` as if the current time were `now`
    pub fn issue_at(
        &self,
        subject: &str,
        mut extra_claims: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        extra_claims.retain(|name, _| !RESERVED_CLAIMS.contains(&name.as_str()));

        let iat = now.timestamp();
        let exp = iat.saturating_add(self.ttl_secs);
        let expires_at = DateTime::<Utc>::from_timestamp(exp, 0)
            .ok_or_else(|| AuthError::TokenIssue("expiration out of range".to_string()))?;

        let claims = Claims {
            sub: subject.to_string(),
            iat,
            exp,
            extra: extra_claims,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenIssue(e.to_string()))?;

        debug!(subject = %subject, expires_at = %expires_at, "Issued session token");

        Ok(IssuedToken { token, expires_at })
    }

    /// Check signature, structure and expiry
    ///
    /// Every failure collapses to `false`. Revocation is not considered here;
    /// see [`TokenAuthority::is_revoked`].
    pub fn validate(&self, token: &str) -> bool {
        self.validate_at(token, Utc::now())
    }

    /// [`TokenAuthority::validate`] against an explicit clock reading
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> bool {
        match self.claims(token) {
            Some(claims) if claims.exp > now.timestamp() => true,
            Some(claims) => {
                debug!(subject = %claims.sub, exp = claims.exp, "Token expired");
                false
            }
            None => false,
        }
    }

    /// Subject of a token whose signature verifies
    ///
    /// The signature is re-checked; expiry is not.
    pub fn extract_subject(&self, token: &str) -> Option<String> {
        self.claims(token).map(|claims| claims.sub)
    }

    /// Decode and verify a token's claims, ignoring expiry
    pub fn claims(&self, token: &str) -> Option<Claims> {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                warn!(error = %e, "Rejected unverifiable token");
                None
            }
        }
    }

    /// Add a token to the revocation set
    ///
    /// Returns `true` if the token was not revoked before.
    pub fn revoke(&self, token: &str) -> bool {
        let inserted = self.revoked.insert(token.to_string());
        if inserted {
            info!(revoked_total = self.revoked.len(), "Token revoked");
        }
        inserted
    }

    /// Whether a token was revoked
    pub fn is_revoked(&self, token: &str) -> bool {
        self.revoked.contains(token)
    }

    /// Number of revoked tokens held in memory
    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }
}
