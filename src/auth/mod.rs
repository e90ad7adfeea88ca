//! Authentication system for auth-gateway
//!
//! This module provides authentication functionality:
//! - Session token issuance, validation and revocation
//! - Username/password verification
//! - IP blocking after repeated failed logins
//! - The per-request authentication pipeline

pub mod credentials;
pub mod gate;
pub mod manager;
pub mod ratelimit;
pub mod secret;
pub mod token;

pub use credentials::{hash_password, CredentialVerifier};
pub use gate::{bearer_token, client_ip, Decision, GateRequest, Identity, Outcome, RequestGate};
pub use manager::{AuthConfig, AuthManager, LoginAttempt};
pub use ratelimit::{BruteForceGuard, RateLimitConfig, MAX_BLOCK_DURATION};
pub use secret::{SecretError, ServerSecret};
pub use token::{Claims, IssuedToken, TokenAuthority};
