//! Application error types for auth-gateway
//!
//! This module defines the error taxonomy shared by the gateway components.
//! All error types use `thiserror` for ergonomic error handling.

use axum::http::StatusCode;
use thiserror::Error;

/// Authentication-related errors
///
/// Every failure inside the token authority, the brute-force guard, the
/// credential verifier and the request gate is converted into one of these
/// kinds before it leaves the component.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    /// Missing, invalid or expired token, or an unknown principal
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Token has a valid signature but was revoked on logout
    #[error("Token has been revoked")]
    Revoked,

    /// Source IP is temporarily blocked after too many failed logins
    #[error("Rate limited: too many failed login attempts")]
    RateLimited,

    /// Login failed
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Request is missing a required part or its body cannot be parsed
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Signing a new token failed
    #[error("Token issue failed: {0}")]
    TokenIssue(String),
}

impl AuthError {
    /// HTTP status code for this error kind
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Unauthenticated | AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::Revoked => StatusCode::FORBIDDEN,
            AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AuthError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::TokenIssue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message for this error kind
    ///
    /// `MalformedRequest` carries its own message; signing failures are
    /// reported without detail.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::Unauthenticated => "Unauthorized".to_string(),
            AuthError::Revoked => "Token has been revoked".to_string(),
            AuthError::RateLimited => "IP is blocked, try again later".to_string(),
            AuthError::InvalidCredentials => "Invalid username or password".to_string(),
            AuthError::MalformedRequest(msg) => msg.clone(),
            AuthError::TokenIssue(_) => "Internal server error".to_string(),
        }
    }

    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Unauthenticated => "unauthenticated",
            AuthError::Revoked => "revoked",
            AuthError::RateLimited => "rate_limited",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::MalformedRequest(_) => "malformed_request",
            AuthError::TokenIssue(_) => "token_issue",
        }
    }
}

/// Credential store errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// Backing store could not be reached
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),

    /// Store returned an unexpected error
    #[error("Credential store error: {0}")]
    Internal(String),
}

/// OpenTelemetry-related errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OtelError {
    /// Failed to initialize tracer
    #[error("Failed to initialize tracer: {0}")]
    TracerInit(String),

    /// Failed to initialize meter
    #[error("Failed to initialize meter: {0}")]
    MeterInit(String),

    /// Failed to shutdown
    #[error("Failed to shutdown: {0}")]
    Shutdown(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Application-level error type
///
/// Aggregates all domain-specific error types for the binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Credential store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Telemetry error
    #[error("Telemetry error: {0}")]
    Otel(#[from] OtelError),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] crate::server::ServerError),
}
