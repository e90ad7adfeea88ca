//! HTTP router for auth-gateway
//!
//! This module defines the axum router that handles all HTTP requests.
//! It provides routes for:
//! - Health checks
//! - Login and logout
//! - A protected probe reporting the caller's identity

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Extension, State},
    http::HeaderMap,
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use super::middleware::{
    auth_middleware, logging_middleware, metrics_middleware, tracing_middleware, AuthResponse,
    AuthenticatedUser,
};
use crate::auth::{bearer_token, client_ip, AuthManager, RequestGate};
use crate::error::AuthError;
use crate::otel::Metrics;
use crate::store::CredentialStore;

/// Shared application state
pub struct AppState<S: CredentialStore> {
    /// Request gate, which also owns the authentication manager
    pub gate: RequestGate<S>,

    /// Gateway metrics
    pub metrics: Arc<Metrics>,

    /// Largest body the gate will buffer for inspection
    pub max_body_bytes: usize,
}

impl<S: CredentialStore> AppState<S> {
    pub fn new(gate: RequestGate<S>, metrics: Arc<Metrics>, max_body_bytes: usize) -> Self {
        Self {
            gate,
            metrics,
            max_body_bytes,
        }
    }

    pub fn manager(&self) -> &Arc<AuthManager<S>> {
        self.gate.manager()
    }
}

impl<S: CredentialStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            metrics: Arc::clone(&self.metrics),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Login request body
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response body
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Plain message response
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Identity probe response
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub authenticated: bool,
    pub username: Option<String>,
}

/// Build the main application router
///
/// Every route, including unknown paths, runs behind the request gate.
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn build_router<S: CredentialStore + 'static>(state: AppState<S>) -> Router {
    let metrics = Arc::clone(&state.metrics);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/authentication/login", post(login_handler::<S>))
        .route("/api/authentication/logout", post(logout_handler::<S>))
        .route("/api/users/me", get(me_handler).post(me_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::<S>,
        ))
        .layer(middleware::from_fn_with_state(metrics, metrics_middleware))
        .layer(middleware::from_fn(logging_middleware))
        .layer(middleware::from_fn(tracing_middleware))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Exchange credentials for a session token
async fn login_handler<S: CredentialStore + 'static>(
    State(state): State<AppState<S>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AuthResponse> {
    let Json(login) = payload.map_err(|e| {
        tracing::debug!(error = %e, "Rejected login body");
        AuthError::MalformedRequest("Invalid request body".to_string())
    })?;

    let ip = client_ip(&headers, addr.ip());
    let manager = state.manager();

    let attempt = manager
        .attempt_login(&login.username, &login.password, ip)
        .await;
    if attempt.blocked_ip {
        state.metrics.record_ip_block();
    }

    match attempt.result {
        Ok(issued) => {
            state.metrics.record_login("success");
            Ok(Json(LoginResponse {
                token: issued.token,
                expires_at: issued.expires_at,
            }))
        }
        Err(e) => {
            state.metrics.record_login(e.kind());
            Err(e.into())
        }
    }
}

/// Revoke the caller's bearer token
async fn logout_handler<S: CredentialStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, AuthResponse> {
    state.manager().logout(bearer_token(&headers))?;

    Ok(Json(MessageResponse {
        message: "Logged out successfully".to_string(),
    }))
}

/// Report the identity the gate attached, if any
async fn me_handler(user: Option<Extension<AuthenticatedUser>>) -> Json<MeResponse> {
    let username = user.map(|Extension(AuthenticatedUser(identity))| identity.username);
    Json(MeResponse {
        authenticated: username.is_some(),
        username,
    })
}
