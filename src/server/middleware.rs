//! HTTP middleware for auth-gateway
//!
//! This module provides middleware layers for:
//! - Authentication (the request gate)
//! - Request/response logging and duration metrics
//! - OpenTelemetry tracing

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use super::body::CachedBody;
use super::router::AppState;
use crate::auth::{bearer_token, client_ip, GateRequest, Identity, Outcome};
use crate::error::AuthError;
use crate::otel::Metrics;
use crate::store::CredentialStore;

/// Identity extension for admitted requests
///
/// Present only when the gate admitted the request with an identity.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser(pub Identity);

/// Authentication middleware function
///
/// This middleware:
/// 1. Resolves the client IP and the bearer token
/// 2. Buffers the body of non-public requests so the gate can inspect it
/// 3. Runs the request gate, which reports a body read error only once the
///    earlier checks have passed
/// 4. Adds the authenticated identity to the request extensions
pub async fn auth_middleware<S: CredentialStore + 'static>(
    State(state): State<AppState<S>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, AuthResponse> {
    let source_ip = client_ip(request.headers(), addr.ip());
    let path = request.uri().path().to_string();
    let token = bearer_token(request.headers()).map(str::to_string);

    // A read error is reported by the gate's body check, after the earlier stages.
    let (mut request, body) = if state.gate.is_public(&path) {
        (request, Ok(CachedBody::default()))
    } else {
        let (parts, body) = CachedBody::read(request, state.max_body_bytes).await;
        let request = match &body {
            Ok(cached) => cached.clone().into_request(parts),
            Err(_) => Request::from_parts(parts, Body::empty()),
        };
        (request, body)
    };

    let decision = state
        .gate
        .evaluate(&GateRequest {
            path: &path,
            source_ip,
            bearer_token: token.as_deref(),
            body: body.as_ref().map(|cached| &cached.bytes()[..]),
        })
        .await;

    state.metrics.record_gate_decision(decision.label());

    match decision.outcome {
        Outcome::Reject(error) => {
            tracing::info!(
                path = %path,
                ip = %source_ip,
                stage = decision.stage.as_str(),
                error = error.kind(),
                "Request rejected"
            );
            Err(AuthResponse::from(error))
        }
        Outcome::Admit(identity) => {
            if let Some(identity) = identity {
                request.extensions_mut().insert(AuthenticatedUser(identity));
            }
            Ok(next.run(request).await)
        }
    }
}

/// Authentication error response
///
/// Rendered as `{"error": "<message>"}`.
#[derive(Debug)]
pub struct AuthResponse {
    status: StatusCode,
    message: String,
}

impl AuthResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<AuthError> for AuthResponse {
    fn from(error: AuthError) -> Self {
        if let AuthError::TokenIssue(ref detail) = error {
            tracing::error!(error = %detail, "Token signing failed");
        }
        Self {
            status: error.status_code(),
            message: error.public_message(),
        }
    }
}

impl IntoResponse for AuthResponse {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message
        });
        (self.status, Json(body)).into_response()
    }
}

/// Logging middleware function
///
/// Logs method, path, status code and response time.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        path = %uri.path(),
        status = %status.as_u16(),
        duration_ms = %elapsed.as_millis(),
        "Request completed"
    );

    response
}

/// Records the request duration histogram
pub async fn metrics_middleware(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();

    let response = next.run(request).await;

    metrics.record_request_duration(
        method.as_str(),
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}

/// Tracing middleware function
///
/// Wraps the whole request, including the gate, in an `http_request` span.
pub async fn tracing_middleware(request: Request, next: Next) -> Response {
    use tracing::Instrument;

    let method = request.method().clone();
    let uri = request.uri().clone();

    let span = tracing::info_span!(
        "http_request",
        http.method = %method,
        http.url = %uri,
        http.status_code = tracing::field::Empty,
    );

    async move {
        let response = next.run(request).await;
        tracing::Span::current().record("http.status_code", response.status().as_u16());
        response
    }
    .instrument(span)
    .await
}
