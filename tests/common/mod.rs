//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{header, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use auth_gateway::auth::{
    hash_password, AuthConfig, AuthManager, RateLimitConfig, RequestGate, ServerSecret,
};
use auth_gateway::config::{GatewayConfig, ServerConfig};
use auth_gateway::otel::Metrics;
use auth_gateway::server::{build_router, AppState, Server};
use auth_gateway::store::{InMemoryCredentialStore, UserRecord};

/// 32 bytes of 0x2a, base64-encoded
pub const TEST_SECRET_B64: &str = "KioqKioqKioqKioqKioqKioqKioqKioqKioqKioqKio=";

/// Peer address reported for in-process requests
pub const TEST_PEER: ([u8; 4], u16) = ([127, 0, 0, 1], 40000);

pub fn test_secret() -> ServerSecret {
    ServerSecret::from_base64(TEST_SECRET_B64).expect("test secret is valid")
}

/// Users known to every test store: alice/password123 and bob/hunter2
pub fn create_test_store() -> Arc<InMemoryCredentialStore> {
    let secret = test_secret();
    Arc::new(InMemoryCredentialStore::with_users([
        UserRecord::new("alice", hash_password(&secret, "password123")),
        UserRecord::new("bob", hash_password(&secret, "hunter2")),
    ]))
}

/// Create an application state with the default public paths
pub fn create_test_state_with(rate_limit: RateLimitConfig) -> AppState<InMemoryCredentialStore> {
    let config = AuthConfig {
        token_ttl: Duration::from_secs(600),
        rate_limit,
    };
    let manager = Arc::new(AuthManager::new(create_test_store(), test_secret(), config));
    let gate = RequestGate::new(manager, GatewayConfig::default().public_paths);
    AppState::new(gate, Arc::new(Metrics::global()), 64 * 1024)
}

pub fn create_test_state() -> AppState<InMemoryCredentialStore> {
    create_test_state_with(RateLimitConfig::default())
}

/// Router with a fixed peer address, for driving with `oneshot`
pub fn create_test_app(state: AppState<InMemoryCredentialStore>) -> Router {
    build_router(state).layer(MockConnectInfo(SocketAddr::from(TEST_PEER)))
}

/// Send one request through the router and return status and JSON body
pub async fn send(app: &Router, request: Request<Body>) -> (u16, serde_json::Value) {
    let response = app.clone().oneshot(request).await.expect("router is infallible");
    read_json(response).await
}

pub async fn read_json(response: Response<Body>) -> (u16, serde_json::Value) {
    let status = response.status().as_u16();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body is readable")
        .to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

pub fn login_request(username: &str, password: &str) -> Request<Body> {
    json_request(
        "POST",
        "/api/authentication/login",
        None,
        serde_json::json!({ "username": username, "password": password }),
    )
}

pub fn json_request(
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request is valid")
}

pub fn empty_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).expect("request is valid")
}

/// Log in through the router and return the token
pub async fn login_token(app: &Router, username: &str, password: &str) -> String {
    let (status, body) = send(app, login_request(username, password)).await;
    assert_eq!(status, 200, "login failed: {}", body);
    body["token"]
        .as_str()
        .expect("token is a string")
        .to_string()
}

/// Create a test server configuration with a random port
pub fn create_test_server_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    }
}

/// Run a test server on a real listener and return its address
///
/// The server shuts down when the returned sender is used or dropped.
pub async fn run_test_server(
    state: AppState<InMemoryCredentialStore>,
) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local address");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let server = Server::new(create_test_server_config(), state);
    tokio::spawn(async move {
        server
            .serve(listener, async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("Server error");
    });

    (addr, shutdown_tx)
}
