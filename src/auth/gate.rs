//! Per-request authentication decision
//!
//! The gate runs a fixed, ordered list of stages. Each stage either lets the
//! request continue to the next stage or ends evaluation with an [`Outcome`].
//! The order is significant:
//!
//! 1. blocked source IP
//! 2. public endpoint
//! 3. bearer token presence
//! 4. token signature and expiry
//! 5. identity resolution against the credential store
//! 6. body `username` cross-check
//! 7. revocation
//! 8. admission
//!
//! Stage 6 admits the request *without* an identity when the body names a
//! different user than the token. Such a request never reaches the revocation
//! check, so a revoked token paired with a mismatching body is passed through
//! anonymously. Downstream handlers must treat a missing identity as
//! unauthenticated.

use axum::http::{header, HeaderMap};
use serde::Serialize;
use serde_json::Value;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use super::manager::AuthManager;
use crate::error::AuthError;
use crate::store::CredentialStore;

/// Header carrying the original client address when behind a proxy
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

const BEARER_PREFIX: &str = "Bearer ";

/// The authenticated principal attached to an admitted request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub username: String,
}

/// What the gate sees of an inbound request
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub path: &'a str,
    pub source_ip: IpAddr,
    pub bearer_token: Option<&'a str>,
    /// Buffered body, or the error from reading it
    ///
    /// A read error is only reported by the body cross-check stage.
    pub body: Result<&'a [u8], &'a AuthError>,
}

/// Terminal result of gate evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Pass the request downstream, with or without an identity
    Admit(Option<Identity>),
    /// Answer the request with an error
    Reject(AuthError),
}

/// One step of the gate pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Blocked,
    PublicEndpoint,
    BearerPresence,
    TokenValidity,
    IdentityResolution,
    BodyCrossCheck,
    Revocation,
    Admission,
}

/// Stages in evaluation order
pub const PIPELINE: [Stage; 8] = [
    Stage::Blocked,
    Stage::PublicEndpoint,
    Stage::BearerPresence,
    Stage::TokenValidity,
    Stage::IdentityResolution,
    Stage::BodyCrossCheck,
    Stage::Revocation,
    Stage::Admission,
];

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Blocked => "blocked",
            Stage::PublicEndpoint => "public_endpoint",
            Stage::BearerPresence => "bearer_presence",
            Stage::TokenValidity => "token_validity",
            Stage::IdentityResolution => "identity_resolution",
            Stage::BodyCrossCheck => "body_cross_check",
            Stage::Revocation => "revocation",
            Stage::Admission => "admission",
        }
    }
}

/// The outcome together with the stage that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub stage: Stage,
    pub outcome: Outcome,
}

impl Decision {
    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match (&self.outcome, self.stage) {
            (Outcome::Reject(e), _) => e.kind(),
            (Outcome::Admit(Some(_)), _) => "admitted",
            (Outcome::Admit(None), Stage::PublicEndpoint) => "public",
            (Outcome::Admit(None), _) => "unidentified",
        }
    }
}

enum Flow {
    Continue,
    Done(Outcome),
}

/// Ordered authentication pipeline in front of every route
pub struct RequestGate<S: CredentialStore> {
    manager: Arc<AuthManager<S>>,
    public_paths: Vec<String>,
}

impl<S: CredentialStore> Clone for RequestGate<S> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            public_paths: self.public_paths.clone(),
        }
    }
}

impl<S: CredentialStore> RequestGate<S> {
    /// Create a gate admitting any path under `public_paths` without a token
    pub fn new(manager: Arc<AuthManager<S>>, public_paths: Vec<String>) -> Self {
        Self {
            manager,
            public_paths,
        }
    }

    /// Add a public path prefix
    pub fn public_path(mut self, prefix: impl Into<String>) -> Self {
        self.public_paths.push(prefix.into());
        self
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| path.starts_with(p.as_str()))
    }

    pub fn manager(&self) -> &Arc<AuthManager<S>> {
        &self.manager
    }

    /// Run the pipeline for one request
    pub async fn evaluate(&self, request: &GateRequest<'_>) -> Decision {
        let mut subject: Option<String> = None;

        for stage in PIPELINE {
            if let Flow::Done(outcome) = self.run_stage(stage, request, &mut subject).await {
                let decision = Decision { stage, outcome };
                debug!(
                    path = %request.path,
                    ip = %request.source_ip,
                    stage = stage.as_str(),
                    decision = decision.label(),
                    "Gate decision"
                );
                return decision;
            }
        }

        // Admission always ends the pipeline; fail closed if it ever does not.
        Decision {
            stage: Stage::Admission,
            outcome: Outcome::Reject(AuthError::Unauthenticated),
        }
    }

    async fn run_stage(
        &self,
        stage: Stage,
        request: &GateRequest<'_>,
        subject: &mut Option<String>,
    ) -> Flow {
        let tokens = self.manager.tokens();

        match stage {
            Stage::Blocked => {
                if self.manager.guard().is_blocked(request.source_ip) {
                    return Flow::Done(Outcome::Reject(AuthError::RateLimited));
                }
                Flow::Continue
            }

            Stage::PublicEndpoint => {
                if self.is_public(request.path) {
                    return Flow::Done(Outcome::Admit(None));
                }
                Flow::Continue
            }

            Stage::BearerPresence => match request.bearer_token {
                Some(_) => Flow::Continue,
                None => Flow::Done(Outcome::Reject(AuthError::Unauthenticated)),
            },

            Stage::TokenValidity => match request.bearer_token {
                Some(token) if tokens.validate(token) => Flow::Continue,
                _ => Flow::Done(Outcome::Reject(AuthError::Unauthenticated)),
            },

            Stage::IdentityResolution => {
                let Some(username) = request.bearer_token.and_then(|t| tokens.extract_subject(t))
                else {
                    return Flow::Done(Outcome::Reject(AuthError::Unauthenticated));
                };
                if !self.manager.principal_exists(&username).await {
                    warn!(username = %username, "Token subject is not a known principal");
                    return Flow::Done(Outcome::Reject(AuthError::Unauthenticated));
                }
                *subject = Some(username);
                Flow::Continue
            }

            Stage::BodyCrossCheck => {
                let Some(username) = subject.as_deref() else {
                    return Flow::Done(Outcome::Reject(AuthError::Unauthenticated));
                };
                let body = match request.body {
                    Ok(body) => body,
                    Err(e) => return Flow::Done(Outcome::Reject(e.clone())),
                };
                match body_username_matches(body, username) {
                    Ok(true) => Flow::Continue,
                    Ok(false) => {
                        warn!(
                            subject = %username,
                            path = %request.path,
                            "Body username does not match token subject, proceeding without identity"
                        );
                        Flow::Done(Outcome::Admit(None))
                    }
                    Err(e) => Flow::Done(Outcome::Reject(e)),
                }
            }

            Stage::Revocation => match request.bearer_token {
                Some(token) if tokens.is_revoked(token) => {
                    Flow::Done(Outcome::Reject(AuthError::Revoked))
                }
                _ => Flow::Continue,
            },

            Stage::Admission => match subject.take() {
                Some(username) => Flow::Done(Outcome::Admit(Some(Identity { username }))),
                None => Flow::Done(Outcome::Reject(AuthError::Unauthenticated)),
            },
        }
    }
}

/// Whether the request body agrees with the token subject
///
/// An empty body, a non-object body, a missing `username` field and a `null`
/// one all agree. A non-empty body that is not JSON is malformed.
fn body_username_matches(body: &[u8], subject: &str) -> Result<bool, AuthError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(true);
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|_| AuthError::MalformedRequest("Malformed request body".to_string()))?;

    match value.get("username") {
        None | Some(Value::Null) => Ok(true),
        Some(Value::String(name)) => Ok(name == subject),
        Some(_) => Ok(false),
    }
}

/// Resolve the client address
///
/// Uses the first entry of `X-Forwarded-For` when it parses as an IP address,
/// otherwise the transport peer. The header is client-controlled unless a
/// trusted proxy overwrites it.
pub fn client_ip(headers: &HeaderMap, peer: IpAddr) -> IpAddr {
    headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or(peer)
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::hash_password;
    use crate::auth::manager::AuthConfig;
    use crate::auth::secret::ServerSecret;
    use crate::error::StoreError;
    use crate::store::{InMemoryCredentialStore, MockCredentialStore, UserRecord};
    use axum::http::HeaderValue;
    use chrono::Utc;
    use serde_json::Map;
    use std::net::Ipv4Addr;

    const PEER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100));

    fn secret() -> ServerSecret {
        ServerSecret::from_bytes(vec![0x2a; 32]).unwrap()
    }

    fn public_paths() -> Vec<String> {
        vec!["/api/authentication".to_string(), "/health".to_string()]
    }

    fn gate() -> RequestGate<InMemoryCredentialStore> {
        let store = InMemoryCredentialStore::with_users([
            UserRecord::new("alice", hash_password(&secret(), "pw-alice")),
            UserRecord::new("bob", hash_password(&secret(), "pw-bob")),
        ]);
        let manager = AuthManager::new(Arc::new(store), secret(), AuthConfig::default());
        RequestGate::new(Arc::new(manager), public_paths())
    }

    fn issue<S: CredentialStore>(gate: &RequestGate<S>, subject: &str) -> String {
        gate.manager()
            .tokens()
            .issue(subject, Map::new())
            .unwrap()
            .token
    }

    fn request<'a>(path: &'a str, token: Option<&'a str>, body: &'a [u8]) -> GateRequest<'a> {
        GateRequest {
            path,
            source_ip: PEER,
            bearer_token: token,
            body: Ok(body),
        }
    }

    fn oversized() -> AuthError {
        AuthError::MalformedRequest("Request body too large or unreadable".to_string())
    }

    fn block(gate: &RequestGate<impl CredentialStore>, ip: IpAddr) {
        for _ in 0..3 {
            gate.manager().guard().record_failure(ip);
        }
    }

    #[tokio::test]
    async fn test_valid_token_is_admitted_with_identity() {
        let gate = gate();
        let token = issue(&gate, "alice");

        let decision = gate
            .evaluate(&request("/api/users/me", Some(&token), b""))
            .await;

        assert_eq!(decision.stage, Stage::Admission);
        assert_eq!(
            decision.outcome,
            Outcome::Admit(Some(Identity {
                username: "alice".to_string()
            }))
        );
        assert_eq!(decision.label(), "admitted");
    }

    #[tokio::test]
    async fn test_blocked_ip_is_rejected_before_public_check() {
        let gate = gate();
        block(&gate, PEER);

        let decision = gate
            .evaluate(&request("/api/authentication/login", None, b""))
            .await;

        assert_eq!(decision.stage, Stage::Blocked);
        assert_eq!(decision.outcome, Outcome::Reject(AuthError::RateLimited));
    }

    #[tokio::test]
    async fn test_blocked_ip_is_rejected_even_with_valid_token() {
        let gate = gate();
        let token = issue(&gate, "alice");
        block(&gate, PEER);

        let decision = gate
            .evaluate(&request("/api/users/me", Some(&token), b""))
            .await;

        assert_eq!(decision.outcome, Outcome::Reject(AuthError::RateLimited));
    }

    #[tokio::test]
    async fn test_public_path_skips_token_checks() {
        let mut mock = MockCredentialStore::new();
        mock.expect_find_by_username().times(0);
        let manager = AuthManager::new(Arc::new(mock), secret(), AuthConfig::default());
        let gate = RequestGate::new(Arc::new(manager), public_paths());

        let decision = gate
            .evaluate(&request("/health", Some("garbage"), b"not json"))
            .await;

        assert_eq!(decision.stage, Stage::PublicEndpoint);
        assert_eq!(decision.outcome, Outcome::Admit(None));
        assert_eq!(decision.label(), "public");
    }

    #[tokio::test]
    async fn test_public_path_is_prefix_match() {
        let gate = gate().public_path("/api/trainees/register");

        assert!(gate.is_public("/api/authentication/login"));
        assert!(gate.is_public("/api/trainees/register/confirm"));
        assert!(!gate.is_public("/api/users/me"));
        assert!(!gate.is_public("/"));
    }

    #[tokio::test]
    async fn test_missing_bearer_is_unauthenticated() {
        let gate = gate();

        let decision = gate.evaluate(&request("/api/users/me", None, b"")).await;

        assert_eq!(decision.stage, Stage::BearerPresence);
        assert_eq!(decision.outcome, Outcome::Reject(AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_invalid_token_is_unauthenticated() {
        let gate = gate();

        let decision = gate
            .evaluate(&request("/api/users/me", Some("not-a-jwt"), b""))
            .await;

        assert_eq!(decision.stage, Stage::TokenValidity);
        assert_eq!(decision.outcome, Outcome::Reject(AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_expired_token_is_unauthenticated() {
        let gate = gate();
        let token = gate
            .manager()
            .tokens()
            .issue_at("alice", Map::new(), Utc::now() - chrono::Duration::days(1))
            .unwrap()
            .token;

        let decision = gate
            .evaluate(&request("/api/users/me", Some(&token), b""))
            .await;

        assert_eq!(decision.stage, Stage::TokenValidity);
    }

    #[tokio::test]
    async fn test_unknown_principal_is_unauthenticated() {
        let gate = gate();
        let token = issue(&gate, "carol");

        let decision = gate
            .evaluate(&request("/api/users/me", Some(&token), b""))
            .await;

        assert_eq!(decision.stage, Stage::IdentityResolution);
        assert_eq!(decision.outcome, Outcome::Reject(AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_store_failure_is_unauthenticated() {
        let mut mock = MockCredentialStore::new();
        mock.expect_find_by_username()
            .returning(|_| Err(StoreError::Unavailable("db down".to_string())));
        let manager = AuthManager::new(Arc::new(mock), secret(), AuthConfig::default());
        let gate = RequestGate::new(Arc::new(manager), public_paths());
        let token = issue(&gate, "alice");

        let decision = gate
            .evaluate(&request("/api/users/me", Some(&token), b""))
            .await;

        assert_eq!(decision.stage, Stage::IdentityResolution);
        assert_eq!(decision.outcome, Outcome::Reject(AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_body_username_mismatch_proceeds_without_identity() {
        let gate = gate();
        let token = issue(&gate, "bob");

        let decision = gate
            .evaluate(&request(
                "/api/users/me",
                Some(&token),
                br#"{"username":"alice"}"#,
            ))
            .await;

        assert_eq!(decision.stage, Stage::BodyCrossCheck);
        assert_eq!(decision.outcome, Outcome::Admit(None));
        assert_eq!(decision.label(), "unidentified");
    }

    #[tokio::test]
    async fn test_body_username_mismatch_skips_revocation() {
        let gate = gate();
        let token = issue(&gate, "bob");
        gate.manager().logout(Some(&token)).unwrap();

        let decision = gate
            .evaluate(&request(
                "/api/users/me",
                Some(&token),
                br#"{"username":"alice"}"#,
            ))
            .await;

        assert_eq!(decision.outcome, Outcome::Admit(None));
    }

    #[tokio::test]
    async fn test_body_username_match_is_admitted() {
        let gate = gate();
        let token = issue(&gate, "bob");

        let decision = gate
            .evaluate(&request(
                "/api/users/me",
                Some(&token),
                br#"{"username":"bob","note":"hi"}"#,
            ))
            .await;

        assert_eq!(
            decision.outcome,
            Outcome::Admit(Some(Identity {
                username: "bob".to_string()
            }))
        );
    }

    #[tokio::test]
    async fn test_body_without_username_is_admitted() {
        let gate = gate();
        let token = issue(&gate, "bob");

        let bodies: [&[u8]; 4] = [br#"{"title":"x"}"#, b"[1,2]", b"  ", br#"{"username":null}"#];
        for body in bodies {
            let decision = gate
                .evaluate(&request("/api/users/me", Some(&token), body))
                .await;
            assert_eq!(decision.stage, Stage::Admission, "body {:?}", body);
        }
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed() {
        let gate = gate();
        let token = issue(&gate, "bob");

        let decision = gate
            .evaluate(&request("/api/users/me", Some(&token), b"username=bob"))
            .await;

        assert_eq!(decision.stage, Stage::BodyCrossCheck);
        assert!(matches!(
            decision.outcome,
            Outcome::Reject(AuthError::MalformedRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_unreadable_body_does_not_preempt_blocked_check() {
        let gate = gate();
        let token = issue(&gate, "alice");
        block(&gate, PEER);
        let error = oversized();

        let decision = gate
            .evaluate(&GateRequest {
                body: Err(&error),
                ..request("/api/users/me", Some(&token), b"")
            })
            .await;

        assert_eq!(decision.stage, Stage::Blocked);
        assert_eq!(decision.outcome, Outcome::Reject(AuthError::RateLimited));
    }

    #[tokio::test]
    async fn test_unreadable_body_without_token_is_unauthenticated() {
        let gate = gate();
        let error = oversized();

        let decision = gate
            .evaluate(&GateRequest {
                body: Err(&error),
                ..request("/api/users/me", None, b"")
            })
            .await;

        assert_eq!(decision.stage, Stage::BearerPresence);
        assert_eq!(decision.outcome, Outcome::Reject(AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_unreadable_body_is_rejected_at_cross_check() {
        let gate = gate();
        let token = issue(&gate, "alice");
        let error = oversized();

        let decision = gate
            .evaluate(&GateRequest {
                body: Err(&error),
                ..request("/api/users/me", Some(&token), b"")
            })
            .await;

        assert_eq!(decision.stage, Stage::BodyCrossCheck);
        assert_eq!(decision.outcome, Outcome::Reject(oversized()));
    }

    #[tokio::test]
    async fn test_revoked_token_is_rejected_as_revoked() {
        let gate = gate();
        let token = issue(&gate, "alice");
        gate.manager().logout(Some(&token)).unwrap();

        let decision = gate
            .evaluate(&request("/api/users/me", Some(&token), b""))
            .await;

        assert_eq!(decision.stage, Stage::Revocation);
        assert_eq!(decision.outcome, Outcome::Reject(AuthError::Revoked));
        assert_eq!(decision.label(), "revoked");
    }

    #[test]
    fn test_pipeline_order() {
        assert_eq!(PIPELINE.first(), Some(&Stage::Blocked));
        assert_eq!(PIPELINE.last(), Some(&Stage::Admission));
        let cross = PIPELINE.iter().position(|s| *s == Stage::BodyCrossCheck);
        let revoke = PIPELINE.iter().position(|s| *s == Stage::Revocation);
        assert!(cross < revoke);
    }

    #[test]
    fn test_client_ip_prefers_first_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR_HEADER,
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );

        assert_eq!(
            client_ip(&headers, PEER),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, PEER), PEER);

        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("unknown"));
        assert_eq!(client_ip(&headers, PEER), PEER);
    }

    #[test]
    fn test_client_ip_ipv6() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("2001:db8::1"));

        assert_eq!(
            client_ip(&headers, PEER),
            "2001:db8::1".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
