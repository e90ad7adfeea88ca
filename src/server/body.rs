//! Read-once request body buffer
//!
//! The gate needs the body to cross-check the `username` field, and the
//! downstream handler needs it again. The body is read into memory once, with
//! a size limit, and replayed into the rebuilt request.

use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::request::Parts,
};

use crate::error::AuthError;

/// A buffered request body
#[derive(Debug, Clone, Default)]
pub struct CachedBody {
    bytes: Bytes,
}

impl CachedBody {
    /// Split a request and read its body, up to `limit` bytes
    ///
    /// The parts are returned even when the body cannot be read, so the caller
    /// decides when the read error is reported.
    pub async fn read(request: Request, limit: usize) -> (Parts, Result<Self, AuthError>) {
        let (parts, body) = request.into_parts();
        let result = axum::body::to_bytes(body, limit)
            .await
            .map(|bytes| Self { bytes })
            .map_err(|_| {
                AuthError::MalformedRequest("Request body too large or unreadable".to_string())
            });

        (parts, result)
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Rebuild the request with the buffered body
    pub fn into_request(self, parts: Parts) -> Request {
        Request::from_parts(parts, Body::from(self.bytes))
    }
}
