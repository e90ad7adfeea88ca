//! auth-gateway - Request-authentication gateway
//!
//! This crate issues and validates signed session tokens, revokes them on
//! logout, blocks source IPs that keep failing to log in, and puts an ordered
//! authentication pipeline in front of every HTTP route.

pub mod auth;
pub mod config;
pub mod error;
pub mod otel;
pub mod server;
pub mod store;
