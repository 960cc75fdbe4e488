//! HTTP transport for the session API.
//!
//! This module provides the `Transport` seam the session controller and the
//! OAuth callback talk through, plus `ApiClient`, the reqwest-backed
//! implementation that stamps every request with the current bearer token
//! from the shared `RequestAuthenticator`.

pub mod client;
pub mod error;

use async_trait::async_trait;
use serde_json::Value;

pub use client::ApiClient;
pub use error::ApiError;

/// Profile of the signed-in user; also the credential verification check
pub const USER_PATH: &str = "/user";

/// Server-side session teardown notification
pub const LOGOUT_PATH: &str = "/logout";

/// Authorization-code exchange endpoint
pub const GOOGLE_AUTH_PATH: &str = "/auth/google";

/// The two HTTP verbs the session layer needs, returning the parsed JSON body.
///
/// An empty success body is returned as `Value::Null`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str) -> Result<Value, ApiError>;

    async fn post(&self, path: &str, body: Option<Value>) -> Result<Value, ApiError>;
}
