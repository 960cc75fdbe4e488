//! Client-side authentication session management.
//!
//! `sessionkit-core` keeps a signed-in user's bearer credential and profile,
//! persists them across restarts, stamps outbound API requests with the
//! credential and completes the OAuth authorization-code callback.

pub mod api;
pub mod auth;
pub mod config;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, Transport};
pub use auth::{
    AuthError, CallbackParams, CallbackStatus, Navigator, OAuthCallback, RequestAuthenticator,
    Role, Route, SessionController, SessionState, SessionStore, UserProfile,
};
pub use config::Config;
