//! Authentication module for managing the user's session.
//!
//! This module provides:
//! - `SessionController`: the session state machine (initialize, login,
//!   logout, refresh, update, error expiry)
//! - `OAuthCallback`: the one-shot authorization-code callback
//! - `SessionStore`: persistence of the (credential, user) pair
//! - `RequestAuthenticator`: the shared bearer header slot

pub mod authenticator;
pub mod callback;
pub mod controller;
pub mod error;
pub mod model;
pub mod store;
pub mod timer;

pub use authenticator::RequestAuthenticator;
pub use callback::{CallbackError, CallbackParams, CallbackStatus, Navigator, OAuthCallback};
pub use controller::SessionController;
pub use error::AuthError;
pub use model::{Role, Route, SessionState, UserId, UserProfile};
pub use store::{SessionStore, StoredSession};
pub use timer::ScheduledTask;
