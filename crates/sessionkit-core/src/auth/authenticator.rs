use std::sync::{Arc, RwLock};

use reqwest::header::HeaderValue;
use tracing::debug;

use super::error::AuthError;

/// Shared `Authorization` header slot.
///
/// Every clone points at the same slot; the transport reads it on each
/// request. Exactly one credential is current at a time and the last writer
/// wins, so the session controller is the only component that should call
/// `attach`/`detach`.
#[derive(Clone, Debug, Default)]
pub struct RequestAuthenticator {
    header: Arc<RwLock<Option<String>>>,
}

impl RequestAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the header value for `credential`, refusing anything that
    /// cannot be sent as an HTTP header
    pub fn bearer(credential: &str) -> Result<String, AuthError> {
        let value = format!("Bearer {}", credential);
        if credential.is_empty() || HeaderValue::from_str(&value).is_err() {
            return Err(AuthError::InvalidCredential);
        }
        Ok(value)
    }

    /// Make every subsequent request carry `Authorization: Bearer <credential>`.
    ///
    /// An unusable credential leaves the slot untouched.
    pub fn attach(&self, credential: &str) -> Result<(), AuthError> {
        let value = Self::bearer(credential)?;
        match self.header.write() {
            Ok(mut slot) => *slot = Some(value),
            Err(poisoned) => *poisoned.into_inner() = Some(value),
        }
        debug!("Authorization header attached");
        Ok(())
    }

    /// Stop sending the `Authorization` header
    pub fn detach(&self) {
        match self.header.write() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        debug!("Authorization header detached");
    }

    /// Current header value, e.g. `Bearer abc`
    pub fn authorization(&self) -> Option<String> {
        match self.header.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.authorization().is_some()
    }
}
