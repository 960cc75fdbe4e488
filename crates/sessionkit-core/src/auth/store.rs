use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::model::UserProfile;
use crate::storage::KeyValueStorage;

/// Storage key for the bearer credential
pub const TOKEN_KEY: &str = "token";

/// Storage key for the JSON-encoded user profile
pub const USER_KEY: &str = "user";

/// A persisted session as read back from storage
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub credential: String,
    pub user: UserProfile,
}

/// Persists the (credential, user) pair under two keys that are always
/// written and removed together.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    pub fn save(&self, credential: &str, user: &UserProfile) -> Result<()> {
        let encoded = serde_json::to_string(user).context("Failed to encode user profile")?;
        self.storage
            .set_entries(&[(TOKEN_KEY, credential), (USER_KEY, &encoded)])
            .context("Failed to persist session")?;
        debug!(user_id = %user.id, "Session persisted");
        Ok(())
    }

    /// Replace the stored profile, keeping the stored credential
    pub fn save_user(&self, user: &UserProfile) -> Result<()> {
        let encoded = serde_json::to_string(user).context("Failed to encode user profile")?;
        self.storage
            .set(USER_KEY, &encoded)
            .context("Failed to persist user profile")
    }

    /// Read the persisted session.
    ///
    /// Anything short of a credential plus a decodable profile is absence:
    /// missing keys, an undecodable profile and backend read failures all
    /// come back as `None`.
    pub fn load(&self) -> Option<StoredSession> {
        let (credential, raw_user) = match self.read_raw() {
            Ok(Some(pair)) => pair,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted session, treating as absent");
                return None;
            }
        };

        match Self::decode_user(&raw_user) {
            Some(user) => Some(StoredSession { credential, user }),
            None => {
                warn!("Persisted user profile is not valid, treating session as absent");
                None
            }
        }
    }

    fn read_raw(&self) -> Result<Option<(String, String)>> {
        let credential = self.storage.get(TOKEN_KEY)?;
        let user = self.storage.get(USER_KEY)?;
        Ok(credential.zip(user).filter(|(token, _)| !token.is_empty()))
    }

    fn decode_user(raw: &str) -> Option<UserProfile> {
        serde_json::from_str(raw).ok()
    }

    /// Remove both keys. Safe to call when nothing is stored.
    pub fn clear(&self) -> Result<()> {
        self.storage
            .remove_entries(&[TOKEN_KEY, USER_KEY])
            .context("Failed to clear persisted session")?;
        debug!("Persisted session cleared");
        Ok(())
    }
}
