//! Application configuration management.
//!
//! This module handles loading the configuration: API location,
//! provider sign-in link, storage backend, timing of transient errors and
//! callback redirects, and the paths navigation targets map to.
//!
//! Configuration is stored at `~/.config/sessionkit/config.json`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{Route, SessionState};
use crate::storage::{FileStorage, KeyValueStorage, KeyringStorage};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sessionkit";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `api_base_url`
pub const API_URL_ENV: &str = "SESSIONKIT_API_URL";

/// Environment variable overriding `google_auth_url`
pub const GOOGLE_AUTH_URL_ENV: &str = "SESSIONKIT_GOOGLE_AUTH_URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    /// Where the login surface sends the user to start the provider flow
    pub google_auth_url: Option<String>,
    pub storage: StorageBackend,
    pub request_timeout_secs: u64,
    pub error_ttl_ms: u64,
    pub success_redirect_ms: u64,
    pub failure_redirect_ms: u64,
    pub login_path: String,
    pub dashboard_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            google_auth_url: None,
            storage: StorageBackend::File,
            request_timeout_secs: 30,
            error_ttl_ms: 5000,
            success_redirect_ms: 1500,
            failure_redirect_ms: 3000,
            login_path: "/login".to_string(),
            dashboard_path: "/dashboard".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Apply `SESSIONKIT_*` overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.is_empty()) {
            self.api_base_url = url;
        }
        if let Some(url) = lookup(GOOGLE_AUTH_URL_ENV).filter(|v| !v.is_empty()) {
            self.google_auth_url = Some(url);
        }
    }

    /// Open the configured session storage backend
    pub fn open_storage(&self) -> Result<Arc<dyn KeyValueStorage>> {
        let storage: Arc<dyn KeyValueStorage> = match self.storage {
            StorageBackend::File => {
                let dir = self.cache_dir().context("Failed to resolve session storage location")?;
                Arc::new(FileStorage::in_dir(&dir))
            }
            StorageBackend::Keyring => Arc::new(KeyringStorage::default()),
        };
        Ok(storage)
    }

    pub fn login_url(&self) -> Option<&str> {
        self.google_auth_url.as_deref()
    }

    /// Where someone asking to sign in should be sent: the dashboard when a
    /// session is already active, otherwise the provider sign-in link.
    pub fn sign_in_target(&self, state: &SessionState) -> Option<&str> {
        match state.landing_route() {
            Route::Dashboard => Some(self.route_path(Route::Dashboard)),
            Route::Login => self.login_url(),
        }
    }

    pub fn route_path(&self, route: Route) -> &str {
        match route {
            Route::Login => &self.login_path,
            Route::Dashboard => &self.dashboard_path,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn error_ttl(&self) -> Duration {
        Duration::from_millis(self.error_ttl_ms)
    }

    pub fn success_redirect(&self) -> Duration {
        Duration::from_millis(self.success_redirect_ms)
    }

    pub fn failure_redirect(&self) -> Duration {
        Duration::from_millis(self.failure_redirect_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::callback::{DEFAULT_FAILURE_REDIRECT, DEFAULT_SUCCESS_REDIRECT};
    use crate::auth::controller::DEFAULT_ERROR_TTL;

    #[test]
    fn test_defaults_match_session_timing() {
        let config = Config::default();
        assert_eq!(config.error_ttl(), DEFAULT_ERROR_TTL);
        assert_eq!(config.success_redirect(), DEFAULT_SUCCESS_REDIRECT);
        assert_eq!(config.failure_redirect(), DEFAULT_FAILURE_REDIRECT);
        assert_eq!(config.route_path(Route::Login), "/login");
        assert_eq!(config.route_path(Route::Dashboard), "/dashboard");
        assert_eq!(config.login_url(), None);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"api_base_url": "https://api.example.com", "storage": "keyring"}"#)
                .unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.storage, StorageBackend::Keyring);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            API_URL_ENV => Some("https://api.example.com".to_string()),
            GOOGLE_AUTH_URL_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.google_auth_url, None);

        config.apply_overrides(|key| {
            (key == GOOGLE_AUTH_URL_ENV).then(|| "https://accounts.example.com/o/oauth2".to_string())
        });
        assert_eq!(config.login_url(), Some("https://accounts.example.com/o/oauth2"));
        assert_eq!(config.api_base_url, "https://api.example.com");
    }

    #[test]
    fn test_sign_in_target_skips_provider_when_signed_in() {
        let mut config = Config::default();
        let mut state = SessionState::default();
        assert_eq!(config.sign_in_target(&state), None);

        config.google_auth_url = Some("https://accounts.example.com/o/oauth2".to_string());
        assert_eq!(
            config.sign_in_target(&state),
            Some("https://accounts.example.com/o/oauth2")
        );

        state.user = Some(crate::auth::UserProfile::new(crate::auth::UserId::Number(1), "A"));
        assert_eq!(config.sign_in_target(&state), Some("/dashboard"));
    }
}
