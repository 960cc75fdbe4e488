//! OAuth authorization-code callback.
//!
//! `OAuthCallback` is created when the identity provider redirects back,
//! exchanges the `code` query value for a session through
//! `POST /auth/google`, hands the result to `SessionController::login`, and
//! navigates: to the dashboard after a short delay on success, to the login
//! surface after a longer one on any failure.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[cfg(feature = "ts")]
use ts_rs::TS;

use super::controller::SessionController;
use super::error::AuthError;
use super::model::{Route, UserProfile};
use super::timer::ScheduledTask;
use crate::api::{ApiError, Transport, GOOGLE_AUTH_PATH};

/// Delay before leaving a successful callback for the dashboard
pub const DEFAULT_SUCCESS_REDIRECT: Duration = Duration::from_millis(1500);

/// Delay before leaving a failed callback for the login surface
pub const DEFAULT_FAILURE_REDIRECT: Duration = Duration::from_millis(3000);

/// Something that can move the application to another surface
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum CallbackStatus {
    Initializing,
    Authenticating,
    Success,
    Error(String),
}

/// The provider-supplied query values; empty values count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
}

impl CallbackParams {
    pub fn new(code: Option<String>, error: Option<String>) -> Self {
        Self {
            code: code.filter(|c| !c.is_empty()),
            error: error.filter(|e| !e.is_empty()),
        }
    }

    /// Parse the full redirect URL the provider sent the user back to
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let url = Url::parse(raw).with_context(|| format!("Not a valid callback URL: {}", raw))?;
        Ok(Self::from_url(&url))
    }

    pub fn from_url(url: &Url) -> Self {
        let mut code = None;
        let mut error = None;
        for (key, value) in url.query_pairs() {
            match &*key {
                "code" if code.is_none() => code = Some(value.into_owned()),
                "error" if error.is_none() => error = Some(value.into_owned()),
                _ => {}
            }
        }
        Self::new(code, error)
    }
}

#[derive(Error, Debug)]
pub enum CallbackError {
    #[error("Google authentication error: {0}")]
    Provider(String),

    #[error("No authorization code received")]
    MissingCode,

    #[error("Failed to authenticate with Google")]
    Exchange(#[source] ApiError),

    #[error("{0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Login(#[from] AuthError),
}

/// Body of a code exchange; every field is optional so a partial answer
/// can be reported instead of failing to decode.
#[derive(Debug, Default, Deserialize)]
struct ExchangeResponse {
    token: Option<String>,
    user: Option<Value>,
    message: Option<String>,
}

impl ExchangeResponse {
    fn into_session(self) -> Result<(UserProfile, String), CallbackError> {
        let missing = || {
            CallbackError::MalformedResponse(
                self.message
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "No user or token returned".to_string()),
            )
        };

        let token = match self.token.as_deref() {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => return Err(missing()),
        };
        let user = match self.user.clone() {
            Some(user) if !user.is_null() => {
                serde_json::from_value::<UserProfile>(user).map_err(|_| missing())?
            }
            _ => return Err(missing()),
        };
        Ok((user, token))
    }
}

pub struct OAuthCallback {
    controller: Arc<SessionController>,
    api: Arc<dyn Transport>,
    navigator: Arc<dyn Navigator>,
    status: watch::Sender<CallbackStatus>,
    handled: Mutex<Option<CallbackParams>>,
    redirect: Mutex<Option<ScheduledTask>>,
    success_delay: Duration,
    failure_delay: Duration,
}

impl OAuthCallback {
    pub fn new(
        controller: Arc<SessionController>,
        api: Arc<dyn Transport>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (status, _) = watch::channel(CallbackStatus::Initializing);
        Self {
            controller,
            api,
            navigator,
            status,
            handled: Mutex::new(None),
            redirect: Mutex::new(None),
            success_delay: DEFAULT_SUCCESS_REDIRECT,
            failure_delay: DEFAULT_FAILURE_REDIRECT,
        }
    }

    pub fn with_delays(mut self, success: Duration, failure: Duration) -> Self {
        self.success_delay = success;
        self.failure_delay = failure;
        self
    }

    pub fn status(&self) -> CallbackStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallbackStatus> {
        self.status.subscribe()
    }

    /// Run the callback for `params`.
    ///
    /// The attempt is keyed by the query values: calling again with the same
    /// params returns the current status without another exchange.
    pub async fn handle(&self, params: CallbackParams) -> CallbackStatus {
        {
            let mut handled = match self.handled.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if handled.as_ref() == Some(&params) {
                debug!("Callback already handled for these parameters");
                return self.status();
            }
            *handled = Some(params.clone());
        }

        // New parameters supersede whatever the previous attempt scheduled
        self.set_redirect(None);
        self.status.send_replace(CallbackStatus::Initializing);

        match self.authorize(params).await {
            Ok(()) => {
                info!("OAuth callback completed");
                self.status.send_replace(CallbackStatus::Success);
                self.schedule(Route::Dashboard, self.success_delay);
            }
            Err(e) => {
                error!(error = %e, "OAuth callback failed");
                self.status.send_replace(CallbackStatus::Error(e.to_string()));
                self.schedule(Route::Login, self.failure_delay);
            }
        }
        self.status()
    }

    async fn authorize(&self, params: CallbackParams) -> Result<(), CallbackError> {
        if let Some(provider_error) = params.error {
            return Err(CallbackError::Provider(provider_error));
        }
        let code = params.code.ok_or(CallbackError::MissingCode)?;

        self.status.send_replace(CallbackStatus::Authenticating);
        let body = self
            .api
            .post(GOOGLE_AUTH_PATH, Some(json!({ "code": code })))
            .await
            .map_err(CallbackError::Exchange)?;

        let exchange: ExchangeResponse = serde_json::from_value(body).unwrap_or_default();
        let (user, token) = exchange.into_session()?;
        self.controller.login(user, &token)?;
        Ok(())
    }

    fn schedule(&self, route: Route, delay: Duration) {
        let navigator = self.navigator.clone();
        debug!(?route, ?delay, "Scheduling navigation");
        let task = ScheduledTask::after(delay, async move {
            navigator.navigate(route);
        });
        self.set_redirect(Some(task));
    }

    fn set_redirect(&self, task: Option<ScheduledTask>) {
        match self.redirect.lock() {
            Ok(mut slot) => *slot = task,
            Err(poisoned) => *poisoned.into_inner() = task,
        }
    }
}
