//! The authentication state machine.
//!
//! `SessionController` owns the published `SessionState`, is the only
//! writer to the `SessionStore`, and attaches/detaches the bearer credential
//! on the shared `RequestAuthenticator`. Consumers observe state through a
//! `watch` subscription.
//!
//! `initialize`, `login`, `logout` and `refresh_user` are single-flight: a
//! call made while another of them is running fails with
//! `AuthError::TransitionInFlight` and leaves state untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{watch, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, error, info, warn};

use super::authenticator::RequestAuthenticator;
use super::error::AuthError;
use super::model::{SessionState, UserProfile};
use super::store::SessionStore;
use super::timer::ScheduledTask;
use crate::api::{Transport, LOGOUT_PATH, USER_PATH};

// ============================================================================
// Constants
// ============================================================================

/// How long a user-visible error stays published before it clears itself.
pub const DEFAULT_ERROR_TTL: Duration = Duration::from_secs(5);

const LOGIN_FAILED_MESSAGE: &str = "Failed to login. Please try again.";
const REFRESH_FAILED_MESSAGE: &str = "Failed to refresh user data";

pub struct SessionController {
    store: SessionStore,
    authenticator: RequestAuthenticator,
    api: Arc<dyn Transport>,
    state: Arc<watch::Sender<SessionState>>,
    transition: AsyncMutex<()>,
    initialized: AtomicBool,
    error_ttl: Duration,
    error_timer: Mutex<Option<ScheduledTask>>,
}

impl SessionController {
    pub fn new(
        store: SessionStore,
        authenticator: RequestAuthenticator,
        api: Arc<dyn Transport>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            store,
            authenticator,
            api,
            state: Arc::new(state),
            transition: AsyncMutex::new(()),
            initialized: AtomicBool::new(false),
            error_ttl: DEFAULT_ERROR_TTL,
            error_timer: Mutex::new(None),
        }
    }

    pub fn with_error_ttl(mut self, ttl: Duration) -> Self {
        self.error_ttl = ttl;
        self
    }

    // =========================================================================
    // Published state
    // =========================================================================

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.state.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn is_admin(&self) -> bool {
        self.state.borrow().is_admin()
    }

    pub fn authenticator(&self) -> &RequestAuthenticator {
        &self.authenticator
    }

    fn publish<F>(&self, f: F)
    where
        F: FnOnce(&mut SessionState),
    {
        self.state.send_modify(f);
    }

    fn begin_transition(&self) -> Result<AsyncMutexGuard<'_, ()>, AuthError> {
        self.transition.try_lock().map_err(|_| {
            debug!("Rejected overlapping authentication operation");
            AuthError::TransitionInFlight
        })
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Restore the persisted session and verify it with the server.
    ///
    /// Runs once; later calls return immediately. A session the server
    /// rejects is wiped without publishing an error. When verification
    /// succeeds the server's profile replaces the cached one if it decodes.
    pub async fn initialize(&self) -> Result<(), AuthError> {
        let _guard = self.begin_transition()?;
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(stored) = self.store.load() else {
            debug!("No usable persisted session");
            // Drop whatever half of a session may be left behind
            if let Err(e) = self.store.clear() {
                warn!(error = %e, "Failed to clear leftover session data");
            }
            self.publish(|s| s.loading = false);
            return Ok(());
        };

        if let Err(e) = self.authenticator.attach(&stored.credential) {
            warn!(error = %e, "Persisted credential is unusable, clearing session");
            self.teardown_local();
            self.publish(|s| s.loading = false);
            return Ok(());
        }
        let cached = stored.user;
        debug!(user_id = %cached.id, "Restored cached session, verifying");
        self.publish(|s| s.user = Some(cached));

        match self.api.get(USER_PATH).await {
            Ok(body) => match serde_json::from_value::<UserProfile>(body) {
                Ok(fresh) => {
                    if let Err(e) = self.store.save_user(&fresh) {
                        warn!(error = %e, "Failed to persist verified profile");
                    }
                    info!(user_id = %fresh.id, "Session verified");
                    self.publish(|s| {
                        s.user = Some(fresh);
                        s.loading = false;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Verification response is not a profile, keeping cached user");
                    self.publish(|s| s.loading = false);
                }
            },
            Err(e) => {
                if e.is_auth_rejection() {
                    info!("Persisted credential no longer accepted, clearing session");
                } else {
                    warn!(error = %e, "Session verification failed, clearing session");
                }
                self.teardown_local();
                self.publish(|s| s.loading = false);
            }
        }
        Ok(())
    }

    /// Establish a session for `user` with `credential`.
    ///
    /// Fails when the credential cannot be sent as a header or the session
    /// cannot be persisted; in either case nothing is attached or published
    /// apart from the error message.
    pub fn login(&self, user: UserProfile, credential: &str) -> Result<(), AuthError> {
        let _guard = self.begin_transition()?;
        self.publish(|s| s.auth_loading = true);
        self.clear_error();

        if let Err(e) = RequestAuthenticator::bearer(credential) {
            error!(error = %e, "Login failed");
            self.publish(|s| s.auth_loading = false);
            self.raise_error(LOGIN_FAILED_MESSAGE);
            return Err(e);
        }

        if let Err(e) = self.store.save(credential, &user) {
            error!(error = %e, "Login failed");
            if let Err(e) = self.store.clear() {
                warn!(error = %e, "Failed to roll back partial session write");
            }
            self.publish(|s| s.auth_loading = false);
            self.raise_error(LOGIN_FAILED_MESSAGE);
            return Err(AuthError::Persistence(e));
        }

        self.authenticator.attach(credential)?;
        info!(user_id = %user.id, "Login successful");
        self.publish(|s| {
            s.user = Some(user);
            s.auth_loading = false;
        });
        Ok(())
    }

    /// End the session. Always succeeds locally.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let _guard = self.begin_transition()?;
        self.publish(|s| s.auth_loading = true);

        // Phase 1: tell the server; its answer does not matter
        if let Err(e) = self.api.post(LOGOUT_PATH, None).await {
            warn!(error = %e, "Logout notification failed, continuing with local logout");
        }

        // Phase 2: local teardown
        self.teardown_local();
        self.publish(|s| s.auth_loading = false);
        info!("Logged out");
        Ok(())
    }

    /// Re-fetch the profile. On failure the previous user stays published
    /// and a transient error is raised.
    pub async fn refresh_user(&self) -> Result<UserProfile, AuthError> {
        let _guard = self.begin_transition()?;
        if !self.is_authenticated() {
            return Err(AuthError::NotAuthenticated);
        }

        match self.fetch_profile().await {
            Ok(user) => {
                if let Err(e) = self.store.save_user(&user) {
                    warn!(error = %e, "Failed to persist refreshed profile");
                }
                debug!(user_id = %user.id, "Profile refreshed");
                let published = user.clone();
                self.publish(|s| s.user = Some(published));
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "Refresh user failed");
                self.raise_error(REFRESH_FAILED_MESSAGE);
                Err(e)
            }
        }
    }

    async fn fetch_profile(&self) -> Result<UserProfile, AuthError> {
        let body = self.api.get(USER_PATH).await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Merge `patch` into the current profile locally and persist it.
    pub fn update_user(&self, patch: &Map<String, Value>) -> Result<UserProfile, AuthError> {
        let current = self.user().ok_or(AuthError::NotAuthenticated)?;
        let updated = current.merged(patch)?;
        self.store
            .save_user(&updated)
            .map_err(AuthError::Persistence)?;

        let published = updated.clone();
        self.publish(|s| s.user = Some(published));
        Ok(updated)
    }

    pub fn clear_error(&self) {
        self.cancel_error_timer();
        self.state.send_if_modified(|s| s.error.take().is_some());
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Clear storage, drop the header and unpublish the user in one step
    fn teardown_local(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear persisted session");
        }
        self.authenticator.detach();
        self.publish(|s| s.user = None);
    }

    fn raise_error(&self, message: &str) {
        let message = message.to_string();
        let expected = message.clone();
        self.publish(|s| s.error = Some(message));

        if tokio::runtime::Handle::try_current().is_err() {
            debug!("No runtime available, error will not auto-expire");
            return;
        }

        let state = Arc::downgrade(&self.state);
        let task = ScheduledTask::after(self.error_ttl, async move {
            if let Some(state) = state.upgrade() {
                state.send_if_modified(|s| {
                    if s.error.as_deref() == Some(expected.as_str()) {
                        s.error = None;
                        true
                    } else {
                        false
                    }
                });
            }
        });

        match self.error_timer.lock() {
            Ok(mut slot) => *slot = Some(task),
            Err(poisoned) => *poisoned.into_inner() = Some(task),
        }
    }

    fn cancel_error_timer(&self) {
        let task = match self.error_timer.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(task);
    }
}
