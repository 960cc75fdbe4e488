//! sessionkit - command-line front-end for the session manager.
//!
//! Restores the persisted session on start, then runs one command against
//! it: show status, print the provider sign-in link, complete an OAuth
//! redirect, refresh or edit the profile, or sign out.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sessionkit_core::api::{ApiClient, Transport};
use sessionkit_core::auth::{
    CallbackParams, CallbackStatus, Navigator, OAuthCallback, RequestAuthenticator, Route,
    SessionController, SessionStore,
};
use sessionkit_core::Config;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Buffer size for navigation requests coming out of the callback.
const NAVIGATION_BUFFER_SIZE: usize = 4;

/// Log file prefix in the cache directory
const LOG_FILE_PREFIX: &str = "sessionkit.log";

const USAGE: &str = "\
Usage: sessionkit <command>

Commands:
  status                 Show the current session
  login-url              Print the provider sign-in link (or the dashboard when signed in)
  callback <url>         Complete an OAuth redirect (the full callback URL)
  refresh                Re-fetch the signed-in user's profile
  update <json>          Merge a JSON object into the local profile
  logout                 End the session";

/// Initialize the tracing subscriber for logging.
///
/// Stderr gets `RUST_LOG`-filtered output (default `warn`); when a cache
/// directory is available a daily log file receives the same events.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Forwards navigation requests to the command loop
struct ChannelNavigator {
    tx: mpsc::Sender<Route>,
}

impl Navigator for ChannelNavigator {
    fn navigate(&self, route: Route) {
        if let Err(e) = self.tx.try_send(route) {
            warn!(error = %e, ?route, "Dropped navigation request");
        }
    }
}

struct Session {
    config: Config,
    api: Arc<dyn Transport>,
    controller: Arc<SessionController>,
}

impl Session {
    fn open(config: Config) -> Result<Self> {
        let authenticator = RequestAuthenticator::new();
        let api: Arc<dyn Transport> = Arc::new(
            ApiClient::new(
                &config.api_base_url,
                config.request_timeout(),
                authenticator.clone(),
            )
            .context("Failed to build HTTP client")?,
        );
        let store = SessionStore::new(config.open_storage()?);
        let controller = Arc::new(
            SessionController::new(store, authenticator, api.clone())
                .with_error_ttl(config.error_ttl()),
        );

        Ok(Self {
            config,
            api,
            controller,
        })
    }

    fn print_state(&self) -> Result<()> {
        let state = self.controller.snapshot();
        let summary = serde_json::json!({
            "user": state.user,
            "isAuthenticated": state.is_authenticated(),
            "isAdmin": state.is_admin(),
            "loading": state.loading,
            "authLoading": state.auth_loading,
            "error": state.error,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        Config::default()
    });
    config.apply_env();

    let log_dir = config
        .cache_dir()
        .ok()
        .filter(|dir| std::fs::create_dir_all(dir).is_ok());
    let _log_guard = init_tracing(log_dir.as_deref());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let session = Session::open(config)?;
    session.controller.initialize().await?;
    info!(
        authenticated = session.controller.is_authenticated(),
        "Session restored"
    );

    match command {
        "status" => session.print_state(),
        "login-url" => {
            let state = session.controller.snapshot();
            match session.config.sign_in_target(&state) {
                Some(target) => {
                    if state.is_authenticated() {
                        println!("Already signed in");
                    }
                    println!("{}", target);
                    Ok(())
                }
                None => bail!("No sign-in link configured (set SESSIONKIT_GOOGLE_AUTH_URL)"),
            }
        }
        "callback" => {
            let raw = args.get(1).context("callback needs the redirect URL")?;
            run_callback(&session, raw).await
        }
        "refresh" => {
            let user = session.controller.refresh_user().await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
            Ok(())
        }
        "update" => {
            let raw = args.get(1).context("update needs a JSON object")?;
            let patch: serde_json::Value =
                serde_json::from_str(raw).context("Profile patch is not valid JSON")?;
            let patch = patch
                .as_object()
                .context("Profile patch must be a JSON object")?;
            let user = session.controller.update_user(patch)?;
            println!("{}", serde_json::to_string_pretty(&user)?);
            Ok(())
        }
        "logout" => {
            session.controller.logout().await?;
            println!("Signed out");
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            Ok(())
        }
    }
}

/// Drive one OAuth redirect to completion and report where it lands
async fn run_callback(session: &Session, raw_url: &str) -> Result<()> {
    let params = CallbackParams::parse(raw_url)?;
    let (tx, mut rx) = mpsc::channel(NAVIGATION_BUFFER_SIZE);
    let callback = OAuthCallback::new(
        session.controller.clone(),
        session.api.clone(),
        Arc::new(ChannelNavigator { tx }),
    )
    .with_delays(
        session.config.success_redirect(),
        session.config.failure_redirect(),
    );

    let status = callback.handle(params).await;
    match &status {
        CallbackStatus::Success => println!("Signed in. Redirecting to dashboard..."),
        CallbackStatus::Error(message) => {
            eprintln!("Authentication failed: {}", message);
            eprintln!("Redirecting to login...");
        }
        other => println!("Callback status: {:?}", other),
    }

    if let Some(route) = rx.recv().await {
        println!("-> {}", session.config.route_path(route));
    }

    match status {
        CallbackStatus::Error(message) => bail!(message),
        _ => session.print_state(),
    }
}
