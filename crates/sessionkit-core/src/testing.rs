//! In-crate test doubles for the transport and navigation seams.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{ApiError, Transport};
use crate::auth::{Navigator, RequestAuthenticator, Route};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: &'static str,
    pub path: String,
    pub body: Option<Value>,
    pub authorization: Option<String>,
}

struct ScriptedResponse {
    delay: Duration,
    result: Result<Value, ApiError>,
}

/// Replays queued responses per (method, path) and records every call along
/// with the `Authorization` header in effect when it was made.
///
/// Unscripted calls fail with `ApiError::NotFound`.
pub struct FakeTransport {
    authenticator: RequestAuthenticator,
    scripts: Mutex<HashMap<(&'static str, String), VecDeque<ScriptedResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeTransport {
    pub fn new(authenticator: RequestAuthenticator) -> Self {
        Self {
            authenticator,
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(&self, method: &'static str, path: &str, result: Result<Value, ApiError>) {
        self.respond_after(method, path, Duration::ZERO, result);
    }

    pub fn respond_after(
        &self,
        method: &'static str,
        path: &str,
        delay: Duration,
        result: Result<Value, ApiError>,
    ) {
        self.scripts
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(ScriptedResponse { delay, result });
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    async fn dispatch(&self, method: &'static str, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            path: path.to_string(),
            body,
            authorization: self.authenticator.authorization(),
        });

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&(method, path.to_string()))
            .and_then(VecDeque::pop_front);

        match scripted {
            Some(response) => {
                if !response.delay.is_zero() {
                    tokio::time::sleep(response.delay).await;
                }
                response.result
            }
            None => Err(ApiError::NotFound(format!("{} {}", method, path))),
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.dispatch("GET", path, None).await
    }

    async fn post(&self, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        self.dispatch("POST", path, body).await
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    routes: Mutex<Vec<Route>>,
}

impl RecordingNavigator {
    pub fn routes(&self) -> Vec<Route> {
        self.routes.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: Route) {
        self.routes.lock().unwrap().push(route);
    }
}
