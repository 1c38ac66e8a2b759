//! Scripted in-process API used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use super::client::REFRESH_PATH;
use super::{ApiError, ApiRequest, ApiResponse, Transport};

const PUBLIC_PATHS: &[&str] = &["/api/auth/login", "/api/auth/register", REFRESH_PATH];

#[derive(Debug, Clone)]
pub enum RefreshScript {
    Grant { access: String, refresh: Option<String> },
    Status(u16),
    Unreachable,
}

#[derive(Debug, Clone)]
pub struct Seen {
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
    pub retried: bool,
}

pub struct FakeApi {
    accepted: Mutex<Option<String>>,
    routes: Mutex<HashMap<String, ApiResponse>>,
    script: Mutex<RefreshScript>,
    hold: AtomicBool,
    gate: Notify,
    refresh_calls: AtomicUsize,
    seen: Mutex<Vec<Seen>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            accepted: Mutex::new(None),
            routes: Mutex::new(HashMap::new()),
            script: Mutex::new(RefreshScript::Grant {
                access: "fresh".into(),
                refresh: None,
            }),
            hold: AtomicBool::new(false),
            gate: Notify::new(),
            refresh_calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Protected paths answer 401 unless the bearer equals `token`.
    pub fn accept(self, token: &str) -> Self {
        *self.accepted.lock().unwrap() = Some(token.to_string());
        self
    }

    /// Canned response for `path`, returned regardless of authorization.
    pub fn route(self, path: &str, status: u16, body: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), ApiResponse::new(status, body));
        self
    }

    pub fn refresh_with(self, script: RefreshScript) -> Self {
        *self.script.lock().unwrap() = script;
        self
    }

    /// Park refresh calls until `release_refresh` is called.
    pub fn hold_refresh(self) -> Self {
        self.hold.store(true, Ordering::SeqCst);
        self
    }

    pub fn release_refresh(&self) {
        self.gate.notify_one();
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn seen_on(&self, path: &str) -> Vec<Seen> {
        self.seen().into_iter().filter(|s| s.path == path).collect()
    }

    async fn refresh(&self) -> Result<ApiResponse, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }

        let script = self.script.lock().unwrap().clone();
        match script {
            RefreshScript::Grant { access, refresh } => {
                let mut accepted = self.accepted.lock().unwrap();
                if accepted.is_some() {
                    *accepted = Some(access.clone());
                }
                let body = match refresh {
                    Some(r) => json!({"accessToken": access, "refreshToken": r}),
                    None => json!({"accessToken": access}),
                };
                Ok(ApiResponse::new(200, body.to_string()))
            }
            RefreshScript::Status(status) => {
                Ok(ApiResponse::new(status, r#"{"error":"invalid_refresh_token"}"#))
            }
            RefreshScript::Unreachable => Err(ApiError::Transport("connection refused".into())),
        }
    }
}

#[async_trait]
impl Transport for FakeApi {
    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse, ApiError> {
        self.seen.lock().unwrap().push(Seen {
            path: request.path.clone(),
            bearer: bearer.map(str::to_string),
            body: request.body.clone(),
            retried: request.is_retried(),
        });

        if request.path == REFRESH_PATH {
            return self.refresh().await;
        }

        if let Some(canned) = self.routes.lock().unwrap().get(&request.path) {
            return Ok(canned.clone());
        }

        let authorized = match *self.accepted.lock().unwrap() {
            Some(ref token) => {
                PUBLIC_PATHS.contains(&request.path.as_str()) || bearer == Some(token.as_str())
            }
            None => true,
        };
        if !authorized {
            return Ok(ApiResponse::new(401, r#"{"error":"token_expired"}"#));
        }

        Ok(ApiResponse::new(200, json!({"path": request.path}).to_string()))
    }
}
