//! API client for communicating with the storefront REST API.
//!
//! `ApiClient` attaches the stored access token to every request. When a
//! request comes back 401 it renews the token once through
//! `POST /api/auth/refresh`, coalescing concurrent renewals into a single
//! call, and replays the request with the new token. If renewal is
//! impossible the stored credentials are cleared, which signs the session
//! out for every subscriber of the credential store.

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::auth::CredentialStore;
use crate::config::Config;

use super::refresh::{self, Flight, FlightGuard, RefreshCoordinator, RefreshFailure};
use super::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Token refresh endpoint
pub(crate) const REFRESH_PATH: &str = "/api/auth/refresh";

#[derive(Debug, Deserialize)]
struct RefreshGrant {
    #[serde(rename = "accessToken")]
    access_token: String,
    /// Present only when the server rotates refresh tokens.
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
}

/// Authenticated API client.
/// Clone is cheap and clones share both the transport and the refresh coordinator.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    refresh: Arc<RefreshCoordinator>,
}

impl ApiClient {
    /// Create a client talking HTTP to the configured API.
    pub fn new(config: &Config, store: Arc<CredentialStore>) -> Result<Self, ApiError> {
        let transport = HttpTransport::new(
            &config.api_base_url,
            Duration::from_secs(config.request_timeout_secs),
            config.api_key.clone(),
        )?;
        Ok(Self::with_transport(Arc::new(transport), store))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, store: Arc<CredentialStore>) -> Self {
        Self {
            transport,
            store,
            refresh: Arc::new(RefreshCoordinator::new()),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Send without the refresh interceptor and without a bearer token.
    /// Used for the credential-issuing endpoints.
    pub async fn send_public(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.transport.send(request, None).await
    }

    /// Send once with the stored access token, without refresh on 401.
    pub async fn send_once(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let token = self.store.access_token();
        self.transport.send(request, token.as_deref()).await
    }

    /// Send a request with the stored access token attached.
    ///
    /// Any status other than 401 is returned as-is. A 401 triggers at most one
    /// refresh-and-replay per request; a replay that is rejected again fails
    /// with `ApiError::Unauthorized`.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let token = self.store.access_token();
        let response = self.transport.send(&request, token.as_deref()).await?;

        if !response.is_unauthorized() {
            return Ok(response);
        }
        if request.is_retried() {
            warn!(path = %request.path, "Request unauthorized after token refresh");
            return Err(ApiError::Unauthorized);
        }

        let token = match self.refresh.acquire_or_wait() {
            Flight::Follower(rx) => {
                debug!(path = %request.path, "Waiting on in-flight token refresh");
                refresh::wait(rx).await?
            }
            Flight::Leader(guard) => self.lead_refresh(guard).await?,
        };

        request.mark_retried();
        self.replay(request, &token).await
    }

    async fn replay(&self, request: ApiRequest, token: &str) -> Result<ApiResponse, ApiError> {
        let response = self.transport.send(&request, Some(token)).await?;
        if response.is_unauthorized() {
            warn!(path = %request.path, "Replayed request still unauthorized");
            return Err(ApiError::Unauthorized);
        }
        Ok(response)
    }

    /// Perform the one refresh of this flight, update the store, then release the queue.
    async fn lead_refresh(&self, guard: FlightGuard<'_>) -> Result<String, ApiError> {
        let Some(refresh_token) = self.store.refresh_token().filter(|t| !t.is_empty()) else {
            warn!("Access token rejected and no refresh token stored, signing out");
            self.store.clear();
            guard.settle(Err(RefreshFailure::Unavailable));
            // The caller gets the 401 it already received
            return Err(ApiError::Unauthorized);
        };

        match self.request_refresh(&refresh_token).await {
            Ok(grant) => {
                let rotated = grant.refresh_token.is_some();
                let refresh_token = grant.refresh_token.unwrap_or(refresh_token);
                self.store.set(grant.access_token.clone(), refresh_token, None);
                let resumed = guard.settle(Ok(grant.access_token.clone()));
                info!(rotated, resumed, "Access token refreshed");
                Ok(grant.access_token)
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(error = %reason, "Token refresh failed, signing out");
                self.store.clear();
                guard.settle(Err(RefreshFailure::Rejected(reason.clone())));
                Err(ApiError::RefreshRejected(reason))
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<RefreshGrant, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH, json!({ "refreshToken": refresh_token }));
        let response = Self::check_response(self.send_public(&request).await?)?;
        let grant: RefreshGrant = response.json()?;
        if grant.access_token.is_empty() {
            return Err(ApiError::InvalidResponse(
                "Refresh response carried an empty access token".to_string(),
            ));
        }
        Ok(grant)
    }

    /// Check if response is successful, returning an error with body if not.
    pub fn check_response(response: ApiResponse) -> Result<ApiResponse, ApiError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.body))
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(ApiRequest::get(path)).await?;
        Self::check_response(response)?.json()
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let request = ApiRequest::post(path, serde_json::to_value(body)?);
        let response = self.send(request).await?;
        Self::check_response(response)?.json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{FakeApi, RefreshScript};
    use crate::auth::{AuthEvent, MemoryBackend};
    use futures::future::join_all;
    use serde_json::Value;
    use tokio::sync::broadcast;

    fn signed_in_store(access: &str, refresh: &str) -> Arc<CredentialStore> {
        let store = CredentialStore::open(Box::new(MemoryBackend::new()));
        store.set(access.into(), refresh.into(), None);
        Arc::new(store)
    }

    fn client(api: &Arc<FakeApi>, store: &Arc<CredentialStore>) -> ApiClient {
        ApiClient::with_transport(api.clone(), store.clone())
    }

    fn drain(events: &mut broadcast::Receiver<AuthEvent>) -> Vec<AuthEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    /// Yield until `n` requests are parked behind the running refresh.
    async fn until_waiting(client: &ApiClient, n: usize) {
        while client.refresh.waiting() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_attaches_stored_token() {
        let api = Arc::new(FakeApi::new().accept("valid"));
        let store = signed_in_store("valid", "r1");

        let body: Value = client(&api, &store).get("/api/orders").await.unwrap();

        assert_eq!(body["path"], "/api/orders");
        assert_eq!(api.seen()[0].bearer.as_deref(), Some("valid"));
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_token_means_no_authorization_header() {
        let api = Arc::new(FakeApi::new());
        let store = Arc::new(CredentialStore::open(Box::new(MemoryBackend::new())));

        client(&api, &store).send(ApiRequest::get("/api/products")).await.unwrap();

        assert!(api.seen()[0].bearer.is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_replayed() {
        let api = Arc::new(FakeApi::new().accept("valid").refresh_with(RefreshScript::Grant {
            access: "fresh".into(),
            refresh: None,
        }));
        let store = signed_in_store("stale", "r1");

        let response = client(&api, &store).send(ApiRequest::get("/api/auth/me")).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(api.refresh_calls(), 1);
        let refresh = &api.seen_on(REFRESH_PATH)[0];
        assert!(refresh.bearer.is_none());
        assert_eq!(refresh.body, Some(json!({"refreshToken": "r1"})));

        let calls = api.seen_on("/api/auth/me");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].bearer.as_deref(), Some("fresh"));
        assert!(calls[1].retried);

        assert_eq!(store.access_token().as_deref(), Some("fresh"));
        // Server did not rotate, stored refresh token is kept
        assert_eq!(store.refresh_token().as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_stored() {
        let api = Arc::new(FakeApi::new().accept("valid").refresh_with(RefreshScript::Grant {
            access: "fresh".into(),
            refresh: Some("r2".into()),
        }));
        let store = signed_in_store("stale", "r1");

        client(&api, &store).send(ApiRequest::get("/api/auth/me")).await.unwrap();

        assert_eq!(store.refresh_token().as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let api = Arc::new(FakeApi::new().accept("valid").hold_refresh());
        let store = signed_in_store("stale", "r1");
        let client = client(&api, &store);

        let requests = join_all(
            ["/api/orders", "/api/cart", "/api/auth/me"]
                .into_iter()
                .map(|path| client.send(ApiRequest::get(path))),
        );
        let release = async {
            until_waiting(&client, 2).await;
            api.release_refresh();
        };
        let (results, ()) = tokio::join!(requests, release);

        assert_eq!(api.refresh_calls(), 1);
        for result in results {
            assert_eq!(result.unwrap().status, 200);
        }
        for path in ["/api/orders", "/api/cart", "/api/auth/me"] {
            let calls = api.seen_on(path);
            assert_eq!(calls.len(), 2, "{path} should be sent then replayed");
            assert_eq!(calls[1].bearer.as_deref(), Some("fresh"));
        }
        assert!(!client.refresh.is_in_flight());
        assert_eq!(client.refresh.waiting(), 0);
    }

    #[tokio::test]
    async fn test_replayed_request_is_not_refreshed_again() {
        let api = Arc::new(FakeApi::new().route("/api/admin", 401, r#"{"error":"forbidden"}"#));
        let store = signed_in_store("stale", "r1");

        let result = client(&api, &store).send(ApiRequest::get("/api/admin")).await;

        assert!(matches!(result, Err(ApiError::Unauthorized)));
        assert_eq!(api.refresh_calls(), 1);
        assert_eq!(api.seen_on("/api/admin").len(), 2);
        // The refresh itself succeeded, so the session survives
        assert_eq!(store.access_token().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_missing_refresh_token_signs_out_without_network_call() {
        let api = Arc::new(FakeApi::new().accept("valid"));
        let store = Arc::new(CredentialStore::open(Box::new(MemoryBackend::new())));
        let mut events = store.subscribe();

        let result = client(&api, &store).send(ApiRequest::get("/api/orders")).await;

        assert!(matches!(result, Err(ApiError::Unauthorized)));
        assert_eq!(api.refresh_calls(), 0);
        assert!(api.seen_on(REFRESH_PATH).is_empty());
        assert_eq!(drain(&mut events), vec![AuthEvent::SignedOut]);
    }

    #[tokio::test]
    async fn test_failed_refresh_rejects_all_and_signs_out_once() {
        let api = Arc::new(
            FakeApi::new()
                .accept("valid")
                .refresh_with(RefreshScript::Status(500))
                .hold_refresh(),
        );
        let store = signed_in_store("stale", "r1");
        let mut events = store.subscribe();
        let client = client(&api, &store);

        let requests = join_all((0..4).map(|i| client.send(ApiRequest::get(format!("/api/items/{i}")))));
        let release = async {
            until_waiting(&client, 3).await;
            api.release_refresh();
        };
        let (results, ()) = tokio::join!(requests, release);

        assert_eq!(api.refresh_calls(), 1);
        for result in results {
            let err = result.unwrap_err();
            assert!(matches!(err, ApiError::RefreshRejected(_)), "got {err:?}");
            assert!(err.is_terminal_auth());
        }
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
        assert_eq!(drain(&mut events), vec![AuthEvent::SignedOut]);
    }

    #[tokio::test]
    async fn test_unreachable_refresh_endpoint_signs_out() {
        let api = Arc::new(FakeApi::new().accept("valid").refresh_with(RefreshScript::Unreachable));
        let store = signed_in_store("stale", "r1");

        let result = client(&api, &store).send(ApiRequest::get("/api/orders")).await;

        assert!(matches!(result, Err(ApiError::RefreshRejected(ref r)) if r.contains("connection refused")));
        assert_eq!(api.refresh_calls(), 1);
        assert!(!store.is_signed_in());
    }

    #[tokio::test]
    async fn test_non_auth_errors_pass_through() {
        let api = Arc::new(FakeApi::new().route("/api/boom", 500, "kaput"));
        let store = signed_in_store("valid", "r1");
        let client = client(&api, &store);

        let raw = client.send(ApiRequest::get("/api/boom")).await.unwrap();
        assert_eq!(raw.status, 500);

        let typed = client.get::<Value>("/api/boom").await;
        assert!(matches!(typed, Err(ApiError::ServerError(ref b)) if b == "kaput"));
        assert_eq!(api.refresh_calls(), 0);
        assert!(store.is_signed_in());
    }

    #[tokio::test]
    async fn test_refresh_after_settle_starts_new_flight() {
        let api = Arc::new(FakeApi::new().accept("valid"));
        let store = signed_in_store("stale", "r1");
        let client = client(&api, &store);

        client.send(ApiRequest::get("/api/a")).await.unwrap();
        // Token expires again later
        store.set("stale-again".into(), "r1".into(), None);
        client.send(ApiRequest::get("/api/b")).await.unwrap();

        assert_eq!(api.refresh_calls(), 2);
    }

    #[tokio::test]
    async fn test_queued_replay_rejected_again_is_final() {
        let api = Arc::new(
            FakeApi::new()
                .accept("valid")
                .route("/api/admin", 401, r#"{"error":"forbidden"}"#)
                .hold_refresh(),
        );
        let store = signed_in_store("stale", "r1");
        let client = client(&api, &store);

        // The first request leads the refresh, the second queues behind it
        let requests = join_all(
            ["/api/orders", "/api/admin"]
                .into_iter()
                .map(|path| client.send(ApiRequest::get(path))),
        );
        let release = async {
            until_waiting(&client, 1).await;
            api.release_refresh();
        };
        let (results, ()) = tokio::join!(requests, release);

        assert_eq!(results[0].as_ref().unwrap().status, 200);
        assert!(matches!(results[1], Err(ApiError::Unauthorized)));
        assert_eq!(api.refresh_calls(), 1);
        let admin = api.seen_on("/api/admin");
        assert_eq!(admin.len(), 2);
        assert!(admin[1].retried);
        assert_eq!(admin[1].bearer.as_deref(), Some("fresh"));
        assert!(store.is_signed_in());
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_queue_without_signing_out() {
        let api = Arc::new(FakeApi::new().accept("valid").hold_refresh());
        let store = signed_in_store("stale", "r1");
        let mut events = store.subscribe();
        let client = client(&api, &store);

        let leader = tokio::spawn({
            let client = client.clone();
            async move { client.send(ApiRequest::get("/api/orders")).await }
        });
        while !client.refresh.is_in_flight() {
            tokio::task::yield_now().await;
        }
        let follower = tokio::spawn({
            let client = client.clone();
            async move { client.send(ApiRequest::get("/api/cart")).await }
        });
        until_waiting(&client, 1).await;

        leader.abort();
        let result = follower.await.unwrap();

        let err = result.unwrap_err();
        assert!(matches!(err, ApiError::RefreshAbandoned), "got {err:?}");
        assert!(!err.is_terminal_auth());
        assert!(!client.refresh.is_in_flight());
        assert_eq!(api.seen_on("/api/cart").len(), 1);
        assert_eq!(store.access_token().as_deref(), Some("stale"));
        assert!(drain(&mut events).is_empty());
    }
}
