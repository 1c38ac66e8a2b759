use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::api::{ApiClient, ApiRequest};

const VERIFY_PATH: &str = "/verify-recaptcha";

#[derive(Debug, Default, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    success: bool,
}

impl ApiClient {
    /// Ask the backend to verify a reCAPTCHA v3 token. Any failure counts as "not human".
    pub async fn verify_recaptcha(&self, token: &str) -> bool {
        let request = ApiRequest::post(VERIFY_PATH, json!({ "token": token }));
        let response = match self.send(request).await.and_then(ApiClient::check_response) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "reCAPTCHA verification failed");
                return false;
            }
        };
        match response.json::<VerifyResponse>() {
            Ok(verdict) => verdict.success,
            Err(e) => {
                warn!(error = %e, "reCAPTCHA verification returned an unreadable body");
                false
            }
        }
    }
}
