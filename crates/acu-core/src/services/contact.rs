use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use crate::api::{ApiClient, ApiError, ApiRequest};

const CONTACT_PATH: &str = "/api/contact";

const DEFAULT_SUCCESS_MESSAGE: &str = "Mensagem enviada com sucesso!";
const GENERIC_FAILURE_MESSAGE: &str = "Erro ao enviar formulário. Tente novamente mais tarde.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub message: String,
}

impl ContactForm {
    /// Trimmed copy with the email lower-cased, as sent to the backend.
    pub fn normalized(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            message: self.message.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ContactResponse {
    pub success: bool,
    pub message: String,
    pub status: u16,
}

/// Contact submission failure. `status` is 0 when no response was received.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ContactError {
    pub status: u16,
    pub message: String,
    pub data: Option<Value>,
    #[source]
    pub source: Option<ApiError>,
}

impl ContactError {
    fn from_api(error: ApiError) -> Self {
        let status = match error {
            ApiError::Unauthorized => 401,
            _ => 0,
        };
        let message = match status {
            0 => GENERIC_FAILURE_MESSAGE.to_string(),
            _ => format!("Erro ao enviar (status {})", status),
        };
        Self {
            status,
            message,
            data: None,
            source: Some(error),
        }
    }

    /// True when the submission failed because the session ended.
    pub fn is_terminal_auth(&self) -> bool {
        self.source.as_ref().is_some_and(ApiError::is_terminal_auth)
    }

    fn from_body(status: u16, data: Value) -> Self {
        let message = ["message", "error"]
            .iter()
            .find_map(|key| data.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| format!("Erro ao enviar (status {})", status));
        Self {
            status,
            message,
            data: (!data.is_null()).then_some(data),
            source: None,
        }
    }
}

impl ApiClient {
    /// Submit the storefront contact form.
    pub async fn send_contact(&self, form: &ContactForm) -> Result<ContactResponse, ContactError> {
        let payload = form.normalized();
        let body = serde_json::to_value(&payload).map_err(|e| ContactError::from_api(e.into()))?;

        let response = match self.send(ApiRequest::post(CONTACT_PATH, body)).await {
            Ok(response) => response,
            Err(e) => {
                error!(path = CONTACT_PATH, error = %e, "Contact submission failed");
                return Err(ContactError::from_api(e));
            }
        };

        let data = response.json_value();
        if !response.is_success() {
            error!(path = CONTACT_PATH, status = response.status, "Contact submission rejected");
            return Err(ContactError::from_body(response.status, data));
        }

        info!(status = response.status, "Contact form sent");
        let message = data
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_SUCCESS_MESSAGE)
            .to_string();
        Ok(ContactResponse {
            success: true,
            message,
            status: response.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::api::testing::{FakeApi, RefreshScript};
    use crate::auth::{CredentialStore, MemoryBackend};

    fn form() -> ContactForm {
        ContactForm {
            name: "  Ana Souza ".into(),
            email: " Ana@ACU.com.BR ".into(),
            message: " Preciso de um orçamento de telhas. ".into(),
        }
    }

    fn client(api: &Arc<FakeApi>) -> ApiClient {
        ApiClient::with_transport(api.clone(), Arc::new(CredentialStore::open(Box::new(MemoryBackend::new()))))
    }

    #[tokio::test]
    async fn test_payload_is_normalized() {
        let api = Arc::new(FakeApi::new().route(CONTACT_PATH, 201, r#"{"message":"Recebido!"}"#));

        let response = client(&api).send_contact(&form()).await.unwrap();

        assert!(response.success);
        assert_eq!(response.status, 201);
        assert_eq!(response.message, "Recebido!");
        assert_eq!(
            api.seen_on(CONTACT_PATH)[0].body,
            Some(json!({
                "name": "Ana Souza",
                "email": "ana@acu.com.br",
                "message": "Preciso de um orçamento de telhas."
            }))
        );
    }

    #[tokio::test]
    async fn test_default_success_message() {
        let api = Arc::new(FakeApi::new().route(CONTACT_PATH, 200, ""));
        let response = client(&api).send_contact(&form()).await.unwrap();
        assert_eq!(response.message, "Mensagem enviada com sucesso!");
    }

    #[tokio::test]
    async fn test_error_message_precedence() {
        let api = Arc::new(FakeApi::new().route(CONTACT_PATH, 422, r#"{"message":"Email bloqueado","error":"x"}"#));
        let err = client(&api).send_contact(&form()).await.unwrap_err();
        assert_eq!(err.status, 422);
        assert_eq!(err.message, "Email bloqueado");
        assert!(err.data.is_some());

        let api = Arc::new(FakeApi::new().route(CONTACT_PATH, 400, r#"{"error":"Campos inválidos"}"#));
        let err = client(&api).send_contact(&form()).await.unwrap_err();
        assert_eq!(err.message, "Campos inválidos");

        let api = Arc::new(FakeApi::new().route(CONTACT_PATH, 503, "unavailable"));
        let err = client(&api).send_contact(&form()).await.unwrap_err();
        assert_eq!(err.message, "Erro ao enviar (status 503)");
        assert!(err.data.is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_without_refresh_token() {
        // Anonymous visitor, server wants a token, nothing to refresh with
        let api = Arc::new(FakeApi::new().accept("valid"));
        let err = client(&api).send_contact(&form()).await.unwrap_err();
        assert_eq!(err.status, 401);
        assert_eq!(err.message, "Erro ao enviar (status 401)");
        assert!(matches!(err.source, Some(ApiError::Unauthorized)));
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_reported_as_terminal() {
        let api = Arc::new(FakeApi::new().accept("valid").refresh_with(RefreshScript::Status(401)));
        let store = Arc::new(CredentialStore::open(Box::new(MemoryBackend::new())));
        store.set("stale".into(), "r1".into(), None);
        let client = ApiClient::with_transport(api.clone(), store.clone());

        let err = client.send_contact(&form()).await.unwrap_err();

        assert!(err.is_terminal_auth());
        assert!(matches!(err.source, Some(ApiError::RefreshRejected(_))));
        assert_eq!(err.message, "Erro ao enviar formulário. Tente novamente mais tarde.");
        assert!(!store.is_signed_in());
    }
}
