use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, ApiRequest, ApiResponse};
use crate::auth::User;

const REGISTER_PATH: &str = "/api/auth/register";
const LOGIN_PATH: &str = "/api/auth/login";
const ME_PATH: &str = "/api/auth/me";
const LOGOUT_PATH: &str = "/api/auth/logout";

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RegisterPayload {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct LoginGrant {
    #[serde(rename = "accessToken", alias = "token", default)]
    access_token: String,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
}

/// Why the backend refused a sign-in or registration.
#[derive(Debug, Error)]
pub enum AuthFailure {
    #[error("user not found")]
    UserNotFound,

    #[error("password invalid")]
    PasswordInvalid,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("missing fields")]
    MissingFields,

    #[error("user already exists")]
    UserExists,

    #[error("server error")]
    ServerError,

    #[error("request rejected with status {0}")]
    Unknown(u16),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl AuthFailure {
    /// Classify a failed response by its `errorType`/`error` field, then by status.
    pub fn from_response(response: &ApiResponse) -> Self {
        let body = response.json_value();
        let kind = ["errorType", "error"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str));

        match kind {
            Some("user_not_found") => Self::UserNotFound,
            Some("password_invalid") => Self::PasswordInvalid,
            Some("invalid_credentials") => Self::InvalidCredentials,
            Some("missing_fields") => Self::MissingFields,
            Some("user_exists") => Self::UserExists,
            Some("server_error") => Self::ServerError,
            _ if response.status >= 500 => Self::ServerError,
            _ => Self::Unknown(response.status),
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::UserNotFound => "Usuário não encontrado",
            Self::PasswordInvalid => "Senha inválida",
            Self::InvalidCredentials => "Credenciais inválidas",
            Self::MissingFields => "Campos obrigatórios",
            Self::UserExists => "Email já cadastrado",
            Self::ServerError => "Erro do servidor",
            Self::Unknown(_) | Self::Api(_) => "Erro ao conectar",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::UserNotFound => "Nenhuma conta foi encontrada com este email. Deseja criar uma?",
            Self::PasswordInvalid => "A senha está incorreta. Verifique e tente novamente.",
            Self::InvalidCredentials => "Email ou senha incorretos. Tente novamente.",
            Self::MissingFields => "Por favor, preencha todos os campos obrigatórios.",
            Self::UserExists => "Este email já está em uso. Faça login ou use outro email.",
            Self::ServerError => "Ocorreu um erro no servidor. Tente novamente em alguns instantes.",
            Self::Unknown(_) | Self::Api(_) => {
                "Não foi possível conectar. Verifique sua conexão e tente novamente."
            }
        }
    }
}

impl ApiClient {
    /// Create an account. The new customer still has to sign in afterwards.
    pub async fn register(&self, payload: &RegisterPayload) -> Result<(), AuthFailure> {
        let request = ApiRequest::post(REGISTER_PATH, serde_json::to_value(payload).map_err(ApiError::from)?);
        let response = self.send_public(&request).await?;
        if !response.is_success() {
            let failure = AuthFailure::from_response(&response);
            debug!(status = response.status, %failure, "Registration rejected");
            return Err(failure);
        }
        info!("Account registered");
        Ok(())
    }

    /// Sign in, store the issued tokens, then load the profile via `/me`.
    ///
    /// A failing `/me` does not undo the sign-in; the user is simply `None`.
    pub async fn login(&self, payload: &LoginPayload) -> Result<Option<User>, AuthFailure> {
        let request = ApiRequest::post(LOGIN_PATH, serde_json::to_value(payload).map_err(ApiError::from)?);
        let response = self.send_public(&request).await?;
        if !response.is_success() {
            let failure = AuthFailure::from_response(&response);
            debug!(status = response.status, %failure, "Login rejected");
            return Err(failure);
        }

        let grant: LoginGrant = response.json()?;
        if grant.access_token.is_empty() {
            return Err(ApiError::InvalidResponse("Login response carried no token".to_string()).into());
        }
        if grant.refresh_token.is_none() {
            warn!("Login response carried no refresh token, session cannot be renewed");
        }
        self.store()
            .set(grant.access_token, grant.refresh_token.unwrap_or_default(), None);

        match self.fetch_me().await {
            Ok(user) => {
                self.store().set_user(user.clone());
                info!(user = %user.display_name(), "Signed in");
                Ok(Some(user))
            }
            Err(e) => {
                warn!(error = %e, "Signed in but failed to load profile");
                Ok(None)
            }
        }
    }

    /// Fetch the signed-in customer's profile.
    pub async fn fetch_me(&self) -> Result<User, ApiError> {
        self.get(ME_PATH).await
    }

    /// Tell the server the session is over (best effort), then forget the credentials.
    pub async fn logout(&self) {
        if let Some(refresh_token) = self.store().refresh_token() {
            let request = ApiRequest::post(LOGOUT_PATH, json!({ "refreshToken": refresh_token }));
            match self.send_once(&request).await {
                Ok(response) if response.is_success() => debug!("Server session revoked"),
                Ok(response) => warn!(status = response.status, "Server logout rejected"),
                Err(e) => warn!(error = %e, "Server logout failed"),
            }
        }
        self.store().clear();
        info!("Signed out");
    }
}
