use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::api::{ApiClient, ApiError};

use super::{AuthContext, Role, UserAuthData};

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    user_id: i64,
    username: String,
    #[serde(default)]
    email: String,
    rol: Role,
    #[serde(default)]
    user_data: Option<LoginUserData>,
}

#[derive(Debug, Default, Deserialize)]
struct LoginUserData {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl From<LoginResponse> for AuthContext {
    fn from(response: LoginResponse) -> Self {
        let profile = response.user_data.unwrap_or_default();
        let user = UserAuthData {
            id: response.user_id,
            username: response.username,
            email: response.email,
            rol: response.rol,
            first_name: profile.first_name,
            last_name: profile.last_name,
        };
        AuthContext::new(user, response.token)
    }
}

/// Token login/logout against the backend.
pub struct AuthClient {
    api: ApiClient,
}

impl AuthClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthContext, ApiError> {
        let response: LoginResponse = self
            .api
            .post_anonymous("/api/login/", &LoginRequest { username, password })
            .await?;

        info!("Logged in as {} ({})", response.username, response.rol.as_str());
        Ok(response.into())
    }

    /// Invalidates the token server-side. Callers clear local credentials
    /// whatever the outcome.
    pub async fn logout(&self, auth: &AuthContext) -> Result<(), ApiError> {
        let api = self.api.clone().with_token(auth.token().map(str::to_string));
        let result = api.post_unit::<()>("/api/logout/", None).await;
        if let Err(err) = &result {
            warn!("Backend logout failed: {err}");
        }
        result
    }
}
