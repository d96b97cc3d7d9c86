//! Login against the control service. The token lives in memory only.

use tracing::info;

use crate::api::{decode, HttpControlClient};
use crate::error::ApiError;
use crate::types::{AuthResponse, LoginRequest};

impl HttpControlClient {
    /// `POST /auth/login`; on success the returned token authorizes every later request.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let url = self.endpoint("auth/login")?;
        let resp = self
            .http
            .post(url)
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let auth: AuthResponse = decode(resp).await?;
        self.set_token(Some(auth.token.clone()));
        info!(user = auth.name.as_deref().unwrap_or(email), "logged in");
        Ok(auth)
    }

    pub fn logout(&self) {
        self.set_token(None);
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }
}
