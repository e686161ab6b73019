/// Supabase Auth identity provider
///
/// Resolves the access token from the environment into a user by calling
/// `GET /auth/v1/user`. An expired or revoked token reads as signed out.
use crate::{
    config::Config,
    error::AuthError,
    models::{Identity, UserId},
    session::IdentityProvider,
};
use reqwest::{Client as HttpClient, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: Uuid,
}

#[derive(Clone)]
pub struct SupabaseAuth {
    http_client: HttpClient,
    api_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl SupabaseAuth {
    pub fn new(
        api_url: String,
        api_key: String,
        access_token: Option<String>,
        http_client: HttpClient,
    ) -> Self {
        Self {
            http_client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            access_token,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, AuthError> {
        let http_client = HttpClient::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self::new(
            config.supabase_url.clone(),
            config.supabase_anon_key.clone(),
            config.supabase_access_token.clone(),
            http_client,
        ))
    }
}

#[async_trait::async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn current_identity(&self) -> Result<Option<Identity>, AuthError> {
        let Some(token) = self.access_token.as_deref() else {
            return Ok(None);
        };

        let response = self
            .http_client
            .get(format!("{}/auth/v1/user", self.api_url))
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                tracing::info!("Access token rejected, treating session as signed out");
                Ok(None)
            }
            status if status.is_success() => {
                let user: AuthUser = response.json().await?;
                Ok(Some(Identity::new(UserId(user.id), token)))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AuthError::Rejected { status, body })
            }
        }
    }
}
