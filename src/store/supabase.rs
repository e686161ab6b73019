/// Supabase (PostgREST) favorite store
///
/// Rows live in the `favorites` table with a unique `(user_id, movie_id)`
/// constraint; row-level security scopes every request to the bearer token.
use crate::{
    config::Config,
    error::StoreError,
    models::{FavoriteRecord, Identity, MovieId, NewFavorite, UserId},
    store::RemoteFavoriteStore,
};
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct FavoriteInsert<'a> {
    user_id: UserId,
    movie_id: MovieId,
    movie_title: &'a str,
    movie_poster_path: Option<&'a str>,
}

#[derive(Clone)]
pub struct SupabaseFavoriteStore {
    http_client: HttpClient,
    api_url: String,
    api_key: String,
    table: String,
}

impl SupabaseFavoriteStore {
    pub fn new(api_url: String, api_key: String, table: String, http_client: HttpClient) -> Self {
        Self {
            http_client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            table,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        let http_client = HttpClient::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self::new(
            config.supabase_url.clone(),
            config.supabase_anon_key.clone(),
            config.favorites_table.clone(),
            http_client,
        ))
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.api_url, self.table)
    }

    fn authorized(&self, request: RequestBuilder, identity: &Identity) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(identity.access_token())
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::from_status(status, body))
    }
}

#[async_trait::async_trait]
impl RemoteFavoriteStore for SupabaseFavoriteStore {
    async fn list_favorites(&self, identity: &Identity) -> Result<Vec<FavoriteRecord>, StoreError> {
        let response = self
            .authorized(self.http_client.get(self.table_url()), identity)
            .query(&[
                ("select", "*".to_string()),
                ("user_id", format!("eq.{}", identity.user_id)),
                ("order", "created_at.desc".to_string()),
            ])
            .send()
            .await?;

        let records: Vec<FavoriteRecord> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        tracing::debug!(
            user_id = %identity.user_id,
            count = records.len(),
            store = self.name(),
            "Favorites listed"
        );

        Ok(records)
    }

    async fn insert_favorite(
        &self,
        identity: &Identity,
        favorite: &NewFavorite,
    ) -> Result<(), StoreError> {
        let body = FavoriteInsert {
            user_id: identity.user_id,
            movie_id: favorite.movie_id,
            movie_title: &favorite.movie_title,
            movie_poster_path: favorite.movie_poster_path.as_deref(),
        };

        let response = self
            .authorized(self.http_client.post(self.table_url()), identity)
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    async fn delete_favorite(
        &self,
        identity: &Identity,
        movie_id: MovieId,
    ) -> Result<(), StoreError> {
        let response = self
            .authorized(self.http_client.delete(self.table_url()), identity)
            .query(&[
                ("user_id", format!("eq.{}", identity.user_id)),
                ("movie_id", format!("eq.{}", movie_id)),
            ])
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "supabase"
    }
}
