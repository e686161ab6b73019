use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::{
    error::StoreError,
    models::{FavoriteRecord, Identity, MovieId, NewFavorite, UserId},
    store::RemoteFavoriteStore,
};

#[derive(Default)]
struct MemoryInner {
    records: HashMap<UserId, Vec<FavoriteRecord>>,
    next_id: i64,
    failing_reads: bool,
    failing_writes: HashSet<MovieId>,
}

/// Process-local favorite store
///
/// Enforces the same `(user, movie)` uniqueness as the remote table and can be
/// told to fail reads or writes for specific movies.
#[derive(Default)]
pub struct MemoryFavoriteStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryFavoriteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds favorites for a user without going through `insert_favorite`
    pub async fn seed(&self, user_id: UserId, movie_ids: &[i64]) {
        let mut inner = self.inner.lock().await;
        for &movie_id in movie_ids {
            inner.next_id += 1;
            let record = FavoriteRecord {
                id: Some(inner.next_id),
                user_id,
                movie_id: MovieId(movie_id),
                movie_title: format!("Movie {}", movie_id),
                movie_poster_path: None,
                created_at: Utc::now(),
            };
            inner.records.entry(user_id).or_default().push(record);
        }
    }

    pub async fn set_failing_reads(&self, failing: bool) {
        self.inner.lock().await.failing_reads = failing;
    }

    /// Makes every insert and delete for `movie_id` fail until cleared
    pub async fn fail_writes_for(&self, movie_id: MovieId) {
        self.inner.lock().await.failing_writes.insert(movie_id);
    }

    pub async fn clear_failures(&self) {
        let mut inner = self.inner.lock().await;
        inner.failing_reads = false;
        inner.failing_writes.clear();
    }

    /// Movie ids currently stored for a user, ascending
    pub async fn movie_ids(&self, user_id: UserId) -> Vec<MovieId> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<MovieId> = inner
            .records
            .get(&user_id)
            .map(|records| records.iter().map(|r| r.movie_id).collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn injected_write_failure(inner: &MemoryInner, movie_id: MovieId) -> Result<(), StoreError> {
        if inner.failing_writes.contains(&movie_id) {
            return Err(StoreError::Rejected {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: format!("injected write failure for movie {}", movie_id),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RemoteFavoriteStore for MemoryFavoriteStore {
    async fn list_favorites(&self, identity: &Identity) -> Result<Vec<FavoriteRecord>, StoreError> {
        let inner = self.inner.lock().await;
        if inner.failing_reads {
            return Err(StoreError::Rejected {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "injected read failure".to_string(),
            });
        }

        let mut records = inner
            .records
            .get(&identity.user_id)
            .cloned()
            .unwrap_or_default();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn insert_favorite(
        &self,
        identity: &Identity,
        favorite: &NewFavorite,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        Self::injected_write_failure(&inner, favorite.movie_id)?;

        let exists = inner
            .records
            .get(&identity.user_id)
            .is_some_and(|records| records.iter().any(|r| r.movie_id == favorite.movie_id));
        if exists {
            return Err(StoreError::Conflict(format!(
                "duplicate key value violates unique constraint (user_id, movie_id)=({}, {})",
                identity.user_id, favorite.movie_id
            )));
        }

        inner.next_id += 1;
        let record = FavoriteRecord {
            id: Some(inner.next_id),
            user_id: identity.user_id,
            movie_id: favorite.movie_id,
            movie_title: favorite.movie_title.clone(),
            movie_poster_path: favorite.movie_poster_path.clone(),
            created_at: Utc::now(),
        };
        inner.records.entry(identity.user_id).or_default().push(record);
        Ok(())
    }

    async fn delete_favorite(
        &self,
        identity: &Identity,
        movie_id: MovieId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        Self::injected_write_failure(&inner, movie_id)?;

        if let Some(records) = inner.records.get_mut(&identity.user_id) {
            records.retain(|r| r.movie_id != movie_id);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
