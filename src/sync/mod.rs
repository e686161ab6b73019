//! Sync engine
//!
//! The only component that talks to the remote store. It reconciles the
//! [`FavoriteSetCache`] with the store whenever the identity changes and runs
//! add/remove mutations, touching the cache only after the store confirmed
//! the write.
//!
//! Every identity session carries a generation number. Loads and mutations
//! capture the generation they were issued under and are dropped on
//! completion if a newer session has started since, so a slow response for a
//! previous user can never land in the current user's set.

use std::{future::Future, sync::Arc};

use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};

use crate::{
    cache::FavoriteSetCache,
    error::{FavoritesError, FavoritesResult},
    models::{FavoriteRecord, FavoriteSet, Identity, MovieId, NewFavorite},
    session::Subscription,
    store::RemoteFavoriteStore,
};

mod keyed;

pub use keyed::{KeyGuard, KeyedLocks};

/// Lifecycle of the favorite set for the current identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No identity, empty set
    Unloaded,
    /// Fetching the set for a new identity
    Loading,
    Ready,
}

/// Published view of the engine: state plus the identity it applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: SyncState,
    pub identity: Option<Identity>,
    /// Last session tracker revision applied
    pub revision: u64,
    /// Whether a session watcher is still applying tracker transitions
    pub following: bool,
}

/// What a toggle ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added,
    Removed,
}

/// A write the store confirmed while a load was in flight
#[derive(Debug, Clone, Copy)]
enum Confirmed {
    Added(MovieId),
    Removed(MovieId),
}

impl Confirmed {
    fn apply_to(self, set: &mut FavoriteSet) {
        match self {
            Confirmed::Added(id) => {
                set.insert(id);
            }
            Confirmed::Removed(id) => {
                set.remove(id);
            }
        }
    }
}

struct Session {
    identity: Option<Identity>,
    generation: u64,
    revision: u64,
    state: SyncState,
    journal: Vec<Confirmed>,
}

/// Marks the engine as following the tracker while alive
struct Following(Arc<SyncEngine>);

impl Following {
    fn begin(engine: Arc<SyncEngine>) -> Self {
        engine.status.send_modify(|status| status.following = true);
        Self(engine)
    }
}

impl Drop for Following {
    fn drop(&mut self) {
        self.0.status.send_modify(|status| status.following = false);
    }
}

pub struct SyncEngine {
    store: Arc<dyn RemoteFavoriteStore>,
    cache: FavoriteSetCache,
    session: Mutex<Session>,
    status: watch::Sender<SyncStatus>,
    locks: KeyedLocks<MovieId>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RemoteFavoriteStore>) -> Self {
        let (status, _rx) = watch::channel(SyncStatus {
            state: SyncState::Unloaded,
            identity: None,
            revision: 0,
            following: false,
        });

        Self {
            store,
            cache: FavoriteSetCache::new(),
            session: Mutex::new(Session {
                identity: None,
                generation: 0,
                revision: 0,
                state: SyncState::Unloaded,
                journal: Vec::new(),
            }),
            status,
            locks: KeyedLocks::new(),
        }
    }

    pub fn cache(&self) -> &FavoriteSetCache {
        &self.cache
    }

    pub fn state(&self) -> SyncState {
        self.status.borrow().state
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn is_favorited(&self, movie_id: MovieId) -> bool {
        self.cache.contains(movie_id)
    }

    fn publish(&self, session: &Session) {
        self.status.send_modify(|status| {
            status.state = session.state;
            status.identity = session.identity.clone();
            status.revision = session.revision;
        });
    }

    /// Consumes identity transitions until the subscription ends
    ///
    /// The status reports `following` from the moment this is called until
    /// the returned future completes or is dropped, including when its task
    /// is aborted before it first runs.
    pub fn run(
        self: Arc<Self>,
        mut subscription: Subscription,
    ) -> impl Future<Output = ()> + Send + 'static {
        let following = Following::begin(Arc::clone(&self));

        async move {
            let _following = following;
            tracing::info!(store = self.store.name(), "Session watcher started");

            while let Some(event) = subscription.next().await {
                self.apply_transition(event.current, event.revision).await;
            }

            tracing::info!("Session watcher stopped");
        }
    }

    /// Switches the engine to `identity`
    ///
    /// Returns the spawned load when a new user's favorites have to be
    /// fetched. The same user with a new token only swaps the credential.
    pub async fn apply_identity(self: &Arc<Self>, identity: Option<Identity>) -> Option<JoinHandle<()>> {
        self.apply(identity, None).await
    }

    /// Like [`SyncEngine::apply_identity`], recording the tracker revision it
    /// corresponds to in the published status
    pub async fn apply_transition(
        self: &Arc<Self>,
        identity: Option<Identity>,
        revision: u64,
    ) -> Option<JoinHandle<()>> {
        self.apply(identity, Some(revision)).await
    }

    async fn apply(
        self: &Arc<Self>,
        identity: Option<Identity>,
        revision: Option<u64>,
    ) -> Option<JoinHandle<()>> {
        let mut session = self.session.lock().await;
        if let Some(revision) = revision {
            session.revision = revision;
        }
        let load = self.transition(&mut session, identity);
        self.publish(&session);
        drop(session);

        load.map(|(generation, identity)| self.spawn_load(generation, identity))
    }

    /// Updates the session for a new identity; returns the load to start, if any
    fn transition(&self, session: &mut Session, identity: Option<Identity>) -> Option<(u64, Identity)> {
        let Some(identity) = identity else {
            if session.identity.is_some() {
                session.identity = None;
                session.generation += 1;
                session.state = SyncState::Unloaded;
                session.journal.clear();
                self.cache.clear();
                tracing::info!("Signed out, favorites cleared");
            }
            return None;
        };

        let same_user = session
            .identity
            .as_ref()
            .is_some_and(|current| current.same_user(&identity));

        if same_user {
            if session.identity.as_ref() != Some(&identity) {
                tracing::debug!(user_id = %identity.user_id, "Access token refreshed");
                session.identity = Some(identity);
            }
            return None;
        }

        session.identity = Some(identity.clone());
        session.generation += 1;
        session.state = SyncState::Loading;
        session.journal.clear();
        self.cache.clear();

        Some((session.generation, identity))
    }

    fn spawn_load(self: &Arc<Self>, generation: u64, identity: Identity) -> JoinHandle<()> {
        tracing::info!(user_id = %identity.user_id, generation, "Loading favorites");

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.load(generation, identity).await;
        })
    }

    /// Fetches the favorite set for `identity` and installs it if still current
    async fn load(&self, generation: u64, identity: Identity) {
        let result = self.store.list_favorites(&identity).await;

        let mut session = self.session.lock().await;
        if session.generation != generation {
            tracing::debug!(
                user_id = %identity.user_id,
                generation,
                current = session.generation,
                "Discarding favorites for a previous session"
            );
            return;
        }

        let mut ids: FavoriteSet = match result {
            Ok(records) => records.iter().collect(),
            Err(e) => {
                let e = FavoritesError::RemoteReadFailed(e);
                tracing::error!(
                    error = %e,
                    user_id = %identity.user_id,
                    "Continuing with no known favorites"
                );
                FavoriteSet::new()
            }
        };

        for confirmed in session.journal.drain(..) {
            confirmed.apply_to(&mut ids);
        }

        tracing::info!(user_id = %identity.user_id, count = ids.len(), "Favorites loaded");

        self.cache.replace(ids);
        session.state = SyncState::Ready;
        self.publish(&session);
    }

    async fn active(&self) -> FavoritesResult<(Identity, u64)> {
        let session = self.session.lock().await;
        match &session.identity {
            Some(identity) => Ok((identity.clone(), session.generation)),
            None => Err(FavoritesError::Unauthenticated),
        }
    }

    /// Applies a confirmed write to the cache if its session is still current
    async fn confirm(&self, generation: u64, confirmed: Confirmed) {
        let mut session = self.session.lock().await;
        if session.generation != generation {
            tracing::debug!(?confirmed, "Identity changed during write, not applying");
            return;
        }

        if session.state == SyncState::Loading {
            session.journal.push(confirmed);
        }

        match confirmed {
            Confirmed::Added(id) => self.cache.add(id),
            Confirmed::Removed(id) => self.cache.remove(id),
        }
    }

    fn write_failed(movie_id: MovieId, source: crate::error::StoreError) -> FavoritesError {
        tracing::warn!(movie_id = %movie_id, error = %source, "Favorite write failed");
        FavoritesError::RemoteWriteFailed { movie_id, source }
    }

    async fn add_locked(&self, favorite: &NewFavorite) -> FavoritesResult<()> {
        let (identity, generation) = self.active().await?;

        self.store
            .insert_favorite(&identity, favorite)
            .await
            .map_err(|source| Self::write_failed(favorite.movie_id, source))?;

        tracing::info!(movie_id = %favorite.movie_id, "Favorite added");
        self.confirm(generation, Confirmed::Added(favorite.movie_id))
            .await;
        Ok(())
    }

    async fn remove_locked(&self, movie_id: MovieId) -> FavoritesResult<()> {
        let (identity, generation) = self.active().await?;

        self.store
            .delete_favorite(&identity, movie_id)
            .await
            .map_err(|source| Self::write_failed(movie_id, source))?;

        tracing::info!(movie_id = %movie_id, "Favorite removed");
        self.confirm(generation, Confirmed::Removed(movie_id)).await;
        Ok(())
    }

    /// Favorites a movie for the current identity
    pub async fn add_favorite(&self, favorite: &NewFavorite) -> FavoritesResult<()> {
        let _guard = self.locks.lock(favorite.movie_id).await;
        self.add_locked(favorite).await
    }

    /// Unfavorites a movie; succeeds if it was not favorited
    pub async fn remove_favorite(&self, movie_id: MovieId) -> FavoritesResult<()> {
        let _guard = self.locks.lock(movie_id).await;
        self.remove_locked(movie_id).await
    }

    /// Adds or removes depending on current membership
    ///
    /// Membership is read under the movie's lock, so back-to-back toggles of
    /// the same movie alternate instead of racing.
    pub async fn toggle(&self, favorite: &NewFavorite) -> FavoritesResult<ToggleOutcome> {
        let _guard = self.locks.lock(favorite.movie_id).await;

        if self.cache.contains(favorite.movie_id) {
            self.remove_locked(favorite.movie_id).await?;
            Ok(ToggleOutcome::Removed)
        } else {
            self.add_locked(favorite).await?;
            Ok(ToggleOutcome::Added)
        }
    }

    /// Full favorite records of the current identity, newest first
    pub async fn favorite_records(&self) -> FavoritesResult<Vec<FavoriteRecord>> {
        let (identity, _) = self.active().await?;

        let mut records = self
            .store
            .list_favorites(&identity)
            .await
            .map_err(FavoritesError::RemoteReadFailed)?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::UserId;
    use crate::store::MockRemoteFavoriteStore;
    use chrono::{Duration, Utc};
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    fn identity() -> Identity {
        Identity::new(UserId(Uuid::new_v4()), "token")
    }

    fn record(user: &Identity, movie_id: i64, age_minutes: i64) -> FavoriteRecord {
        FavoriteRecord {
            id: None,
            user_id: user.user_id,
            movie_id: MovieId(movie_id),
            movie_title: format!("Movie {}", movie_id),
            movie_poster_path: None,
            created_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    fn unavailable() -> StoreError {
        StoreError::Rejected {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            body: "down".to_string(),
        }
    }

    fn engine_with(store: MockRemoteFavoriteStore) -> Arc<SyncEngine> {
        Arc::new(SyncEngine::new(Arc::new(store)))
    }

    async fn signed_in(store: MockRemoteFavoriteStore, user: &Identity) -> Arc<SyncEngine> {
        let engine = engine_with(store);
        let load = engine.apply_identity(Some(user.clone())).await.unwrap();
        load.await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_load_populates_cache() {
        let user = identity();
        let seeded = vec![record(&user, 10, 0), record(&user, 42, 1)];
        let mut store = MockRemoteFavoriteStore::new();
        store.expect_name().return_const("mock");
        store
            .expect_list_favorites()
            .times(1)
            .returning(move |_| Ok(seeded.clone()));

        let engine = signed_in(store, &user).await;

        assert_eq!(engine.state(), SyncState::Ready);
        assert!(engine.is_favorited(MovieId(10)));
        assert!(engine.is_favorited(MovieId(42)));
        assert_eq!(engine.status().identity, Some(user));
    }

    #[tokio::test]
    async fn test_load_failure_fails_open() {
        let user = identity();
        let mut store = MockRemoteFavoriteStore::new();
        store
            .expect_list_favorites()
            .times(1)
            .returning(|_| Err(unavailable()));

        let engine = signed_in(store, &user).await;

        assert_eq!(engine.state(), SyncState::Ready);
        assert!(engine.cache().is_empty());
    }

    #[tokio::test]
    async fn test_mutation_without_identity_is_unauthenticated() {
        let mut store = MockRemoteFavoriteStore::new();
        store.expect_insert_favorite().never();
        store.expect_delete_favorite().never();
        let engine = engine_with(store);

        let err = assert_err!(
            engine
                .add_favorite(&NewFavorite::new(MovieId(7), "Title", None))
                .await
        );
        assert!(matches!(err, FavoritesError::Unauthenticated));

        let err = assert_err!(engine.remove_favorite(MovieId(7)).await);
        assert!(matches!(err, FavoritesError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_add_updates_cache_after_confirmation() {
        let user = identity();
        let expected_user = user.user_id;
        let mut store = MockRemoteFavoriteStore::new();
        store.expect_list_favorites().returning(|_| Ok(vec![]));
        store
            .expect_insert_favorite()
            .withf(move |identity, favorite| {
                identity.user_id == expected_user
                    && favorite.movie_id == MovieId(7)
                    && favorite.movie_poster_path.as_deref() == Some("/path")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let engine = signed_in(store, &user).await;
        assert_ok!(
            engine
                .add_favorite(&NewFavorite::new(MovieId(7), "Title", Some("/path".to_string())))
                .await
        );

        assert!(engine.is_favorited(MovieId(7)));
    }

    #[tokio::test]
    async fn test_failed_add_leaves_cache_unchanged() {
        let user = identity();
        let seeded = vec![record(&user, 10, 0)];
        let mut store = MockRemoteFavoriteStore::new();
        store
            .expect_list_favorites()
            .returning(move |_| Ok(seeded.clone()));
        store
            .expect_insert_favorite()
            .returning(|_, _| Err(StoreError::Conflict("duplicate".to_string())));

        let engine = signed_in(store, &user).await;
        let before = engine.cache().snapshot();

        let err = assert_err!(
            engine
                .add_favorite(&NewFavorite::new(MovieId(7), "Title", None))
                .await
        );
        assert!(matches!(
            err,
            FavoritesError::RemoteWriteFailed { movie_id, source: StoreError::Conflict(_) }
                if movie_id == MovieId(7)
        ));
        assert_eq!(engine.cache().snapshot(), before);
    }

    #[tokio::test]
    async fn test_remove_missing_is_idempotent() {
        let user = identity();
        let seeded = vec![record(&user, 10, 0)];
        let mut store = MockRemoteFavoriteStore::new();
        store
            .expect_list_favorites()
            .returning(move |_| Ok(seeded.clone()));
        store.expect_delete_favorite().returning(|_, _| Ok(()));

        let engine = signed_in(store, &user).await;
        let before = engine.cache().snapshot();

        assert_ok!(engine.remove_favorite(MovieId(99)).await);
        assert_eq!(engine.cache().snapshot(), before);
    }

    #[tokio::test]
    async fn test_toggle_dispatches_on_membership() {
        let user = identity();
        let seeded = vec![record(&user, 42, 0)];
        let mut store = MockRemoteFavoriteStore::new();
        store
            .expect_list_favorites()
            .returning(move |_| Ok(seeded.clone()));
        store
            .expect_delete_favorite()
            .withf(|_, movie_id| *movie_id == MovieId(42))
            .times(1)
            .returning(|_, _| Ok(()));
        store
            .expect_insert_favorite()
            .withf(|_, favorite| favorite.movie_id == MovieId(7))
            .times(1)
            .returning(|_, _| Ok(()));

        let engine = signed_in(store, &user).await;

        let outcome = engine
            .toggle(&NewFavorite::new(MovieId(42), "Answer", None))
            .await
            .unwrap();
        assert_eq!(outcome, ToggleOutcome::Removed);

        let outcome = engine
            .toggle(&NewFavorite::new(MovieId(7), "Title", Some("/path".to_string())))
            .await
            .unwrap();
        assert_eq!(outcome, ToggleOutcome::Added);

        assert_eq!(engine.cache().snapshot().sorted(), vec![MovieId(7)]);
    }

    #[tokio::test]
    async fn test_sign_out_clears_set() {
        let user = identity();
        let seeded = vec![record(&user, 10, 0), record(&user, 42, 0)];
        let mut store = MockRemoteFavoriteStore::new();
        store
            .expect_list_favorites()
            .returning(move |_| Ok(seeded.clone()));

        let engine = signed_in(store, &user).await;
        assert!(engine.apply_identity(None).await.is_none());

        assert_eq!(engine.state(), SyncState::Unloaded);
        assert!(!engine.is_favorited(MovieId(10)));
        assert!(!engine.is_favorited(MovieId(42)));
    }

    #[tokio::test]
    async fn test_token_refresh_keeps_set_without_refetch() {
        let user = identity();
        let seeded = vec![record(&user, 10, 0)];
        let mut store = MockRemoteFavoriteStore::new();
        store
            .expect_list_favorites()
            .times(1)
            .returning(move |_| Ok(seeded.clone()));
        store
            .expect_delete_favorite()
            .withf(|identity, _| identity.access_token() == "refreshed")
            .times(1)
            .returning(|_, _| Ok(()));

        let engine = signed_in(store, &user).await;
        let refreshed = Identity::new(user.user_id, "refreshed");
        assert!(engine.apply_identity(Some(refreshed)).await.is_none());

        assert_eq!(engine.state(), SyncState::Ready);
        assert!(engine.is_favorited(MovieId(10)));
        assert_ok!(engine.remove_favorite(MovieId(10)).await);
    }

    #[tokio::test]
    async fn test_favorite_records_newest_first() {
        let user = identity();
        let seeded = vec![record(&user, 1, 30), record(&user, 2, 0), record(&user, 3, 10)];
        let mut store = MockRemoteFavoriteStore::new();
        store
            .expect_list_favorites()
            .returning(move |_| Ok(seeded.clone()));

        let engine = signed_in(store, &user).await;
        let records = engine.favorite_records().await.unwrap();

        let ids: Vec<MovieId> = records.iter().map(|r| r.movie_id).collect();
        assert_eq!(ids, vec![MovieId(2), MovieId(3), MovieId(1)]);
    }

    #[tokio::test]
    async fn test_favorite_records_surface_read_failure() {
        let user = identity();
        let mut store = MockRemoteFavoriteStore::new();
        let mut calls = 0;
        store.expect_list_favorites().returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(vec![])
            } else {
                Err(unavailable())
            }
        });

        let engine = signed_in(store, &user).await;
        let err = assert_err!(engine.favorite_records().await);
        assert!(matches!(err, FavoritesError::RemoteReadFailed(_)));
    }
}
