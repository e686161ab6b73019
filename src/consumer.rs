//! Consumer interface
//!
//! [`FavoritesStore`] is the one favorites instance for an application
//! session. Clone it into as many UI elements as needed: clones share the
//! same engine and cache, so the set is fetched once per identity. Each
//! element that renders a favorite button takes a [`FavoriteToggle`].

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::{sync::watch, task::JoinHandle};

use crate::{
    error::FavoritesResult,
    models::{FavoriteRecord, FavoriteSet, MovieId, NewFavorite},
    session::SessionTracker,
    store::RemoteFavoriteStore,
    sync::{SyncEngine, SyncState, SyncStatus, ToggleOutcome},
};

/// Handle for stopping the task that follows identity transitions
pub struct SessionWatcherHandle {
    task: JoinHandle<()>,
}

impl SessionWatcherHandle {
    /// Stops following identity transitions
    ///
    /// The favorite set keeps its last state; in-flight loads and writes
    /// still complete.
    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
        tracing::info!("Session watcher shut down");
    }
}

/// Shared favorites state for the application session
#[derive(Clone)]
pub struct FavoritesStore {
    engine: Arc<SyncEngine>,
    tracker: Arc<SessionTracker>,
}

impl FavoritesStore {
    /// Creates the session's favorites store and starts following `tracker`
    ///
    /// The identity already known to the tracker is applied right away;
    /// later transitions are picked up by a background task.
    pub async fn start(
        tracker: Arc<SessionTracker>,
        store: Arc<dyn RemoteFavoriteStore>,
    ) -> (Self, SessionWatcherHandle) {
        let engine = Arc::new(SyncEngine::new(store));

        let (snapshot, subscription) = tracker.subscribe().await;
        engine
            .apply_transition(snapshot.identity, snapshot.revision)
            .await;

        let task = tokio::spawn(Arc::clone(&engine).run(subscription));

        (Self { engine, tracker }, SessionWatcherHandle { task })
    }

    pub fn is_favorited(&self, movie_id: MovieId) -> bool {
        self.engine.is_favorited(movie_id)
    }

    pub async fn toggle(
        &self,
        movie_id: MovieId,
        title: impl Into<String>,
        poster_path: Option<String>,
    ) -> FavoritesResult<ToggleOutcome> {
        self.engine
            .toggle(&NewFavorite::new(movie_id, title, poster_path))
            .await
    }

    pub async fn add_favorite(
        &self,
        movie_id: MovieId,
        title: impl Into<String>,
        poster_path: Option<String>,
    ) -> FavoritesResult<()> {
        self.engine
            .add_favorite(&NewFavorite::new(movie_id, title, poster_path))
            .await
    }

    pub async fn remove_favorite(&self, movie_id: MovieId) -> FavoritesResult<()> {
        self.engine.remove_favorite(movie_id).await
    }

    /// Full records for a favorites listing, newest first
    pub async fn favorite_movies(&self) -> FavoritesResult<Vec<FavoriteRecord>> {
        self.engine.favorite_records().await
    }

    pub fn favorite_ids(&self) -> FavoriteSet {
        self.engine.cache().snapshot()
    }

    pub fn state(&self) -> SyncState {
        self.engine.state()
    }

    pub fn is_loading(&self) -> bool {
        self.state() == SyncState::Loading
    }

    pub fn is_signed_in(&self) -> bool {
        self.engine.status().identity.is_some()
    }

    /// Notified whenever the favorite set changes
    pub fn watch(&self) -> watch::Receiver<FavoriteSet> {
        self.engine.cache().watch()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.engine.watch_status()
    }

    /// Waits until the engine has applied every transition the tracker has
    /// seen so far and is no longer loading
    ///
    /// After the session watcher is shut down, transitions are no longer
    /// applied; this then only waits for an outstanding load.
    pub async fn settled(&self) {
        let target = self.tracker.snapshot().await.revision;
        let mut status = self.engine.watch_status();
        // The sender lives in the engine, which this store keeps alive
        let _ = status
            .wait_for(|status| {
                status.state != SyncState::Loading
                    && (status.revision >= target || !status.following)
            })
            .await;
    }

    /// Per-element handle for a favorite button
    pub fn toggle_for(&self, movie: NewFavorite) -> FavoriteToggle {
        FavoriteToggle {
            store: self.clone(),
            movie,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Render state of a favorite button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleView {
    Loading,
    SignInRequired,
    Ready { favorited: bool, submitting: bool },
}

impl ToggleView {
    pub fn label(&self) -> &'static str {
        match self {
            ToggleView::Ready {
                submitting: true, ..
            } => "Processing...",
            ToggleView::Ready {
                favorited: true, ..
            } => "Favorited",
            _ => "Favorite",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            ToggleView::Loading => false,
            ToggleView::SignInRequired => true,
            ToggleView::Ready { submitting, .. } => !submitting,
        }
    }
}

/// Favorite button state for one movie
pub struct FavoriteToggle {
    store: FavoritesStore,
    movie: NewFavorite,
    /// Number of this element's toggle requests still outstanding
    in_flight: Arc<AtomicUsize>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl FavoriteToggle {
    pub fn movie_id(&self) -> MovieId {
        self.movie.movie_id
    }

    pub fn is_favorited(&self) -> bool {
        self.store.is_favorited(self.movie.movie_id)
    }

    /// True while any of this element's toggle requests is outstanding
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    pub async fn toggle(&self) -> FavoritesResult<ToggleOutcome> {
        let _in_flight = InFlight::enter(&self.in_flight);

        self.store.engine.toggle(&self.movie).await
    }

    pub fn view(&self) -> ToggleView {
        if self.store.is_loading() {
            return ToggleView::Loading;
        }
        if !self.store.is_signed_in() {
            return ToggleView::SignInRequired;
        }
        ToggleView::Ready {
            favorited: self.is_favorited(),
            submitting: self.is_in_flight(),
        }
    }
}
