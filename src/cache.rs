use tokio::sync::watch;

use crate::models::{FavoriteSet, MovieId};

/// Favorite set of the active identity, published to any number of readers
///
/// A disposable projection of the remote store: it can be cleared and
/// refetched at any time. Every change notifies receivers obtained through
/// [`FavoriteSetCache::watch`].
pub struct FavoriteSetCache {
    tx: watch::Sender<FavoriteSet>,
}

impl Default for FavoriteSetCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FavoriteSetCache {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(FavoriteSet::new());
        Self { tx }
    }

    /// Overwrites the whole set
    pub fn replace(&self, ids: FavoriteSet) {
        self.tx.send_replace(ids);
    }

    pub fn clear(&self) {
        self.tx.send_if_modified(|set| {
            if set.is_empty() {
                return false;
            }
            set.clear();
            true
        });
    }

    pub fn contains(&self, movie_id: MovieId) -> bool {
        self.tx.borrow().contains(movie_id)
    }

    /// Adds a confirmed favorite
    pub fn add(&self, movie_id: MovieId) {
        self.tx.send_if_modified(|set| set.insert(movie_id));
    }

    /// Removes a confirmed unfavorite
    pub fn remove(&self, movie_id: MovieId) {
        self.tx.send_if_modified(|set| set.remove(movie_id));
    }

    pub fn snapshot(&self) -> FavoriteSet {
        self.tx.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    /// Receiver that is marked changed on every modification
    pub fn watch(&self) -> watch::Receiver<FavoriteSet> {
        self.tx.subscribe()
    }
}
