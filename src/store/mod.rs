/// Remote favorite store abstraction
///
/// The store owns every `FavoriteRecord`; callers only ever hold derived
/// projections of it. Implementations are keyed by `(identity, movie id)`.
use crate::{
    error::StoreError,
    models::{FavoriteRecord, Identity, MovieId, NewFavorite},
};

pub mod memory;
pub mod supabase;

pub use memory::MemoryFavoriteStore;
pub use supabase::SupabaseFavoriteStore;

/// Trait for remote favorite stores
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RemoteFavoriteStore: Send + Sync {
    /// Fetch every favorite owned by the identity, newest first
    async fn list_favorites(&self, identity: &Identity) -> Result<Vec<FavoriteRecord>, StoreError>;

    /// Insert a favorite for the identity
    ///
    /// Inserting a movie that is already favorited fails with `StoreError::Conflict`.
    async fn insert_favorite(
        &self,
        identity: &Identity,
        favorite: &NewFavorite,
    ) -> Result<(), StoreError>;

    /// Delete the favorite matching `(identity, movie_id)`
    ///
    /// Deleting a movie that is not favorited succeeds.
    async fn delete_favorite(&self, identity: &Identity, movie_id: MovieId)
        -> Result<(), StoreError>;

    /// Store name for logging and debugging
    fn name(&self) -> &'static str;
}
