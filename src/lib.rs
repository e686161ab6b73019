pub mod cache;
pub mod config;
pub mod consumer;
pub mod error;
pub mod models;
pub mod session;
pub mod store;
pub mod sync;

pub use consumer::{FavoriteToggle, FavoritesStore, SessionWatcherHandle, ToggleView};
pub use error::{FavoritesError, FavoritesResult};
pub use sync::{SyncState, ToggleOutcome};
