use reqwest::StatusCode;

use crate::models::MovieId;

/// Failure cause reported by a remote favorite store
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Store returned status {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Malformed store response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Classifies a non-success HTTP response from the store
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::CONFLICT => StoreError::Conflict(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Permission(body),
            _ => StoreError::Rejected { status, body },
        }
    }
}

/// Failure while asking the identity provider who is signed in
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Identity provider returned status {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Identity provider did not answer in time")]
    TimedOut,
}

/// Errors surfaced to callers of the favorites component
#[derive(thiserror::Error, Debug)]
pub enum FavoritesError {
    #[error("No signed-in user")]
    Unauthenticated,

    #[error("Failed to update favorite {movie_id}: {source}")]
    RemoteWriteFailed {
        movie_id: MovieId,
        #[source]
        source: StoreError,
    },

    #[error("Failed to read favorites: {0}")]
    RemoteReadFailed(#[source] StoreError),
}

pub type FavoritesResult<T> = Result<T, FavoritesError>;
