use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Display;

mod identity;

pub use identity::{Identity, UserId};

/// Catalog identifier of a movie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovieId(pub i64);

impl Display for MovieId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MovieId {
    fn from(id: i64) -> Self {
        MovieId(id)
    }
}

/// A persisted favoriting action, as stored remotely
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FavoriteRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub user_id: UserId,
    pub movie_id: MovieId,
    pub movie_title: String,
    #[serde(default)]
    pub movie_poster_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Movie snapshot captured when a favorite is added
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFavorite {
    pub movie_id: MovieId,
    pub movie_title: String,
    pub movie_poster_path: Option<String>,
}

impl NewFavorite {
    pub fn new(
        movie_id: MovieId,
        movie_title: impl Into<String>,
        movie_poster_path: Option<String>,
    ) -> Self {
        Self {
            movie_id,
            movie_title: movie_title.into(),
            movie_poster_path,
        }
    }
}

/// Movie ids favorited by one identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FavoriteSet(HashSet<MovieId>);

impl FavoriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, movie_id: MovieId) -> bool {
        self.0.contains(&movie_id)
    }

    pub fn insert(&mut self, movie_id: MovieId) -> bool {
        self.0.insert(movie_id)
    }

    pub fn remove(&mut self, movie_id: MovieId) -> bool {
        self.0.remove(&movie_id)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = MovieId> + '_ {
        self.0.iter().copied()
    }

    /// Ids in ascending order, for stable display
    pub fn sorted(&self) -> Vec<MovieId> {
        let mut ids: Vec<MovieId> = self.iter().collect();
        ids.sort();
        ids
    }
}

impl FromIterator<MovieId> for FavoriteSet {
    fn from_iter<I: IntoIterator<Item = MovieId>>(iter: I) -> Self {
        FavoriteSet(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a FavoriteRecord> for FavoriteSet {
    fn from_iter<I: IntoIterator<Item = &'a FavoriteRecord>>(iter: I) -> Self {
        iter.into_iter().map(|record| record.movie_id).collect()
    }
}
