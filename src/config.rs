use std::time::Duration;

use serde::Deserialize;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Supabase project base URL
    pub supabase_url: String,

    /// Public API key sent as the `apikey` header
    pub supabase_anon_key: String,

    /// Session JWT of the signed-in user, if any
    #[serde(default)]
    pub supabase_access_token: Option<String>,

    /// PostgREST table holding favorite records
    #[serde(default = "default_favorites_table")]
    pub favorites_table: String,

    /// Timeout applied to every store and auth HTTP call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Upper bound on the startup identity lookup
    #[serde(default = "default_identity_timeout_secs")]
    pub identity_timeout_secs: u64,
}

fn default_favorites_table() -> String {
    "favorites".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_identity_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn identity_timeout(&self) -> Duration {
        Duration::from_secs(self.identity_timeout_secs)
    }
}
