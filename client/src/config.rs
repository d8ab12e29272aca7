//! Configuration management for the client.

use crate::cache::CacheKey;
use datasync_engine::CollectionId;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://cloud-api.yandex.net/v1/data";
pub const DEFAULT_DELTA_PAGE_LIMIT: u32 = 100;
pub const MAX_DELTA_PAGE_LIMIT: u32 = 1000;
pub const DEFAULT_MAX_PATCH_ATTEMPTS: u32 = 16;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Root URL of the data API
    pub base_url: String,
    /// OAuth token sent with every request
    pub token: Option<String>,
    /// Maximum number of deltas requested per page
    pub delta_page_limit: u32,
    /// Upper bound on submit attempts for one patch
    pub max_patch_attempts: u32,
    /// Interval between metadata polls
    pub poll_interval: Duration,
    /// Directory for the file cache; caching is in-memory only when unset
    pub cache_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            delta_page_limit: DEFAULT_DELTA_PAGE_LIMIT,
            max_patch_attempts: DEFAULT_MAX_PATCH_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cache_dir: None,
        }
    }
}

impl ClientConfig {
    /// Load `.env` if present, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("DATASYNC_BASE_URL")
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let token = lookup("DATASYNC_TOKEN").filter(|token| !token.is_empty());

        let delta_page_limit = parse_number(&lookup, "DATASYNC_DELTA_PAGE_LIMIT")?
            .unwrap_or(DEFAULT_DELTA_PAGE_LIMIT)
            .clamp(1, MAX_DELTA_PAGE_LIMIT);

        let max_patch_attempts = parse_number(&lookup, "DATASYNC_MAX_PATCH_ATTEMPTS")?
            .unwrap_or(DEFAULT_MAX_PATCH_ATTEMPTS)
            .max(1);

        let poll_interval = parse_number(&lookup, "DATASYNC_POLL_INTERVAL_SECS")?
            .map(|secs| Duration::from_secs(u64::from(secs)))
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        let cache_dir = lookup("DATASYNC_CACHE_DIR")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            delta_page_limit,
            max_patch_attempts,
            poll_interval,
            cache_dir,
        })
    }
}

fn parse_number<F>(lookup: &F, name: &'static str) -> Result<Option<u32>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {name} value: {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("Unknown database context: {0:?}")]
    InvalidContext(String),

    #[error("Database ID is required")]
    MissingDatabaseId,
}

/// Which space a database lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    /// Shared by every user of the application
    App,
    /// Private to the signed-in user
    User,
}

impl Context {
    pub fn as_str(&self) -> &'static str {
        match self {
            Context::App => "app",
            Context::User => "user",
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Context {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(Context::App),
            "user" => Ok(Context::User),
            other => Err(ConfigError::InvalidContext(other.to_string())),
        }
    }
}

/// Options for opening one replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    pub context: Context,
    pub database_id: String,
    /// Restrict the replica to a single collection
    pub collection_id: Option<CollectionId>,
    /// Create the remote database when it does not exist
    pub create_if_absent: bool,
    /// Restore from and persist to the local cache
    pub use_cache: bool,
}

impl OpenOptions {
    pub fn new(context: Context, database_id: impl Into<String>) -> Self {
        Self {
            context,
            database_id: database_id.into(),
            collection_id: None,
            create_if_absent: false,
            use_cache: true,
        }
    }

    pub fn collection(mut self, collection_id: impl Into<CollectionId>) -> Self {
        self.collection_id = Some(collection_id.into());
        self
    }

    pub fn create_if_absent(mut self, create: bool) -> Self {
        self.create_if_absent = create;
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_id.is_empty() {
            return Err(ConfigError::MissingDatabaseId);
        }
        Ok(())
    }

    /// Identity of the replica these options open.
    pub fn key(&self) -> CacheKey {
        CacheKey::new(
            self.context,
            self.database_id.clone(),
            self.collection_id.clone(),
        )
    }
}
