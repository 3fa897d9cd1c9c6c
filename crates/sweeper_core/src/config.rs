//! # Configuration
//!
//! Loaded once at startup from a TOML file. Every section and field has a
//! default, so an empty (or missing) file yields the production policy.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8787"
//! database = "sweeper.db"
//!
//! [rate_limit.fingerprint]
//! limit = 15
//! window_secs = 120
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::DEFAULT_TOP_N;

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// File that failed.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Root configuration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Listener and storage location.
    pub server: ServerSection,
    /// Per-tier request ceilings.
    pub rate_limit: RateLimitSection,
    /// Leaderboard snapshot cache.
    pub cache: CacheSection,
    /// Submission cadence throttle.
    pub behavior: BehaviorSection,
    /// Housekeeping retention windows.
    pub maintenance: MaintenanceSection,
    /// Fingerprint hashing.
    pub fingerprint: FingerprintSection,
}

impl SweeperConfig {
    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML or unknown value types.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads configuration from `path`. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Applies deployment overrides (`SWEEPER_BIND`, `SWEEPER_DB`) read
    /// through `lookup`, normally `|key| std::env::var(key).ok()`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup(ENV_BIND) {
            self.server.bind = bind;
        }
        if let Some(database) = lookup(ENV_DATABASE) {
            self.server.database = database;
        }
    }
}

/// Environment variable naming the config file.
pub const ENV_CONFIG: &str = "SWEEPER_CONFIG";

/// Environment variable overriding `server.bind`.
pub const ENV_BIND: &str = "SWEEPER_BIND";

/// Environment variable overriding `server.database`.
pub const ENV_DATABASE: &str = "SWEEPER_DB";

/// Config file used when `SWEEPER_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "sweeper.toml";

/// `[server]`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Socket address to listen on.
    pub bind: String,
    /// SQLite database file (`:memory:` for a throwaway store).
    pub database: String,
    /// Records returned by a leaderboard read.
    pub top_n: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            database: "sweeper.db".to_string(),
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// One fixed-window ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct WindowLimit {
    /// Requests allowed per window.
    pub limit: u32,
    /// Window length in seconds; also the counter lifetime.
    pub window_secs: u64,
}

impl WindowLimit {
    /// Creates a ceiling.
    #[must_use]
    pub const fn new(limit: u32, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }
}

/// `[rate_limit]`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    /// Per client IP.
    pub ip: WindowLimit,
    /// Per request fingerprint.
    pub fingerprint: WindowLimit,
    /// Whole service.
    pub global: WindowLimit,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            ip: WindowLimit::new(20, 120),
            fingerprint: WindowLimit::new(15, 120),
            global: WindowLimit::new(1000, 120),
        }
    }
}

/// `[cache]`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Lifetime of a cached leaderboard snapshot.
    pub leaderboard_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self { leaderboard_ttl_secs: 30 }
    }
}

/// `[behavior]`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BehaviorSection {
    /// Submissions closer together than this count as rapid-fire.
    pub frequent_window_secs: u64,
    /// Rapid-fire count above which a player is blocked.
    pub max_suspicious_count: u32,
}

impl Default for BehaviorSection {
    fn default() -> Self {
        Self {
            frequent_window_secs: 300,
            max_suspicious_count: 3,
        }
    }
}

/// `[maintenance]`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MaintenanceSection {
    /// Stats rows untouched for longer than this are purged.
    pub user_stats_retention_days: u32,
    /// Run a maintenance pass every this many submissions (0 disables).
    pub every_n_submissions: u64,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            user_stats_retention_days: 30,
            every_n_submissions: 100,
        }
    }
}

/// Which hash backs client fingerprints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashChoice {
    /// SHA-256.
    #[default]
    Sha256,
    /// FNV-1a, for hosts without a usable SHA-256 implementation.
    Fnv1a,
}

/// `[fingerprint]`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FingerprintSection {
    /// Hash used for fingerprints.
    pub hash: HashChoice,
}
