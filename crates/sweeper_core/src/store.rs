//! # Storage Contracts
//!
//! The durable store is an external collaborator. Components reach it only
//! through these traits, so the security layer can be tested against
//! in-memory fakes and the SQLite backend can be swapped out.
//!
//! Two operations carry atomicity requirements and MUST be implemented as a
//! single conditional write (or inside one serializable transaction):
//!
//! - [`RateLimitRepository::hit`]: check-then-increment of one counter
//! - [`LeaderboardRepository::submit_best_time`]: duplicate guard plus the
//!   "only if strictly faster" upsert

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::difficulty::Difficulty;
use crate::error::StoreResult;
use crate::model::{LeaderboardRecord, UserStats};

// =============================================================================
// RATE LIMIT COUNTERS
// =============================================================================

/// Which tier a counter belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    /// Per client address.
    Ip,
    /// Per request fingerprint.
    Fingerprint,
    /// Service-wide.
    Global,
}

impl RateLimitKey {
    /// Storage name of the tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Fingerprint => "fingerprint",
            Self::Global => "global",
        }
    }
}

/// Outcome of one counter check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// The request may proceed.
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
}

impl RateLimitDecision {
    /// A rejection; rejected requests never consume budget.
    pub const DENIED: Self = Self { allowed: false, remaining: 0 };
}

/// Fixed-window counters.
pub trait RateLimitRepository: Send + Sync {
    /// Purges expired counters, then atomically increments the counter for
    /// `(key, value)` if it is below `limit`.
    ///
    /// A fresh counter expires `ttl_secs` after `now`.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::StoreError`] when the backend fails; callers fail closed.
    fn hit(
        &self,
        key: RateLimitKey,
        value: &str,
        limit: u32,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitDecision>;
}

// =============================================================================
// LEADERBOARD
// =============================================================================

/// Result of a best-time submission.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BestTimeOutcome {
    /// First record, or strictly faster than the previous one.
    Improved,
    /// Slower or equal; the stored time is untouched.
    NotImproved {
        /// The time that stays on the board.
        current_best: f64,
    },
    /// The game id was already scored on this tier.
    Duplicate,
}

/// Ranked best times.
pub trait LeaderboardRepository: Send + Sync {
    /// Up to `limit` verified records, fastest first (ties: earliest first).
    ///
    /// # Errors
    ///
    /// Returns a [`crate::StoreError`] when the backend fails.
    fn top(&self, difficulty: Difficulty, limit: usize) -> StoreResult<Vec<LeaderboardRecord>>;

    /// Marks `record.game_id` as scored and keeps the record only if it beats
    /// the player's current best, in one atomic step.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::StoreError`] when the backend fails. Nothing is
    /// written in that case.
    fn submit_best_time(&self, record: &LeaderboardRecord) -> StoreResult<BestTimeOutcome>;
}

// =============================================================================
// USER STATS
// =============================================================================

/// Per-player statistics rows.
pub trait UserStatsRepository: Send + Sync {
    /// The stats row of a player, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::StoreError`] when the backend fails.
    fn load_stats(&self, username: &str, difficulty: Difficulty) -> StoreResult<Option<UserStats>>;

    /// Writes the whole row.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::StoreError`] when the backend fails.
    fn save_stats(&self, stats: &UserStats, now: DateTime<Utc>) -> StoreResult<()>;
}

// =============================================================================
// MAINTENANCE
// =============================================================================

/// Row counts used by the health report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCounts {
    /// `leaderboards` rows.
    pub leaderboards: u64,
    /// `user_stats` rows.
    pub user_stats: u64,
    /// `rate_limits` rows.
    pub rate_limits: u64,
    /// `scored_games` rows.
    pub scored_games: u64,
    /// Rate-limit rows already past their expiry.
    pub expired_rate_limits: u64,
}

/// Housekeeping primitives. Every method is idempotent.
///
/// Spent game ids are never purged: the ledger is what keeps a game from
/// being scored twice.
pub trait MaintenanceRepository: Send + Sync {
    /// Deletes counters expired at `now`; returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::StoreError`] when the backend fails.
    fn purge_expired_rate_limits(&self, now: DateTime<Utc>) -> StoreResult<usize>;

    /// Deletes stats rows not updated since `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::StoreError`] when the backend fails.
    fn purge_stale_user_stats(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    /// Current row counts.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::StoreError`] when the backend fails.
    fn table_counts(&self, now: DateTime<Utc>) -> StoreResult<TableCounts>;
}

/// What one maintenance pass removed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    /// Human-readable line per action that removed something.
    pub actions: Vec<String>,
    /// Total rows removed.
    pub total_cleaned: usize,
}

impl MaintenanceReport {
    /// Records one purge step.
    pub fn record(&mut self, what: &str, removed: usize) {
        if removed > 0 {
            self.actions.push(format!("removed {removed} {what}"));
            self.total_cleaned += removed;
        }
    }
}

/// Overall store condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Nothing to do.
    Optimal,
    /// At least one recommendation applies.
    NeedsAttention,
}

/// Store health snapshot, logged at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Row counts per table.
    pub tables: TableCounts,
    /// Suggested operator actions.
    pub recommendations: Vec<String>,
    /// Summary.
    pub status: HealthStatus,
}

/// Counter rows above which a cleanup is recommended.
pub const RATE_LIMIT_ROWS_WARN: u64 = 1_000;

/// Stats rows above which archiving is recommended.
pub const USER_STATS_ROWS_WARN: u64 = 10_000;

impl HealthReport {
    /// Derives recommendations from raw counts.
    #[must_use]
    pub fn from_counts(tables: TableCounts) -> Self {
        let mut recommendations = Vec::new();
        if tables.rate_limits > RATE_LIMIT_ROWS_WARN {
            recommendations.push("rate limit table is large, run cleanup".to_string());
        }
        if tables.user_stats > USER_STATS_ROWS_WARN {
            recommendations.push("user stats table is large, consider archiving".to_string());
        }
        if tables.expired_rate_limits > 0 {
            recommendations.push(format!(
                "{} expired rate limit counters awaiting cleanup",
                tables.expired_rate_limits
            ));
        }
        let status = if recommendations.is_empty() {
            HealthStatus::Optimal
        } else {
            HealthStatus::NeedsAttention
        };
        Self { tables, recommendations, status }
    }
}
