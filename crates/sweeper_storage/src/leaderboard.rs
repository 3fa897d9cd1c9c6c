//! # Leaderboard Store
//!
//! Read-through cache over [`LeaderboardRepository`].
//!
//! ```text
//! top(d, n) ──► cache "leaderboard:{d}:{n}" ──miss──► repository ──► cache
//! submit(r) ──► repository (atomic) ──improved──► drop "leaderboard:{d}:*"
//! ```
//!
//! Reads fail OPEN: a store failure yields an empty board, logged at `error`.

use std::sync::Arc;
use std::time::Duration;

use sweeper_core::{BestTimeOutcome, Difficulty, LeaderboardRecord, LeaderboardRepository, StoreResult};
use tracing::{error, info};

use crate::cache::{Cache, CacheStats};

/// Cached, ranked best times.
pub struct LeaderboardStore {
    repository: Arc<dyn LeaderboardRepository>,
    cache: Cache<Vec<LeaderboardRecord>>,
}

impl LeaderboardStore {
    /// Creates a store whose snapshots live for `ttl`.
    #[must_use]
    pub fn new(repository: Arc<dyn LeaderboardRepository>, ttl: Duration) -> Self {
        Self {
            repository,
            cache: Cache::new(ttl),
        }
    }

    /// Snapshot lifetime.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        self.cache.ttl()
    }

    /// The `limit` fastest verified records of `difficulty`.
    #[must_use]
    pub fn top(&self, difficulty: Difficulty, limit: usize) -> Vec<LeaderboardRecord> {
        let key = cache_key(difficulty, limit);
        if let Some(records) = self.cache.get(&key) {
            return records;
        }
        match self.repository.top(difficulty, limit) {
            Ok(records) => {
                self.cache.insert(key, records.clone());
                records
            }
            Err(err) => {
                error!(%difficulty, error = %err, "Leaderboard read failed, serving empty board");
                Vec::new()
            }
        }
    }

    /// Scores a record. The board snapshot of its tier is dropped whenever
    /// the stored record changed.
    ///
    /// # Errors
    ///
    /// Propagates the repository failure; nothing was written.
    pub fn submit(&self, record: &LeaderboardRecord) -> StoreResult<BestTimeOutcome> {
        let outcome = self.repository.submit_best_time(record)?;
        if outcome == BestTimeOutcome::Improved {
            self.invalidate(record.difficulty);
            info!(difficulty = %record.difficulty, time = record.time, "New personal best stored");
        }
        Ok(outcome)
    }

    /// 1-based position of `username` within the top `limit`, if present.
    #[must_use]
    pub fn rank(&self, difficulty: Difficulty, username: &str, limit: usize) -> Option<usize> {
        self.top(difficulty, limit)
            .iter()
            .position(|record| record.username == username)
            .map(|index| index + 1)
    }

    /// Drops every cached snapshot of `difficulty`.
    pub fn invalidate(&self, difficulty: Difficulty) {
        self.cache.invalidate_prefix(&cache_prefix(difficulty));
    }

    /// Cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Empties the snapshot cache.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

fn cache_prefix(difficulty: Difficulty) -> String {
    format!("leaderboard:{difficulty}:")
}

fn cache_key(difficulty: Difficulty, limit: usize) -> String {
    format!("{}{limit}", cache_prefix(difficulty))
}
