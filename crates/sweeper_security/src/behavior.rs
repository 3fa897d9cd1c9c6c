//! # Behaviour Profiling
//!
//! Per-player cadence throttle. Each submission closer than the window to
//! the previous one raises a suspicion counter; a calm submission lowers it
//! by one. Above the threshold the player is told to take a break.
//!
//! This throttles, it never bans, and a store failure never blocks a player.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sweeper_core::config::BehaviorSection;
use sweeper_core::{Difficulty, UserStats, UserStatsRepository};
use tracing::{error, warn};

/// Outcome of profiling one submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BehaviorVerdict {
    /// Proceed; statistics were updated.
    Clear,
    /// Too many rapid submissions; the score must not be stored.
    TemporaryBlock {
        /// Counter value that tripped the block.
        suspicious_count: u32,
    },
}

/// Stateful per-player cadence check.
pub struct BehaviorProfiler {
    /// Stats storage.
    store: Arc<dyn UserStatsRepository>,
    /// Window and threshold.
    policy: BehaviorSection,
}

impl BehaviorProfiler {
    /// Creates a profiler over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn UserStatsRepository>, policy: BehaviorSection) -> Self {
        Self { store, policy }
    }

    /// Profiles a submission of `time` seconds and records it.
    ///
    /// On a block only the raised counter is persisted.
    #[must_use]
    pub fn observe(&self, username: &str, difficulty: Difficulty, time: f64, now: DateTime<Utc>) -> BehaviorVerdict {
        let mut stats = match self.store.load_stats(username, difficulty) {
            Ok(found) => found.unwrap_or_else(|| UserStats::empty(username, difficulty)),
            Err(err) => {
                error!(error = %err, %difficulty, "User stats unavailable, skipping behaviour check");
                return BehaviorVerdict::Clear;
            }
        };

        let window = i64::try_from(self.policy.frequent_window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        let rapid = stats.last_submission.is_some_and(|last| now - last < window);

        if rapid {
            stats.suspicious_count = stats.suspicious_count.saturating_add(1);
            if stats.suspicious_count > self.policy.max_suspicious_count {
                warn!(
                    %difficulty,
                    suspicious_count = stats.suspicious_count,
                    "Rapid-fire submissions, temporary block"
                );
                self.persist(&stats, now);
                return BehaviorVerdict::TemporaryBlock {
                    suspicious_count: stats.suspicious_count,
                };
            }
        } else {
            stats.suspicious_count = stats.suspicious_count.saturating_sub(1);
        }

        record_submission(&mut stats, time, now);
        self.persist(&stats, now);
        BehaviorVerdict::Clear
    }

    fn persist(&self, stats: &UserStats, now: DateTime<Utc>) {
        if let Err(err) = self.store.save_stats(stats, now) {
            error!(error = %err, difficulty = %stats.difficulty, "Failed to save user stats");
        }
    }
}

/// Folds one submitted time into the running statistics.
fn record_submission(stats: &mut UserStats, time: f64, now: DateTime<Utc>) {
    stats.submissions = stats.submissions.saturating_add(1);
    stats.total_time += time;
    stats.average_time = stats.total_time / f64::from(stats.submissions);
    stats.best_time = Some(stats.best_time.map_or(time, |best| best.min(time)));
    stats.last_submission = Some(now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use sweeper_core::{StoreError, StoreResult};

    #[derive(Default)]
    struct MemoryStats {
        rows: Mutex<HashMap<(String, Difficulty), UserStats>>,
    }

    impl UserStatsRepository for MemoryStats {
        fn load_stats(&self, username: &str, difficulty: Difficulty) -> StoreResult<Option<UserStats>> {
            Ok(self.rows.lock().get(&(username.to_string(), difficulty)).cloned())
        }

        fn save_stats(&self, stats: &UserStats, _now: DateTime<Utc>) -> StoreResult<()> {
            self.rows
                .lock()
                .insert((stats.username.clone(), stats.difficulty), stats.clone());
            Ok(())
        }
    }

    struct BrokenStats;

    impl UserStatsRepository for BrokenStats {
        fn load_stats(&self, _: &str, _: Difficulty) -> StoreResult<Option<UserStats>> {
            Err(StoreError::Backend("disk full".to_string()))
        }

        fn save_stats(&self, _: &UserStats, _: DateTime<Utc>) -> StoreResult<()> {
            Err(StoreError::Backend("disk full".to_string()))
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn profiler() -> (Arc<MemoryStats>, BehaviorProfiler) {
        let store = Arc::new(MemoryStats::default());
        let profiler = BehaviorProfiler::new(store.clone(), BehaviorSection::default());
        (store, profiler)
    }

    fn stats(store: &MemoryStats) -> UserStats {
        store.load_stats("alice", Difficulty::Beginner).unwrap().unwrap()
    }

    #[test]
    fn test_first_submission_creates_stats() {
        let (store, profiler) = profiler();
        assert_eq!(profiler.observe("alice", Difficulty::Beginner, 12.5, at(0)), BehaviorVerdict::Clear);
        let s = stats(&store);
        assert_eq!(s.submissions, 1);
        assert_eq!(s.best_time, Some(12.5));
        assert_eq!(s.last_submission, Some(at(0)));
        assert_eq!(s.suspicious_count, 0);
    }

    #[test]
    fn test_running_statistics() {
        let (store, profiler) = profiler();
        let _ = profiler.observe("alice", Difficulty::Beginner, 10.0, at(0));
        let _ = profiler.observe("alice", Difficulty::Beginner, 6.0, at(1_000));
        let s = stats(&store);
        assert_eq!(s.submissions, 2);
        assert!((s.total_time - 16.0).abs() < 1e-9);
        assert!((s.average_time - 8.0).abs() < 1e-9);
        assert_eq!(s.best_time, Some(6.0));
    }

    #[test]
    fn test_fifth_rapid_submission_is_blocked() {
        let (store, profiler) = profiler();
        for i in 0..4 {
            assert_eq!(
                profiler.observe("alice", Difficulty::Beginner, 9.0, at(i * 10)),
                BehaviorVerdict::Clear
            );
        }
        assert_eq!(stats(&store).suspicious_count, 3);

        let verdict = profiler.observe("alice", Difficulty::Beginner, 2.0, at(40));
        assert_eq!(verdict, BehaviorVerdict::TemporaryBlock { suspicious_count: 4 });

        // Only the counter moved; the blocked time was not recorded.
        let s = stats(&store);
        assert_eq!(s.suspicious_count, 4);
        assert_eq!(s.submissions, 4);
        assert_eq!(s.best_time, Some(9.0));
    }

    #[test]
    fn test_calm_submission_decays_counter() {
        let (store, profiler) = profiler();
        for i in 0..3 {
            let _ = profiler.observe("alice", Difficulty::Beginner, 9.0, at(i * 10));
        }
        assert_eq!(stats(&store).suspicious_count, 2);
        let _ = profiler.observe("alice", Difficulty::Beginner, 9.0, at(1_000));
        assert_eq!(stats(&store).suspicious_count, 1);
    }

    #[test]
    fn test_players_and_tiers_are_independent() {
        let (store, profiler) = profiler();
        let _ = profiler.observe("alice", Difficulty::Beginner, 9.0, at(0));
        let _ = profiler.observe("alice", Difficulty::Expert, 90.0, at(1));
        let _ = profiler.observe("bob", Difficulty::Beginner, 9.0, at(2));
        assert_eq!(stats(&store).suspicious_count, 0);
    }

    #[test]
    fn test_unbounded_window_counts_every_repeat() {
        let store = Arc::new(MemoryStats::default());
        let policy = BehaviorSection {
            frequent_window_secs: u64::MAX,
            ..BehaviorSection::default()
        };
        let profiler = BehaviorProfiler::new(store.clone(), policy);
        let _ = profiler.observe("alice", Difficulty::Beginner, 9.0, at(0));
        let _ = profiler.observe("alice", Difficulty::Beginner, 9.0, at(86_400_000));
        assert_eq!(stats(&store).suspicious_count, 1);
    }

    #[test]
    fn test_store_failure_fails_open() {
        let profiler = BehaviorProfiler::new(Arc::new(BrokenStats), BehaviorSection::default());
        assert_eq!(profiler.observe("alice", Difficulty::Beginner, 9.0, at(0)), BehaviorVerdict::Clear);
    }
}
