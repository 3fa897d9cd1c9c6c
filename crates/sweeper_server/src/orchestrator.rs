//! # Submission Orchestrator
//!
//! Drives one submission through the whole pipeline. Knows nothing about
//! HTTP: the transport hands in raw route/body bytes plus client metadata
//! and gets back a receipt or a [`SubmissionError`].
//!
//! ```text
//! route ──► difficulty ──► rate limit ──► parse body ──► field validators
//!                                                              │
//!   receipt ◄── top N ◄── conditional write ◄── behaviour ◄── session + audit
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sweeper_core::validation::{validate_difficulty_name, validate_game_data, validate_time, validate_username};
use sweeper_core::{
    BestTimeOutcome, Difficulty, ErrorCode, HealthReport, InvalidField, LeaderboardRecord, StoreError,
    StoreResult, SweeperConfig,
};
use sweeper_security::{
    BehaviorProfiler, BehaviorVerdict, ClientMeta, Fingerprinter, HashProvider, Rejection, RateLimiter,
    ScoreAuditor, SessionAuthenticator, Severity,
};
use sweeper_storage::{Housekeeper, LeaderboardStore, SqliteStore};
use thiserror::Error;
use tracing::{error, info};

/// Why a request was refused.
#[derive(Error, Debug)]
pub enum SubmissionError {
    /// Malformed or out-of-range client data.
    #[error("{code:?}: {reason}")]
    Invalid {
        /// Wire code.
        code: ErrorCode,
        /// Internal diagnostic.
        reason: String,
    },

    /// Rate limit, throttle, duplicate or implausible score.
    #[error("{code:?} ({severity}): {reason}")]
    Policy {
        /// Wire code.
        code: ErrorCode,
        /// Internal diagnostic.
        reason: String,
        /// Advisory severity.
        severity: Severity,
    },

    /// Storage failed.
    #[error("dependency failure: {0}")]
    Dependency(#[from] StoreError),
}

impl SubmissionError {
    fn invalid(code: ErrorCode, field: InvalidField) -> Self {
        Self::Invalid {
            code,
            reason: field.reason.to_string(),
        }
    }

    fn implausible(rejection: Rejection) -> Self {
        Self::Policy {
            code: ErrorCode::UnreasonableScore,
            reason: rejection.to_string(),
            severity: rejection.severity,
        }
    }

    /// Wire code of this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Invalid { code, .. } | Self::Policy { code, .. } => *code,
            Self::Dependency(_) => ErrorCode::ServerError,
        }
    }
}

/// Result type of orchestrator operations.
pub type SubmissionResult<T> = Result<T, SubmissionError>;

/// A leaderboard read.
#[derive(Clone, Debug, PartialEq)]
pub struct BoardView {
    /// Tier.
    pub difficulty: Difficulty,
    /// Fastest first.
    pub records: Vec<LeaderboardRecord>,
    /// Remaining fingerprint budget.
    pub remaining: u32,
}

/// An accepted submission.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionReceipt {
    /// Board after the write.
    pub board: BoardView,
    /// Normalized player name.
    pub username: String,
    /// Normalized time.
    pub time: f64,
    /// Acceptance instant.
    pub timestamp: DateTime<Utc>,
    /// 1-based position in the returned board, if on it.
    pub rank: Option<usize>,
    /// The stored best changed.
    pub improved: bool,
    /// Stored best when not improved.
    pub current_best: Option<f64>,
}

/// The whole submission pipeline, constructed once per process.
pub struct SubmissionOrchestrator {
    top_n: usize,
    fingerprinter: Fingerprinter,
    rate_limiter: RateLimiter,
    session: SessionAuthenticator,
    auditor: ScoreAuditor,
    profiler: BehaviorProfiler,
    leaderboard: LeaderboardStore,
    housekeeper: Housekeeper,
    accepted: AtomicU64,
}

impl SubmissionOrchestrator {
    /// Wires every component onto `store`.
    #[must_use]
    pub fn new(config: &SweeperConfig, store: SqliteStore) -> Self {
        let store = Arc::new(store);
        Self {
            top_n: config.server.top_n,
            fingerprinter: Fingerprinter::new(HashProvider::from_choice(config.fingerprint.hash)),
            rate_limiter: RateLimiter::new(store.clone(), config.rate_limit),
            session: SessionAuthenticator::default(),
            auditor: ScoreAuditor,
            profiler: BehaviorProfiler::new(store.clone(), config.behavior),
            leaderboard: LeaderboardStore::new(
                store.clone(),
                Duration::from_secs(config.cache.leaderboard_ttl_secs),
            ),
            housekeeper: Housekeeper::new(store, config.maintenance),
            accepted: AtomicU64::new(0),
        }
    }

    /// Opens the configured database and wires the pipeline onto it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened.
    pub fn open(config: &SweeperConfig) -> StoreResult<Self> {
        Ok(Self::new(config, SqliteStore::open(&config.server.database)?))
    }

    /// Snapshot lifetime, used for `Cache-Control`.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        self.leaderboard.cache_ttl()
    }

    /// Entity tag of a serialized board.
    #[must_use]
    pub fn entity_tag(&self, payload: &[u8]) -> String {
        self.fingerprinter.entity_tag(payload)
    }

    /// Store health.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the counts cannot be read.
    pub fn health(&self, now: DateTime<Utc>) -> StoreResult<HealthReport> {
        self.housekeeper.health(now)
    }

    /// Validates the route tier and charges the rate limit.
    fn admit(&self, route: &str, client: &ClientMeta, now: DateTime<Utc>) -> SubmissionResult<(Difficulty, u32)> {
        let difficulty = validate_difficulty_name(route)
            .map_err(|field| SubmissionError::invalid(ErrorCode::InvalidDifficulty, field))?;

        let fingerprint = self.fingerprinter.fingerprint(client);
        let verdict = self.rate_limiter.check_request(&client.ip, &fingerprint, now);
        if !verdict.allowed {
            return Err(SubmissionError::Policy {
                code: ErrorCode::RateLimitExceeded,
                reason: format!("tiers exhausted: {:?}", verdict.tripped),
                severity: Severity::Low,
            });
        }
        Ok((difficulty, verdict.remaining))
    }

    /// Serves the top of a leaderboard.
    ///
    /// # Errors
    ///
    /// Fails on an unknown tier or an exhausted rate limit. Storage failures
    /// yield an empty board instead.
    pub fn board(&self, route: &str, client: &ClientMeta, now: DateTime<Utc>) -> SubmissionResult<BoardView> {
        let (difficulty, remaining) = self.admit(route, client, now)?;
        Ok(BoardView {
            difficulty,
            records: self.leaderboard.top(difficulty, self.top_n),
            remaining,
        })
    }

    /// Runs a submission through every check and, if it survives, the
    /// conditional write.
    ///
    /// # Errors
    ///
    /// Returns the first failing step as a [`SubmissionError`].
    pub fn submit(
        &self,
        route: &str,
        body: &[u8],
        client: &ClientMeta,
        now: DateTime<Utc>,
    ) -> SubmissionResult<SubmissionReceipt> {
        let (difficulty, remaining) = self.admit(route, client, now)?;

        let body: Value = serde_json::from_slice(body).map_err(|err| SubmissionError::Invalid {
            code: ErrorCode::InvalidGameData,
            reason: format!("body is not JSON: {err}"),
        })?;
        if !body.is_object() {
            return Err(SubmissionError::Invalid {
                code: ErrorCode::InvalidGameData,
                reason: "body is not an object".to_string(),
            });
        }
        let game_data = match body.get("gameData") {
            None | Some(Value::Null) => {
                return Err(SubmissionError::Invalid {
                    code: ErrorCode::MissingGameData,
                    reason: "gameData absent".to_string(),
                })
            }
            Some(game_data) => game_data,
        };

        // Independent and pure: evaluate all, report the first failure.
        let username = validate_username(&body["username"]);
        let time = validate_time(&body["time"]);
        let claim = validate_game_data(game_data);
        let username = username.map_err(|f| SubmissionError::invalid(ErrorCode::InvalidUsername, f))?;
        let time = time.map_err(|f| SubmissionError::invalid(ErrorCode::InvalidTime, f))?;
        let claim = claim.map_err(|f| SubmissionError::invalid(ErrorCode::InvalidGameData, f))?;

        self.session
            .authenticate(&claim, difficulty, now)
            .map_err(SubmissionError::implausible)?;
        self.auditor
            .audit(time, difficulty)
            .map_err(SubmissionError::implausible)?;

        if let BehaviorVerdict::TemporaryBlock { suspicious_count } =
            self.profiler.observe(&username, difficulty, time, now)
        {
            return Err(SubmissionError::Policy {
                code: ErrorCode::SuspiciousBehavior,
                reason: format!("{suspicious_count} rapid submissions"),
                severity: Severity::Medium,
            });
        }

        let record = LeaderboardRecord {
            username,
            difficulty,
            time,
            timestamp: now,
            game_id: claim.game_id,
            moves: claim.moves,
            verified: true,
        };
        let (improved, current_best) = match self.leaderboard.submit(&record)? {
            BestTimeOutcome::Improved => (true, None),
            BestTimeOutcome::NotImproved { current_best } => (false, Some(current_best)),
            BestTimeOutcome::Duplicate => {
                return Err(SubmissionError::Policy {
                    code: ErrorCode::DuplicateGame,
                    reason: format!("game {} already scored", record.game_id),
                    severity: Severity::High,
                })
            }
        };
        info!(%difficulty, time, improved, "Submission accepted");
        self.after_accept(now);

        let records = self.leaderboard.top(difficulty, self.top_n);
        let rank = records
            .iter()
            .position(|r| r.username == record.username)
            .map(|index| index + 1);
        Ok(SubmissionReceipt {
            board: BoardView {
                difficulty,
                records,
                remaining,
            },
            username: record.username,
            time,
            timestamp: now,
            rank,
            improved,
            current_best,
        })
    }

    #[cfg(test)]
    fn with_housekeeper(mut self, housekeeper: Housekeeper) -> Self {
        self.housekeeper = housekeeper;
        self
    }

    /// Opportunistic housekeeping, inline with the request.
    fn after_accept(&self, now: DateTime<Utc>) {
        let n = self.accepted.fetch_add(1, Ordering::Relaxed) + 1;
        if self.housekeeper.is_due(n) {
            if let Err(err) = self.housekeeper.run(now) {
                error!(error = %err, "Maintenance pass failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use sweeper_core::config::MaintenanceSection;
    use sweeper_core::{MaintenanceRepository, RateLimitKey, RateLimitRepository, TableCounts, UserStats, UserStatsRepository};

    struct BrokenMaintenance;

    impl MaintenanceRepository for BrokenMaintenance {
        fn purge_expired_rate_limits(&self, _: DateTime<Utc>) -> StoreResult<usize> {
            Err(StoreError::Busy)
        }

        fn purge_stale_user_stats(&self, _: DateTime<Utc>) -> StoreResult<usize> {
            Err(StoreError::Busy)
        }

        fn table_counts(&self, _: DateTime<Utc>) -> StoreResult<TableCounts> {
            Err(StoreError::Busy)
        }
    }

    fn every(n: u64) -> SweeperConfig {
        let mut config = SweeperConfig::default();
        config.maintenance = MaintenanceSection {
            every_n_submissions: n,
            ..MaintenanceSection::default()
        };
        config
    }

    fn orchestrator() -> SubmissionOrchestrator {
        SubmissionOrchestrator::new(&SweeperConfig::default(), SqliteStore::open_in_memory().unwrap())
    }

    fn client() -> ClientMeta {
        ClientMeta {
            ip: "198.51.100.4".to_string(),
            user_agent: "test-agent".to_string(),
            accept_language: "en".to_string(),
            accept_encoding: "gzip".to_string(),
        }
    }

    fn body(username: &str, time: f64, game_id: &str, now: DateTime<Utc>) -> Vec<u8> {
        let end = now.timestamp_millis() - 1_000;
        #[allow(clippy::cast_possible_truncation)]
        let first = end - (time * 1000.0) as i64;
        serde_json::to_vec(&json!({
            "username": username,
            "time": time,
            "gameData": {
                "difficulty": "beginner",
                "time": time,
                "moves": 12,
                "gameId": game_id,
                "timestamp": (now - ChronoDuration::seconds(60)).to_rfc3339(),
                "boardSize": { "width": 9, "height": 9 },
                "mineCount": 10,
                "gameEndTime": end,
                "firstClickTime": first,
                "gameState": "won"
            }
        }))
        .unwrap()
    }

    fn code(result: SubmissionResult<SubmissionReceipt>) -> ErrorCode {
        result.unwrap_err().code()
    }

    #[test]
    fn test_accepted_submission_is_ranked() {
        let orch = orchestrator();
        let now = Utc::now();
        let receipt = orch.submit("beginner", &body("alice", 5.2, "g1", now), &client(), now).unwrap();
        assert!(receipt.improved);
        assert_eq!(receipt.rank, Some(1));
        assert_eq!(receipt.board.records[0].time, 5.2);
        assert_eq!(receipt.board.remaining, 14);
    }

    #[test]
    fn test_route_difficulty_is_normalized() {
        let orch = orchestrator();
        let now = Utc::now();
        assert!(orch.submit(" Beginner ", &body("alice", 5.2, "g1", now), &client(), now).is_ok());
        assert_eq!(
            code(orch.submit("nightmare", &body("alice", 5.2, "g2", now), &client(), now)),
            ErrorCode::InvalidDifficulty
        );
    }

    #[test]
    fn test_field_errors_are_reported_in_order() {
        let orch = orchestrator();
        let now = Utc::now();
        let both_bad = json!({ "username": "<b>", "time": "fast", "gameData": {} });
        let result = orch.submit("beginner", both_bad.to_string().as_bytes(), &client(), now);
        assert_eq!(code(result), ErrorCode::InvalidUsername);

        let bad_time = json!({ "username": "alice", "time": 0.01, "gameData": {} });
        let result = orch.submit("beginner", bad_time.to_string().as_bytes(), &client(), now);
        assert_eq!(code(result), ErrorCode::InvalidTime);

        let bad_game = json!({ "username": "alice", "time": 5.2, "gameData": [] });
        let result = orch.submit("beginner", bad_game.to_string().as_bytes(), &client(), now);
        assert_eq!(code(result), ErrorCode::InvalidGameData);
    }

    #[test]
    fn test_body_shape_errors() {
        let orch = orchestrator();
        let now = Utc::now();
        assert_eq!(code(orch.submit("beginner", b"not json", &client(), now)), ErrorCode::InvalidGameData);
        assert_eq!(code(orch.submit("beginner", b"[1,2]", &client(), now)), ErrorCode::InvalidGameData);
        let no_game = json!({ "username": "alice", "time": 5.2, "gameData": null });
        assert_eq!(
            code(orch.submit("beginner", no_game.to_string().as_bytes(), &client(), now)),
            ErrorCode::MissingGameData
        );
    }

    #[test]
    fn test_worse_time_reports_current_best() {
        let orch = orchestrator();
        let now = Utc::now();
        orch.submit("beginner", &body("alice", 5.2, "g1", now), &client(), now).unwrap();
        let receipt = orch.submit("beginner", &body("alice", 6.0, "g2", now), &client(), now).unwrap();
        assert!(!receipt.improved);
        assert_eq!(receipt.current_best, Some(5.2));
        assert_eq!(receipt.rank, Some(1));
    }

    #[test]
    fn test_replayed_game_is_duplicate() {
        let orch = orchestrator();
        let now = Utc::now();
        orch.submit("beginner", &body("alice", 5.2, "g1", now), &client(), now).unwrap();
        assert_eq!(
            code(orch.submit("beginner", &body("alice", 5.1, "g1", now), &client(), now)),
            ErrorCode::DuplicateGame
        );
    }

    #[test]
    fn test_game_on_wrong_route_is_unreasonable() {
        let orch = orchestrator();
        let now = Utc::now();
        assert_eq!(
            code(orch.submit("expert", &body("alice", 45.5, "g1", now), &client(), now)),
            ErrorCode::UnreasonableScore
        );
    }

    #[test]
    fn test_rapid_fire_player_is_throttled() {
        let orch = orchestrator();
        let now = Utc::now();
        for i in 0..4 {
            let game = format!("g{i}");
            assert!(orch.submit("beginner", &body("alice", 9.5, &game, now), &client(), now).is_ok());
        }
        assert_eq!(
            code(orch.submit("beginner", &body("alice", 9.5, "g4", now), &client(), now)),
            ErrorCode::SuspiciousBehavior
        );
    }

    #[test]
    fn test_fingerprint_budget_is_shared_with_reads() {
        let orch = orchestrator();
        let now = Utc::now();
        for _ in 0..15 {
            assert!(orch.board("expert", &client(), now).is_ok());
        }
        let err = orch.board("expert", &client(), now).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RateLimitExceeded);
    }

    #[test]
    fn test_nth_accepted_submission_runs_housekeeping() {
        let now = Utc::now();
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_stats(&UserStats::empty("idle", Difficulty::Beginner), now - ChronoDuration::days(31))
            .unwrap();
        store
            .hit(RateLimitKey::Ip, "203.0.113.9:1", 5, 60, now - ChronoDuration::days(1))
            .unwrap();
        let orch = SubmissionOrchestrator::new(&every(2), store);

        orch.submit("beginner", &body("alice", 5.2, "g1", now), &client(), now).unwrap();
        assert_eq!(orch.health(now).unwrap().tables.user_stats, 2);

        // A rejected submission does not advance the cadence.
        assert!(orch.submit("beginner", &body("alice", 5.2, "g1", now), &client(), now).is_err());
        assert_eq!(orch.health(now).unwrap().tables.user_stats, 2);

        orch.submit("beginner", &body("bob", 6.1, "g2", now), &client(), now).unwrap();
        let tables = orch.health(now).unwrap().tables;
        assert_eq!(tables.user_stats, 2, "idle purged, alice and bob kept");
        assert_eq!(tables.expired_rate_limits, 0);
        assert_eq!(tables.scored_games, 2);
    }

    #[test]
    fn test_failed_housekeeping_does_not_fail_submission() {
        let now = Utc::now();
        let orch = SubmissionOrchestrator::new(&every(1), SqliteStore::open_in_memory().unwrap())
            .with_housekeeper(Housekeeper::new(Arc::new(BrokenMaintenance), MaintenanceSection {
                every_n_submissions: 1,
                ..MaintenanceSection::default()
            }));

        let receipt = orch.submit("beginner", &body("alice", 5.2, "g1", now), &client(), now).unwrap();
        assert!(receipt.improved);
        assert!(orch.submit("beginner", &body("bob", 6.1, "g2", now), &client(), now).is_ok());
    }

    #[test]
    fn test_error_codes_map_to_classes() {
        let err = SubmissionError::from(StoreError::Busy);
        assert_eq!(err.code(), ErrorCode::ServerError);
        assert_eq!(err.code().http_status(), 500);
    }
}
