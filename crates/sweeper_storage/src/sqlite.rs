//! # SQLite Backend
//!
//! The durable store behind every repository trait.
//!
//! ## Schema
//!
//! ```text
//! leaderboards  (difficulty, username)  best record per player
//! scored_games  (difficulty, game_id)   every game id ever scored
//! user_stats    (username, difficulty)  behaviour statistics
//! rate_limits   (key_type, key_value)   fixed-window counters
//! ```
//!
//! Instants are stored as epoch milliseconds.
//!
//! ## Atomicity
//!
//! Counter hits and best-time upserts are single conditional statements, so
//! they stay correct even with several processes sharing one database file.
//! The connection mutex only serializes access within this process.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use sweeper_core::store::TableCounts;
use sweeper_core::{
    BestTimeOutcome, Difficulty, LeaderboardRecord, LeaderboardRepository, MaintenanceRepository,
    RateLimitDecision, RateLimitKey, RateLimitRepository, StoreError, StoreResult, UserStats,
    UserStatsRepository, MILLIS_PER_SECOND,
};
use tracing::{debug, info};

/// How long a statement waits on a locked database before giving up.
const BUSY_TIMEOUT: StdDuration = StdDuration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS leaderboards (
        difficulty   TEXT    NOT NULL,
        username     TEXT    NOT NULL,
        time         REAL    NOT NULL,
        timestamp_ms INTEGER NOT NULL,
        game_id      TEXT    NOT NULL,
        moves        INTEGER NOT NULL,
        verified     INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (difficulty, username)
    );
    CREATE INDEX IF NOT EXISTS idx_leaderboards_rank
        ON leaderboards (difficulty, verified, time, timestamp_ms);
    CREATE INDEX IF NOT EXISTS idx_leaderboards_game
        ON leaderboards (difficulty, game_id);

    CREATE TABLE IF NOT EXISTS scored_games (
        difficulty   TEXT    NOT NULL,
        game_id      TEXT    NOT NULL,
        username     TEXT    NOT NULL,
        scored_at_ms INTEGER NOT NULL,
        PRIMARY KEY (difficulty, game_id)
    );

    CREATE TABLE IF NOT EXISTS user_stats (
        username           TEXT    NOT NULL,
        difficulty         TEXT    NOT NULL,
        submissions        INTEGER NOT NULL,
        best_time          REAL,
        average_time       REAL    NOT NULL,
        total_time         REAL    NOT NULL,
        last_submission_ms INTEGER,
        suspicious_count   INTEGER NOT NULL,
        updated_at_ms      INTEGER NOT NULL,
        PRIMARY KEY (username, difficulty)
    );
    CREATE INDEX IF NOT EXISTS idx_user_stats_age ON user_stats (updated_at_ms);

    CREATE TABLE IF NOT EXISTS rate_limits (
        key_type      TEXT    NOT NULL,
        key_value     TEXT    NOT NULL,
        count         INTEGER NOT NULL,
        expires_at_ms INTEGER NOT NULL,
        PRIMARY KEY (key_type, key_value)
    );
    CREATE INDEX IF NOT EXISTS idx_rate_limits_expiry ON rate_limits (expires_at_ms);
";

/// Check-then-increment in one statement. Returns no row when the counter
/// is already at the limit.
const HIT_COUNTER: &str = "
    INSERT INTO rate_limits (key_type, key_value, count, expires_at_ms)
    VALUES (?1, ?2, 1, ?3)
    ON CONFLICT (key_type, key_value) DO UPDATE
        SET count = count + 1, expires_at_ms = excluded.expires_at_ms
        WHERE rate_limits.count < ?4
    RETURNING count";

/// Keeps the new record only if strictly faster than the stored one.
const UPSERT_BEST_TIME: &str = "
    INSERT INTO leaderboards (difficulty, username, time, timestamp_ms, game_id, moves, verified)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT (difficulty, username) DO UPDATE
        SET time = excluded.time,
            timestamp_ms = excluded.timestamp_ms,
            game_id = excluded.game_id,
            moves = excluded.moves,
            verified = excluded.verified
        WHERE excluded.time < leaderboards.time";

const SELECT_TOP: &str = "
    SELECT username, difficulty, time, timestamp_ms, game_id, moves, verified
    FROM leaderboards
    WHERE difficulty = ?1 AND verified = 1
    ORDER BY time ASC, timestamp_ms ASC
    LIMIT ?2";

const UPSERT_STATS: &str = "
    INSERT INTO user_stats (username, difficulty, submissions, best_time, average_time,
                            total_time, last_submission_ms, suspicious_count, updated_at_ms)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ON CONFLICT (username, difficulty) DO UPDATE
        SET submissions = excluded.submissions,
            best_time = excluded.best_time,
            average_time = excluded.average_time,
            total_time = excluded.total_time,
            last_submission_ms = excluded.last_submission_ms,
            suspicious_count = excluded.suspicious_count,
            updated_at_ms = excluded.updated_at_ms";

/// Shared SQLite connection implementing every repository trait.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`. `:memory:` gives
    /// a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the file cannot be opened or the schema
    /// cannot be created.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = if path == Path::new(":memory:") {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(db_err)?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "Opened leaderboard database");
        Ok(store)
    }

    /// Private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the schema cannot be created.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
        let journal: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(db_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(db_err)?;
        debug!(journal = %journal, "Journal mode set");
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

/// Maps driver errors, keeping lock contention distinguishable.
fn db_err(err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(ref inner, _)
            if matches!(inner.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            StoreError::Busy
        }
        other => StoreError::Backend(other.to_string()),
    }
}

fn instant(table: &'static str, millis: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| StoreError::Corrupt {
        table,
        reason: format!("timestamp {millis} out of range"),
    })
}

fn parse_difficulty(table: &'static str, name: &str) -> StoreResult<Difficulty> {
    Difficulty::from_name(name).ok_or_else(|| StoreError::Corrupt {
        table,
        reason: format!("unknown difficulty {name:?}"),
    })
}

fn secs_to_millis(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(MILLIS_PER_SECOND)
}

/// A `leaderboards` row before decoding.
struct RecordRow {
    username: String,
    difficulty: String,
    time: f64,
    timestamp_ms: i64,
    game_id: String,
    moves: u32,
    verified: bool,
}

impl RecordRow {
    fn into_record(self) -> StoreResult<LeaderboardRecord> {
        Ok(LeaderboardRecord {
            difficulty: parse_difficulty("leaderboards", &self.difficulty)?,
            timestamp: instant("leaderboards", self.timestamp_ms)?,
            username: self.username,
            time: self.time,
            game_id: self.game_id,
            moves: self.moves,
            verified: self.verified,
        })
    }
}

// =============================================================================
// RATE LIMITS
// =============================================================================

impl RateLimitRepository for SqliteStore {
    fn hit(
        &self,
        key: RateLimitKey,
        value: &str,
        limit: u32,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitDecision> {
        if limit == 0 {
            return Ok(RateLimitDecision::DENIED);
        }
        let now_ms = now.timestamp_millis();
        let expires_at_ms = now_ms.saturating_add(secs_to_millis(ttl_secs));

        let conn = self.conn.lock();
        conn.execute("DELETE FROM rate_limits WHERE expires_at_ms <= ?1", params![now_ms])
            .map_err(db_err)?;
        let count: Option<u32> = conn
            .query_row(HIT_COUNTER, params![key.as_str(), value, expires_at_ms, limit], |row| row.get(0))
            .optional()
            .map_err(db_err)?;

        Ok(match count {
            Some(count) => RateLimitDecision {
                allowed: true,
                remaining: limit.saturating_sub(count),
            },
            None => RateLimitDecision::DENIED,
        })
    }
}

// =============================================================================
// LEADERBOARD
// =============================================================================

impl LeaderboardRepository for SqliteStore {
    fn top(&self, difficulty: Difficulty, limit: usize) -> StoreResult<Vec<LeaderboardRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(SELECT_TOP).map_err(db_err)?;
        let rows = stmt
            .query_map(params![difficulty.as_str(), limit], |row| {
                Ok(RecordRow {
                    username: row.get(0)?,
                    difficulty: row.get(1)?,
                    time: row.get(2)?,
                    timestamp_ms: row.get(3)?,
                    game_id: row.get(4)?,
                    moves: row.get(5)?,
                    verified: row.get(6)?,
                })
            })
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(db_err)?.into_record()?);
        }
        Ok(records)
    }

    fn submit_best_time(&self, record: &LeaderboardRecord) -> StoreResult<BestTimeOutcome> {
        let tier = record.difficulty.as_str();
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let on_board: bool = tx
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM leaderboards WHERE difficulty = ?1 AND game_id = ?2)",
                params![tier, record.game_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        let fresh = !on_board
            && tx
                .execute(
                    "INSERT INTO scored_games (difficulty, game_id, username, scored_at_ms)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT (difficulty, game_id) DO NOTHING",
                    params![tier, record.game_id, record.username, record.timestamp.timestamp_millis()],
                )
                .map_err(db_err)?
                == 1;
        if !fresh {
            debug!(difficulty = tier, "Game id already scored");
            return Ok(BestTimeOutcome::Duplicate);
        }

        let changed = tx
            .execute(
                UPSERT_BEST_TIME,
                params![
                    tier,
                    record.username,
                    record.time,
                    record.timestamp.timestamp_millis(),
                    record.game_id,
                    record.moves,
                    record.verified,
                ],
            )
            .map_err(db_err)?;

        let outcome = if changed == 1 {
            BestTimeOutcome::Improved
        } else {
            let current_best: f64 = tx
                .query_row(
                    "SELECT time FROM leaderboards WHERE difficulty = ?1 AND username = ?2",
                    params![tier, record.username],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            BestTimeOutcome::NotImproved { current_best }
        };
        tx.commit().map_err(db_err)?;
        Ok(outcome)
    }
}

// =============================================================================
// USER STATS
// =============================================================================

impl UserStatsRepository for SqliteStore {
    fn load_stats(&self, username: &str, tier: Difficulty) -> StoreResult<Option<UserStats>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT submissions, best_time, average_time, total_time, last_submission_ms, suspicious_count
                 FROM user_stats WHERE username = ?1 AND difficulty = ?2",
                params![username, tier.as_str()],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, u32>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        let Some((submissions, best_time, average_time, total_time, last_ms, suspicious_count)) = row else {
            return Ok(None);
        };
        Ok(Some(UserStats {
            username: username.to_string(),
            difficulty: tier,
            submissions,
            best_time,
            average_time,
            total_time,
            last_submission: last_ms.map(|ms| instant("user_stats", ms)).transpose()?,
            suspicious_count,
        }))
    }

    fn save_stats(&self, stats: &UserStats, now: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            UPSERT_STATS,
            params![
                stats.username,
                stats.difficulty.as_str(),
                stats.submissions,
                stats.best_time,
                stats.average_time,
                stats.total_time,
                stats.last_submission.map(|t| t.timestamp_millis()),
                stats.suspicious_count,
                now.timestamp_millis(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

// =============================================================================
// MAINTENANCE
// =============================================================================

impl MaintenanceRepository for SqliteStore {
    fn purge_expired_rate_limits(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        self.conn
            .lock()
            .execute(
                "DELETE FROM rate_limits WHERE expires_at_ms <= ?1",
                params![now.timestamp_millis()],
            )
            .map_err(db_err)
    }

    fn purge_stale_user_stats(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.conn
            .lock()
            .execute(
                "DELETE FROM user_stats WHERE updated_at_ms < ?1",
                params![cutoff.timestamp_millis()],
            )
            .map_err(db_err)
    }

    fn table_counts(&self, now: DateTime<Utc>) -> StoreResult<TableCounts> {
        let counts: [i64; 5] = self
            .conn
            .lock()
            .query_row(
                "SELECT (SELECT COUNT(*) FROM leaderboards),
                        (SELECT COUNT(*) FROM user_stats),
                        (SELECT COUNT(*) FROM rate_limits),
                        (SELECT COUNT(*) FROM scored_games),
                        (SELECT COUNT(*) FROM rate_limits WHERE expires_at_ms <= ?1)",
                params![now.timestamp_millis()],
                |row| Ok([row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?]),
            )
            .map_err(db_err)?;
        let [leaderboards, user_stats, rate_limits, scored_games, expired_rate_limits] =
            counts.map(|n| u64::try_from(n).unwrap_or(0));
        Ok(TableCounts {
            leaderboards,
            user_stats,
            rate_limits,
            scored_games,
            expired_rate_limits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_557_600 + secs, 0).unwrap()
    }

    fn record(username: &str, time: f64, game_id: &str, secs: i64) -> LeaderboardRecord {
        LeaderboardRecord {
            username: username.to_string(),
            difficulty: Difficulty::Beginner,
            time,
            timestamp: at(secs),
            game_id: game_id.to_string(),
            moves: 20,
            verified: true,
        }
    }

    #[test]
    fn test_open_named_memory_path() {
        let store = SqliteStore::open(":memory:").unwrap();
        assert_eq!(store.table_counts(at(0)).unwrap(), TableCounts::default());
    }

    #[test]
    fn test_counter_allows_exactly_limit_hits() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut remaining = Vec::new();
        for _ in 0..3 {
            let d = store.hit(RateLimitKey::Ip, "10.0.0.1:7", 3, 120, at(0)).unwrap();
            assert!(d.allowed);
            remaining.push(d.remaining);
        }
        assert_eq!(remaining, vec![2, 1, 0]);
        assert_eq!(
            store.hit(RateLimitKey::Ip, "10.0.0.1:7", 3, 120, at(1)).unwrap(),
            RateLimitDecision::DENIED
        );
        // Same value on another tier is a different counter.
        assert!(store.hit(RateLimitKey::Fingerprint, "10.0.0.1:7", 3, 120, at(1)).unwrap().allowed);
    }

    #[test]
    fn test_denied_hits_do_not_consume_budget() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.hit(RateLimitKey::Global, "all:1", 1, 120, at(0)).unwrap().allowed);
        for _ in 0..5 {
            assert!(!store.hit(RateLimitKey::Global, "all:1", 1, 120, at(1)).unwrap().allowed);
        }
        let count: u32 = store
            .conn
            .lock()
            .query_row("SELECT count FROM rate_limits", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_expired_counter_is_purged_on_hit() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.hit(RateLimitKey::Ip, "a", 1, 60, at(0)).unwrap().allowed);
        assert!(!store.hit(RateLimitKey::Ip, "a", 1, 60, at(30)).unwrap().allowed);
        assert!(store.hit(RateLimitKey::Ip, "a", 1, 60, at(60)).unwrap().allowed);
    }

    #[test]
    fn test_best_time_only_improves() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.submit_best_time(&record("alice", 5.2, "g1", 0)).unwrap(), BestTimeOutcome::Improved);
        assert_eq!(
            store.submit_best_time(&record("alice", 6.0, "g2", 10)).unwrap(),
            BestTimeOutcome::NotImproved { current_best: 5.2 }
        );
        assert_eq!(
            store.submit_best_time(&record("alice", 5.2, "g3", 20)).unwrap(),
            BestTimeOutcome::NotImproved { current_best: 5.2 }
        );
        assert_eq!(store.submit_best_time(&record("alice", 4.9, "g4", 30)).unwrap(), BestTimeOutcome::Improved);

        let top = store.top(Difficulty::Beginner, 10).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].time, 4.9);
        assert_eq!(top[0].game_id, "g4");
        assert_eq!(top[0].timestamp, at(30));
    }

    #[test]
    fn test_game_id_is_scored_once() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.submit_best_time(&record("alice", 9.0, "g1", 0)).unwrap(), BestTimeOutcome::Improved);
        assert_eq!(store.submit_best_time(&record("alice", 8.0, "g1", 5)).unwrap(), BestTimeOutcome::Duplicate);
        // Another player replaying the same game is also refused.
        assert_eq!(store.submit_best_time(&record("bob", 7.0, "g1", 6)).unwrap(), BestTimeOutcome::Duplicate);
        // A superseded game id stays spent.
        assert!(matches!(
            store.submit_best_time(&record("alice", 8.5, "g2", 7)).unwrap(),
            BestTimeOutcome::Improved
        ));
        assert_eq!(store.submit_best_time(&record("alice", 1.0, "g1", 8)).unwrap(), BestTimeOutcome::Duplicate);
        assert_eq!(store.top(Difficulty::Beginner, 10).unwrap()[0].time, 8.5);
    }

    #[test]
    fn test_same_game_id_on_other_tier_is_independent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut expert = record("alice", 90.0, "g1", 0);
        expert.difficulty = Difficulty::Expert;
        assert_eq!(store.submit_best_time(&record("alice", 9.0, "g1", 0)).unwrap(), BestTimeOutcome::Improved);
        assert_eq!(store.submit_best_time(&expert).unwrap(), BestTimeOutcome::Improved);
    }

    #[test]
    fn test_top_orders_by_time_then_timestamp() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.submit_best_time(&record("carol", 7.5, "c", 2)).unwrap();
        store.submit_best_time(&record("bob", 6.25, "b", 5)).unwrap();
        store.submit_best_time(&record("alice", 6.25, "a", 1)).unwrap();
        let mut hidden = record("mallory", 1.5, "m", 0);
        hidden.verified = false;
        store.submit_best_time(&hidden).unwrap();

        let names: Vec<_> = store
            .top(Difficulty::Beginner, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.username)
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
        assert_eq!(store.top(Difficulty::Beginner, 2).unwrap().len(), 2);
        assert!(store.top(Difficulty::Expert, 10).unwrap().is_empty());
    }

    #[test]
    fn test_user_stats_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.load_stats("alice", Difficulty::Expert).unwrap(), None);

        let mut stats = UserStats::empty("alice", Difficulty::Expert);
        stats.submissions = 2;
        stats.best_time = Some(88.5);
        stats.total_time = 190.0;
        stats.average_time = 95.0;
        stats.last_submission = Some(at(42));
        stats.suspicious_count = 1;
        store.save_stats(&stats, at(42)).unwrap();
        assert_eq!(store.load_stats("alice", Difficulty::Expert).unwrap(), Some(stats.clone()));

        stats.suspicious_count = 0;
        store.save_stats(&stats, at(50)).unwrap();
        assert_eq!(store.load_stats("alice", Difficulty::Expert).unwrap().unwrap().suspicious_count, 0);
    }

    #[test]
    fn test_purges_and_counts() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.hit(RateLimitKey::Ip, "a", 5, 60, at(0)).unwrap();
        store.hit(RateLimitKey::Ip, "b", 5, 600, at(0)).unwrap();
        store.save_stats(&UserStats::empty("old", Difficulty::Beginner), at(0)).unwrap();
        store.save_stats(&UserStats::empty("new", Difficulty::Beginner), at(0) + Duration::days(40)).unwrap();
        store.submit_best_time(&record("alice", 9.0, "g1", 0)).unwrap();

        let later = at(0) + Duration::days(40);
        let counts = store.table_counts(later).unwrap();
        assert_eq!(counts.rate_limits, 2);
        assert_eq!(counts.expired_rate_limits, 2);
        assert_eq!(counts.user_stats, 2);
        assert_eq!(counts.scored_games, 1);
        assert_eq!(counts.leaderboards, 1);

        assert_eq!(store.purge_expired_rate_limits(at(120)).unwrap(), 1);
        assert_eq!(store.purge_stale_user_stats(later - Duration::days(30)).unwrap(), 1);
        // Idempotent.
        assert_eq!(store.purge_expired_rate_limits(later).unwrap(), 1);
        assert_eq!(store.purge_expired_rate_limits(later).unwrap(), 0);
        // Leaderboard rows and spent game ids are never purged.
        let counts = store.table_counts(later).unwrap();
        assert_eq!(counts.leaderboards, 1);
        assert_eq!(counts.scored_games, 1);
    }
}
