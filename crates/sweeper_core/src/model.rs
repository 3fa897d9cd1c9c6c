//! # Data Model
//!
//! Records that are persisted (leaderboard entries, per-user statistics) and
//! the transient claim a client sends with every submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::difficulty::Difficulty;

/// One ranked entry: the best accepted time of a player on a tier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRecord {
    /// Validated, trimmed player name.
    pub username: String,
    /// Tier the record belongs to.
    pub difficulty: Difficulty,
    /// Seconds, at most three decimals.
    pub time: f64,
    /// When the record was accepted.
    pub timestamp: DateTime<Utc>,
    /// Opaque id of the game that produced this time.
    pub game_id: String,
    /// Clicks the player made.
    pub moves: u32,
    /// Passed every server-side check.
    pub verified: bool,
}

/// Longitudinal statistics of one player on one tier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    /// Player name.
    pub username: String,
    /// Tier.
    pub difficulty: Difficulty,
    /// Submissions that reached the profiler and were let through.
    pub submissions: u32,
    /// Fastest submitted time, if any.
    pub best_time: Option<f64>,
    /// `total_time / submissions`.
    pub average_time: f64,
    /// Sum of submitted times.
    pub total_time: f64,
    /// Instant of the last accepted submission.
    pub last_submission: Option<DateTime<Utc>>,
    /// Rapid-fire counter, decays by one per calm submission.
    pub suspicious_count: u32,
}

impl UserStats {
    /// Statistics of a player that never submitted.
    #[must_use]
    pub fn empty(username: impl Into<String>, difficulty: Difficulty) -> Self {
        Self {
            username: username.into(),
            difficulty,
            submissions: 0,
            best_time: None,
            average_time: 0.0,
            total_time: 0.0,
            last_submission: None,
            suspicious_count: 0,
        }
    }
}

/// Terminal state the client reports for its game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    /// All safe cells revealed.
    Won,
    /// A mine was hit.
    Lost,
    /// Still in progress.
    Playing,
}

impl GameState {
    /// Parses the wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "won" => Some(Self::Won),
            "lost" => Some(Self::Lost),
            "playing" => Some(Self::Playing),
            _ => None,
        }
    }
}

/// Board dimensions as claimed by the client.
///
/// Kept as floats: the claim is compared against the canonical table, never
/// used to size anything.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardSize {
    /// Claimed columns.
    pub width: f64,
    /// Claimed rows.
    pub height: f64,
}

/// The client-declared envelope describing a finished game.
///
/// Lives for one request. Produced by
/// [`crate::validation::validate_game_data`], consumed by the session and
/// score checks, never stored verbatim.
#[derive(Clone, Debug, PartialEq)]
pub struct GameSessionClaim {
    /// Tier named inside the envelope (`None` if it names no known tier).
    pub difficulty: Option<Difficulty>,
    /// Claimed elapsed seconds.
    pub time: f64,
    /// Claimed click count.
    pub moves: u32,
    /// Opaque game id.
    pub game_id: String,
    /// Session start (`None` when absent or unparseable).
    pub started_at: Option<DateTime<Utc>>,
    /// Claimed board dimensions.
    pub board_size: BoardSize,
    /// Claimed mine count.
    pub mine_count: f64,
    /// Epoch millis of the final click.
    pub game_end_time: f64,
    /// Epoch millis of the first click.
    pub first_click_time: f64,
    /// Claimed terminal state.
    pub game_state: GameState,
}

impl GameSessionClaim {
    /// Seconds between first and final click, per the client's own clock.
    #[inline]
    #[must_use]
    pub fn clicked_duration_secs(&self) -> f64 {
        (self.game_end_time - self.first_click_time) / 1000.0
    }
}
