//! # Session Authentication
//!
//! Walks the client's game envelope through a fixed sequence of gates. The
//! first failing gate short-circuits to a [`Rejection`].
//!
//! ```text
//! Received
//!    │ required fields, state == won
//!    ▼
//! StructurallyValid
//!    │ session age, clicked duration vs claimed time
//!    ▼
//! TemporallyValid
//!    │ board and mines match the tier
//!    ▼
//! BoardConsistent
//!    │ min/max moves, seconds per move
//!    ▼
//! MoveConsistent ──► Accepted
//! ```
//!
//! Tolerances are loose on purpose: clocks drift and slow clients exist.
//! Only gross inconsistencies are caught here.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use sweeper_core::{Difficulty, GameSessionClaim, GameState};
use thiserror::Error;

/// How bad a failed check looks. Logged, never acted on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Passed.
    None,
    /// Probably a slow or odd but honest player.
    Low,
    /// Unusual.
    Medium,
    /// Very likely tampered.
    High,
    /// Impossible for a genuine game.
    Critical,
}

impl Severity {
    /// Log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed plausibility gate.
#[derive(Error, Clone, Debug, PartialEq)]
#[error("{check} rejected ({severity}): {reason}")]
pub struct Rejection {
    /// Gate that failed.
    pub check: &'static str,
    /// Internal diagnostic. Server logs only.
    pub reason: String,
    /// Advisory severity.
    pub severity: Severity,
}

impl Rejection {
    /// Creates a rejection.
    #[must_use]
    pub fn new(check: &'static str, severity: Severity, reason: impl Into<String>) -> Self {
        Self {
            check,
            reason: reason.into(),
            severity,
        }
    }
}

/// Progress of a claim through the gates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionStage {
    /// Nothing checked yet.
    Received,
    /// Required fields present, game won.
    StructurallyValid,
    /// Age and duration plausible.
    TemporallyValid,
    /// Board matches the tier.
    BoardConsistent,
    /// Move counts plausible.
    MoveConsistent,
    /// Every gate passed.
    Accepted,
}

/// Tolerances of the session gates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionPolicy {
    /// Oldest acceptable session start.
    pub max_session_age: Duration,
    /// Allowed gap between clicked duration and claimed time.
    pub duration_tolerance_secs: f64,
    /// Human reaction floor per move.
    pub min_secs_per_move: f64,
    /// Idle ceiling per move.
    pub max_secs_per_move: f64,
    /// Click ceiling as a multiple of the cell count.
    pub max_moves_per_cell: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_session_age: Duration::days(7),
            duration_tolerance_secs: 60.0,
            min_secs_per_move: 0.05,
            max_secs_per_move: 60.0,
            max_moves_per_cell: 2,
        }
    }
}

/// Gatekeeper for game envelopes.
#[derive(Clone, Debug, Default)]
pub struct SessionAuthenticator {
    policy: SessionPolicy,
}

type GateResult = Result<SessionStage, Rejection>;

impl SessionAuthenticator {
    /// Creates an authenticator.
    #[must_use]
    pub const fn new(policy: SessionPolicy) -> Self {
        Self { policy }
    }

    /// Runs every gate for a game submitted on `difficulty`.
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] of the first failing gate.
    pub fn authenticate(&self, claim: &GameSessionClaim, difficulty: Difficulty, now: DateTime<Utc>) -> GateResult {
        Self::structural(claim)?;
        self.temporal(claim, now)?;
        Self::board(claim, difficulty)?;
        self.moves(claim, difficulty)?;
        Ok(SessionStage::Accepted)
    }

    #[allow(clippy::float_cmp)]
    fn structural(claim: &GameSessionClaim) -> GateResult {
        if claim.game_id.is_empty()
            || claim.started_at.is_none()
            || claim.game_end_time == 0.0
            || claim.first_click_time == 0.0
        {
            return Err(Rejection::new(
                "required_fields",
                Severity::Critical,
                "missing gameId, timestamp, gameEndTime or firstClickTime",
            ));
        }
        if claim.game_state != GameState::Won {
            return Err(Rejection::new(
                "game_state",
                Severity::High,
                format!("game state is {:?}, only won games are ranked", claim.game_state),
            ));
        }
        Ok(SessionStage::StructurallyValid)
    }

    fn temporal(&self, claim: &GameSessionClaim, now: DateTime<Utc>) -> GateResult {
        if let Some(started_at) = claim.started_at {
            let age = now - started_at;
            if age > self.policy.max_session_age {
                return Err(Rejection::new(
                    "session_age",
                    Severity::Medium,
                    format!("session started {} hours ago", age.num_hours()),
                ));
            }
        }

        let clicked = claim.clicked_duration_secs();
        let drift = (clicked - claim.time).abs();
        if drift > self.policy.duration_tolerance_secs {
            return Err(Rejection::new(
                "duration",
                Severity::High,
                format!("clicked for {clicked:.3}s but claims {:.3}s", claim.time),
            ));
        }
        Ok(SessionStage::TemporallyValid)
    }

    #[allow(clippy::float_cmp)]
    fn board(claim: &GameSessionClaim, difficulty: Difficulty) -> GateResult {
        if claim.difficulty != Some(difficulty) {
            return Err(Rejection::new(
                "board",
                Severity::Critical,
                format!("game claims {:?} but was submitted as {difficulty}", claim.difficulty),
            ));
        }
        let spec = difficulty.board();
        let size = claim.board_size;
        if size.width != f64::from(spec.width)
            || size.height != f64::from(spec.height)
            || claim.mine_count != f64::from(spec.mines)
        {
            return Err(Rejection::new(
                "board",
                Severity::Critical,
                format!(
                    "{}x{} with {} mines does not match {difficulty} ({}x{}, {} mines)",
                    size.width, size.height, claim.mine_count, spec.width, spec.height, spec.mines
                ),
            ));
        }
        Ok(SessionStage::BoardConsistent)
    }

    fn moves(&self, claim: &GameSessionClaim, difficulty: Difficulty) -> GateResult {
        let min = difficulty.min_moves();
        if claim.moves < min {
            return Err(Rejection::new(
                "min_moves",
                Severity::Critical,
                format!("{} moves, {difficulty} needs at least {min}", claim.moves),
            ));
        }

        let max = difficulty.board().cells().saturating_mul(self.policy.max_moves_per_cell);
        if claim.moves > max {
            return Err(Rejection::new(
                "max_moves",
                Severity::Medium,
                format!("{} moves exceeds {max}", claim.moves),
            ));
        }

        let per_move = claim.time / f64::from(claim.moves);
        if per_move < self.policy.min_secs_per_move {
            return Err(Rejection::new(
                "move_rate",
                Severity::Critical,
                format!("{per_move:.4}s per move is below human reaction time"),
            ));
        }
        if per_move > self.policy.max_secs_per_move {
            return Err(Rejection::new(
                "move_rate",
                Severity::Low,
                format!("{per_move:.1}s per move"),
            ));
        }
        Ok(SessionStage::MoveConsistent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sweeper_core::BoardSize;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn beginner_claim() -> GameSessionClaim {
        let end = now().timestamp_millis() as f64 - 1_000.0;
        GameSessionClaim {
            difficulty: Some(Difficulty::Beginner),
            time: 5.2,
            moves: 12,
            game_id: "g1".to_string(),
            started_at: Some(now() - Duration::seconds(30)),
            board_size: BoardSize { width: 9.0, height: 9.0 },
            mine_count: 10.0,
            game_end_time: end,
            first_click_time: end - 5_200.0,
            game_state: GameState::Won,
        }
    }

    fn check(claim: &GameSessionClaim, difficulty: Difficulty) -> GateResult {
        SessionAuthenticator::default().authenticate(claim, difficulty, now())
    }

    #[test]
    fn test_genuine_game_is_accepted() {
        assert_eq!(check(&beginner_claim(), Difficulty::Beginner), Ok(SessionStage::Accepted));
    }

    #[test]
    fn test_missing_start_fails_first_gate() {
        let mut claim = beginner_claim();
        claim.started_at = None;
        claim.game_state = GameState::Lost;
        let err = check(&claim, Difficulty::Beginner).unwrap_err();
        assert_eq!(err.check, "required_fields");
        assert_eq!(err.severity, Severity::Critical);
    }

    #[test]
    fn test_lost_game_is_rejected() {
        let mut claim = beginner_claim();
        claim.game_state = GameState::Lost;
        let err = check(&claim, Difficulty::Beginner).unwrap_err();
        assert_eq!((err.check, err.severity), ("game_state", Severity::High));
    }

    #[test]
    fn test_stale_session_is_rejected() {
        let mut claim = beginner_claim();
        claim.started_at = Some(now() - Duration::days(8));
        let err = check(&claim, Difficulty::Beginner).unwrap_err();
        assert_eq!((err.check, err.severity), ("session_age", Severity::Medium));
    }

    #[test]
    fn test_duration_tolerance() {
        let mut claim = beginner_claim();
        claim.first_click_time = claim.game_end_time - 60_000.0;
        claim.time = 5.2;
        // 54.8s drift is inside the window.
        assert!(check(&claim, Difficulty::Beginner).is_ok());

        claim.first_click_time = claim.game_end_time - 70_000.0;
        let err = check(&claim, Difficulty::Beginner).unwrap_err();
        assert_eq!((err.check, err.severity), ("duration", Severity::High));
    }

    #[test]
    fn test_expert_claim_on_beginner_board_is_critical() {
        let mut claim = beginner_claim();
        claim.difficulty = Some(Difficulty::Expert);
        claim.moves = 40;
        let err = check(&claim, Difficulty::Expert).unwrap_err();
        assert_eq!((err.check, err.severity), ("board", Severity::Critical));
    }

    #[test]
    fn test_claim_difficulty_must_match_route() {
        let err = check(&beginner_claim(), Difficulty::Intermediate).unwrap_err();
        assert_eq!(err.check, "board");
    }

    #[test]
    fn test_wrong_mine_count_is_rejected() {
        let mut claim = beginner_claim();
        claim.mine_count = 9.0;
        assert_eq!(check(&claim, Difficulty::Beginner).unwrap_err().check, "board");
    }

    #[test]
    fn test_move_bounds() {
        let mut claim = beginner_claim();
        claim.moves = 7;
        let err = check(&claim, Difficulty::Beginner).unwrap_err();
        assert_eq!((err.check, err.severity), ("min_moves", Severity::Critical));

        claim.moves = 163;
        let err = check(&claim, Difficulty::Beginner).unwrap_err();
        assert_eq!((err.check, err.severity), ("max_moves", Severity::Medium));

        claim.moves = 162;
        claim.time = 10.0;
        claim.first_click_time = claim.game_end_time - 10_000.0;
        assert!(check(&claim, Difficulty::Beginner).is_ok());
    }

    #[test]
    fn test_superhuman_click_rate_is_critical() {
        let mut claim = beginner_claim();
        claim.time = 1.0;
        claim.first_click_time = claim.game_end_time - 1_000.0;
        claim.moves = 40;
        let err = check(&claim, Difficulty::Beginner).unwrap_err();
        assert_eq!((err.check, err.severity), ("move_rate", Severity::Critical));
    }

    #[test]
    fn test_idle_game_is_low_severity() {
        let mut claim = beginner_claim();
        claim.time = 900.0;
        claim.first_click_time = claim.game_end_time - 900_000.0;
        claim.moves = 10;
        let err = check(&claim, Difficulty::Beginner).unwrap_err();
        assert_eq!((err.check, err.severity), ("move_rate", Severity::Low));
    }

    #[test]
    fn test_rejection_display_carries_gate() {
        let rejection = Rejection::new("board", Severity::Critical, "9x9");
        assert_eq!(rejection.to_string(), "board rejected (critical): 9x9");
    }
}
