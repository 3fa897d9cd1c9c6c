//! # Score Audit
//!
//! Looks at `(time, difficulty)` only, independent of the session envelope.
//!
//! | Tier         | Floor | Ceiling | World record |
//! |--------------|-------|---------|--------------|
//! | beginner     | 1 s   | 999 s   | 0.49 s       |
//! | intermediate | 3 s   | 1999 s  | 7.03 s       |
//! | expert       | 5 s   | 2999 s  | 31.133 s     |
//!
//! Whole-second times under twice the world record are flagged as
//! fabricated round numbers. That filter is coarse and can hit genuine
//! elite play.

use sweeper_core::Difficulty;

use crate::session::{Rejection, Severity};

/// Plausible time range of one tier.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoreBounds {
    /// Fastest time accepted at all.
    pub min_secs: f64,
    /// Slowest time accepted.
    pub max_secs: f64,
    /// Reference world record.
    pub world_record_secs: f64,
}

impl ScoreBounds {
    /// Bounds of `difficulty`.
    #[must_use]
    pub const fn for_difficulty(difficulty: Difficulty) -> Self {
        match difficulty {
            Difficulty::Beginner => Self {
                min_secs: 1.0,
                max_secs: 999.0,
                world_record_secs: 0.49,
            },
            Difficulty::Intermediate => Self {
                min_secs: 3.0,
                max_secs: 1999.0,
                world_record_secs: 7.03,
            },
            Difficulty::Expert => Self {
                min_secs: 5.0,
                max_secs: 2999.0,
                world_record_secs: 31.133,
            },
        }
    }
}

/// Stateless bounds checker.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScoreAuditor;

impl ScoreAuditor {
    /// Checks a normalized time against the bounds of its tier.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] describing the first violated bound.
    #[allow(clippy::float_cmp)]
    pub fn audit(self, time: f64, difficulty: Difficulty) -> Result<(), Rejection> {
        let bounds = ScoreBounds::for_difficulty(difficulty);

        if time < bounds.min_secs {
            return Err(Rejection::new(
                "score_floor",
                Severity::High,
                format!("{time}s is below the {difficulty} floor of {}s", bounds.min_secs),
            ));
        }
        if time > bounds.max_secs {
            return Err(Rejection::new(
                "score_ceiling",
                Severity::Low,
                format!("{time}s is above the {difficulty} ceiling of {}s", bounds.max_secs),
            ));
        }
        if time < bounds.world_record_secs {
            return Err(Rejection::new(
                "world_record",
                Severity::Critical,
                format!("{time}s beats the {difficulty} world record of {}s", bounds.world_record_secs),
            ));
        }
        if time.fract() == 0.0 && time < bounds.world_record_secs * 2.0 {
            return Err(Rejection::new(
                "round_number",
                Severity::Medium,
                format!("suspiciously round {time}s near the {difficulty} record"),
            ));
        }
        Ok(())
    }
}
