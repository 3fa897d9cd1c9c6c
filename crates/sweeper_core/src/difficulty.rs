//! # Difficulty Tiers
//!
//! The three fixed board configurations. Every leaderboard, stats row and
//! plausibility bound is keyed by one of these.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical board configuration of a tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoardSpec {
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
    /// Mines hidden on the board.
    pub mines: u32,
}

impl BoardSpec {
    /// Number of cells on the board.
    #[inline]
    #[must_use]
    pub const fn cells(self) -> u32 {
        self.width * self.height
    }
}

/// A difficulty tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// 9x9, 10 mines.
    Beginner,
    /// 16x16, 40 mines.
    Intermediate,
    /// 30x16, 99 mines.
    Expert,
}

impl Difficulty {
    /// All tiers, easiest first.
    pub const ALL: [Self; 3] = [Self::Beginner, Self::Intermediate, Self::Expert];

    /// Wire / storage name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Expert => "expert",
        }
    }

    /// Exact, case-sensitive lookup by wire name.
    ///
    /// Callers that accept user input go through
    /// [`crate::validation::validate_difficulty`], which trims and lowercases first.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == name)
    }

    /// The board every game of this tier is played on.
    #[must_use]
    pub const fn board(self) -> BoardSpec {
        match self {
            Self::Beginner => BoardSpec { width: 9, height: 9, mines: 10 },
            Self::Intermediate => BoardSpec { width: 16, height: 16, mines: 40 },
            Self::Expert => BoardSpec { width: 30, height: 16, mines: 99 },
        }
    }

    /// Fewest clicks a genuine win of this tier can take.
    #[must_use]
    pub const fn min_moves(self) -> u32 {
        match self {
            Self::Beginner => 8,
            Self::Intermediate => 15,
            Self::Expert => 25,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_boards() {
        assert_eq!(Difficulty::Beginner.board(), BoardSpec { width: 9, height: 9, mines: 10 });
        assert_eq!(Difficulty::Intermediate.board().cells(), 256);
        assert_eq!(Difficulty::Expert.board().mines, 99);
    }

    #[test]
    fn test_name_lookup_is_exact() {
        assert_eq!(Difficulty::from_name("expert"), Some(Difficulty::Expert));
        assert_eq!(Difficulty::from_name("Expert"), None);
        assert_eq!(Difficulty::from_name(" expert"), None);
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Difficulty::Intermediate).unwrap();
        assert_eq!(json, "\"intermediate\"");
    }
}
