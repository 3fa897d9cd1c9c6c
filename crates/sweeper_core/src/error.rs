//! # Error Types
//!
//! Wire error codes and the storage failure type shared by every crate.

use serde::Serialize;
use thiserror::Error;

/// Stable, machine-readable error identifiers sent to clients.
///
/// The message attached to each code is generic on purpose: the real
/// diagnostic only ever goes to the server log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Username failed validation.
    InvalidUsername,
    /// Time failed validation.
    InvalidTime,
    /// Difficulty failed validation.
    InvalidDifficulty,
    /// Game-data envelope failed validation.
    InvalidGameData,
    /// No game-data envelope was supplied.
    MissingGameData,
    /// A rate-limit tier is exhausted.
    RateLimitExceeded,
    /// Session or score plausibility check failed.
    UnreasonableScore,
    /// Behavioural throttle tripped.
    SuspiciousBehavior,
    /// The game id was already scored.
    DuplicateGame,
    /// Internal failure.
    ServerError,
    /// Unknown route.
    NotFound,
    /// Unsupported method on a known route.
    MethodNotAllowed,
}

impl ErrorCode {
    /// Wire identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUsername => "INVALID_USERNAME",
            Self::InvalidTime => "INVALID_TIME",
            Self::InvalidDifficulty => "INVALID_DIFFICULTY",
            Self::InvalidGameData => "INVALID_GAME_DATA",
            Self::MissingGameData => "MISSING_GAME_DATA",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::UnreasonableScore => "UNREASONABLE_SCORE",
            Self::SuspiciousBehavior => "SUSPICIOUS_BEHAVIOR",
            Self::DuplicateGame => "DUPLICATE_GAME",
            Self::ServerError => "SERVER_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
        }
    }

    /// HTTP status for this error class.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::InvalidUsername
            | Self::InvalidTime
            | Self::InvalidDifficulty
            | Self::InvalidGameData
            | Self::MissingGameData
            | Self::UnreasonableScore
            | Self::DuplicateGame => 400,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::RateLimitExceeded | Self::SuspiciousBehavior => 429,
            Self::ServerError => 500,
        }
    }

    /// User-safe message. Never contains request data.
    #[must_use]
    pub const fn public_message(self) -> &'static str {
        match self {
            Self::InvalidUsername => "Username is not valid",
            Self::InvalidTime => "Time is not valid",
            Self::InvalidDifficulty => "Difficulty is not valid",
            Self::InvalidGameData => "Game data is not valid",
            Self::MissingGameData => "Game data is missing",
            Self::RateLimitExceeded => "Too many requests, please retry later",
            Self::UnreasonableScore => "Score could not be verified",
            Self::SuspiciousBehavior => "Unusual activity detected, please take a break",
            Self::DuplicateGame => "This game has already been submitted",
            Self::ServerError => "Service temporarily unavailable",
            Self::NotFound => "Resource not found",
            Self::MethodNotAllowed => "Method not allowed",
        }
    }
}

/// Errors raised by the storage collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend rejected or failed a statement.
    #[error("storage backend failure: {0}")]
    Backend(String),

    /// A stored row could not be decoded.
    #[error("corrupt row in {table}: {reason}")]
    Corrupt {
        /// Table the row came from.
        table: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// Database lock contention.
    #[error("database busy, try again")]
    Busy,
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes_map_to_status() {
        assert_eq!(ErrorCode::InvalidUsername.http_status(), 400);
        assert_eq!(ErrorCode::DuplicateGame.http_status(), 400);
        assert_eq!(ErrorCode::RateLimitExceeded.http_status(), 429);
        assert_eq!(ErrorCode::SuspiciousBehavior.http_status(), 429);
        assert_eq!(ErrorCode::ServerError.http_status(), 500);
    }

    #[test]
    fn test_code_serializes_as_wire_identifier() {
        for code in [ErrorCode::UnreasonableScore, ErrorCode::MethodNotAllowed] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }
}
