//! # SWEEPER Core
//!
//! Types shared by every part of the leaderboard backend.
//!
//! ## Trust Model
//!
//! ```text
//! CLIENT                                SERVER
//!   |                                      |
//!   |--- "I won beginner in 5.2s" -------->|
//!   |                                      | <- validation (this crate)
//!   |                                      | <- plausibility (sweeper_security)
//!   |                                      | <- conditional write (sweeper_storage)
//!   |<-- top 20 + rank --------------------|
//! ```
//!
//! The game runs entirely in the browser. Everything the client sends is an
//! untrusted claim; this crate only knows how to describe and shape-check it.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod difficulty;
pub mod error;
pub mod model;
pub mod store;
pub mod validation;

pub use config::{ConfigError, HashChoice, SweeperConfig, WindowLimit};
pub use difficulty::{BoardSpec, Difficulty};
pub use error::{ErrorCode, StoreError, StoreResult};
pub use model::{BoardSize, GameSessionClaim, GameState, LeaderboardRecord, UserStats};
pub use store::{
    BestTimeOutcome, HealthReport, HealthStatus, LeaderboardRepository, MaintenanceReport,
    MaintenanceRepository, RateLimitDecision, RateLimitKey, RateLimitRepository, TableCounts,
    UserStatsRepository,
};
pub use validation::InvalidField;

/// Milliseconds in one second.
pub const MILLIS_PER_SECOND: i64 = 1_000;

/// Number of records returned by a leaderboard read unless configured otherwise.
pub const DEFAULT_TOP_N: usize = 20;
