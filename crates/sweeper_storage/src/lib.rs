//! # SWEEPER Storage - The Ledger
//!
//! Durable leaderboard state and the cache in front of it.
//!
//! ## Architecture
//!
//! ```text
//!   LeaderboardStore ──► Cache<Vec<LeaderboardRecord>>
//!          │
//!          ▼
//!   ┌───────────────┐      ┌──────────────────┐
//!   │  SqliteStore  │◄─────│ RateLimiter      │
//!   │  (rusqlite)   │◄─────│ BehaviorProfiler │
//!   │               │◄─────│ Housekeeper      │
//!   └───────────────┘      └──────────────────┘
//! ```
//!
//! ## Invariants
//!
//! - At most one record per `(difficulty, username)`, always the fastest
//! - A game id is scored at most once per tier
//! - A counter never passes its limit for an allowed request

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod leaderboard;
pub mod maintenance;
pub mod sqlite;

pub use cache::{Cache, CacheEntry, CacheStats};
pub use leaderboard::LeaderboardStore;
pub use maintenance::Housekeeper;
pub use sqlite::SqliteStore;
