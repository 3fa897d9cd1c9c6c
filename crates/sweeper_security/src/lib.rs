//! # SWEEPER Security - The Referee
//!
//! Everything that stands between an untrusted "I won" and the leaderboard.
//!
//! ## Features
//!
//! - **Fingerprinting**: Heuristic grouping key from request metadata
//! - **Rate Limiting**: Per-IP, per-fingerprint and global fixed windows
//! - **Session Authentication**: Gate-by-gate check of the game envelope
//! - **Score Audit**: Per-tier bounds and world-record floor
//! - **Behaviour Profiling**: Throttles players who submit too often
//!
//! ## Pipeline
//!
//! ```text
//! REQUEST
//!    │
//!    ├─► Fingerprinter ──► RateLimiter ─────────► 429
//!    │
//!    ├─► SessionAuthenticator ─┐
//!    │                         ├─ any rejection ─► 400 UNREASONABLE_SCORE
//!    ├─► ScoreAuditor ─────────┘
//!    │
//!    └─► BehaviorProfiler ────── temporary block ─► 429
//! ```
//!
//! Severity on a [`Rejection`] is advisory: it goes to the log, never changes
//! the control flow.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod behavior;
pub mod fingerprint;
pub mod rate_limit;
pub mod session;

pub use audit::{ScoreAuditor, ScoreBounds};
pub use behavior::{BehaviorProfiler, BehaviorVerdict};
pub use fingerprint::{secure_compare, ClientMeta, Fingerprinter, HashProvider};
pub use rate_limit::{RateLimitVerdict, RateLimiter};
pub use session::{Rejection, SessionAuthenticator, SessionPolicy, SessionStage, Severity};
