//! # SWEEPER Server - The Front Desk
//!
//! Accepts finished games from untrusted clients and decides whether they
//! reach the leaderboard.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP (axum) ──► SubmissionOrchestrator ──► sweeper_security (referees)
//!                          │
//!                          └──────────────► sweeper_storage (ledger + cache)
//! ```
//!
//! One orchestrator per process, shared by every request behind an `Arc`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod http;
pub mod orchestrator;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

pub use http::{router, ApiError};
pub use orchestrator::{BoardView, SubmissionError, SubmissionOrchestrator, SubmissionReceipt, SubmissionResult};

/// Serves the API on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns the listener's I/O error.
pub async fn serve<F>(listener: TcpListener, orchestrator: Arc<SubmissionOrchestrator>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        router(orchestrator).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
