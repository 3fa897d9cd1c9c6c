//! # Housekeeping
//!
//! Runs inline with normal traffic, never on a background timer. Every
//! step is a plain `DELETE .. WHERE`, so concurrent passes are harmless.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sweeper_core::config::MaintenanceSection;
use sweeper_core::{HealthReport, MaintenanceReport, MaintenanceRepository, StoreResult};
use tracing::info;

/// Purges expired and stale rows.
pub struct Housekeeper {
    store: Arc<dyn MaintenanceRepository>,
    policy: MaintenanceSection,
}

impl Housekeeper {
    /// Creates a housekeeper over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn MaintenanceRepository>, policy: MaintenanceSection) -> Self {
        Self { store, policy }
    }

    /// Whether the `n`-th accepted submission should trigger a pass.
    #[must_use]
    pub const fn is_due(&self, n: u64) -> bool {
        let every = self.policy.every_n_submissions;
        every > 0 && n > 0 && n % every == 0
    }

    /// Purges expired counters and stale stats. Spent game ids stay.
    ///
    /// # Errors
    ///
    /// Returns the first storage failure; earlier steps stay applied.
    pub fn run(&self, now: DateTime<Utc>) -> StoreResult<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        report.record(
            "expired rate limit counters",
            self.store.purge_expired_rate_limits(now)?,
        );
        report.record(
            "stale user stats",
            self.store
                .purge_stale_user_stats(now - Duration::days(i64::from(self.policy.user_stats_retention_days)))?,
        );
        if report.total_cleaned > 0 {
            info!(total_cleaned = report.total_cleaned, actions = ?report.actions, "Maintenance pass");
        }
        Ok(report)
    }

    /// Current store health.
    ///
    /// # Errors
    ///
    /// Returns a storage failure.
    pub fn health(&self, now: DateTime<Utc>) -> StoreResult<HealthReport> {
        Ok(HealthReport::from_counts(self.store.table_counts(now)?))
    }
}
