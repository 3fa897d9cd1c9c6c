//! # Rate Limiting
//!
//! Fixed-window counters, one per tier, keyed by `raw key + time bucket`.
//!
//! ```text
//! absent ──hit──► counting ──window ends──► expired ──purge──► absent
//!                   │  ▲
//!                   └──┘ hit (count < limit)
//! ```
//!
//! A rejected request does not consume budget. The check-then-increment is
//! delegated to [`RateLimitRepository::hit`], which is atomic per key.
//!
//! Storage failures fail CLOSED: a counter that cannot be consulted denies.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sweeper_core::config::RateLimitSection;
use sweeper_core::{RateLimitDecision, RateLimitKey, RateLimitRepository, WindowLimit};
use tracing::{debug, error};

/// Raw key of the service-wide counter.
const GLOBAL_KEY: &str = "all";

/// Combined decision over every tier for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitVerdict {
    /// Every tier allowed the request.
    pub allowed: bool,
    /// Remaining budget on the fingerprint tier, for client backoff hints.
    pub remaining: u32,
    /// Tiers that refused.
    pub tripped: Vec<RateLimitKey>,
}

/// Multi-tier fixed-window limiter.
pub struct RateLimiter {
    /// Counter storage.
    store: Arc<dyn RateLimitRepository>,
    /// Per-tier ceilings.
    policy: RateLimitSection,
}

impl RateLimiter {
    /// Creates a limiter over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RateLimitRepository>, policy: RateLimitSection) -> Self {
        Self { store, policy }
    }

    /// Configured ceilings.
    #[must_use]
    pub const fn policy(&self) -> &RateLimitSection {
        &self.policy
    }

    /// Checks and, if allowed, consumes one unit on a single counter.
    #[must_use]
    pub fn check(&self, key: RateLimitKey, raw: &str, limit: WindowLimit, now: DateTime<Utc>) -> RateLimitDecision {
        if limit.limit == 0 {
            return RateLimitDecision::DENIED;
        }
        let window = limit.window_secs.max(1);
        let value = format!("{raw}:{}", bucket(now, window));
        match self.store.hit(key, &value, limit.limit, window, now) {
            Ok(decision) => {
                debug!(
                    tier = key.as_str(),
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "Rate limit counter checked"
                );
                decision
            }
            Err(err) => {
                error!(tier = key.as_str(), error = %err, "Rate limit store failed, denying");
                RateLimitDecision::DENIED
            }
        }
    }

    /// Evaluates the IP, fingerprint and global tiers.
    ///
    /// Every tier is consulted even once one has refused, so each counter
    /// keeps its own bookkeeping. The request proceeds only if all allow.
    #[must_use]
    pub fn check_request(&self, ip: &str, fingerprint: &str, now: DateTime<Utc>) -> RateLimitVerdict {
        let tiers = [
            (RateLimitKey::Ip, ip, self.policy.ip),
            (RateLimitKey::Fingerprint, fingerprint, self.policy.fingerprint),
            (RateLimitKey::Global, GLOBAL_KEY, self.policy.global),
        ];

        let mut verdict = RateLimitVerdict {
            allowed: true,
            remaining: 0,
            tripped: Vec::new(),
        };
        for (key, raw, limit) in tiers {
            let decision = self.check(key, raw, limit, now);
            if key == RateLimitKey::Fingerprint {
                verdict.remaining = decision.remaining;
            }
            if !decision.allowed {
                verdict.allowed = false;
                verdict.tripped.push(key);
            }
        }
        verdict
    }
}

/// Index of the fixed window containing `now`.
#[inline]
#[must_use]
pub fn bucket(now: DateTime<Utc>, window_secs: u64) -> i64 {
    let window = i64::try_from(window_secs.max(1)).unwrap_or(i64::MAX);
    now.timestamp().div_euclid(window)
}
