//! Pull-based health reporting over dispatch stats and limiter state

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::gateway::stats::{StatsRegistry, StatsSnapshot};
use crate::queue::{ConcurrencyLimiter, LimiterStatus};

type StatsAccessor = Arc<dyn Fn() -> StatsSnapshot + Send + Sync>;
type LimiterAccessor = Arc<dyn Fn() -> LimiterStatus + Send + Sync>;

/// Liveness/readiness view assembled on demand
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// "ok" when ready, "busy" when the limiter queue is too deep
    pub status: &'static str,
    pub ready: bool,
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
    pub limiter: LimiterStatus,
    pub stats: StatsSnapshot,
}

/// Health reporter
///
/// Holds only accessor functions handed over at startup; it never
/// touches the dispatcher.
#[derive(Clone)]
pub struct HealthReporter {
    stats: StatsAccessor,
    limiter: LimiterAccessor,
    max_queue_depth: usize,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl HealthReporter {
    pub fn new(stats: StatsAccessor, limiter: LimiterAccessor, max_queue_depth: usize) -> Self {
        Self {
            stats,
            limiter,
            max_queue_depth,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Wire the reporter to a shared registry and limiter
    pub fn from_parts(
        stats: Arc<StatsRegistry>,
        limiter: Arc<ConcurrencyLimiter>,
        max_queue_depth: usize,
    ) -> Self {
        Self::new(
            Arc::new(move || stats.snapshot()),
            Arc::new(move || limiter.status()),
            max_queue_depth,
        )
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Ready while the limiter queue is within its configured depth
    pub fn is_ready(&self) -> bool {
        (self.limiter)().queued <= self.max_queue_depth
    }

    pub fn report(&self) -> HealthReport {
        let limiter = (self.limiter)();
        let ready = limiter.queued <= self.max_queue_depth;
        debug!(queued = limiter.queued, active = limiter.active, ready, "Health report requested");

        HealthReport {
            status: if ready { "ok" } else { "busy" },
            ready,
            uptime_secs: self.uptime_secs(),
            started_at: self.started_at,
            limiter,
            stats: (self.stats)(),
        }
    }
}
