//! Resilient image generation dispatch
//!
//! Calls a bursty primary image backend through a FIFO concurrency
//! limiter, classifies its failures, retries transient ones locally and
//! fails over to a secondary backend once the primary's budget is spent.
//! Dispatch counters and limiter state are exposed to a pull-based health
//! surface.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod queue;
pub mod resilience;
pub mod response;

pub use error::{AppError, Result};

use std::sync::Arc;
use tracing::info;

use backend::build_backend;
use gateway::{HealthReporter, ResilientDispatcher, StatsRegistry};
use queue::ConcurrencyLimiter;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: config::Settings,
    pub dispatcher: Arc<ResilientDispatcher>,
    pub health: HealthReporter,
}

impl AppState {
    /// Wire backends, limiter, stats and health reporting from settings.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_settings(settings: config::Settings) -> Result<Self> {
        let primary = build_backend(&settings.backends.primary)?;
        let secondary = settings
            .backends
            .secondary
            .as_ref()
            .map(build_backend)
            .transpose()?;

        let limiter = Arc::new(ConcurrencyLimiter::from_config(&settings.limiter));
        let stats = Arc::new(StatsRegistry::new());
        let health = HealthReporter::from_parts(
            stats.clone(),
            limiter.clone(),
            settings.health.max_queue_depth,
        );

        let dispatcher = Arc::new(ResilientDispatcher::new(
            primary,
            secondary,
            limiter,
            stats,
            settings.dispatch.clone(),
        ));

        info!(
            concurrency = settings.limiter.concurrency,
            min_time_ms = settings.limiter.min_time_ms,
            max_rounds = settings.dispatch.max_rounds,
            secondary = settings.backends.secondary.is_some(),
            budget_secs = dispatcher.execution_budget().as_secs(),
            "Dispatcher ready"
        );

        Ok(Self {
            settings,
            dispatcher,
            health,
        })
    }
}
