//! Gateway module - resilient dispatch, stats, and health reporting

pub mod dispatcher;
pub mod health_check;
pub mod stats;

pub use dispatcher::{
    GeneratedImage, GenerationFailure, GenerationResult, ProviderUsed, ResilientDispatcher,
};
pub use health_check::{HealthReport, HealthReporter};
pub use stats::{Counter, StatsRegistry, StatsSnapshot};
