//! Queue module - FIFO concurrency limiter for backend calls

pub mod limiter;

pub use limiter::{ConcurrencyLimiter, LimiterStatus};
