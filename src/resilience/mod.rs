//! Resilience primitives - backoff retry and failure classification

pub mod backoff;
pub mod classifier;

pub use backoff::{BackoffRetrier, RetryPolicy};
pub use classifier::{classify, Classification, ErrorKind};
