//! Dispatch counters shared with the health surface

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::resilience::ErrorKind;

const COUNTER_COUNT: usize = 13;

/// Names of the counters kept by [`StatsRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Requests,
    PrimarySuccess,
    PrimaryFailed,
    PrimaryOverloads,
    PrimaryTimeouts,
    PrimaryQuotaExceeded,
    PrimaryNetworkErrors,
    PrimaryInternalErrors,
    ContentBlocked,
    SiegeRounds,
    SecondaryAttempts,
    SecondarySuccess,
    SecondaryFailed,
}

impl Counter {
    pub const ALL: [Counter; COUNTER_COUNT] = [
        Counter::Requests,
        Counter::PrimarySuccess,
        Counter::PrimaryFailed,
        Counter::PrimaryOverloads,
        Counter::PrimaryTimeouts,
        Counter::PrimaryQuotaExceeded,
        Counter::PrimaryNetworkErrors,
        Counter::PrimaryInternalErrors,
        Counter::ContentBlocked,
        Counter::SiegeRounds,
        Counter::SecondaryAttempts,
        Counter::SecondarySuccess,
        Counter::SecondaryFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Counter::Requests => "requests",
            Counter::PrimarySuccess => "primary_success",
            Counter::PrimaryFailed => "primary_failed",
            Counter::PrimaryOverloads => "primary_overloads",
            Counter::PrimaryTimeouts => "primary_timeouts",
            Counter::PrimaryQuotaExceeded => "primary_quota_exceeded",
            Counter::PrimaryNetworkErrors => "primary_network_errors",
            Counter::PrimaryInternalErrors => "primary_internal_errors",
            Counter::ContentBlocked => "content_blocked",
            Counter::SiegeRounds => "siege_rounds",
            Counter::SecondaryAttempts => "secondary_attempts",
            Counter::SecondarySuccess => "secondary_success",
            Counter::SecondaryFailed => "secondary_failed",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    /// Per-kind counter bumped for each failed primary attempt, if any
    pub fn for_primary_failure(kind: ErrorKind) -> Option<Counter> {
        match kind {
            ErrorKind::Overloaded => Some(Counter::PrimaryOverloads),
            ErrorKind::Timeout => Some(Counter::PrimaryTimeouts),
            ErrorKind::QuotaExceeded => Some(Counter::PrimaryQuotaExceeded),
            ErrorKind::NetworkError => Some(Counter::PrimaryNetworkErrors),
            ErrorKind::InternalError => Some(Counter::PrimaryInternalErrors),
            ErrorKind::ContentBlocked => Some(Counter::ContentBlocked),
            ErrorKind::HttpError { .. } | ErrorKind::Fatal { .. } => None,
        }
    }
}

/// Copy of every counter at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub primary_success: u64,
    pub primary_failed: u64,
    pub primary_overloads: u64,
    pub primary_timeouts: u64,
    pub primary_quota_exceeded: u64,
    pub primary_network_errors: u64,
    pub primary_internal_errors: u64,
    pub content_blocked: u64,
    pub siege_rounds: u64,
    pub secondary_attempts: u64,
    pub secondary_success: u64,
    pub secondary_failed: u64,
    /// When counting started, or the last operator reset
    pub since: Option<DateTime<Utc>>,
}

impl StatsSnapshot {
    pub fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::Requests => self.requests,
            Counter::PrimarySuccess => self.primary_success,
            Counter::PrimaryFailed => self.primary_failed,
            Counter::PrimaryOverloads => self.primary_overloads,
            Counter::PrimaryTimeouts => self.primary_timeouts,
            Counter::PrimaryQuotaExceeded => self.primary_quota_exceeded,
            Counter::PrimaryNetworkErrors => self.primary_network_errors,
            Counter::PrimaryInternalErrors => self.primary_internal_errors,
            Counter::ContentBlocked => self.content_blocked,
            Counter::SiegeRounds => self.siege_rounds,
            Counter::SecondaryAttempts => self.secondary_attempts,
            Counter::SecondarySuccess => self.secondary_success,
            Counter::SecondaryFailed => self.secondary_failed,
        }
    }
}

/// Monotonic process-lifetime counters
///
/// Observability only; nothing in the dispatch path reads these back.
pub struct StatsRegistry {
    counters: [AtomicU64; COUNTER_COUNT],
    since: RwLock<DateTime<Utc>>,
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            since: RwLock::new(Utc::now()),
        }
    }

    pub fn increment(&self, counter: Counter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.get(Counter::Requests),
            primary_success: self.get(Counter::PrimarySuccess),
            primary_failed: self.get(Counter::PrimaryFailed),
            primary_overloads: self.get(Counter::PrimaryOverloads),
            primary_timeouts: self.get(Counter::PrimaryTimeouts),
            primary_quota_exceeded: self.get(Counter::PrimaryQuotaExceeded),
            primary_network_errors: self.get(Counter::PrimaryNetworkErrors),
            primary_internal_errors: self.get(Counter::PrimaryInternalErrors),
            content_blocked: self.get(Counter::ContentBlocked),
            siege_rounds: self.get(Counter::SiegeRounds),
            secondary_attempts: self.get(Counter::SecondaryAttempts),
            secondary_success: self.get(Counter::SecondarySuccess),
            secondary_failed: self.get(Counter::SecondaryFailed),
            since: Some(*self.since.read()),
        }
    }

    /// Zero every counter. Operator action only.
    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
        *self.since.write() = Utc::now();
    }
}
