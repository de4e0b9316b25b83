//! Maps raw backend failures onto the dispatcher's error taxonomy

use serde::Serialize;
use std::fmt;

use crate::backend::traits::{RawFailure, TransportFault};

/// Closed set of failure kinds a caller can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Overloaded,
    InternalError,
    QuotaExceeded,
    ContentBlocked,
    NetworkError,
    HttpError { status: u16 },
    /// Terminal failure; `both_failed` is set when the secondary backend
    /// was tried and failed as well
    Fatal { both_failed: bool },
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => f.write_str("timeout"),
            ErrorKind::Overloaded => f.write_str("overloaded"),
            ErrorKind::InternalError => f.write_str("internal_error"),
            ErrorKind::QuotaExceeded => f.write_str("quota_exceeded"),
            ErrorKind::ContentBlocked => f.write_str("content_blocked"),
            ErrorKind::NetworkError => f.write_str("network_error"),
            ErrorKind::HttpError { status } => write!(f, "http_error({})", status),
            ErrorKind::Fatal { both_failed } => write!(f, "fatal(both_failed={})", both_failed),
        }
    }
}

/// Result of classifying one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    /// Whether another attempt, here or on the secondary, may succeed
    pub transient: bool,
}

impl Classification {
    fn transient(kind: ErrorKind) -> Self {
        Self { kind, transient: true }
    }

    fn terminal(kind: ErrorKind) -> Self {
        Self { kind, transient: false }
    }
}

const QUOTA_TERMS: &[&str] = &["resource_exhausted", "resource exhausted", "quota", "rate limit", "rate_limit"];
const OVERLOAD_TERMS: &[&str] = &["overloaded", "unavailable"];
const INTERNAL_TERMS: &[&str] = &["internal error", "internal_error"];
const DEADLINE_TERMS: &[&str] = &["deadline exceeded", "deadline_exceeded", "aborted", "timed out"];
const SAFETY_TERMS: &[&str] = &[
    "safety",
    "blockreason",
    "block_reason",
    "block reason",
    "prohibited",
    "content policy",
    "content_policy",
    "moderation",
];

fn mentions(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| text.contains(term))
}

/// Classify a raw failure. Rules are checked in priority order, so a 503
/// whose body mentions a quota is still a quota failure.
pub fn classify(failure: &RawFailure) -> Classification {
    let (status, fault, text) = match failure {
        RawFailure::Http { status, body } => (Some(*status), None, body.to_lowercase()),
        RawFailure::Transport { fault, message } => (None, Some(*fault), message.to_lowercase()),
        RawFailure::Refused { reason } => (None, None, reason.to_lowercase()),
    };

    if status == Some(429) || mentions(&text, QUOTA_TERMS) {
        return Classification::transient(ErrorKind::QuotaExceeded);
    }
    if status == Some(503) || mentions(&text, OVERLOAD_TERMS) {
        return Classification::transient(ErrorKind::Overloaded);
    }
    if status == Some(500) || mentions(&text, INTERNAL_TERMS) {
        return Classification::transient(ErrorKind::InternalError);
    }
    // Deadline wording only counts when no other transport fault was seen
    let deadline_text =
        matches!(fault, None | Some(TransportFault::Timeout)) && mentions(&text, DEADLINE_TERMS);
    if fault == Some(TransportFault::Timeout) || status == Some(504) || deadline_text {
        return Classification::transient(ErrorKind::Timeout);
    }
    if fault.is_some() {
        return Classification::transient(ErrorKind::NetworkError);
    }
    if mentions(&text, SAFETY_TERMS) {
        return Classification::terminal(ErrorKind::ContentBlocked);
    }

    match status {
        Some(status) if (400..500).contains(&status) => {
            Classification::terminal(ErrorKind::HttpError { status })
        }
        Some(status) if status >= 500 => Classification::transient(ErrorKind::HttpError { status }),
        // A success status without an image and without a policy reason
        // is usually a one-off empty candidate
        _ => Classification::transient(ErrorKind::InternalError),
    }
}
