//! Turns HTTP client errors into structured transport faults

use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::time::Duration;

use crate::backend::traits::{RawFailure, TransportFault};

/// Map a `reqwest` error onto a [`TransportFault`] by walking its source chain
pub fn fault_of(error: &reqwest::Error) -> TransportFault {
    if error.is_timeout() {
        return TransportFault::Timeout;
    }

    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            match io_error.kind() {
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                    return TransportFault::ConnectionReset;
                }
                io::ErrorKind::ConnectionRefused => return TransportFault::ConnectionRefused,
                io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => {
                    return TransportFault::ConnectionClosed;
                }
                io::ErrorKind::TimedOut => return TransportFault::Timeout,
                _ => {}
            }
        }

        let text = cause.to_string().to_lowercase();
        if text.contains("dns") || text.contains("resolve") || text.contains("lookup") {
            return TransportFault::NameResolution;
        }
        if text.contains("connection closed") || text.contains("incomplete message") {
            return TransportFault::ConnectionClosed;
        }
        source = cause.source();
    }

    if error.is_connect() {
        TransportFault::ConnectionRefused
    } else if error.is_request() || error.is_body() {
        TransportFault::ConnectionClosed
    } else {
        TransportFault::Other
    }
}

pub fn failure_from(error: &reqwest::Error) -> RawFailure {
    RawFailure::Transport {
        fault: fault_of(error),
        message: error.to_string(),
    }
}

/// Run `call` under `deadline`, reporting expiry as a timeout failure
pub async fn with_deadline<F, T>(deadline: Duration, call: F) -> Result<T, RawFailure>
where
    F: Future<Output = Result<T, RawFailure>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(RawFailure::timeout(deadline)),
    }
}

/// Read an error response into an HTTP failure
pub async fn http_failure(response: reqwest::Response) -> RawFailure {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    RawFailure::Http { status, body }
}
