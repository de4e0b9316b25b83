//! Scripted in-process backends and dispatcher wiring for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use imagegen_dispatch::backend::transport::with_deadline;
use imagegen_dispatch::backend::{
    GenerationBackend, GenerationRequest, ImageOutput, RawFailure, RawResult, TransportFault,
};
use imagegen_dispatch::config::{DispatchConfig, NetworkRetryConfig};
use imagegen_dispatch::gateway::{ResilientDispatcher, StatsRegistry};
use imagegen_dispatch::queue::ConcurrencyLimiter;

/// What a scripted call does
#[derive(Clone)]
pub enum Step {
    Respond(RawResult),
    /// Never answers; the deadline cuts it off
    Hang,
}

pub fn ok_image() -> Step {
    Step::Respond(RawResult::Success(ImageOutput {
        data: vec![0x89, b'P', b'N', b'G'],
        media_type: "image/png".to_string(),
    }))
}

pub fn http(status: u16, body: &str) -> Step {
    Step::Respond(RawResult::Failure(RawFailure::Http {
        status,
        body: body.to_string(),
    }))
}

pub fn refused(reason: &str) -> Step {
    Step::Respond(RawResult::Failure(RawFailure::Refused {
        reason: reason.to_string(),
    }))
}

pub fn connection_reset() -> Step {
    Step::Respond(RawResult::Failure(RawFailure::Transport {
        fault: TransportFault::ConnectionReset,
        message: "connection reset by peer".to_string(),
    }))
}

/// Backend that replays a script, then repeats a fallback step
pub struct ScriptedBackend {
    name: String,
    timeout: Duration,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    work: Duration,
    calls: AtomicUsize,
    starts: Mutex<Vec<Instant>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(name: &str, script: Vec<Step>, fallback: Step) -> Arc<Self> {
        Self::with_timing(name, script, fallback, Duration::from_millis(200), Duration::ZERO)
    }

    pub fn with_timing(
        name: &str,
        script: Vec<Step>,
        fallback: Step,
        timeout: Duration,
        work: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            timeout,
            script: Mutex::new(script.into()),
            fallback,
            work,
            calls: AtomicUsize::new(0),
            starts: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Gaps between successive call starts
    pub fn start_gaps(&self) -> Vec<Duration> {
        self.starts.lock().windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        self.script.lock().pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn call(&self, _request: &GenerationRequest, deadline: Duration) -> RawResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.starts.lock().push(Instant::now());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let step = self.next_step();
        let work = self.work;
        let result = with_deadline(deadline, async move {
            if !work.is_zero() {
                tokio::time::sleep(work).await;
            }
            match step {
                Step::Respond(RawResult::Success(output)) => Ok(output),
                Step::Respond(RawResult::Failure(failure)) => Err(failure),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(RawFailure::Refused {
                        reason: "unreachable".to_string(),
                    })
                }
            }
        })
        .await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match result {
            Ok(output) => RawResult::Success(output),
            Err(failure) => RawResult::Failure(failure),
        }
    }
}

/// Tight timings so scenarios run in milliseconds
pub fn fast_dispatch(max_rounds: u32) -> DispatchConfig {
    DispatchConfig {
        max_rounds,
        quota_max_rounds: 1,
        base_delay_ms: 1,
        max_delay_ms: 5,
        jitter_ms: 0,
        network_retry: NetworkRetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
        },
    }
}

pub struct Harness {
    pub dispatcher: ResilientDispatcher,
    pub stats: Arc<StatsRegistry>,
}

pub fn harness(
    primary: Arc<dyn GenerationBackend>,
    secondary: Option<Arc<dyn GenerationBackend>>,
    config: DispatchConfig,
) -> Harness {
    spaced_harness(primary, secondary, config, Duration::ZERO)
}

/// Harness whose limiter keeps `min_time` between primary call starts
pub fn spaced_harness(
    primary: Arc<dyn GenerationBackend>,
    secondary: Option<Arc<dyn GenerationBackend>>,
    config: DispatchConfig,
    min_time: Duration,
) -> Harness {
    let limiter = Arc::new(ConcurrencyLimiter::new(1, min_time));
    let stats = Arc::new(StatsRegistry::new());
    let dispatcher = ResilientDispatcher::new(primary, secondary, limiter, stats.clone(), config);
    Harness { dispatcher, stats }
}

pub fn request() -> GenerationRequest {
    GenerationRequest::new("studio portrait, soft key light")
}
