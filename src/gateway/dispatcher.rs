//! Resilient dispatch across a primary and a secondary backend
//!
//! One call to [`ResilientDispatcher::generate`] walks:
//!
//! 1. the primary, through the limiter, with connection faults retried
//!    by a [`BackoffRetrier`];
//! 2. on a transient failure, bounded siege rounds against the primary;
//! 3. once those are spent, a single call to the secondary.
//!
//! Non-transient failures end the request at the step that saw them, and
//! quota failures are never escalated.

use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::traits::{GenerationBackend, GenerationRequest, ImageOutput, RawFailure, RawResult};
use crate::config::DispatchConfig;
use crate::gateway::stats::{Counter, StatsRegistry};
use crate::queue::ConcurrencyLimiter;
use crate::resilience::{classify, BackoffRetrier, Classification, ErrorKind, RetryPolicy};

/// Which backend produced an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderUsed {
    Primary,
    Secondary,
    None,
}

/// Successful generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub data: Vec<u8>,
    pub media_type: String,
    pub provider: ProviderUsed,
}

/// Terminal failure with a kind the caller can branch on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl GenerationFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Short explanation suitable for an end user
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            ErrorKind::Timeout => {
                "Generation took too long. Try a smaller image size or fewer reference images."
            }
            ErrorKind::Overloaded => "The image service is busy right now. Please try again in a few minutes.",
            ErrorKind::InternalError => "The image service hit an internal error. Please try again.",
            ErrorKind::QuotaExceeded => "The generation quota has been used up. Please try again later.",
            ErrorKind::ContentBlocked => {
                "The request was rejected by the content policy. Please adjust the prompt or reference images."
            }
            ErrorKind::NetworkError => "The image service could not be reached. Please check connectivity and retry.",
            ErrorKind::HttpError { .. } => "The image service rejected the request.",
            ErrorKind::Fatal { .. } => "Image generation failed on every available service.",
        }
    }
}

/// Terminal outcome of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
    Success(GeneratedImage),
    Failure(GenerationFailure),
}

impl GenerationResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, GenerationResult::Success(_))
    }

    pub fn provider_used(&self) -> ProviderUsed {
        match self {
            GenerationResult::Success(image) => image.provider,
            GenerationResult::Failure(_) => ProviderUsed::None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            GenerationResult::Success(_) => None,
            GenerationResult::Failure(failure) => Some(failure.kind),
        }
    }

    pub fn into_result(self) -> std::result::Result<GeneratedImage, GenerationFailure> {
        match self {
            GenerationResult::Success(image) => Ok(image),
            GenerationResult::Failure(failure) => Err(failure),
        }
    }
}

/// A classified primary failure
struct PrimaryFailure {
    raw: RawFailure,
    class: Classification,
}

/// Orchestrates limiter, retrier, classifier and failover
pub struct ResilientDispatcher {
    primary: Arc<dyn GenerationBackend>,
    secondary: Option<Arc<dyn GenerationBackend>>,
    limiter: Arc<ConcurrencyLimiter>,
    stats: Arc<StatsRegistry>,
    network_retrier: BackoffRetrier,
    config: DispatchConfig,
}

impl ResilientDispatcher {
    pub fn new(
        primary: Arc<dyn GenerationBackend>,
        secondary: Option<Arc<dyn GenerationBackend>>,
        limiter: Arc<ConcurrencyLimiter>,
        stats: Arc<StatsRegistry>,
        config: DispatchConfig,
    ) -> Self {
        let network_retrier = BackoffRetrier::new(RetryPolicy::from(&config.network_retry));
        Self {
            primary,
            secondary,
            limiter,
            stats,
            network_retrier,
            config,
        }
    }

    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    pub fn limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.limiter
    }

    /// Upper bound on how long one request runs after leaving the queue
    pub fn execution_budget(&self) -> Duration {
        let secondary = self
            .secondary
            .as_ref()
            .map(|backend| (backend.timeout(), backend.network_retries()));
        self.config
            .execution_budget(self.primary.timeout(), self.limiter.min_time(), secondary)
    }

    /// Generate one image. Always resolves to a terminal result.
    pub async fn generate(&self, request: GenerationRequest) -> GenerationResult {
        let request_id = Uuid::new_v4();
        let span = info_span!("generate", %request_id, primary = %self.primary.name());
        self.run(&request).instrument(span).await
    }

    async fn run(&self, request: &GenerationRequest) -> GenerationResult {
        self.stats.increment(Counter::Requests);

        let mut failure = match self.attempt_primary(request).await {
            Ok(output) => return self.primary_succeeded(output),
            Err(failure) => failure,
        };

        if !failure.class.transient {
            info!(kind = %failure.class.kind, "Primary failed with a non-transient error");
            return self.primary_gave_up(failure);
        }

        // Siege rounds; the budget follows the latest failure's kind
        let mut round = 0;
        while round < self.round_budget(failure.class.kind) {
            round += 1;
            self.stats.increment(Counter::SiegeRounds);

            let delay = self.siege_delay(round);
            warn!(
                round,
                kind = %failure.class.kind,
                delay_ms = delay.as_millis() as u64,
                "Primary failed, backing off before next round"
            );
            tokio::time::sleep(delay).await;

            failure = match self.attempt_primary(request).await {
                Ok(output) => {
                    info!(round, "Primary recovered during siege");
                    return self.primary_succeeded(output);
                }
                Err(next) => next,
            };

            if !failure.class.transient {
                info!(round, kind = %failure.class.kind, "Siege ended by a non-transient error");
                return self.primary_gave_up(failure);
            }
        }

        if failure.class.kind == ErrorKind::QuotaExceeded {
            warn!("Quota still exhausted, not escalating");
            return self.primary_gave_up(failure);
        }

        match self.secondary.clone() {
            Some(secondary) => self.escalate(secondary.as_ref(), request, failure).await,
            None => {
                warn!("No secondary backend configured");
                self.primary_gave_up(failure)
            }
        }
    }

    /// One primary call through the limiter, with connection faults retried
    /// inside the same slot. Every retried call claims its own start from
    /// the limiter so call starts stay `min_time` apart.
    async fn attempt_primary(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<ImageOutput, PrimaryFailure> {
        let deadline = self.primary.timeout();
        let primary = self.primary.as_ref();
        let limiter = self.limiter.as_ref();

        let scheduled = self
            .limiter
            .schedule(|| {
                let mut first_call = true;
                self.network_retrier.retry(
                    move || {
                        let is_retry = !std::mem::take(&mut first_call);
                        async move {
                            if is_retry {
                                limiter.pace().await;
                            }
                            match primary.call(request, deadline).await {
                                RawResult::Success(output) => Ok(Ok(output)),
                                RawResult::Failure(failure) if failure.is_connection_fault() => {
                                    Err(failure)
                                }
                                RawResult::Failure(failure) => Ok(Err(failure)),
                            }
                        }
                    },
                    RawFailure::is_connection_fault,
                )
            })
            .await;

        let raw = match scheduled {
            Ok(Ok(Ok(output))) => return Ok(output),
            Ok(Ok(Err(raw))) | Ok(Err(raw)) => raw,
            Err(e) => {
                error!(error = %e, "Limiter rejected the primary call");
                return Err(PrimaryFailure {
                    raw: RawFailure::Refused { reason: e.to_string() },
                    class: Classification {
                        kind: ErrorKind::Fatal { both_failed: false },
                        transient: false,
                    },
                });
            }
        };

        let class = classify(&raw);
        debug!(kind = %class.kind, transient = class.transient, error = %raw, "Primary call failed");
        if let Some(counter) = Counter::for_primary_failure(class.kind) {
            self.stats.increment(counter);
        }
        Err(PrimaryFailure { raw, class })
    }

    async fn escalate(
        &self,
        secondary: &dyn GenerationBackend,
        request: &GenerationRequest,
        primary: PrimaryFailure,
    ) -> GenerationResult {
        self.stats.increment(Counter::PrimaryFailed);
        self.stats.increment(Counter::SecondaryAttempts);
        warn!(
            secondary = %secondary.name(),
            primary_kind = %primary.class.kind,
            "Escalating to secondary backend"
        );

        match secondary.call(request, secondary.timeout()).await {
            RawResult::Success(output) => {
                self.stats.increment(Counter::SecondarySuccess);
                info!(secondary = %secondary.name(), "Secondary backend succeeded");
                GenerationResult::Success(GeneratedImage {
                    data: output.data,
                    media_type: output.media_type,
                    provider: ProviderUsed::Secondary,
                })
            }
            RawResult::Failure(raw) => {
                self.stats.increment(Counter::SecondaryFailed);
                let secondary_class = classify(&raw);
                error!(
                    primary_kind = %primary.class.kind,
                    secondary_kind = %secondary_class.kind,
                    "Primary and secondary backends both failed"
                );
                GenerationResult::Failure(GenerationFailure::new(
                    ErrorKind::Fatal { both_failed: true },
                    format!(
                        "primary ({}): {}; secondary ({}): {}",
                        primary.class.kind, primary.raw, secondary_class.kind, raw
                    ),
                ))
            }
        }
    }

    fn primary_succeeded(&self, output: ImageOutput) -> GenerationResult {
        self.stats.increment(Counter::PrimarySuccess);
        GenerationResult::Success(GeneratedImage {
            data: output.data,
            media_type: output.media_type,
            provider: ProviderUsed::Primary,
        })
    }

    fn primary_gave_up(&self, failure: PrimaryFailure) -> GenerationResult {
        self.stats.increment(Counter::PrimaryFailed);
        GenerationResult::Failure(GenerationFailure::new(failure.class.kind, failure.raw.to_string()))
    }

    fn round_budget(&self, kind: ErrorKind) -> u32 {
        match kind {
            ErrorKind::QuotaExceeded => self.config.quota_max_rounds,
            _ => self.config.max_rounds,
        }
    }

    fn siege_delay(&self, round: u32) -> Duration {
        let jitter = if self.config.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        self.config.round_delay(round) + Duration::from_millis(jitter)
    }
}
