//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub limiter: LimiterConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub health: HealthConfig,
    pub backends: BackendsConfig,
}

/// Server configuration for the operator surface
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Authentication for operator-only routes
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_keys: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Concurrency limiter in front of the primary backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimiterConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_min_time_ms")]
    pub min_time_ms: u64,
}

fn default_concurrency() -> usize {
    1
}

fn default_min_time_ms() -> u64 {
    1000
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            min_time_ms: default_min_time_ms(),
        }
    }
}

impl LimiterConfig {
    pub fn min_time(&self) -> Duration {
        Duration::from_millis(self.min_time_ms)
    }
}

/// Network-fault retry around a single primary call
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkRetryConfig {
    #[serde(default = "default_network_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_network_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_network_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_network_attempts() -> u32 {
    3
}

fn default_network_initial_delay_ms() -> u64 {
    500
}

fn default_network_max_delay_ms() -> u64 {
    4000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for NetworkRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_network_attempts(),
            initial_delay_ms: default_network_initial_delay_ms(),
            max_delay_ms: default_network_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

/// Siege rounds and escalation tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_quota_max_rounds")]
    pub quota_max_rounds: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default)]
    pub network_retry: NetworkRetryConfig,
}

fn default_max_rounds() -> u32 {
    5
}

fn default_quota_max_rounds() -> u32 {
    1
}

fn default_base_delay_ms() -> u64 {
    1500
}

fn default_max_delay_ms() -> u64 {
    20000
}

fn default_jitter_ms() -> u64 {
    1000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            quota_max_rounds: default_quota_max_rounds(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            network_retry: NetworkRetryConfig::default(),
        }
    }
}

impl DispatchConfig {
    /// Delay before siege round `round` (1-based), without jitter
    pub fn round_delay(&self, round: u32) -> Duration {
        let exponent = round.saturating_sub(1).min(31);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Worst-case wall-clock time of one request once it has left the
    /// limiter queue.
    ///
    /// Every primary attempt may burn its full network-retry budget, every
    /// pause before a primary call lasts at least `min_time`, and the
    /// secondary call may burn its own retry budget.
    pub fn execution_budget(
        &self,
        primary_timeout: Duration,
        min_time: Duration,
        secondary: Option<(Duration, u32)>,
    ) -> Duration {
        let network = &self.network_retry;
        let attempts = network.max_attempts.max(1);
        let mut per_attempt = primary_timeout * attempts;
        let mut retry_delay = network.initial_delay_ms as f64;
        for _ in 1..attempts {
            let backoff = Duration::from_millis(retry_delay.min(network.max_delay_ms as f64) as u64);
            per_attempt += backoff.max(min_time);
            retry_delay *= network.multiplier;
        }

        let rounds = self.max_rounds.max(self.quota_max_rounds);
        let mut total = per_attempt;
        for round in 1..=rounds {
            let pause = self.round_delay(round) + Duration::from_millis(self.jitter_ms);
            total += pause.max(min_time) + per_attempt;
        }

        if let Some((timeout, retries)) = secondary {
            total += timeout * retries.saturating_add(1)
                + crate::backend::ADAPTER_RETRY_MAX_DELAY * retries;
        }

        total
    }
}

/// Readiness thresholds for the health surface
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
}

fn default_max_queue_depth() -> usize {
    50
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: default_max_queue_depth(),
        }
    }
}

/// Primary and optional secondary generation backends
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendsConfig {
    pub primary: BackendConfig,
    #[serde(default)]
    pub secondary: Option<BackendConfig>,
}

/// Backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub name: String,
    /// Adapter to use: "gemini" or "openai"
    pub kind: String,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Extra attempts the adapter makes on its own after a connection fault
    #[serde(default)]
    pub network_retries: u32,
}

fn default_timeout() -> u64 {
    120000
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("limiter.concurrency", 1)?
            .set_default("limiter.min_time_ms", 1000)?
            // Load from configuration file
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (prefixed with IMAGEGEN__)
            .add_source(
                Environment::with_prefix("IMAGEGEN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.limiter.concurrency == 0 {
            return Err(AppError::invalid_config("limiter.concurrency must be at least 1"));
        }

        let dispatch = &self.dispatch;
        if dispatch.base_delay_ms > dispatch.max_delay_ms {
            return Err(AppError::invalid_config(format!(
                "dispatch.base_delay_ms ({}) exceeds dispatch.max_delay_ms ({})",
                dispatch.base_delay_ms, dispatch.max_delay_ms
            )));
        }
        if !(1..=3).contains(&dispatch.network_retry.max_attempts) {
            return Err(AppError::invalid_config(
                "dispatch.network_retry.max_attempts must be between 1 and 3",
            ));
        }
        if dispatch.network_retry.multiplier < 1.0 {
            return Err(AppError::invalid_config(
                "dispatch.network_retry.multiplier must be at least 1.0",
            ));
        }

        let primary = &self.backends.primary;
        validate_backend("primary", primary)?;
        if let Some(secondary) = &self.backends.secondary {
            validate_backend("secondary", secondary)?;
            if secondary.timeout_ms >= primary.timeout_ms {
                return Err(AppError::invalid_config(format!(
                    "Secondary backend '{}' timeout_ms ({}) must be below the primary's ({})",
                    secondary.name, secondary.timeout_ms, primary.timeout_ms
                )));
            }
        }

        Ok(())
    }
}

/// Longest single backend call accepted from configuration
pub const MAX_BACKEND_TIMEOUT_MS: u64 = 600_000;

/// Most connection retries an adapter may make on its own
pub const MAX_BACKEND_NETWORK_RETRIES: u32 = 3;

fn validate_backend(role: &str, backend: &BackendConfig) -> Result<()> {
    if backend.name.is_empty() {
        return Err(AppError::invalid_config(format!("{} backend name cannot be empty", role)));
    }
    if backend.endpoint.is_empty() {
        return Err(AppError::invalid_config(format!(
            "Backend '{}' must have an endpoint",
            backend.name
        )));
    }
    if backend.timeout_ms == 0 || backend.timeout_ms > MAX_BACKEND_TIMEOUT_MS {
        return Err(AppError::invalid_config(format!(
            "Backend '{}' timeout_ms must be between 1 and {}",
            backend.name, MAX_BACKEND_TIMEOUT_MS
        )));
    }
    if backend.network_retries > MAX_BACKEND_NETWORK_RETRIES {
        return Err(AppError::invalid_config(format!(
            "Backend '{}' network_retries cannot exceed {}",
            backend.name, MAX_BACKEND_NETWORK_RETRIES
        )));
    }
    if !["gemini", "openai"].contains(&backend.kind.as_str()) {
        return Err(AppError::invalid_config(format!(
            "Backend '{}' has invalid kind '{}'. Must be 'gemini' or 'openai'",
            backend.name, backend.kind
        )));
    }
    Ok(())
}
