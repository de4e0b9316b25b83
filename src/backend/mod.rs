//! Backend module - trait, HTTP adapters, and construction from config

pub mod gemini;
pub mod openai;
pub mod traits;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::BackendConfig;
use crate::error::{AppError, Result};

pub use traits::{
    GenerationBackend, GenerationRequest, ImageConfig, ImageOutput, ImageSize, RawFailure,
    RawResult, ReferenceImage, TransportFault,
};

/// Longest pause an adapter takes between its own connection retries
pub const ADAPTER_RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// Build an adapter for `config.kind`
pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn GenerationBackend>> {
    let backend: Arc<dyn GenerationBackend> = match config.kind.as_str() {
        "gemini" => Arc::new(gemini::GeminiBackend::new(config)?),
        "openai" => Arc::new(openai::OpenAiBackend::new(config)?),
        other => return Err(AppError::UnsupportedBackend(other.to_string())),
    };

    info!(
        backend = %config.name,
        kind = %config.kind,
        timeout_ms = config.timeout_ms,
        "Initialized generation backend"
    );
    Ok(backend)
}
