//! Common traits and types for image generation backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Reference image attached to a generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    /// Raw image bytes
    pub data: Vec<u8>,

    /// Media type, e.g. "image/png"
    pub media_type: String,
}

impl ReferenceImage {
    pub fn new(data: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            data,
            media_type: media_type.into(),
        }
    }
}

/// Output size class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSize {
    #[default]
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl ImageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::OneK => "1K",
            ImageSize::TwoK => "2K",
            ImageSize::FourK => "4K",
        }
    }
}

/// Image configuration requested by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Aspect ratio such as "1:1", "3:4" or "16:9"
    pub aspect_ratio: String,

    /// Output size class
    #[serde(default)]
    pub size: ImageSize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            aspect_ratio: "1:1".to_string(),
            size: ImageSize::default(),
        }
    }
}

impl ImageConfig {
    /// Aspect ratio as width / height, `None` if it cannot be parsed
    pub fn ratio(&self) -> Option<f64> {
        let (w, h) = self.aspect_ratio.split_once(':')?;
        let w: f64 = w.trim().parse().ok()?;
        let h: f64 = h.trim().parse().ok()?;
        if w <= 0.0 || h <= 0.0 {
            return None;
        }
        Some(w / h)
    }
}

/// Request to generate one image
///
/// The dispatcher only ever borrows a request, so it stays unchanged for
/// every attempt made on its behalf.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The prompt to generate the image from
    pub prompt: String,

    /// Reference images, in the order the prompt refers to them
    pub reference_images: Vec<ReferenceImage>,

    /// Aspect ratio and size class
    pub image_config: ImageConfig,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            reference_images: Vec::new(),
            image_config: ImageConfig::default(),
        }
    }

    pub fn with_reference(mut self, image: ReferenceImage) -> Self {
        self.reference_images.push(image);
        self
    }

    pub fn with_image_config(mut self, image_config: ImageConfig) -> Self {
        self.image_config = image_config;
        self
    }
}

/// Image produced by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOutput {
    pub data: Vec<u8>,
    pub media_type: String,
}

/// Connection-level and deadline faults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFault {
    /// The call's deadline expired and it was aborted
    Timeout,
    ConnectionReset,
    ConnectionRefused,
    NameResolution,
    /// The peer closed the connection before a full response arrived
    ConnectionClosed,
    Other,
}

impl TransportFault {
    /// Faults worth an immediate re-send of the same call
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            TransportFault::ConnectionReset
                | TransportFault::ConnectionRefused
                | TransportFault::NameResolution
                | TransportFault::ConnectionClosed
        )
    }
}

/// Failure reported by a backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFailure {
    /// Non-success HTTP status
    Http { status: u16, body: String },

    /// The call never produced an HTTP response
    Transport { fault: TransportFault, message: String },

    /// A success status whose body carried no image
    Refused { reason: String },
}

impl RawFailure {
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, RawFailure::Transport { fault, .. } if fault.is_connection_fault())
    }

    pub fn timeout(deadline: Duration) -> Self {
        RawFailure::Transport {
            fault: TransportFault::Timeout,
            message: format!("deadline of {}ms exceeded", deadline.as_millis()),
        }
    }
}

impl fmt::Display for RawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawFailure::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            RawFailure::Transport { fault, message } => write!(f, "{:?}: {}", fault, message),
            RawFailure::Refused { reason } => write!(f, "refused: {}", reason),
        }
    }
}

/// Normalized outcome of one backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawResult {
    Success(ImageOutput),
    Failure(RawFailure),
}

/// An external image generation service
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Deadline applied to each call
    fn timeout(&self) -> Duration;

    /// Extra attempts the adapter makes internally after connection faults
    fn network_retries(&self) -> u32 {
        0
    }

    /// Perform one generation call, aborting it once `deadline` expires.
    ///
    /// Never fails with an error: transport problems are reported as
    /// [`RawResult::Failure`].
    async fn call(&self, request: &GenerationRequest, deadline: Duration) -> RawResult;
}
