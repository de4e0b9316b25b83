//! Secondary adapter for images-generations/edits style APIs

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::traits::{GenerationBackend, GenerationRequest, ImageOutput, RawFailure, RawResult};
use crate::backend::{transport, ADAPTER_RETRY_MAX_DELAY};
use crate::config::BackendConfig;
use crate::error::{AppError, Result};
use crate::resilience::{BackoffRetrier, RetryPolicy};
use crate::response::base64;

/// HTTP image backend with `/v1/images/generations` and `/v1/images/edits`
///
/// Text-only requests go to the generations route; requests with
/// reference images go to the edits route as multipart uploads.
pub struct OpenAiBackend {
    name: String,
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
    network_retries: u32,
    retrier: BackoffRetrier,
}

#[derive(Debug, Serialize)]
struct ApiGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'static str,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    data: Vec<ApiImageData>,
}

#[derive(Debug, Deserialize)]
struct ApiImageData {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

/// Map an aspect ratio onto one of the sizes this API accepts
fn size_for(request: &GenerationRequest) -> &'static str {
    match request.image_config.ratio() {
        Some(ratio) if ratio > 1.1 => "1536x1024",
        Some(ratio) if ratio < 0.9 => "1024x1536",
        _ => "1024x1024",
    }
}

fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

impl OpenAiBackend {
    /// Create a new backend from configuration
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let retrier = BackoffRetrier::new(RetryPolicy {
            max_attempts: config.network_retries.saturating_add(1),
            initial_delay: Duration::from_millis(250),
            max_delay: ADAPTER_RETRY_MAX_DELAY,
            multiplier: 2.0,
        });

        Ok(Self {
            name: config.name.clone(),
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: config.timeout(),
            network_retries: config.network_retries,
            retrier,
        })
    }

    fn edits_form(&self, request: &GenerationRequest) -> std::result::Result<Form, RawFailure> {
        let mut form = Form::new()
            .text("model", self.model.clone())
            .text("prompt", request.prompt.clone())
            .text("n", "1")
            .text("size", size_for(request));

        for (index, image) in request.reference_images.iter().enumerate() {
            let part = Part::bytes(image.data.clone())
                .file_name(format!("reference-{}.{}", index, extension_for(&image.media_type)))
                .mime_str(&image.media_type)
                .map_err(|e| RawFailure::Http {
                    status: 400,
                    body: format!("invalid reference media type '{}': {}", image.media_type, e),
                })?;
            form = form.part("image[]", part);
        }

        Ok(form)
    }

    async fn send(&self, request: &GenerationRequest) -> std::result::Result<ImageOutput, RawFailure> {
        let builder = if request.reference_images.is_empty() {
            self.client
                .post(format!("{}/v1/images/generations", self.endpoint))
                .json(&ApiGenerateRequest {
                    model: &self.model,
                    prompt: &request.prompt,
                    n: 1,
                    size: size_for(request),
                    response_format: "b64_json",
                })
        } else {
            self.client
                .post(format!("{}/v1/images/edits", self.endpoint))
                .multipart(self.edits_form(request)?)
        };

        let response = builder
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| transport::failure_from(&e))?;

        if !response.status().is_success() {
            return Err(transport::http_failure(response).await);
        }

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| transport::failure_from(&e))?;
        let parsed: ApiResponse = serde_json::from_str(&body).map_err(|e| RawFailure::Http {
            status,
            body: format!("unparseable response ({}): {}", e, body),
        })?;

        let image = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| RawFailure::Refused {
                reason: "response contained no image".to_string(),
            })?;

        if let Some(revised) = &image.revised_prompt {
            debug!(backend = %self.name, revised_prompt = %revised, "Prompt was revised");
        }

        let encoded = image.b64_json.ok_or_else(|| RawFailure::Refused {
            reason: "response contained no b64_json payload".to_string(),
        })?;
        let data = base64::decode(&encoded).map_err(|e| RawFailure::Refused {
            reason: format!("undecodable image data: {}", e),
        })?;
        let media_type = base64::resolve_media_type(None, &data);

        Ok(ImageOutput { data, media_type })
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn network_retries(&self) -> u32 {
        self.network_retries
    }

    async fn call(&self, request: &GenerationRequest, deadline: Duration) -> RawResult {
        debug!(
            backend = %self.name,
            model = %self.model,
            references = request.reference_images.len(),
            "Sending image request"
        );

        let result = self
            .retrier
            .retry(
                || transport::with_deadline(deadline, self.send(request)),
                RawFailure::is_connection_fault,
            )
            .await;

        match result {
            Ok(output) => RawResult::Success(output),
            Err(failure) => {
                warn!(backend = %self.name, error = %failure, "Image request failed");
                RawResult::Failure(failure)
            }
        }
    }
}
