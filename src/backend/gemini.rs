//! Primary adapter for `generateContent`-style image models

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::traits::{GenerationBackend, GenerationRequest, ImageOutput, RawFailure, RawResult};
use crate::backend::transport;
use crate::config::BackendConfig;
use crate::error::{AppError, Result};
use crate::response::base64;

/// Finish reasons that mean the model refused on policy grounds
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "IMAGE_SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "RECITATION",
];

/// Backend speaking the `models/{model}:generateContent` protocol
pub struct GeminiBackend {
    name: String,
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest<'a> {
    contents: Vec<ApiContent<'a>>,
    generation_config: ApiGenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct ApiContent<'a> {
    role: &'static str,
    parts: Vec<ApiPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiPart<'a> {
    Text { text: &'a str },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: ApiInlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGenerationConfig<'a> {
    response_modalities: [&'static str; 1],
    image_config: ApiImageConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiImageConfig<'a> {
    aspect_ratio: &'a str,
    image_size: &'static str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<ApiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseContent {
    #[serde(default)]
    parts: Vec<ApiResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, alias = "inline_data")]
    inline_data: Option<ApiResponseInline>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponseInline {
    #[serde(default, alias = "mime_type")]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GeminiBackend {
    /// Create a new backend from configuration
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: config.name.clone(),
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: config.timeout(),
        })
    }

    fn url(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model)
    }

    fn build_body<'a>(request: &'a GenerationRequest) -> ApiRequest<'a> {
        let mut parts = Vec::with_capacity(request.reference_images.len() + 1);
        parts.push(ApiPart::Text { text: &request.prompt });
        parts.extend(request.reference_images.iter().map(|image| ApiPart::Inline {
            inline_data: ApiInlineData {
                mime_type: image.media_type.clone(),
                data: base64::encode(&image.data),
            },
        }));

        ApiRequest {
            contents: vec![ApiContent { role: "user", parts }],
            generation_config: ApiGenerationConfig {
                response_modalities: ["IMAGE"],
                image_config: ApiImageConfig {
                    aspect_ratio: &request.image_config.aspect_ratio,
                    image_size: request.image_config.size.as_str(),
                },
            },
        }
    }

    async fn send(&self, request: &GenerationRequest) -> std::result::Result<ImageOutput, RawFailure> {
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::build_body(request))
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

        extract_image(parsed)
    }
}

/// Pull the first inline image out of a response, or explain its absence
fn extract_image(response: ApiResponse) -> std::result::Result<ImageOutput, RawFailure> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(RawFailure::Refused {
            reason: format!("prompt blocked (blockReason: {})", reason),
        });
    }

    let mut text_parts = Vec::new();
    let mut finish_reason = None;

    for candidate in response.candidates {
        if finish_reason.is_none() {
            finish_reason = candidate.finish_reason;
        }
        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        for part in parts {
            if let Some(inline) = part.inline_data {
                let data = base64::decode(&inline.data).map_err(|e| RawFailure::Refused {
                    reason: format!("undecodable image data: {}", e),
                })?;
                let media_type = base64::resolve_media_type(inline.mime_type.as_deref(), &data);
                return Ok(ImageOutput { data, media_type });
            }
            if let Some(text) = part.text {
                text_parts.push(text);
            }
        }
    }

    let reason = match finish_reason {
        Some(reason) if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) => {
            format!("generation blocked for safety (finishReason: {})", reason)
        }
        Some(reason) => format!("response contained no image (finishReason: {})", reason),
        None => "response contained no image".to_string(),
    };

    let reason = if text_parts.is_empty() {
        reason
    } else {
        format!("{}; model said: {}", reason, text_parts.join(" "))
    };
    Err(RawFailure::Refused { reason })
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn call(&self, request: &GenerationRequest, deadline: Duration) -> RawResult {
        debug!(
            backend = %self.name,
            model = %self.model,
            references = request.reference_images.len(),
            "Sending generateContent request"
        );

        match transport::with_deadline(deadline, self.send(request)).await {
            Ok(output) => {
                debug!(backend = %self.name, bytes = output.data.len(), "Received image");
                RawResult::Success(output)
            }
            Err(failure) => {
                warn!(backend = %self.name, error = %failure, "generateContent call failed");
                RawResult::Failure(failure)
            }
        }
    }
}
