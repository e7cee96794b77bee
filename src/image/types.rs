//! Core types for image generation routing.

use crate::error::{GenerationError, Result};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Default width and height in pixels.
pub const DEFAULT_DIMENSION: u32 = 1024;
/// Default number of diffusion steps.
pub const DEFAULT_STEPS: u32 = 30;
/// Default classifier-free guidance scale.
pub const DEFAULT_CFG_SCALE: f64 = 7.0;
/// Default number of images requested from the provider.
pub const DEFAULT_SAMPLE_COUNT: u32 = 1;
/// Default aspect ratio.
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";

/// Identifies an image generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Stability AI (SDXL text-to-image, synchronous).
    Stability,
    /// Google Imagen (synchronous predict).
    Imagen,
    /// Replicate predictions (asynchronous submit + poll).
    Replicate,
}

impl ProviderId {
    /// All known providers, in display order.
    pub const ALL: [ProviderId; 3] = [Self::Stability, Self::Imagen, Self::Replicate];

    /// Returns the lowercase identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stability => "stability",
            Self::Imagen => "imagen",
            Self::Replicate => "replicate",
        }
    }

    /// Returns a human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Stability => "Stability AI (SDXL)",
            Self::Imagen => "Imagen (Google)",
            Self::Replicate => "Replicate",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "stability" => Ok(Self::Stability),
            "imagen" => Ok(Self::Imagen),
            "replicate" => Ok(Self::Replicate),
            other => Err(GenerationError::invalid(
                "Unknown provider",
                format!("Provider '{other}' is not supported"),
            )),
        }
    }
}

/// A validated request to generate an image.
///
/// Only [`crate::RequestValidator`] produces these from untrusted input, so
/// every numeric field is positive and the prompt is within bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// The text prompt describing the desired image.
    pub prompt: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Number of sampling steps.
    pub steps: u32,
    /// Guidance scale.
    pub cfg_scale: f64,
    /// Number of images to request upstream. Only the first is returned.
    pub sample_count: u32,
    /// Aspect ratio as `W:H`.
    pub aspect_ratio: String,
    /// Things the image should avoid.
    pub negative_prompt: Option<String>,
    /// Explicit provider selection.
    pub provider_hint: Option<ProviderId>,
}

impl GenerationRequest {
    /// Creates a request with the given prompt and default parameters.
    ///
    /// No validation happens here; use it for trusted, programmatic callers.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
            steps: DEFAULT_STEPS,
            cfg_scale: DEFAULT_CFG_SCALE,
            sample_count: DEFAULT_SAMPLE_COUNT,
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
            negative_prompt: None,
            provider_hint: None,
        }
    }

    /// Sets the desired dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Sets the aspect ratio.
    pub fn with_aspect_ratio(mut self, ratio: impl Into<String>) -> Self {
        self.aspect_ratio = ratio.into();
        self
    }

    /// Sets the negative prompt.
    pub fn with_negative_prompt(mut self, negative: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative.into());
        self
    }

    /// Pins the request to one provider.
    pub fn with_provider(mut self, provider: ProviderId) -> Self {
        self.provider_hint = Some(provider);
        self
    }

    /// Returns the prompt cut to `max` chars, for logging.
    pub fn prompt_preview(&self, max: usize) -> String {
        self.prompt.chars().take(max).collect()
    }
}

/// Lifecycle status of an asynchronous provider job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted, not yet started.
    Pending,
    /// Being processed.
    Running,
    /// Finished with output.
    Succeeded,
    /// Finished without output.
    Failed,
}

impl JobStatus {
    /// Returns true once no further transitions can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// An in-flight asynchronous generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderJob {
    /// Opaque provider-assigned identifier.
    pub id: String,
    /// Last observed status.
    pub status: JobStatus,
    /// When the job was submitted.
    pub created_at: SystemTime,
    /// Raw provider payload holding the output once succeeded.
    pub output: Option<serde_json::Value>,
    /// Provider failure detail once failed.
    pub error: Option<String>,
}

impl ProviderJob {
    /// Creates a job handle in the given status.
    pub fn new(id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            id: id.into(),
            status,
            created_at: SystemTime::now(),
            output: None,
            error: None,
        }
    }

    /// Attaches the raw output payload.
    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Attaches a failure detail.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Canonical success payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[must_use = "generation result should be returned to the caller"]
pub struct GenerationResult {
    image_url: String,
    provider_id: ProviderId,
}

impl GenerationResult {
    pub(crate) fn new(image_url: String, provider_id: ProviderId) -> Self {
        Self {
            image_url,
            provider_id,
        }
    }

    /// Either a `data:` URI or an http(s) URL.
    pub fn image_url(&self) -> &str {
        &self.image_url
    }

    /// Provider that served the request.
    pub fn provider_id(&self) -> ProviderId {
        self.provider_id
    }

    /// Returns true when the image is inline rather than hosted.
    pub fn is_inline(&self) -> bool {
        self.image_url.starts_with("data:")
    }

    /// Returns the bare base64 payload of an inline image.
    pub fn base64_payload(&self) -> Option<&str> {
        self.image_url
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(";base64,"))
            .map(|(_, payload)| payload)
    }
}
