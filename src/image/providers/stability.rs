//! Stability AI (SDXL) image generation provider.

use super::{join_url, json_or_error, DEFAULT_REQUEST_TIMEOUT};
use crate::error::Result;
use crate::image::provider::{Credential, SyncProvider};
use crate::image::types::{GenerationRequest, GenerationResult, ProviderId};
use crate::normalize::ResultNormalizer;
use crate::validate::DEFAULT_MAX_PROMPT_LENGTH;
use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://api.stability.ai";

const OUTPUT: ResultNormalizer =
    ResultNormalizer::new(ProviderId::Stability, &["/artifacts/0/base64"]);

/// Stability engine variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StabilityEngine {
    /// SDXL 1.0 at 1024px.
    #[default]
    SdxlV1,
    /// Any other engine id.
    Custom(String),
}

impl StabilityEngine {
    /// Returns the API engine identifier.
    pub fn as_str(&self) -> &str {
        match self {
            Self::SdxlV1 => "stable-diffusion-xl-1024-v1-0",
            Self::Custom(id) => id,
        }
    }
}

/// Builder for [`StabilityProvider`].
#[derive(Debug, Clone)]
pub struct StabilityProviderBuilder {
    base_url: String,
    engine: StabilityEngine,
    timeout: Duration,
    max_prompt_length: usize,
}

impl Default for StabilityProviderBuilder {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            engine: StabilityEngine::default(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            max_prompt_length: DEFAULT_MAX_PROMPT_LENGTH,
        }
    }
}

impl StabilityProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the API host.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the engine.
    pub fn engine(mut self, engine: StabilityEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Sets the per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the prompt limit checked before any request is sent.
    pub fn max_prompt_length(mut self, max: usize) -> Self {
        self.max_prompt_length = max;
        self
    }

    /// Builds the provider.
    pub fn build(self) -> Result<StabilityProvider> {
        Ok(StabilityProvider {
            client: reqwest::Client::builder().build()?,
            base_url: self.base_url,
            engine: self.engine,
            timeout: self.timeout,
            max_prompt_length: self.max_prompt_length,
        })
    }
}

/// Stability AI text-to-image provider.
///
/// Returns the image inline in a single call.
pub struct StabilityProvider {
    client: reqwest::Client,
    base_url: String,
    engine: StabilityEngine,
    timeout: Duration,
    max_prompt_length: usize,
}

impl StabilityProvider {
    /// Creates a new [`StabilityProviderBuilder`].
    pub fn builder() -> StabilityProviderBuilder {
        StabilityProviderBuilder::new()
    }
}

#[async_trait]
impl SyncProvider for StabilityProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: &Credential,
    ) -> Result<GenerationResult> {
        let start = Instant::now();
        let url = join_url(
            &self.base_url,
            &format!("v1/generation/{}/text-to-image", self.engine.as_str()),
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(credential.expose())
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .json(&StabilityRequest::from_generation_request(request))
            .send()
            .await?;

        let payload = json_or_error(response).await?;
        let result = OUTPUT.normalize(&payload)?;

        tracing::debug!(
            engine = self.engine.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            "stability generation complete"
        );
        Ok(result)
    }

    fn id(&self) -> ProviderId {
        ProviderId::Stability
    }

    fn max_prompt_length(&self) -> usize {
        self.max_prompt_length
    }
}

#[derive(Debug, Serialize)]
struct TextPrompt {
    text: String,
    weight: f64,
}

#[derive(Debug, Serialize)]
struct StabilityRequest {
    text_prompts: Vec<TextPrompt>,
    cfg_scale: f64,
    height: u32,
    width: u32,
    steps: u32,
    samples: u32,
}

impl StabilityRequest {
    fn from_generation_request(req: &GenerationRequest) -> Self {
        let mut text_prompts = vec![TextPrompt {
            text: req.prompt.clone(),
            weight: 1.0,
        }];
        // SDXL expresses negative prompts as a negatively weighted prompt.
        if let Some(negative) = &req.negative_prompt {
            text_prompts.push(TextPrompt {
                text: negative.clone(),
                weight: -1.0,
            });
        }

        Self {
            text_prompts,
            cfg_scale: req.cfg_scale,
            height: req.height,
            width: req.width,
            steps: req.steps,
            samples: req.sample_count,
        }
    }
}
