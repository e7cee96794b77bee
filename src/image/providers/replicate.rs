//! Replicate predictions provider.

use super::{join_url, json_or_error, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{GenerationError, Result};
use crate::image::provider::{AsyncProvider, Credential};
use crate::image::types::{GenerationRequest, GenerationResult, JobStatus, ProviderId, ProviderJob};
use crate::normalize::ResultNormalizer;
use crate::validate::DEFAULT_MAX_PROMPT_LENGTH;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.replicate.com";
const DEFAULT_VERSION: &str = "5599ed30703defd1d160a25a63321b4dec97101d98b4674bcc56e41f62f35637";

// Models return either a list of URLs or a single URL.
const OUTPUT: ResultNormalizer =
    ResultNormalizer::new(ProviderId::Replicate, &["/output/0", "/output"]);

/// Builder for [`ReplicateProvider`].
#[derive(Debug, Clone)]
pub struct ReplicateProviderBuilder {
    base_url: String,
    version: String,
    timeout: Duration,
    max_prompt_length: usize,
}

impl Default for ReplicateProviderBuilder {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            version: DEFAULT_VERSION.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            max_prompt_length: DEFAULT_MAX_PROMPT_LENGTH,
        }
    }
}

impl ReplicateProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the API host.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the model version hash.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the timeout for each submit or status call.
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
    pub fn build(self) -> Result<ReplicateProvider> {
        if self.version.trim().is_empty() {
            return Err(GenerationError::Internal(
                "replicate model version must not be empty".into(),
            ));
        }

        Ok(ReplicateProvider {
            client: reqwest::Client::builder().build()?,
            base_url: self.base_url,
            version: self.version,
            timeout: self.timeout,
            max_prompt_length: self.max_prompt_length,
        })
    }
}

/// Replicate provider.
///
/// Submission returns a prediction id; the caller polls it until it
/// reaches `succeeded`, `failed` or `canceled`.
pub struct ReplicateProvider {
    client: reqwest::Client,
    base_url: String,
    version: String,
    timeout: Duration,
    max_prompt_length: usize,
}

impl ReplicateProvider {
    /// Creates a new [`ReplicateProviderBuilder`].
    pub fn builder() -> ReplicateProviderBuilder {
        ReplicateProviderBuilder::new()
    }

    fn to_job(payload: serde_json::Value) -> Result<ProviderJob> {
        let prediction: Prediction = serde_json::from_value(payload.clone())?;
        // The id becomes a URL path segment in `poll`.
        if prediction.id.trim().is_empty() || prediction.id.contains(&['/', '?', '#'][..]) {
            return Err(GenerationError::unexpected(format!(
                "replicate returned unusable prediction id: {:?}",
                prediction.id
            )));
        }
        let status = parse_status(&prediction.status)?;

        let mut job = ProviderJob::new(prediction.id, status);
        if let Some(error) = prediction.error.filter(|e| !e.is_empty()) {
            job = job.with_error(error);
        } else if status == JobStatus::Failed {
            job = job.with_error(format!("prediction {}", prediction.status));
        }
        if status == JobStatus::Succeeded {
            job = job.with_output(payload);
        }
        Ok(job)
    }
}

#[async_trait]
impl AsyncProvider for ReplicateProvider {
    async fn submit(
        &self,
        request: &GenerationRequest,
        credential: &Credential,
    ) -> Result<ProviderJob> {
        let response = self
            .client
            .post(join_url(&self.base_url, "v1/predictions"))
            .bearer_auth(credential.expose())
            .timeout(self.timeout)
            .json(&PredictionRequest::from_generation_request(request, &self.version))
            .send()
            .await?;

        let job = Self::to_job(json_or_error(response).await?)?;
        tracing::debug!(job_id = %job.id, status = %job.status, "submitted replicate prediction");
        Ok(job)
    }

    async fn poll(&self, job_id: &str, credential: &Credential) -> Result<ProviderJob> {
        let response = self
            .client
            .get(join_url(&self.base_url, &format!("v1/predictions/{job_id}")))
            .bearer_auth(credential.expose())
            .timeout(self.timeout)
            .send()
            .await?;

        Self::to_job(json_or_error(response).await?)
    }

    fn normalize(&self, job: &ProviderJob) -> Result<GenerationResult> {
        let output = job
            .output
            .as_ref()
            .ok_or_else(|| GenerationError::unexpected("replicate prediction has no output"))?;
        OUTPUT.normalize(output)
    }

    fn id(&self) -> ProviderId {
        ProviderId::Replicate
    }

    fn max_prompt_length(&self) -> usize {
        self.max_prompt_length
    }
}

fn parse_status(raw: &str) -> Result<JobStatus> {
    match raw {
        "starting" => Ok(JobStatus::Pending),
        "processing" => Ok(JobStatus::Running),
        "succeeded" => Ok(JobStatus::Succeeded),
        "failed" | "canceled" => Ok(JobStatus::Failed),
        other => Err(GenerationError::unexpected(format!(
            "replicate returned unknown status: {other}"
        ))),
    }
}

#[derive(Debug, Serialize)]
struct PredictionInput {
    prompt: String,
    aspect_ratio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
struct PredictionRequest {
    version: String,
    input: PredictionInput,
}

impl PredictionRequest {
    fn from_generation_request(req: &GenerationRequest, version: &str) -> Self {
        Self {
            version: version.to_string(),
            input: PredictionInput {
                prompt: req.prompt.clone(),
                aspect_ratio: req.aspect_ratio.clone(),
                negative_prompt: req.negative_prompt.clone(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    error: Option<String>,
}
