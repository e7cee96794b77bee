//! Google Imagen image generation provider.

use super::{join_url, json_or_error, DEFAULT_REQUEST_TIMEOUT};
use crate::error::Result;
use crate::image::provider::{Credential, SyncProvider};
use crate::image::types::{GenerationRequest, GenerationResult, ProviderId};
use crate::normalize::ResultNormalizer;
use crate::validate::IMAGEN_MAX_PROMPT_LENGTH;
use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const OUTPUT: ResultNormalizer = ResultNormalizer::new(
    ProviderId::Imagen,
    &[
        "/predictions/0/bytesBase64Encoded",
        "/predictions/0/image/uri",
        "/predictions/0/image/b64",
    ],
);

/// Imagen model variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImagenModel {
    /// Imagen 3, high quality.
    #[default]
    Imagen3,
    /// Imagen 3 fast.
    Imagen3Fast,
}

impl ImagenModel {
    /// Returns the API model identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imagen3 => "imagen-3.0-generate-001",
            Self::Imagen3Fast => "imagen-3.0-fast-generate-001",
        }
    }

    /// Parses a model id or the short names `quality` / `fast`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "imagen-3.0-generate-001" | "quality" | "high-quality" => Some(Self::Imagen3),
            "imagen-3.0-fast-generate-001" | "fast" => Some(Self::Imagen3Fast),
            _ => None,
        }
    }
}

/// Builder for [`ImagenProvider`].
#[derive(Debug, Clone)]
pub struct ImagenProviderBuilder {
    base_url: String,
    model: ImagenModel,
    timeout: Duration,
    max_prompt_length: usize,
}

impl Default for ImagenProviderBuilder {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: ImagenModel::default(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            max_prompt_length: IMAGEN_MAX_PROMPT_LENGTH,
        }
    }
}

impl ImagenProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the API host.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the Imagen model variant.
    pub fn model(mut self, model: ImagenModel) -> Self {
        self.model = model;
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
    pub fn build(self) -> Result<ImagenProvider> {
        Ok(ImagenProvider {
            client: reqwest::Client::builder().build()?,
            base_url: self.base_url,
            model: self.model,
            timeout: self.timeout,
            max_prompt_length: self.max_prompt_length,
        })
    }
}

/// Google Imagen provider using the `:predict` endpoint.
pub struct ImagenProvider {
    client: reqwest::Client,
    base_url: String,
    model: ImagenModel,
    timeout: Duration,
    max_prompt_length: usize,
}

impl ImagenProvider {
    /// Creates a new [`ImagenProviderBuilder`].
    pub fn builder() -> ImagenProviderBuilder {
        ImagenProviderBuilder::new()
    }
}

#[async_trait]
impl SyncProvider for ImagenProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: &Credential,
    ) -> Result<GenerationResult> {
        let start = Instant::now();
        let url = join_url(
            &self.base_url,
            &format!("v1beta/models/{}:predict", self.model.as_str()),
        );

        // Key goes in a header, never in the URL.
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", credential.expose())
            .timeout(self.timeout)
            .json(&ImagenRequest::from_generation_request(request))
            .send()
            .await?;

        let payload = json_or_error(response).await?;
        let result = OUTPUT.normalize(&payload)?;

        tracing::debug!(
            model = self.model.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            "imagen generation complete"
        );
        Ok(result)
    }

    fn id(&self) -> ProviderId {
        ProviderId::Imagen
    }

    fn max_prompt_length(&self) -> usize {
        self.max_prompt_length
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImagenInstance {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImagenParameters {
    sample_count: u32,
    aspect_ratio: String,
    safety_filter_level: &'static str,
    person_generation: &'static str,
}

#[derive(Debug, Serialize)]
struct ImagenRequest {
    instances: Vec<ImagenInstance>,
    parameters: ImagenParameters,
}

impl ImagenRequest {
    fn from_generation_request(req: &GenerationRequest) -> Self {
        Self {
            instances: vec![ImagenInstance {
                prompt: req.prompt.clone(),
                negative_prompt: req.negative_prompt.clone(),
            }],
            parameters: ImagenParameters {
                sample_count: req.sample_count,
                aspect_ratio: req.aspect_ratio.clone(),
                safety_filter_level: "block_some",
                person_generation: "allow_adult",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    const PATH: &str = "/v1beta/models/imagen-3.0-generate-001:predict";

    fn provider(server: &MockServer) -> ImagenProvider {
        ImagenProvider::builder()
            .base_url(server.base_url())
            .build()
            .unwrap()
    }

    #[test]
    fn test_model_names() {
        assert_eq!(ImagenModel::Imagen3.as_str(), "imagen-3.0-generate-001");
        assert_eq!(ImagenModel::from_name("fast"), Some(ImagenModel::Imagen3Fast));
        assert_eq!(ImagenModel::from_name("dall-e"), None);
    }

    #[test]
    fn test_request_serialization() {
        let req = GenerationRequest::new("a cat").with_aspect_ratio("16:9");
        let body = serde_json::to_value(ImagenRequest::from_generation_request(&req)).unwrap();

        assert_eq!(body["instances"][0]["prompt"], "a cat");
        assert!(body["instances"][0].get("negativePrompt").is_none());
        assert_eq!(body["parameters"]["sampleCount"], 1);
        assert_eq!(body["parameters"]["aspectRatio"], "16:9");
    }

    #[test]
    fn test_default_prompt_limit() {
        let provider = ImagenProvider::builder().build().unwrap();
        assert_eq!(provider.max_prompt_length(), 1000);
    }

    #[tokio::test]
    async fn test_bytes_base64_encoded() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(PATH)
                    .header("x-goog-api-key", "g-test");
                then.status(200)
                    .json_body(json!({"predictions": [{"bytesBase64Encoded": "Zm9v"}]}));
            })
            .await;

        let result = provider(&server)
            .generate(&GenerationRequest::new("a cat"), &Credential::new("g-test"))
            .await
            .unwrap();
        mock.assert_async().await;

        assert_eq!(result.image_url(), "data:image/png;base64,Zm9v");
    }

    #[tokio::test]
    async fn test_image_uri_passes_through() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(200).json_body(
                    json!({"predictions": [{"image": {"uri": "https://cdn.example/a.png"}}]}),
                );
            })
            .await;

        let result = provider(&server)
            .generate(&GenerationRequest::new("a cat"), &Credential::new("g-test"))
            .await
            .unwrap();

        assert_eq!(result.image_url(), "https://cdn.example/a.png");
    }

    #[tokio::test]
    async fn test_forbidden_is_auth_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(403).body("API key not valid");
            })
            .await;

        let err = provider(&server)
            .generate(&GenerationRequest::new("a cat"), &Credential::new("g-bad"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProviderAuthFailed);
    }

    #[tokio::test]
    async fn test_non_json_success_is_unexpected_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(200).body("<html>maintenance</html>");
            })
            .await;

        let err = provider(&server)
            .generate(&GenerationRequest::new("a cat"), &Credential::new("g-test"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnexpectedResponse);
    }
}
