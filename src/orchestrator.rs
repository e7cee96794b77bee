//! Request orchestration: validate, dispatch, poll, normalize.

use crate::error::{GenerationError, Result};
use crate::image::{
    CredentialSource, GenerationResult, ProviderAdapter, ProviderId, StaticCredentials,
};
use crate::poller::JobPoller;
use crate::reply::{HttpReply, ResponseStyle};
use crate::validate::{provider_hint, RequestValidator};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const PROMPT_LOG_CHARS: usize = 120;

/// Where a request currently is. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Checking the raw body.
    Validating,
    /// Selecting the provider and credential, issuing the first call.
    Dispatching,
    /// A synchronous provider answered.
    SyncCompleted,
    /// Waiting on an asynchronous job.
    Polling,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validating => "validating",
            Self::Dispatching => "dispatching",
            Self::SyncCompleted => "sync_completed",
            Self::Polling => "polling",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A registered provider and the validator that guards it.
///
/// The validator always enforces the provider's own prompt limit.
#[derive(Debug, Clone)]
pub struct ProviderBinding {
    adapter: ProviderAdapter,
    validator: RequestValidator,
}

impl ProviderBinding {
    /// Binds an adapter to a validator built from its prompt limit.
    pub fn new(adapter: ProviderAdapter) -> Self {
        let validator = RequestValidator::new(adapter.max_prompt_length());
        Self { adapter, validator }
    }

    /// The provider adapter.
    pub fn adapter(&self) -> &ProviderAdapter {
        &self.adapter
    }

    /// The request validator.
    pub fn validator(&self) -> &RequestValidator {
        &self.validator
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    bindings: BTreeMap<ProviderId, ProviderBinding>,
    default_provider: Option<ProviderId>,
    credentials: Arc<dyn CredentialSource>,
    poller: JobPoller,
    response_style: ResponseStyle,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            bindings: BTreeMap::new(),
            default_provider: None,
            credentials: Arc::new(StaticCredentials::new()),
            poller: JobPoller::default(),
            response_style: ResponseStyle::default(),
        }
    }
}

impl OrchestratorBuilder {
    /// Creates a builder with no providers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider. A later registration for the same id wins.
    pub fn provider(mut self, adapter: ProviderAdapter) -> Self {
        self.bindings.insert(adapter.id(), ProviderBinding::new(adapter));
        self
    }

    /// Provider used when a request names none.
    pub fn default_provider(mut self, provider: ProviderId) -> Self {
        self.default_provider = Some(provider);
        self
    }

    /// Sets the credential source.
    pub fn credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Sets the poller used for asynchronous providers.
    pub fn poller(mut self, poller: JobPoller) -> Self {
        self.poller = poller;
        self
    }

    /// Sets the success body style.
    pub fn response_style(mut self, style: ResponseStyle) -> Self {
        self.response_style = style;
        self
    }

    /// Builds the orchestrator.
    ///
    /// Fails if no provider is registered or the default is not one of them.
    /// Without an explicit default the first registered id is used.
    pub fn build(self) -> Result<Orchestrator> {
        let default_provider = match self.default_provider {
            Some(id) if self.bindings.contains_key(&id) => id,
            Some(id) => {
                return Err(GenerationError::Internal(format!(
                    "default provider {id} is not registered"
                )))
            }
            None => *self.bindings.keys().next().ok_or_else(|| {
                GenerationError::Internal("no providers registered".into())
            })?,
        };

        Ok(Orchestrator {
            bindings: self.bindings,
            default_provider,
            credentials: self.credentials,
            poller: self.poller,
            response_style: self.response_style,
        })
    }
}

/// Routes one generation request through validation, a provider, and (for
/// job-based providers) the poller.
///
/// Holds no per-request state; one instance serves any number of concurrent
/// requests.
pub struct Orchestrator {
    bindings: BTreeMap<ProviderId, ProviderBinding>,
    default_provider: ProviderId,
    credentials: Arc<dyn CredentialSource>,
    poller: JobPoller,
    response_style: ResponseStyle,
}

impl Orchestrator {
    /// Creates a new [`OrchestratorBuilder`].
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Provider used when a request names none.
    pub fn default_provider(&self) -> ProviderId {
        self.default_provider
    }

    /// Registered providers in id order.
    pub fn bindings(&self) -> impl Iterator<Item = (ProviderId, &ProviderBinding)> {
        self.bindings.iter().map(|(id, b)| (*id, b))
    }

    /// Returns true if a credential is configured for `provider`.
    pub fn has_credential(&self, provider: ProviderId) -> bool {
        self.credentials.credential(provider).is_some()
    }

    /// Handles a raw request body and returns the canonical reply.
    pub async fn handle(&self, raw: &Value) -> HttpReply {
        self.handle_with_cancel(raw, &CancellationToken::new()).await
    }

    /// Like [`Self::handle`], abandoning work once `cancel` fires.
    pub async fn handle_with_cancel(&self, raw: &Value, cancel: &CancellationToken) -> HttpReply {
        let outcome = self.generate_with_cancel(raw, cancel).await;
        HttpReply::from_outcome(&outcome, self.response_style)
    }

    /// Generates an image from a raw request body.
    pub async fn generate(&self, raw: &Value) -> Result<GenerationResult> {
        self.generate_with_cancel(raw, &CancellationToken::new()).await
    }

    /// Like [`Self::generate`], abandoning work once `cancel` fires.
    pub async fn generate_with_cancel(
        &self,
        raw: &Value,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        let span = tracing::info_span!(
            "generate",
            provider = tracing::field::Empty,
            stage = %Stage::Validating
        );
        let start = Instant::now();

        let outcome = self.run(raw, cancel).instrument(span.clone()).await;

        let _entered = span.enter();
        match &outcome {
            Ok(result) => {
                span.record("stage", tracing::field::display(Stage::Completed));
                tracing::info!(
                    provider = %result.provider_id(),
                    inline = result.is_inline(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "image generated"
                );
            }
            Err(err) => {
                span.record("stage", tracing::field::display(Stage::Failed));
                tracing::error!(
                    kind = %err.kind(),
                    status = err.http_status(),
                    detail = ?err.provider_detail(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "image generation failed: {err}"
                );
            }
        }
        outcome
    }

    async fn run(&self, raw: &Value, cancel: &CancellationToken) -> Result<GenerationResult> {
        let span = tracing::Span::current();

        // The prompt limit depends on the provider, so resolve it first.
        let provider = provider_hint(raw)?.unwrap_or(self.default_provider);
        span.record("provider", tracing::field::display(provider));
        let binding = self.bindings.get(&provider).ok_or_else(|| {
            GenerationError::invalid(
                "Unknown provider",
                format!("Provider '{provider}' is not enabled"),
            )
        })?;
        let request = binding.validator.validate(raw)?;

        span.record("stage", tracing::field::display(Stage::Dispatching));
        let credential = self.credentials.credential(provider).ok_or_else(|| {
            tracing::error!(provider = %provider, "no credential configured for provider");
            GenerationError::MissingCredential(provider.to_string())
        })?;

        tracing::info!(
            prompt = %request.prompt_preview(PROMPT_LOG_CHARS),
            width = request.width,
            height = request.height,
            "dispatching generation request"
        );

        match &binding.adapter {
            ProviderAdapter::Sync(p) => {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                    result = p.generate(&request, &credential) => result?,
                };
                span.record("stage", tracing::field::display(Stage::SyncCompleted));
                Ok(result)
            }
            ProviderAdapter::Async(p) => {
                let job = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                    job = p.submit(&request, &credential) => job?,
                };
                span.record("stage", tracing::field::display(Stage::Polling));
                tracing::info!(job_id = %job.id, status = %job.status, "job submitted");
                self.poller
                    .poll(p.as_ref(), job, &credential, cancel)
                    .await
            }
        }
    }
}
