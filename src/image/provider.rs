//! Provider traits and credential plumbing.

use crate::error::Result;
use crate::image::types::{GenerationRequest, GenerationResult, ProviderId, ProviderJob};
use crate::validate::DEFAULT_MAX_PROMPT_LENGTH;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// An API key for one provider.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a raw key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the raw key for use in an outbound header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Resolves provider credentials.
///
/// Implementations are read-only after construction and shared across
/// requests.
pub trait CredentialSource: Send + Sync {
    /// Returns the credential for `provider`, or `None` if unconfigured.
    fn credential(&self, provider: ProviderId) -> Option<Credential>;
}

/// Environment variable holding each provider's key.
pub fn credential_env_var(provider: ProviderId) -> &'static str {
    match provider {
        ProviderId::Stability => "STABILITY_API_KEY",
        ProviderId::Imagen => "GOOGLE_AI_API_KEY",
        ProviderId::Replicate => "REPLICATE_API_KEY",
    }
}

/// Credentials captured from the process environment once, at startup.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    keys: HashMap<ProviderId, Credential>,
}

impl EnvCredentials {
    /// Reads every provider's key variable. Empty values count as unset.
    pub fn from_env() -> Self {
        let keys = ProviderId::ALL
            .into_iter()
            .filter_map(|id| {
                std::env::var(credential_env_var(id))
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (id, Credential::new(v)))
            })
            .collect();
        Self { keys }
    }
}

impl CredentialSource for EnvCredentials {
    fn credential(&self, provider: ProviderId) -> Option<Credential> {
        self.keys.get(&provider).cloned()
    }
}

/// Fixed in-memory credentials.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    keys: HashMap<ProviderId, Credential>,
}

impl StaticCredentials {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key for `provider`.
    pub fn with(mut self, provider: ProviderId, key: impl Into<String>) -> Self {
        self.keys.insert(provider, Credential::new(key));
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn credential(&self, provider: ProviderId) -> Option<Credential> {
        self.keys.get(&provider).cloned()
    }
}

/// A provider that returns the finished image in a single call.
#[async_trait]
pub trait SyncProvider: Send + Sync {
    /// Generates an image. Issues exactly one outbound request.
    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: &Credential,
    ) -> Result<GenerationResult>;

    /// Returns the id of this provider.
    fn id(&self) -> ProviderId;

    /// Longest prompt accepted, in characters. Checked before dispatch.
    fn max_prompt_length(&self) -> usize {
        DEFAULT_MAX_PROMPT_LENGTH
    }
}

/// A provider that hands back a job to be polled.
#[async_trait]
pub trait AsyncProvider: Send + Sync {
    /// Submits a generation job. Issues exactly one outbound request.
    async fn submit(&self, request: &GenerationRequest, credential: &Credential)
        -> Result<ProviderJob>;

    /// Fetches the current state of a job. Issues exactly one outbound request.
    async fn poll(&self, job_id: &str, credential: &Credential) -> Result<ProviderJob>;

    /// Converts the output of a succeeded job into a result.
    fn normalize(&self, job: &ProviderJob) -> Result<GenerationResult>;

    /// Returns the id of this provider.
    fn id(&self) -> ProviderId;

    /// Longest prompt accepted, in characters. Checked before submission.
    fn max_prompt_length(&self) -> usize {
        DEFAULT_MAX_PROMPT_LENGTH
    }
}

/// A provider with its calling convention.
#[derive(Clone)]
pub enum ProviderAdapter {
    /// Single-call provider.
    Sync(Arc<dyn SyncProvider>),
    /// Submit-and-poll provider.
    Async(Arc<dyn AsyncProvider>),
}

impl ProviderAdapter {
    /// Wraps a synchronous provider.
    pub fn sync(provider: impl SyncProvider + 'static) -> Self {
        Self::Sync(Arc::new(provider))
    }

    /// Wraps an asynchronous provider.
    pub fn asynchronous(provider: impl AsyncProvider + 'static) -> Self {
        Self::Async(Arc::new(provider))
    }

    /// Returns the id of the wrapped provider.
    pub fn id(&self) -> ProviderId {
        match self {
            Self::Sync(p) => p.id(),
            Self::Async(p) => p.id(),
        }
    }

    /// Prompt limit of the wrapped provider.
    pub fn max_prompt_length(&self) -> usize {
        match self {
            Self::Sync(p) => p.max_prompt_length(),
            Self::Async(p) => p.max_prompt_length(),
        }
    }

    /// Returns true for submit-and-poll providers.
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }
}

impl std::fmt::Debug for ProviderAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = if self.is_async() { "async" } else { "sync" };
        write!(f, "ProviderAdapter({}, {mode})", self.id())
    }
}
