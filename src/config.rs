//! File-based configuration.

use crate::error::{GenerationError, Result};
use crate::image::{CredentialSource, ProviderAdapter, ProviderId};
use crate::orchestrator::Orchestrator;
use crate::poller::{JobPoller, DEFAULT_POLL_DEADLINE, DEFAULT_POLL_INTERVAL};
use crate::reply::ResponseStyle;
use crate::validate::{DEFAULT_MAX_PROMPT_LENGTH, IMAGEN_MAX_PROMPT_LENGTH};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Top-level configuration. Every field has a default, so an empty file is
/// valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Provider used when a request names none.
    pub default_provider: Option<ProviderId>,
    /// Success body style.
    pub response_style: ResponseStyle,
    /// Polling cadence for job-based providers.
    pub poller: PollerSettings,
    /// Per-provider overrides.
    pub providers: BTreeMap<ProviderId, ProviderSettings>,
}

/// Polling cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollerSettings {
    /// Delay between status checks in milliseconds.
    pub interval_ms: u64,
    /// Total time allowed per job in seconds.
    pub deadline_secs: u64,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            deadline_secs: DEFAULT_POLL_DEADLINE.as_secs(),
        }
    }
}

/// Settings for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderSettings {
    /// Whether the provider is registered. Defaults to true.
    pub enabled: Option<bool>,
    /// API host override.
    pub base_url: Option<String>,
    /// Engine, model name or model version, depending on the provider.
    pub model: Option<String>,
    /// Prompt limit in characters.
    pub max_prompt_length: Option<usize>,
    /// Timeout for a single outbound call in seconds.
    pub timeout_secs: Option<u64>,
}

impl RelayConfig {
    /// Parses TOML.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GenerationError::Config(e.to_string()))
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GenerationError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Settings for `provider`, defaulted when absent.
    pub fn provider(&self, provider: ProviderId) -> ProviderSettings {
        self.providers.get(&provider).cloned().unwrap_or_default()
    }

    /// Prompt limit for `provider`.
    pub fn max_prompt_length(&self, provider: ProviderId) -> usize {
        self.provider(provider)
            .max_prompt_length
            .unwrap_or(match provider {
                ProviderId::Imagen => IMAGEN_MAX_PROMPT_LENGTH,
                ProviderId::Stability | ProviderId::Replicate => DEFAULT_MAX_PROMPT_LENGTH,
            })
    }

    /// Builds the poller described by `[poller]`.
    pub fn job_poller(&self) -> Result<JobPoller> {
        if self.poller.interval_ms == 0 || self.poller.deadline_secs == 0 {
            return Err(GenerationError::Config(
                "poller interval and deadline must be positive".into(),
            ));
        }
        Ok(JobPoller::new(
            Duration::from_millis(self.poller.interval_ms),
            Duration::from_secs(self.poller.deadline_secs),
        ))
    }

    /// Builds an orchestrator with every enabled provider.
    pub fn build_orchestrator(
        &self,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Orchestrator> {
        let mut builder = Orchestrator::builder()
            .credentials(credentials)
            .poller(self.job_poller()?)
            .response_style(self.response_style);

        for id in ProviderId::ALL {
            let settings = self.provider(id);
            if !settings.enabled.unwrap_or(true) {
                continue;
            }
            let Some(adapter) = self.adapter(id, &settings)? else {
                tracing::warn!(provider = %id, "provider configured but not compiled in");
                continue;
            };
            builder = builder.provider(adapter);
        }

        if let Some(default) = self.default_provider {
            builder = builder.default_provider(default);
        }
        builder.build()
    }

    #[allow(unused_variables)]
    fn adapter(
        &self,
        id: ProviderId,
        settings: &ProviderSettings,
    ) -> Result<Option<ProviderAdapter>> {
        let timeout = settings.timeout_secs.map(Duration::from_secs);
        let limit = self.max_prompt_length(id);
        match id {
            #[cfg(feature = "stability")]
            ProviderId::Stability => {
                use crate::image::providers::{StabilityEngine, StabilityProvider};
                let mut b = StabilityProvider::builder();
                if let Some(url) = &settings.base_url {
                    b = b.base_url(url);
                }
                if let Some(model) = &settings.model {
                    b = b.engine(StabilityEngine::Custom(model.clone()));
                }
                if let Some(t) = timeout {
                    b = b.timeout(t);
                }
                b = b.max_prompt_length(limit);
                Ok(Some(ProviderAdapter::sync(b.build()?)))
            }
            #[cfg(feature = "imagen")]
            ProviderId::Imagen => {
                use crate::image::providers::{ImagenModel, ImagenProvider};
                let mut b = ImagenProvider::builder();
                if let Some(url) = &settings.base_url {
                    b = b.base_url(url);
                }
                if let Some(model) = &settings.model {
                    let model = ImagenModel::from_name(model).ok_or_else(|| {
                        GenerationError::Config(format!("unknown imagen model: {model}"))
                    })?;
                    b = b.model(model);
                }
                if let Some(t) = timeout {
                    b = b.timeout(t);
                }
                b = b.max_prompt_length(limit);
                Ok(Some(ProviderAdapter::sync(b.build()?)))
            }
            #[cfg(feature = "replicate")]
            ProviderId::Replicate => {
                use crate::image::providers::ReplicateProvider;
                let mut b = ReplicateProvider::builder();
                if let Some(url) = &settings.base_url {
                    b = b.base_url(url);
                }
                if let Some(version) = &settings.model {
                    b = b.version(version);
                }
                if let Some(t) = timeout {
                    b = b.timeout(t);
                }
                b = b.max_prompt_length(limit);
                Ok(Some(ProviderAdapter::asynchronous(b.build()?)))
            }
            #[allow(unreachable_patterns)]
            _ => Ok(None),
        }
    }
}
