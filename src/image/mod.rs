//! Image generation module.

mod provider;
pub mod providers;
mod types;

pub use provider::{
    credential_env_var, AsyncProvider, Credential, CredentialSource, EnvCredentials,
    ProviderAdapter, StaticCredentials, SyncProvider,
};
pub use types::{
    GenerationRequest, GenerationResult, JobStatus, ProviderId, ProviderJob, DEFAULT_ASPECT_RATIO,
    DEFAULT_CFG_SCALE, DEFAULT_DIMENSION, DEFAULT_SAMPLE_COUNT, DEFAULT_STEPS,
};
