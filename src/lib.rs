#![warn(missing_docs)]
//! ImageRelay - text-to-image request relay.
//!
//! Accepts an untrusted JSON body, validates it, dispatches it to one of
//! several image generation providers and returns a uniform reply carrying
//! either a hosted image URL or an inline `data:` URI.
//!
//! # Quick Start
//!
//! ```no_run
//! use imagerelay::{EnvCredentials, RelayConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> imagerelay::Result<()> {
//!     let orchestrator =
//!         RelayConfig::default().build_orchestrator(Arc::new(EnvCredentials::from_env()))?;
//!     let reply = orchestrator
//!         .handle(&json!({ "prompt": "A lighthouse at dusk", "provider": "imagen" }))
//!         .await;
//!     println!("{} {:?}", reply.status, reply.body);
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `stability`: Stability AI (synchronous, inline base64)
//! - `imagen`: Google Imagen (synchronous, inline base64 or hosted URL)
//! - `replicate`: Replicate predictions (job-based, hosted URL)
//! - `all-providers`: all of the above
//! - `cli`: Command-line interface
//! - `test-util`: exposes `poller::ManualClock` for deterministic polling tests

pub mod config;
mod error;
pub mod image;
pub mod normalize;
pub mod orchestrator;
pub mod poller;
pub mod reply;
pub mod validate;

// Re-export error types at crate root
pub use error::{ErrorKind, GenerationError, Result};

pub use config::{PollerSettings, ProviderSettings, RelayConfig};
pub use image::{
    AsyncProvider, Credential, CredentialSource, EnvCredentials, GenerationRequest,
    GenerationResult, JobStatus, ProviderAdapter, ProviderId, ProviderJob, StaticCredentials,
    SyncProvider,
};
pub use normalize::ResultNormalizer;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, ProviderBinding, Stage};
pub use poller::{Clock, JobPoller, TokioClock};
pub use reply::{HttpReply, ResponseStyle};
pub use validate::RequestValidator;

#[cfg(feature = "stability")]
pub use image::providers::{StabilityEngine, StabilityProvider, StabilityProviderBuilder};

#[cfg(feature = "imagen")]
pub use image::providers::{ImagenModel, ImagenProvider, ImagenProviderBuilder};

#[cfg(feature = "replicate")]
pub use image::providers::{ReplicateProvider, ReplicateProviderBuilder};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{GenerationError, Result};
    pub use crate::image::{
        AsyncProvider, CredentialSource, GenerationRequest, GenerationResult, ProviderId,
        SyncProvider,
    };
    pub use crate::orchestrator::Orchestrator;
    pub use crate::reply::HttpReply;

    #[cfg(feature = "stability")]
    pub use crate::image::providers::StabilityProvider;

    #[cfg(feature = "imagen")]
    pub use crate::image::providers::ImagenProvider;

    #[cfg(feature = "replicate")]
    pub use crate::image::providers::ReplicateProvider;
}
