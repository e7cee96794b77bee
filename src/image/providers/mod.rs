//! Image generation providers.

use crate::error::{from_status, Result};
use std::time::Duration;

#[cfg(feature = "imagen")]
mod imagen;
#[cfg(feature = "replicate")]
mod replicate;
#[cfg(feature = "stability")]
mod stability;

#[cfg(feature = "imagen")]
pub use imagen::{ImagenModel, ImagenProvider, ImagenProviderBuilder};
#[cfg(feature = "replicate")]
pub use replicate::{ReplicateProvider, ReplicateProviderBuilder};
#[cfg(feature = "stability")]
pub use stability::{StabilityEngine, StabilityProvider, StabilityProviderBuilder};

/// Default timeout for a single outbound call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Reads a JSON body, mapping non-2xx statuses to canonical errors.
#[allow(dead_code)]
pub(crate) async fn json_or_error(response: reqwest::Response) -> Result<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        return Err(from_status(status.as_u16(), &text, &headers));
    }

    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}

/// Joins a base URL and a path without doubling slashes.
#[allow(dead_code)]
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
