//! Maps provider success payloads to the canonical result.

use crate::error::{GenerationError, Result};
use crate::image::{GenerationResult, ProviderId};
use base64::Engine;
use serde_json::Value;

const DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Extracts an image reference from a raw provider payload.
///
/// Each provider declares the JSON pointers where its output may live, in
/// priority order. The first non-empty string wins.
#[derive(Debug, Clone, Copy)]
pub struct ResultNormalizer {
    provider: ProviderId,
    locations: &'static [&'static str],
}

impl ResultNormalizer {
    /// Creates a normalizer reading the given JSON pointers.
    pub const fn new(provider: ProviderId, locations: &'static [&'static str]) -> Self {
        Self {
            provider,
            locations,
        }
    }

    /// Produces a result from a raw success payload.
    pub fn normalize(&self, payload: &Value) -> Result<GenerationResult> {
        let raw = self
            .locations
            .iter()
            .filter_map(|pointer| payload.pointer(pointer))
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|s| !s.is_empty())
            .ok_or_else(|| {
                GenerationError::unexpected(format!(
                    "{} response contained no image data",
                    self.provider
                ))
            })?;

        Ok(GenerationResult::new(to_image_url(raw)?, self.provider))
    }

    /// Re-normalizes an existing result. Always a no-op.
    pub fn renormalize(&self, result: &GenerationResult) -> Result<GenerationResult> {
        Ok(GenerationResult::new(
            to_image_url(result.image_url())?,
            result.provider_id(),
        ))
    }
}

/// Turns a raw output reference into an `imageUrl`.
///
/// URLs and existing data URIs pass through unchanged; anything else must be
/// standard base64 and is wrapped as a PNG data URI.
pub fn to_image_url(raw: &str) -> Result<String> {
    if raw.starts_with("https://") || raw.starts_with("http://") || raw.starts_with("data:") {
        return Ok(raw.to_string());
    }

    base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| GenerationError::unexpected(format!("image payload is not base64: {e}")))?;

    Ok(format!("{DATA_URI_PREFIX}{raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const IMAGEN: ResultNormalizer = ResultNormalizer::new(
        ProviderId::Imagen,
        &[
            "/predictions/0/bytesBase64Encoded",
            "/predictions/0/image/uri",
            "/predictions/0/image/b64",
        ],
    );

    #[test]
    fn test_inline_base64_is_wrapped() {
        let n = ResultNormalizer::new(ProviderId::Stability, &["/artifacts/0/base64"]);
        let result = n.normalize(&json!({"artifacts": [{"base64": "Zm9v"}]})).unwrap();
        assert_eq!(result.image_url(), "data:image/png;base64,Zm9v");
        assert_eq!(result.provider_id(), ProviderId::Stability);
    }

    #[test]
    fn test_alternate_keys_are_recognized() {
        let by_uri = IMAGEN
            .normalize(&json!({"predictions": [{"image": {"uri": "https://x/y.png"}}]}))
            .unwrap();
        assert_eq!(by_uri.image_url(), "https://x/y.png");

        let by_b64 = IMAGEN
            .normalize(&json!({"predictions": [{"image": {"b64": "YmFy"}}]}))
            .unwrap();
        assert_eq!(by_b64.image_url(), "data:image/png;base64,YmFy");
    }

    #[test]
    fn test_first_location_wins() {
        let result = IMAGEN
            .normalize(&json!({"predictions": [{
                "bytesBase64Encoded": "Zm9v",
                "image": {"uri": "https://x/y.png"}
            }]}))
            .unwrap();
        assert_eq!(result.image_url(), "data:image/png;base64,Zm9v");
    }

    #[test]
    fn test_empty_string_falls_through() {
        let result = IMAGEN
            .normalize(&json!({"predictions": [{
                "bytesBase64Encoded": "",
                "image": {"b64": "Zm9v"}
            }]}))
            .unwrap();
        assert_eq!(result.image_url(), "data:image/png;base64,Zm9v");
    }

    #[test]
    fn test_missing_output_is_unexpected_response() {
        let err = IMAGEN.normalize(&json!({"predictions": []})).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UnexpectedResponse);

        let err = IMAGEN
            .normalize(&json!({"predictions": [{"bytesBase64Encoded": 42}]}))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UnexpectedResponse);
    }

    #[test]
    fn test_malformed_base64_is_unexpected_response() {
        let err = to_image_url("not base64!!").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UnexpectedResponse);
    }

    #[test]
    fn test_renormalize_is_noop() {
        let n = ResultNormalizer::new(ProviderId::Stability, &["/artifacts/0/base64"]);
        let first = n.normalize(&json!({"artifacts": [{"base64": "Zm9v"}]})).unwrap();
        let second = n.renormalize(&first).unwrap();
        assert_eq!(first, second);

        let hosted = GenerationResult::new("https://x/y.png".into(), ProviderId::Replicate);
        assert_eq!(n.renormalize(&hosted).unwrap(), hosted);
    }
}
