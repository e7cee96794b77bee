//! Canonical HTTP replies.
//!
//! The crate has no listener of its own. Any front door can emit an
//! [`HttpReply`] verbatim: status, headers and JSON body are fully decided
//! here.

use crate::error::{GenerationError, Result};
use crate::image::GenerationResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Headers attached to every reply. All origins are allowed.
pub const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    (
        "Access-Control-Allow-Headers",
        "authorization, x-client-info, apikey, content-type",
    ),
    ("Access-Control-Allow-Methods", "POST, OPTIONS"),
];

/// Shape of a successful reply body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseStyle {
    /// `{ imageUrl, success }`.
    #[default]
    ImageUrl,
    /// `{ image, success }` with bare base64; hosted images still use
    /// `imageUrl`.
    RawBase64,
}

/// Successful reply body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    success: bool,
}

impl SuccessBody {
    /// Builds the body for `result` in the requested style.
    pub fn new(result: &GenerationResult, style: ResponseStyle) -> Self {
        match (style, result.base64_payload()) {
            (ResponseStyle::RawBase64, Some(payload)) => Self {
                image_url: None,
                image: Some(payload.to_string()),
                success: true,
            },
            _ => Self {
                image_url: Some(result.image_url().to_string()),
                image: None,
                success: true,
            },
        }
    }
}

/// Error reply body. Never carries provider bodies or stack traces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Short summary.
    pub error: String,
    /// Optional explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&GenerationError> for ErrorBody {
    fn from(err: &GenerationError) -> Self {
        Self {
            error: err.message().to_string(),
            details: err.details(),
        }
    }
}

/// A fully decided HTTP reply.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(&'static str, &'static str)>,
    /// JSON body, absent for preflight.
    pub body: Option<Value>,
}

impl HttpReply {
    /// 200 with a success body.
    pub fn success(result: &GenerationResult, style: ResponseStyle) -> Self {
        Self::json(200, serde_json::to_value(SuccessBody::new(result, style)))
    }

    /// Status and body mirroring the error kind.
    pub fn error(err: &GenerationError) -> Self {
        Self::json(err.http_status(), serde_json::to_value(ErrorBody::from(err)))
    }

    /// Either of the above.
    pub fn from_outcome(outcome: &Result<GenerationResult>, style: ResponseStyle) -> Self {
        match outcome {
            Ok(result) => Self::success(result, style),
            Err(err) => Self::error(err),
        }
    }

    /// CORS preflight: 204 with no body.
    pub fn preflight() -> Self {
        Self {
            status: 204,
            headers: cors_headers(),
            body: None,
        }
    }

    /// 405 for anything but POST and OPTIONS.
    pub fn method_not_allowed() -> Self {
        let body = ErrorBody {
            error: "Method not allowed".into(),
            details: Some("Use POST".into()),
        };
        Self::json(405, serde_json::to_value(body))
    }

    fn json(status: u16, body: serde_json::Result<Value>) -> Self {
        match body {
            Ok(body) => Self {
                status,
                headers: with_content_type(),
                body: Some(body),
            },
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize reply body");
                Self {
                    status: 500,
                    headers: with_content_type(),
                    body: Some(serde_json::json!({ "error": "Internal server error" })),
                }
            }
        }
    }
}

fn cors_headers() -> Vec<(&'static str, &'static str)> {
    CORS_HEADERS.to_vec()
}

fn with_content_type() -> Vec<(&'static str, &'static str)> {
    let mut headers = cors_headers();
    headers.push(("Content-Type", "application/json"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ProviderId;
    use serde_json::json;
    use std::time::Duration;

    fn inline() -> GenerationResult {
        GenerationResult::new("data:image/png;base64,Zm9v".into(), ProviderId::Stability)
    }

    #[test]
    fn test_success_image_url_style() {
        let reply = HttpReply::success(&inline(), ResponseStyle::ImageUrl);
        assert_eq!(reply.status, 200);
        assert_eq!(
            reply.body,
            Some(json!({"imageUrl": "data:image/png;base64,Zm9v", "success": true}))
        );
    }

    #[test]
    fn test_success_raw_base64_style() {
        let reply = HttpReply::success(&inline(), ResponseStyle::RawBase64);
        assert_eq!(reply.body, Some(json!({"image": "Zm9v", "success": true})));

        let hosted = GenerationResult::new("https://x/y.png".into(), ProviderId::Replicate);
        let reply = HttpReply::success(&hosted, ResponseStyle::RawBase64);
        assert_eq!(
            reply.body,
            Some(json!({"imageUrl": "https://x/y.png", "success": true}))
        );
    }

    #[test]
    fn test_error_replies() {
        let reply = HttpReply::error(&GenerationError::invalid(
            "Prompt is required",
            "Prompt must be a non-empty string",
        ));
        assert_eq!(reply.status, 400);
        assert_eq!(
            reply.body,
            Some(json!({
                "error": "Prompt is required",
                "details": "Prompt must be a non-empty string"
            }))
        );

        let reply = HttpReply::error(&GenerationError::Timeout(Duration::from_secs(120)));
        assert_eq!(reply.status, 504);

        let reply = HttpReply::error(&GenerationError::Internal("boom".into()));
        assert_eq!(reply.status, 500);
        assert_eq!(reply.body, Some(json!({"error": "Internal server error"})));
    }

    #[test]
    fn test_preflight() {
        let reply = HttpReply::preflight();
        assert_eq!(reply.status, 204);
        assert!(reply.body.is_none());
        assert!(reply
            .headers
            .contains(&("Access-Control-Allow-Origin", "*")));
    }

    #[test]
    fn test_every_reply_carries_cors() {
        let reply = HttpReply::method_not_allowed();
        assert_eq!(reply.status, 405);
        for header in CORS_HEADERS {
            assert!(reply.headers.contains(&header));
        }
    }
}
