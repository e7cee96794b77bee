//! Validation of untrusted request bodies.

use crate::error::{GenerationError, Result};
use crate::image::{
    GenerationRequest, ProviderId, DEFAULT_ASPECT_RATIO, DEFAULT_CFG_SCALE, DEFAULT_DIMENSION,
    DEFAULT_SAMPLE_COUNT, DEFAULT_STEPS,
};
use serde_json::{Map, Value};

/// Default maximum prompt length in characters.
pub const DEFAULT_MAX_PROMPT_LENGTH: usize = 2000;

/// Imagen rejects prompts longer than this.
pub const IMAGEN_MAX_PROMPT_LENGTH: usize = 1000;

/// Turns a raw JSON body into a [`GenerationRequest`].
///
/// The prompt limit differs between providers, so each provider binding
/// carries its own validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestValidator {
    max_prompt_length: usize,
}

impl Default for RequestValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PROMPT_LENGTH)
    }
}

impl RequestValidator {
    /// Creates a validator with the given prompt limit.
    pub fn new(max_prompt_length: usize) -> Self {
        Self { max_prompt_length }
    }

    /// Returns the configured prompt limit.
    pub fn max_prompt_length(&self) -> usize {
        self.max_prompt_length
    }

    /// Validates `raw` and fills in defaults.
    pub fn validate(&self, raw: &Value) -> Result<GenerationRequest> {
        let body = raw.as_object().ok_or_else(|| {
            GenerationError::invalid(
                "Invalid request format",
                "Request body must be a JSON object",
            )
        })?;

        let prompt = match body.get("prompt") {
            Some(Value::String(p)) if !p.trim().is_empty() => p.clone(),
            _ => {
                return Err(GenerationError::invalid(
                    "Prompt is required",
                    "Prompt must be a non-empty string",
                ))
            }
        };

        if prompt.chars().count() > self.max_prompt_length {
            return Err(GenerationError::invalid(
                "Prompt too long",
                format!(
                    "Prompt must be less than {} characters",
                    self.max_prompt_length
                ),
            ));
        }

        let aspect_ratio = match optional_string(body, "aspectRatio")? {
            Some(ar) => parse_aspect_ratio(&ar)?,
            None => DEFAULT_ASPECT_RATIO.to_string(),
        };

        let negative_prompt =
            optional_string(body, "negativePrompt")?.filter(|s| !s.trim().is_empty());

        let provider_hint = optional_string(body, "provider")?
            .map(|p| p.parse::<ProviderId>())
            .transpose()?;

        Ok(GenerationRequest {
            prompt,
            width: positive_int(body, "width", DEFAULT_DIMENSION)?,
            height: positive_int(body, "height", DEFAULT_DIMENSION)?,
            steps: positive_int(body, "steps", DEFAULT_STEPS)?,
            cfg_scale: positive_number(body, "cfgScale", DEFAULT_CFG_SCALE)?,
            sample_count: positive_int(body, "sampleCount", DEFAULT_SAMPLE_COUNT)?,
            aspect_ratio,
            negative_prompt,
            provider_hint,
        })
    }
}

/// Reads the `provider` field without validating anything else.
///
/// The orchestrator needs the provider before it knows which prompt limit
/// applies.
pub(crate) fn provider_hint(raw: &Value) -> Result<Option<ProviderId>> {
    match raw.get("provider") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(p)) => p.parse().map(Some),
        Some(_) => Err(invalid_field("provider", "must be a string")),
    }
}

fn invalid_field(field: &str, problem: &str) -> GenerationError {
    GenerationError::invalid("Invalid parameter", format!("{field} {problem}"))
}

fn optional_string(body: &Map<String, Value>, field: &str) -> Result<Option<String>> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(invalid_field(field, "must be a string")),
    }
}

/// Reads a number that may have been serialized as a string.
fn coerce_number(body: &Map<String, Value>, field: &str) -> Result<Option<f64>> {
    let value = match body.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match value {
        Some(v) if v.is_finite() && v > 0.0 => Ok(Some(v)),
        _ => Err(invalid_field(field, "must be a positive finite number")),
    }
}

fn positive_number(body: &Map<String, Value>, field: &str, default: f64) -> Result<f64> {
    Ok(coerce_number(body, field)?.unwrap_or(default))
}

fn positive_int(body: &Map<String, Value>, field: &str, default: u32) -> Result<u32> {
    match coerce_number(body, field)? {
        None => Ok(default),
        Some(v) if v.fract() != 0.0 => Err(invalid_field(field, "must be a whole number")),
        Some(v) if v > f64::from(u32::MAX) => Err(invalid_field(
            field,
            &format!("is out of range (at most {})", u32::MAX),
        )),
        Some(v) => Ok(v as u32),
    }
}

fn parse_aspect_ratio(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let valid = raw
        .split_once(':')
        .map(|(w, h)| {
            [w, h]
                .iter()
                .all(|part| part.parse::<u32>().map(|n| n > 0).unwrap_or(false))
        })
        .unwrap_or(false);

    if valid {
        Ok(raw.to_string())
    } else {
        Err(invalid_field("aspectRatio", "must look like 16:9"))
    }
}
