//! Extraction backends and submission plumbing.
//!
//! An [`ExtractionBackend`] takes a PDF file and a prompt and returns the
//! structured payload the service extracted, as a JSON array of records.
//! Backends are selected by [`Provider`] and constructed by
//! [`build_backend`]; adding a service means adding a variant and an
//! implementation, nothing else changes.
//!
//! Failures are classified by [`classify_error`] into retryable and terminal
//! kinds; [`RetryPolicy`] drives backoff between attempts.

mod error;
mod gemini;
mod retry;

pub use error::ExtractError;
pub use gemini::GeminiBackend;
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
};

use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::config::ApiKey;

/// A structured-extraction service.
///
/// Implementations own the full submission round trip: upload, any
/// server-side processing wait, the extraction call itself, and parsing the
/// response into a JSON array. One call handles one document; the caller
/// owns retries and checkpointing.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Short name for logging ("gemini").
    fn name(&self) -> &'static str;

    /// Submits one PDF with the given prompt and returns the extracted
    /// records as a JSON array.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] on network, service, or payload failures.
    async fn submit(&self, pdf_path: &Path, prompt: &str)
    -> Result<serde_json::Value, ExtractError>;
}

/// Known extraction service providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Provider {
    /// Google Gemini via the Files + `generateContent` APIs.
    Gemini,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => f.write_str("gemini"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Constructs the backend for a provider.
///
/// # Errors
///
/// Returns [`ExtractError::ClientBuild`] when the backend's HTTP client
/// cannot be constructed.
pub fn build_backend(
    provider: Provider,
    api_key: &ApiKey,
) -> Result<Box<dyn ExtractionBackend>, ExtractError> {
    match provider {
        Provider::Gemini => Ok(Box::new(GeminiBackend::new(api_key.clone())?)),
    }
}

/// Strips a Markdown code fence from model output, if present.
///
/// Models frequently wrap JSON in ```json ... ``` despite instructions not
/// to; the payload inside is what we want.
#[must_use]
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parses response text into the canonical payload form: a JSON array of
/// records.
///
/// A single object is wrapped into a one-element array; anything that is
/// neither an object nor an array is rejected.
pub(crate) fn parse_payload(text: &str) -> Result<serde_json::Value, ExtractError> {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return Err(ExtractError::EmptyResponse);
    }

    let value: serde_json::Value = serde_json::from_str(cleaned)
        .map_err(|e| ExtractError::invalid_response(format!("not valid JSON: {e}")))?;

    match value {
        serde_json::Value::Array(_) => Ok(value),
        obj @ serde_json::Value::Object(_) => Ok(serde_json::Value::Array(vec![obj])),
        other => Err(ExtractError::invalid_response(format!(
            "expected JSON object or array, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
