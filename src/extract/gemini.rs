//! Google Gemini extraction backend.
//!
//! Submission is a three-step round trip against the Generative Language
//! API: upload the PDF through the Files API, poll until the file leaves the
//! `PROCESSING` state, then call `generateContent` with the prompt and a
//! reference to the uploaded file. The uploaded file is deleted afterwards
//! on a best-effort basis; Gemini expires them on its own after 48 hours.
//!
//! The API key travels in the `x-goog-api-key` header, never in the URL, so
//! endpoints quoted in errors and logs cannot leak it.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use super::{ExtractError, ExtractionBackend, parse_payload};
use crate::config::ApiKey;

/// Production API root.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Model used for extraction.
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Per-request timeout. Large PDFs can take a while to upload.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Delay between file-state polls.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Polls before giving up on a file stuck in `PROCESSING`.
const MAX_POLL_ATTEMPTS: u32 = 60;

/// File state reported by the Files API while still ingesting.
const STATE_PROCESSING: &str = "PROCESSING";

/// File state reported when ingestion failed.
const STATE_FAILED: &str = "FAILED";

/// Extraction backend for Google Gemini.
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: ApiKey,
    base_url: String,
    model: String,
    poll_interval: Duration,
}

impl GeminiBackend {
    /// Creates a backend against the production API.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::ClientBuild`] when the HTTP client cannot be
    /// constructed; a default client without the request timeout would hang
    /// indefinitely on a stalled upload.
    pub fn new(api_key: ApiKey) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ExtractError::client_build)?;
        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            poll_interval: POLL_INTERVAL,
        })
    }

    /// Overrides the API root. Used by tests against a local mock server.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self.poll_interval = Duration::from_millis(10);
        self
    }

    /// Overrides the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Uploads the PDF bytes and returns the file handle.
    async fn upload(&self, pdf_path: &Path, bytes: Vec<u8>) -> Result<FileHandle, ExtractError> {
        let endpoint = format!("{}/upload/v1beta/files", self.base_url);
        let display_name = pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        debug!(file = %display_name, size = bytes.len(), "uploading to Gemini");

        let response = self
            .client
            .post(&endpoint)
            .header("x-goog-api-key", self.api_key.expose())
            .header("X-Goog-Upload-Protocol", "raw")
            .header("X-Goog-File-Name", &display_name)
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(bytes)
            .send()
            .await
            .map_err(|e| request_error("files.upload", e))?;

        check_status("files.upload", &response)?;

        let upload: UploadResponse = response
            .json()
            .await
            .map_err(|e| request_error("files.upload", e))?;
        Ok(upload.file)
    }

    /// Polls the file until it leaves `PROCESSING`.
    async fn wait_until_active(&self, handle: FileHandle) -> Result<FileHandle, ExtractError> {
        let mut handle = handle;
        let mut attempts = 0;

        while handle.state.as_deref() == Some(STATE_PROCESSING) {
            attempts += 1;
            if attempts > MAX_POLL_ATTEMPTS {
                return Err(ExtractError::upload_failed(STATE_PROCESSING));
            }
            sleep(self.poll_interval).await;

            let endpoint = format!("{}/v1beta/{}", self.base_url, handle.name);
            let response = self
                .client
                .get(&endpoint)
                .header("x-goog-api-key", self.api_key.expose())
                .send()
                .await
                .map_err(|e| request_error("files.get", e))?;
            check_status("files.get", &response)?;

            handle = response
                .json()
                .await
                .map_err(|e| request_error("files.get", e))?;
        }

        if handle.state.as_deref() == Some(STATE_FAILED) {
            return Err(ExtractError::upload_failed(STATE_FAILED));
        }
        Ok(handle)
    }

    /// Calls `generateContent` with the prompt and the uploaded file.
    async fn generate(&self, prompt: &str, handle: &FileHandle) -> Result<String, ExtractError> {
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let body = json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "file_data": {
                        "mime_type": "application/pdf",
                        "file_uri": handle.uri,
                    }},
                ],
            }],
        });

        let response = self
            .client
            .post(&endpoint)
            .header("x-goog-api-key", self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error("generateContent", e))?;
        check_status("generateContent", &response)?;

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| request_error("generateContent", e))?;

        let text: String = generated
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ExtractError::EmptyResponse);
        }
        Ok(text)
    }

    /// Deletes the uploaded file. Failures are logged, never propagated.
    async fn delete_file(&self, handle: &FileHandle) {
        let endpoint = format!("{}/v1beta/{}", self.base_url, handle.name);
        let result = self
            .client
            .delete(&endpoint)
            .header("x-goog-api-key", self.api_key.expose())
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(file = %handle.name, "deleted uploaded file");
            }
            Ok(response) => {
                warn!(file = %handle.name, status = %response.status(), "file delete refused");
            }
            Err(e) => {
                warn!(file = %handle.name, error = %e, "file delete failed");
            }
        }
    }
}

#[async_trait]
impl ExtractionBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    #[instrument(skip(self, prompt), fields(backend = "gemini"))]
    async fn submit(
        &self,
        pdf_path: &Path,
        prompt: &str,
    ) -> Result<serde_json::Value, ExtractError> {
        let bytes = tokio::fs::read(pdf_path)
            .await
            .map_err(|e| ExtractError::io(pdf_path, e))?;

        let handle = self.upload(pdf_path, bytes).await?;
        let handle = self.wait_until_active(handle).await?;

        let result = self.generate(prompt, &handle).await;
        self.delete_file(&handle).await;

        let text = result?;
        parse_payload(&text)
    }
}

/// Converts a reqwest error into the matching [`ExtractError`].
fn request_error(endpoint: &str, error: reqwest::Error) -> ExtractError {
    if error.is_timeout() {
        ExtractError::timeout(endpoint)
    } else {
        ExtractError::network(endpoint, error)
    }
}

/// Rejects non-2xx responses.
fn check_status(endpoint: &str, response: &reqwest::Response) -> Result<(), ExtractError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ExtractError::http_status(endpoint, status.as_u16()))
    }
}

/// Handle returned by the Files API.
#[derive(Debug, Clone, Deserialize)]
struct FileHandle {
    name: String,
    uri: String,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: FileHandle,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}
