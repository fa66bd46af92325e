//! Error types for extraction service submissions.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while submitting a document for extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error calling {endpoint}: {source}")]
    Network {
        /// The endpoint that failed (never includes credentials).
        endpoint: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout calling {endpoint}")]
    Timeout {
        /// The endpoint that timed out.
        endpoint: String,
    },

    /// HTTP error response from the service.
    #[error("HTTP {status} from {endpoint}")]
    HttpStatus {
        /// The endpoint that returned an error status.
        endpoint: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error reading the document to submit.
    #[error("IO error reading {path}: {source}")]
    Io {
        /// The document path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The service reported the uploaded document unusable.
    #[error("upload ended in state {state}")]
    UploadFailed {
        /// Terminal state reported by the service.
        state: String,
    },

    /// The service returned no usable text.
    #[error("empty response from extraction service")]
    EmptyResponse,

    /// The response text cannot be parsed as the expected structured payload.
    #[error("malformed extraction payload: {reason}")]
    InvalidResponse {
        /// Why parsing failed.
        reason: String,
    },

    /// The HTTP client itself could not be constructed.
    #[error("cannot build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl ExtractError {
    /// Creates a network error from a reqwest error.
    pub fn network(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(endpoint: impl Into<String>) -> Self {
        Self::Timeout {
            endpoint: endpoint.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(endpoint: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            endpoint: endpoint.into(),
            status,
        }
    }

    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an upload-failure error.
    pub fn upload_failed(state: impl Into<String>) -> Self {
        Self::UploadFailed {
            state: state.into(),
        }
    }

    /// Creates a malformed-payload error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Creates a client-construction error.
    pub fn client_build(source: reqwest::Error) -> Self {
        Self::ClientBuild { source }
    }
}
