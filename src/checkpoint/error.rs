//! Error types for checkpoint persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or persisting the checkpoint.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// File system error reading or writing the checkpoint file.
    #[error("IO error on checkpoint {path}: {source}")]
    Io {
        /// The checkpoint (or temporary) path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint file exists but cannot be parsed.
    ///
    /// This is fatal: the pipeline refuses to proceed with an unreliable
    /// checkpoint rather than guessing state.
    #[error("checkpoint {path} is corrupt: {source}")]
    Corrupt {
        /// The unreadable checkpoint path.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The checkpoint file declares a format version this build cannot read.
    #[error("checkpoint {path} has unsupported version {version} (expected {expected})")]
    UnsupportedVersion {
        /// The checkpoint path.
        path: PathBuf,
        /// The version found in the file.
        version: u32,
        /// The version this build writes.
        expected: u32,
    },
}

impl CheckpointError {
    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a corruption error with path context.
    pub fn corrupt(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Corrupt {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_error_io_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error = CheckpointError::io("/tmp/pipeline_checkpoint.json", io_err);
        let msg = error.to_string();
        assert!(msg.contains("pipeline_checkpoint.json"), "Expected path in: {msg}");
        assert!(msg.contains("IO error"), "Expected 'IO error' in: {msg}");
    }

    #[test]
    fn test_checkpoint_error_corrupt_display() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let error = CheckpointError::corrupt("/tmp/pipeline_checkpoint.json", parse_err);
        let msg = error.to_string();
        assert!(msg.contains("corrupt"), "Expected 'corrupt' in: {msg}");
        assert!(msg.contains("pipeline_checkpoint.json"), "Expected path in: {msg}");
    }

    #[test]
    fn test_checkpoint_error_unsupported_version_display() {
        let error = CheckpointError::UnsupportedVersion {
            path: PathBuf::from("/tmp/cp.json"),
            version: 9,
            expected: 1,
        };
        let msg = error.to_string();
        assert!(msg.contains("9"));
        assert!(msg.contains("unsupported version"));
    }
}
