//! Validated pipeline configuration.
//!
//! The configuration is constructed once before the pipeline runs; the core
//! never prompts interactively. Directory layout follows the conventions of
//! the target directory: `output/` for records, `processed_pdfs/` for
//! completed sources, `pipeline_checkpoint.json` and `extraction_prompt.txt`
//! alongside them.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::extract::Provider;

/// Default number of extraction calls in flight.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Subdirectory of the target that receives per-document records.
pub const OUTPUT_DIR_NAME: &str = "output";

/// Subdirectory of the target that receives processed source files.
pub const PROCESSED_DIR_NAME: &str = "processed_pdfs";

/// Checkpoint filename inside the target directory.
pub const CHECKPOINT_FILE_NAME: &str = "pipeline_checkpoint.json";

/// Default prompt filename inside the target directory.
pub const PROMPT_FILE_NAME: &str = "extraction_prompt.txt";

/// Key file consulted when neither the flag nor the environment supplies one.
pub const API_KEY_FILE_NAME: &str = "api_key.txt";

/// Environment variable consulted for the API key.
pub const API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";

/// Template written when no prompt file exists yet.
const DEFAULT_PROMPT_TEMPLATE: &str = "\
You are a data extraction assistant. Read the attached PDF and return a JSON
array of records. Each record is a flat JSON object describing one data point
reported in the document. Use snake_case keys. Return only JSON, no prose.
";

/// An opaque API credential.
///
/// The key is never logged: `Debug` and `Display` are redacted. Code that
/// actually sends the credential calls [`ApiKey::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wraps a raw key string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the raw secret for use in a request.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Errors building or reading configuration. All are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The target directory does not exist.
    #[error("target directory does not exist: {path}")]
    MissingTargetDir {
        /// The missing path.
        path: PathBuf,
    },

    /// The target path exists but is not a directory.
    #[error("target path is not a directory: {path}")]
    NotADirectory {
        /// The offending path.
        path: PathBuf,
    },

    /// File system error reading or creating a configuration file.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The prompt file exists but is empty.
    #[error("prompt file is empty: {path}")]
    EmptyPrompt {
        /// The empty prompt path.
        path: PathBuf,
    },

    /// No API key was supplied by flag, environment, or key file.
    #[error(
        "API key required: pass --api-key, set {API_KEY_ENV_VAR}, or create {API_KEY_FILE_NAME} in the target directory"
    )]
    MissingApiKey,
}

impl ConfigError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Explicit, validated configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory scanned for PDF files.
    pub target_dir: PathBuf,
    /// Directory receiving per-document records and the combined dataset.
    pub output_dir: PathBuf,
    /// Directory receiving source files after successful extraction.
    pub processed_dir: PathBuf,
    /// The checkpoint file path.
    pub checkpoint_file: PathBuf,
    /// The extraction prompt file path.
    pub prompt_file: PathBuf,
    /// Selected extraction backend.
    pub provider: Provider,
    /// Credential for the extraction service.
    pub api_key: ApiKey,
    /// Whether the rename step runs (best-effort either way).
    pub rename_pdfs: bool,
    /// Whether previously `Failed` documents are resubmitted.
    pub force_retry: bool,
    /// Optional cap on documents processed this run.
    pub max_documents: Option<usize>,
    /// Extraction calls allowed in flight concurrently.
    pub concurrency: usize,
    /// Maximum submission attempts per document.
    pub max_retries: u32,
}

impl PipelineConfig {
    /// Builds a configuration rooted at `target_dir` with default options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingTargetDir`] or
    /// [`ConfigError::NotADirectory`] when the target is unusable.
    pub fn new(
        target_dir: impl Into<PathBuf>,
        provider: Provider,
        api_key: ApiKey,
    ) -> Result<Self, ConfigError> {
        let target_dir = target_dir.into();
        if !target_dir.exists() {
            return Err(ConfigError::MissingTargetDir { path: target_dir });
        }
        if !target_dir.is_dir() {
            return Err(ConfigError::NotADirectory { path: target_dir });
        }

        debug!(target = %target_dir.display(), %provider, "building pipeline config");

        Ok(Self {
            output_dir: target_dir.join(OUTPUT_DIR_NAME),
            processed_dir: target_dir.join(PROCESSED_DIR_NAME),
            checkpoint_file: target_dir.join(CHECKPOINT_FILE_NAME),
            prompt_file: target_dir.join(PROMPT_FILE_NAME),
            target_dir,
            provider,
            api_key,
            rename_pdfs: true,
            force_retry: false,
            max_documents: None,
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: crate::extract::DEFAULT_MAX_RETRIES,
        })
    }

    /// Loads the extraction prompt, creating the default template when the
    /// file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] on read/write failures and
    /// [`ConfigError::EmptyPrompt`] when the file exists but holds nothing.
    pub fn load_prompt(&self) -> Result<String, ConfigError> {
        if !self.prompt_file.exists() {
            info!(
                path = %self.prompt_file.display(),
                "prompt file missing; creating default template"
            );
            fs::write(&self.prompt_file, DEFAULT_PROMPT_TEMPLATE)
                .map_err(|e| ConfigError::io(&self.prompt_file, e))?;
        }

        let prompt = fs::read_to_string(&self.prompt_file)
            .map_err(|e| ConfigError::io(&self.prompt_file, e))?;
        let prompt = prompt.trim().to_string();

        if prompt.is_empty() {
            return Err(ConfigError::EmptyPrompt {
                path: self.prompt_file.clone(),
            });
        }
        Ok(prompt)
    }
}

/// Resolves the API key: explicit flag, then environment, then key file in
/// the target directory.
///
/// # Errors
///
/// Returns [`ConfigError::MissingApiKey`] when no source yields a key.
pub fn resolve_api_key(flag: Option<String>, target_dir: &Path) -> Result<ApiKey, ConfigError> {
    if let Some(key) = flag {
        let key = key.trim().to_string();
        if !key.is_empty() {
            return Ok(ApiKey::new(key));
        }
    }

    if let Ok(key) = env::var(API_KEY_ENV_VAR) {
        let key = key.trim().to_string();
        if !key.is_empty() {
            return Ok(ApiKey::new(key));
        }
    }

    let key_file = target_dir.join(API_KEY_FILE_NAME);
    if key_file.exists() {
        let key = fs::read_to_string(&key_file).map_err(|e| ConfigError::io(&key_file, e))?;
        let key = key.trim().to_string();
        if !key.is_empty() {
            return Ok(ApiKey::new(key));
        }
    }

    Err(ConfigError::MissingApiKey)
}
