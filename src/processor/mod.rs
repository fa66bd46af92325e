//! Per-document processing state machine.
//!
//! One [`Processor::process`] call drives a single PDF from wherever its
//! checkpoint record left off to a terminal outcome. Every transition is
//! persisted before the work it describes becomes observable elsewhere, so a
//! crash at any point leaves a state the next run can pick up:
//!
//! 1. `Extracted`/`Aggregated` records are skipped (resume fast path).
//! 2. `Failed` records are skipped unless force-retry is on.
//! 3. `Discovered -> Renamed`: best-effort canonical rename.
//! 4. `Renamed -> Submitted`: reconcile against an existing output record
//!    first; otherwise persist `Submitted` and call the backend with retry.
//! 5. `Submitted -> Extracted`: atomic record write, persist, then move the
//!    source into the processed directory.
//!
//! All per-document errors end here as a `Failed` record; only checkpoint
//! persistence failures escape, because continuing without a durable
//! checkpoint would break resume guarantees.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::aggregate::ExtractionRecord;
use crate::checkpoint::{CheckpointError, CheckpointStore, DocStatus, DocumentRecord};
use crate::config::PipelineConfig;
use crate::extract::{ExtractionBackend, RetryDecision, RetryPolicy, classify_error};
use crate::metadata::{MetadataReader, PdfMetadata, derive_document_id};
use crate::rename::{derive_canonical_name, resolve_rename_target};

/// Why a document was skipped this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Already `Extracted` or `Aggregated` in the checkpoint.
    AlreadyDone,
    /// `Failed` previously and force-retry is off.
    PreviouslyFailed,
    /// The output record already existed on disk; the checkpoint was behind.
    Reconciled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyDone => f.write_str("already extracted"),
            Self::PreviouslyFailed => f.write_str("previously failed (use force-retry)"),
            Self::Reconciled => f.write_str("reconciled from existing output record"),
        }
    }
}

/// Terminal outcome of processing one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Extraction succeeded this run.
    Extracted {
        /// The document processed.
        document_id: String,
        /// Whether any attempt had to be retried.
        retried: bool,
    },
    /// Nothing was submitted.
    Skipped {
        /// The document skipped.
        document_id: String,
        /// Why it was skipped.
        reason: SkipReason,
    },
    /// The document failed; the error is recorded in the checkpoint.
    Failed {
        /// The document that failed.
        document_id: String,
        /// What went wrong.
        detail: String,
    },
}

impl Outcome {
    /// The document id this outcome belongs to.
    #[must_use]
    pub fn document_id(&self) -> &str {
        match self {
            Self::Extracted { document_id, .. }
            | Self::Skipped { document_id, .. }
            | Self::Failed { document_id, .. } => document_id,
        }
    }
}

/// Drives one document at a time through the extraction state machine.
pub struct Processor {
    backend: Arc<dyn ExtractionBackend>,
    metadata_reader: Arc<dyn MetadataReader>,
    retry_policy: RetryPolicy,
    config: Arc<PipelineConfig>,
}

impl Processor {
    /// Creates a processor over the given backend and metadata reader.
    #[must_use]
    pub fn new(
        backend: Arc<dyn ExtractionBackend>,
        metadata_reader: Arc<dyn MetadataReader>,
        retry_policy: RetryPolicy,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            backend,
            metadata_reader,
            retry_policy,
            config,
        }
    }

    /// Processes a single PDF to a terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] only when the checkpoint itself cannot be
    /// persisted; every other failure becomes an [`Outcome::Failed`].
    #[instrument(skip_all, fields(file = %pdf_path.display()))]
    pub async fn process(
        &self,
        pdf_path: &Path,
        prompt: &str,
        checkpoint: &Mutex<CheckpointStore>,
    ) -> Result<Outcome, CheckpointError> {
        let filename = file_name_of(pdf_path);

        // Identity first: metadata read is best-effort, the content hash
        // fallback needs the file to be readable at all.
        let metadata = match self.metadata_reader.read(pdf_path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(error = %e, "metadata unreadable; proceeding without it");
                PdfMetadata::default()
            }
        };
        let document_id = match derive_document_id(Some(&metadata), pdf_path) {
            Ok(id) => id,
            Err(e) => {
                // Cannot even hash the file; nothing to checkpoint under.
                warn!(error = %e, "cannot derive document id");
                return Ok(Outcome::Failed {
                    document_id: filename,
                    detail: e.to_string(),
                });
            }
        };

        let mut record = {
            let mut store = checkpoint.lock().await;
            match store.get(&document_id) {
                Some(existing) => existing.clone(),
                None => {
                    let record = DocumentRecord::discovered(&document_id, &filename);
                    store.upsert(record.clone())?;
                    record
                }
            }
        };

        if record.status.is_done() {
            debug!(%document_id, "already extracted; skipping");
            return Ok(Outcome::Skipped {
                document_id,
                reason: SkipReason::AlreadyDone,
            });
        }
        if record.status == DocStatus::Failed && !self.config.force_retry {
            debug!(%document_id, "previously failed; skipping");
            return Ok(Outcome::Skipped {
                document_id,
                reason: SkipReason::PreviouslyFailed,
            });
        }

        let mut working_path = pdf_path.to_path_buf();

        if record.status == DocStatus::Discovered {
            if self.config.rename_pdfs {
                working_path = self.try_rename(&working_path, &metadata, &mut record);
            }
            record.advance(DocStatus::Renamed);
            checkpoint.lock().await.upsert(record.clone())?;
        }

        // Reconcile before submitting: an output record on disk means a
        // previous run extracted this document but died before persisting.
        // The record must name this document; anything else at the path is
        // stale and gets overwritten by a fresh extraction.
        let record_path = self.config.output_dir.join(record_filename(&document_id));
        if record_path.exists() {
            match ExtractionRecord::read_from(&record_path) {
                Ok(existing) if existing.document_id == document_id => {
                    info!(%document_id, "output record exists; reconciling without resubmission");
                    record.record_file = Some(file_name_of(&record_path));
                    record.advance(DocStatus::Extracted);
                    checkpoint.lock().await.upsert(record.clone())?;
                    self.move_to_processed(&working_path);
                    return Ok(Outcome::Skipped {
                        document_id,
                        reason: SkipReason::Reconciled,
                    });
                }
                Ok(existing) => {
                    warn!(
                        %document_id,
                        found = %existing.document_id,
                        "record at expected path names another document; resubmitting"
                    );
                }
                Err(e) => {
                    warn!(%document_id, error = %e, "unreadable record at expected path; resubmitting");
                }
            }
        }

        record.advance(DocStatus::Submitted);
        checkpoint.lock().await.upsert(record.clone())?;

        let (payload, retried) = match self.submit_with_retry(&working_path, prompt, &mut record).await {
            Ok(result) => result,
            Err(detail) => {
                record.fail(&detail);
                checkpoint.lock().await.upsert(record)?;
                return Ok(Outcome::Failed {
                    document_id,
                    detail,
                });
            }
        };

        let extraction = ExtractionRecord {
            document_id: document_id.clone(),
            source_filename: file_name_of(&working_path),
            extracted_at: Utc::now(),
            data: payload,
        };
        if let Err(e) = extraction.write_atomic(&record_path) {
            let detail = e.to_string();
            record.fail(&detail);
            checkpoint.lock().await.upsert(record)?;
            return Ok(Outcome::Failed {
                document_id,
                detail,
            });
        }

        record.record_file = Some(file_name_of(&record_path));
        record.advance(DocStatus::Extracted);
        checkpoint.lock().await.upsert(record)?;

        // The record is durable; a move failure here is recoverable by
        // reconciliation on the next run.
        self.move_to_processed(&working_path);

        info!(%document_id, "extracted");
        Ok(Outcome::Extracted {
            document_id,
            retried,
        })
    }

    /// Renames the file to its canonical name. Best-effort: on any failure
    /// the original path is kept and the pipeline proceeds.
    fn try_rename(
        &self,
        path: &Path,
        metadata: &PdfMetadata,
        record: &mut DocumentRecord,
    ) -> PathBuf {
        let Some(canonical) = derive_canonical_name(metadata) else {
            debug!("no usable metadata; keeping original filename");
            return path.to_path_buf();
        };

        let current_name = file_name_of(path);
        let target = resolve_rename_target(&self.config.target_dir, &canonical, &current_name);
        if target == path {
            record.canonical_filename = Some(current_name);
            return path.to_path_buf();
        }

        match fs::rename(path, &target) {
            Ok(()) => {
                let target_name = file_name_of(&target);
                info!(from = %current_name, to = %target_name, "renamed");
                record.canonical_filename = Some(target_name);
                target
            }
            Err(e) => {
                warn!(error = %e, "rename failed; keeping original filename");
                path.to_path_buf()
            }
        }
    }

    /// Submits with the retry policy. Returns the payload elements and
    /// whether any retry happened, or the terminal error detail.
    async fn submit_with_retry(
        &self,
        pdf_path: &Path,
        prompt: &str,
        record: &mut DocumentRecord,
    ) -> Result<(Vec<serde_json::Value>, bool), String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            record.attempts += 1;
            debug!(attempt, backend = self.backend.name(), "submitting");

            match self.backend.submit(pdf_path, prompt).await {
                Ok(serde_json::Value::Array(elements)) => {
                    return Ok((elements, attempt > 1));
                }
                Ok(other) => {
                    // Backends normalize to an array; anything else is a bug
                    // in the backend, not worth retrying.
                    return Err(format!("backend returned non-array payload: {other}"));
                }
                Err(e) => {
                    let failure = classify_error(&e);
                    match self.retry_policy.should_retry(failure, attempt) {
                        RetryDecision::Retry { delay, .. } => {
                            warn!(
                                attempt,
                                delay_ms = delay.as_millis(),
                                error = %e,
                                "submission failed; will retry"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            return Err(format!("{e} ({reason})"));
                        }
                    }
                }
            }
        }
    }

    /// Moves an extracted source into the processed directory. Uses rename,
    /// falling back to copy + length check + delete across filesystems.
    /// Failures are logged only; the next run's reconciliation finishes the
    /// move.
    fn move_to_processed(&self, path: &Path) {
        if !path.exists() {
            return;
        }
        let dest = self.config.processed_dir.join(file_name_of(path));

        if fs::rename(path, &dest).is_ok() {
            debug!(to = %dest.display(), "moved to processed");
            return;
        }

        match copy_and_verify(path, &dest) {
            Ok(()) => {
                if let Err(e) = fs::remove_file(path) {
                    warn!(error = %e, "copied to processed but could not delete source");
                }
            }
            Err(e) => warn!(error = %e, "move to processed failed; will retry next run"),
        }
    }
}

/// Copies `src` to `dest` and verifies the lengths match before the caller
/// deletes the source.
fn copy_and_verify(src: &Path, dest: &Path) -> std::io::Result<()> {
    let copied = fs::copy(src, dest)?;
    let expected = fs::metadata(src)?.len();
    if copied == expected {
        Ok(())
    } else {
        let _ = fs::remove_file(dest);
        Err(std::io::Error::other(format!(
            "length mismatch after copy: {copied} != {expected}"
        )))
    }
}

/// Output record filename for a document id, made filesystem-safe.
///
/// The sanitized id keeps the name readable; the short hash tag keeps the
/// mapping injective when distinct ids sanitize to the same text.
#[must_use]
pub fn record_filename(document_id: &str) -> String {
    let safe: String = document_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest = Sha256::digest(document_id.as_bytes());
    format!(
        "{safe}-{:02x}{:02x}{:02x}{:02x}.json",
        digest[0], digest[1], digest[2], digest[3]
    )
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
