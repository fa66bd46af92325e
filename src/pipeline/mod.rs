//! Batch orchestration: enumerate, process, aggregate.
//!
//! The pipeline enumerates PDFs in the target directory in sorted order,
//! drives each through the [`Processor`](crate::processor::Processor), and
//! finishes with an aggregation pass over the output directory. Documents
//! are independent: one failure never stops the batch. Ctrl-C stops
//! scheduling new documents and lets in-flight work finish; whatever state
//! that leaves behind is resolved by reconciliation on the next run.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::aggregate::{self, AggregateError, AggregateSummary};
use crate::checkpoint::{CheckpointError, CheckpointStore, DocStatus};
use crate::config::{ConfigError, PipelineConfig};
use crate::extract::{ExtractionBackend, RetryPolicy};
use crate::metadata::MetadataReader;
use crate::processor::{Outcome, Processor};

/// Fatal pipeline errors. Per-document failures never surface here; they are
/// recorded in the checkpoint and counted in [`RunStats`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required directory could not be created or read.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint is unreadable or cannot be persisted.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Configuration problem discovered at run time (prompt file, key).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The aggregation pass failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// A worker task panicked.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PipelineError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Counters for one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Documents extracted this run.
    pub extracted: usize,
    /// Documents that ended `Failed`.
    pub failed: usize,
    /// Documents skipped (done, previously failed, or reconciled).
    pub skipped: usize,
    /// Documents that needed at least one retry before succeeding.
    pub retried: usize,
}

impl RunStats {
    fn from_outcomes(outcomes: &[Outcome]) -> Self {
        let mut stats = Self::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Extracted { retried, .. } => {
                    stats.extracted += 1;
                    if *retried {
                        stats.retried += 1;
                    }
                }
                Outcome::Skipped { .. } => stats.skipped += 1,
                Outcome::Failed { .. } => stats.failed += 1,
            }
        }
        stats
    }
}

/// Everything a run produced, for the caller to report on.
#[derive(Debug)]
pub struct RunReport {
    /// Aggregate counters.
    pub stats: RunStats,
    /// Per-document outcomes, in completion order.
    pub outcomes: Vec<Outcome>,
    /// Result of the aggregation pass.
    pub aggregate: AggregateSummary,
}

/// The batch pipeline.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    processor: Arc<Processor>,
}

impl Pipeline {
    /// Wires a pipeline from its collaborators.
    #[must_use]
    pub fn new(
        config: Arc<PipelineConfig>,
        backend: Arc<dyn ExtractionBackend>,
        metadata_reader: Arc<dyn MetadataReader>,
    ) -> Self {
        let retry_policy = RetryPolicy::with_max_attempts(config.max_retries);
        let processor = Arc::new(Processor::new(
            backend,
            metadata_reader,
            retry_policy,
            Arc::clone(&config),
        ));
        Self { config, processor }
    }

    /// Runs the batch: process every pending PDF, then aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on fatal conditions only (directories,
    /// checkpoint, prompt). Per-document failures are reported in the
    /// returned [`RunReport`].
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        std::fs::create_dir_all(&self.config.output_dir)
            .map_err(|e| PipelineError::io(&self.config.output_dir, e))?;
        std::fs::create_dir_all(&self.config.processed_dir)
            .map_err(|e| PipelineError::io(&self.config.processed_dir, e))?;

        let prompt = Arc::new(self.config.load_prompt()?);
        let checkpoint = Arc::new(Mutex::new(CheckpointStore::load(
            &self.config.checkpoint_file,
        )?));

        let mut files = list_pdfs(&self.config)?;
        if let Some(max) = self.config.max_documents {
            files.truncate(max);
        }
        info!(
            count = files.len(),
            concurrency = self.config.concurrency,
            "starting batch"
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        spawn_interrupt_watcher(Arc::clone(&shutdown));

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles: Vec<JoinHandle<Result<Outcome, CheckpointError>>> = Vec::new();

        for file in files {
            if shutdown.load(Ordering::SeqCst) {
                info!("interrupt requested; not scheduling further documents");
                break;
            }
            // The semaphore is never closed; acquisition only fails if it were.
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let processor = Arc::clone(&self.processor);
            let prompt = Arc::clone(&prompt);
            let checkpoint = Arc::clone(&checkpoint);
            handles.push(tokio::spawn(async move {
                let outcome = processor.process(&file, &prompt, &checkpoint).await;
                drop(permit);
                outcome
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.await??);
        }

        let stats = RunStats::from_outcomes(&outcomes);
        log_summary(&stats, &outcomes);

        let summary = aggregate::aggregate(&self.config.output_dir)?;
        mark_aggregated(&checkpoint).await?;

        Ok(RunReport {
            stats,
            outcomes,
            aggregate: summary,
        })
    }
}

/// Lists `*.pdf` files in the target directory, sorted by name so runs are
/// deterministic.
fn list_pdfs(config: &PipelineConfig) -> Result<Vec<PathBuf>, PipelineError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(&config.target_dir)
        .map_err(|e| PipelineError::io(&config.target_dir, e))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Flags shutdown on Ctrl-C. In-flight documents finish; nothing new starts.
fn spawn_interrupt_watcher(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight documents");
            shutdown.store(true, Ordering::SeqCst);
        }
    });
}

/// Promotes every `Extracted` record to `Aggregated` after a successful
/// aggregation pass.
async fn mark_aggregated(checkpoint: &Mutex<CheckpointStore>) -> Result<(), CheckpointError> {
    let mut store = checkpoint.lock().await;
    let pending: Vec<_> = store
        .all()
        .filter(|r| r.status == DocStatus::Extracted)
        .cloned()
        .collect();
    for mut record in pending {
        record.advance(DocStatus::Aggregated);
        store.upsert(record)?;
    }
    Ok(())
}

fn log_summary(stats: &RunStats, outcomes: &[Outcome]) {
    info!(
        extracted = stats.extracted,
        failed = stats.failed,
        skipped = stats.skipped,
        retried = stats.retried,
        "batch complete"
    );
    for outcome in outcomes {
        match outcome {
            Outcome::Failed {
                document_id,
                detail,
            } => error!(%document_id, %detail, "document failed"),
            Outcome::Skipped {
                document_id,
                reason,
            } => info!(%document_id, %reason, "document skipped"),
            Outcome::Extracted { document_id, .. } => info!(%document_id, "document extracted"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::fs;
    use std::path::Path;

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::config::ApiKey;
    use crate::extract::{ExtractError, Provider};
    use crate::metadata::{MetadataError, PdfMetadata};

    struct ArrayBackend;

    #[async_trait]
    impl ExtractionBackend for ArrayBackend {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn submit(
            &self,
            pdf_path: &Path,
            _prompt: &str,
        ) -> Result<serde_json::Value, ExtractError> {
            let name = pdf_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(json!([{ "from": name }]))
        }
    }

    /// No metadata for any file, so ids fall back to content hashes and no
    /// renaming happens.
    struct EmptyReader;

    impl MetadataReader for EmptyReader {
        fn read(&self, _path: &Path) -> Result<PdfMetadata, MetadataError> {
            Ok(PdfMetadata::default())
        }
    }

    fn pipeline_for(dir: &TempDir) -> (Pipeline, Arc<PipelineConfig>) {
        let config = Arc::new(
            PipelineConfig::new(dir.path(), Provider::Gemini, ApiKey::new("k")).unwrap(),
        );
        let pipeline = Pipeline::new(
            Arc::clone(&config),
            Arc::new(ArrayBackend),
            Arc::new(EmptyReader),
        );
        (pipeline, config)
    }

    fn write_pdfs(dir: &TempDir, names: &[&str]) {
        for name in names {
            fs::write(dir.path().join(name), format!("%PDF-1.4 {name}")).unwrap();
        }
    }

    // ==================== Enumeration Tests ====================

    #[test]
    fn test_list_pdfs_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        write_pdfs(&dir, &["b.pdf", "a.PDF", "c.pdf"]);
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::create_dir(dir.path().join("sub.pdf")).unwrap();

        let config = PipelineConfig::new(dir.path(), Provider::Gemini, ApiKey::new("k")).unwrap();
        let files = list_pdfs(&config).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf", "c.pdf"]);
    }

    // ==================== Run Tests ====================

    #[tokio::test]
    async fn test_run_processes_all_and_aggregates() {
        let dir = TempDir::new().unwrap();
        write_pdfs(&dir, &["a.pdf", "b.pdf", "c.pdf"]);
        let (pipeline, config) = pipeline_for(&dir);

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.stats.extracted, 3);
        assert_eq!(report.stats.failed, 0);
        assert_eq!(report.aggregate.documents, 3);

        // Sources moved, outputs written.
        assert!(!dir.path().join("a.pdf").exists());
        assert!(config.processed_dir.join("a.pdf").exists());
        assert!(config.output_dir.join("combined_data.json").exists());
        assert!(config.output_dir.join("dataset.csv").exists());
    }

    #[tokio::test]
    async fn test_run_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write_pdfs(&dir, &["a.pdf"]);
        let (pipeline, _config) = pipeline_for(&dir);

        let first = pipeline.run().await.unwrap();
        assert_eq!(first.stats.extracted, 1);

        // Second run finds no pending PDFs and changes nothing.
        let second = pipeline.run().await.unwrap();
        assert_eq!(second.stats.extracted, 0);
        assert_eq!(second.stats.failed, 0);
        assert_eq!(second.aggregate.documents, 1);
    }

    #[tokio::test]
    async fn test_run_respects_max_documents() {
        let dir = TempDir::new().unwrap();
        write_pdfs(&dir, &["a.pdf", "b.pdf", "c.pdf"]);
        let config = Arc::new({
            let mut c =
                PipelineConfig::new(dir.path(), Provider::Gemini, ApiKey::new("k")).unwrap();
            c.max_documents = Some(2);
            c
        });
        let pipeline = Pipeline::new(
            Arc::clone(&config),
            Arc::new(ArrayBackend),
            Arc::new(EmptyReader),
        );

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.stats.extracted, 2);
        assert!(dir.path().join("c.pdf").exists());
    }

    #[tokio::test]
    async fn test_run_concurrent_matches_sequential() {
        let dir = TempDir::new().unwrap();
        write_pdfs(&dir, &["a.pdf", "b.pdf", "c.pdf", "d.pdf"]);
        let config = Arc::new({
            let mut c =
                PipelineConfig::new(dir.path(), Provider::Gemini, ApiKey::new("k")).unwrap();
            c.concurrency = 4;
            c
        });
        let pipeline = Pipeline::new(
            Arc::clone(&config),
            Arc::new(ArrayBackend),
            Arc::new(EmptyReader),
        );

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.stats.extracted, 4);
        assert_eq!(report.aggregate.documents, 4);
    }

    #[tokio::test]
    async fn test_run_marks_records_aggregated() {
        let dir = TempDir::new().unwrap();
        write_pdfs(&dir, &["a.pdf"]);
        let (pipeline, config) = pipeline_for(&dir);
        pipeline.run().await.unwrap();

        let store = CheckpointStore::load(&config.checkpoint_file).unwrap();
        assert!(
            store.all().all(|r| r.status == DocStatus::Aggregated),
            "expected all records aggregated"
        );
    }

    // ==================== Stats Tests ====================

    #[test]
    fn test_stats_from_outcomes() {
        let outcomes = vec![
            Outcome::Extracted {
                document_id: "a".into(),
                retried: true,
            },
            Outcome::Extracted {
                document_id: "b".into(),
                retried: false,
            },
            Outcome::Failed {
                document_id: "c".into(),
                detail: "boom".into(),
            },
            Outcome::Skipped {
                document_id: "d".into(),
                reason: crate::processor::SkipReason::AlreadyDone,
            },
        ];
        let stats = RunStats::from_outcomes(&outcomes);
        assert_eq!(stats.extracted, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.retried, 1);
    }
}
