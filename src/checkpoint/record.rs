//! Document record types and status definitions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing status of a document.
///
/// Status only advances forward along
/// `Discovered -> Renamed -> Submitted -> Extracted -> Aggregated`.
/// Any non-terminal status may transition to `Failed`, and `Failed` may be
/// retried back to `Submitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocStatus {
    /// Seen in the input directory, no work done yet.
    Discovered,
    /// Rename step completed (canonical or original filename recorded).
    Renamed,
    /// Submission to the extraction service has started.
    Submitted,
    /// Output record written; source file eligible for the processed directory.
    Extracted,
    /// Included in a combined dataset build.
    Aggregated,
    /// Failed after classification/retries; retryable on request.
    Failed,
}

impl DocStatus {
    /// Returns the string representation used in persisted files.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Renamed => "renamed",
            Self::Submitted => "submitted",
            Self::Extracted => "extracted",
            Self::Aggregated => "aggregated",
            Self::Failed => "failed",
        }
    }

    /// Returns true for statuses that mean extraction already completed.
    ///
    /// These are the resume fast-path states: a document in one of them is
    /// skipped entirely on subsequent runs.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Extracted | Self::Aggregated)
    }

    /// Returns true if `next` is a legal successor of `self`.
    ///
    /// Forward-only along the main chain; any non-terminal status may move to
    /// `Failed`; `Failed` may move back to `Submitted` (explicit retry).
    #[must_use]
    pub fn can_advance_to(&self, next: DocStatus) -> bool {
        match (self, next) {
            (Self::Discovered, Self::Renamed)
            | (Self::Renamed, Self::Submitted)
            | (Self::Submitted, Self::Extracted)
            | (Self::Extracted, Self::Aggregated)
            | (Self::Failed, Self::Submitted) => true,
            // Reconciliation can discover a completed output record before
            // the submission step ran on this visit, including for a record
            // that previously failed and is being retried.
            (Self::Renamed | Self::Failed, Self::Extracted) => true,
            (Self::Discovered | Self::Renamed | Self::Submitted, Self::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DocStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DocStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovered" => Ok(Self::Discovered),
            "renamed" => Ok(Self::Renamed),
            "submitted" => Ok(Self::Submitted),
            "extracted" => Ok(Self::Extracted),
            "aggregated" => Ok(Self::Aggregated),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid document status: {s}")),
        }
    }
}

/// One optional timestamp per status transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    /// When the record was first created.
    pub discovered_at: Option<DateTime<Utc>>,
    /// When the rename step finished (even when renaming was skipped).
    pub renamed_at: Option<DateTime<Utc>>,
    /// When the last submission to the extraction service started.
    pub submitted_at: Option<DateTime<Utc>>,
    /// When the output record was written.
    pub extracted_at: Option<DateTime<Utc>>,
    /// When the document was last included in a combined dataset.
    pub aggregated_at: Option<DateTime<Utc>>,
    /// When the document last failed.
    pub failed_at: Option<DateTime<Utc>>,
}

impl Timestamps {
    /// Stamps the transition into `status` with the current time.
    pub fn stamp(&mut self, status: DocStatus) {
        let now = Some(Utc::now());
        match status {
            DocStatus::Discovered => self.discovered_at = now,
            DocStatus::Renamed => self.renamed_at = now,
            DocStatus::Submitted => self.submitted_at = now,
            DocStatus::Extracted => self.extracted_at = now,
            DocStatus::Aggregated => self.aggregated_at = now,
            DocStatus::Failed => self.failed_at = now,
        }
    }
}

/// Identity and processing state for one source document.
///
/// Created on first discovery, mutated only by the per-document processor,
/// never deleted. `Failed` records persist for visibility and retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Stable identifier: normalized DOI, or a content hash when no DOI exists.
    pub document_id: String,
    /// Filename the document had when first discovered.
    pub original_filename: String,
    /// Canonical filename once the rename step succeeded; None when renaming
    /// was skipped or derived nothing usable.
    pub canonical_filename: Option<String>,
    /// Current processing status.
    pub status: DocStatus,
    /// Last error message; present only when `Failed`.
    pub error_detail: Option<String>,
    /// Name of the per-document output record file once `Extracted`.
    pub record_file: Option<String>,
    /// Total submission attempts made across all runs.
    pub attempts: u32,
    /// Per-transition timestamps.
    pub timestamps: Timestamps,
}

impl DocumentRecord {
    /// Creates a fresh record in `Discovered` state.
    #[must_use]
    pub fn discovered(document_id: impl Into<String>, original_filename: impl Into<String>) -> Self {
        let mut timestamps = Timestamps::default();
        timestamps.stamp(DocStatus::Discovered);
        Self {
            document_id: document_id.into(),
            original_filename: original_filename.into(),
            canonical_filename: None,
            status: DocStatus::Discovered,
            error_detail: None,
            record_file: None,
            attempts: 0,
            timestamps,
        }
    }

    /// Advances the record to `status`, stamping the transition time.
    ///
    /// Entering any status other than `Failed` clears `error_detail`.
    /// Re-entering the current status is allowed (a resumed run re-persists
    /// the state it found).
    pub fn advance(&mut self, status: DocStatus) {
        debug_assert!(
            status == self.status || self.status.can_advance_to(status),
            "illegal status transition: {} -> {status}",
            self.status
        );
        self.status = status;
        if status != DocStatus::Failed {
            self.error_detail = None;
        }
        self.timestamps.stamp(status);
    }

    /// Marks the record failed with the given error detail.
    pub fn fail(&mut self, detail: impl Into<String>) {
        self.status = DocStatus::Failed;
        self.error_detail = Some(detail.into());
        self.timestamps.stamp(DocStatus::Failed);
    }

    /// Returns the filename the document currently carries on disk.
    #[must_use]
    pub fn current_filename(&self) -> &str {
        self.canonical_filename
            .as_deref()
            .unwrap_or(&self.original_filename)
    }
}

impl fmt::Display for DocumentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DocumentRecord {{ id: {}, file: {}, status: {} }}",
            self.document_id,
            self.current_filename(),
            self.status
        )
    }
}
