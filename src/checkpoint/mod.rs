//! Checkpoint persistence for resumable pipeline runs.
//!
//! The checkpoint is a human-inspectable JSON file mapping `document_id` to
//! [`DocumentRecord`]. It is owned exclusively by [`CheckpointStore`]; all
//! readers and writers go through it.
//!
//! # Crash consistency
//!
//! Every mutation is written through to disk by serializing the full
//! checkpoint to a sibling temporary file and atomically renaming it over
//! the real path. The on-disk checkpoint is never observable in a partially
//! written state, even on abrupt termination.
//!
//! A record left in `Submitted` state (crash between submission and output
//! record write) is surfaced as-is on load; the per-document processor
//! reconciles it against the output directory before resubmitting.

mod error;
mod record;

pub use error::CheckpointError;
pub use record::{DocStatus, DocumentRecord, Timestamps};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Checkpoint format version written by this build.
const CHECKPOINT_VERSION: u32 = 1;

/// On-disk shape of the checkpoint file.
///
/// A `BTreeMap` keeps the serialized file stable across runs, which makes
/// idempotence directly diffable.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    documents: BTreeMap<String, DocumentRecord>,
}

/// Persistent, crash-consistent record of per-document processing status.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    documents: BTreeMap<String, DocumentRecord>,
}

impl CheckpointStore {
    /// Loads the checkpoint from `path`, or starts empty if the file does
    /// not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Corrupt`] if the file exists but cannot be
    /// parsed, [`CheckpointError::UnsupportedVersion`] on a version this
    /// build cannot read, and [`CheckpointError::Io`] on read failures.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();

        if !path.exists() {
            debug!(path = %path.display(), "no checkpoint file; starting empty");
            return Ok(Self {
                path,
                documents: BTreeMap::new(),
            });
        }

        let contents = fs::read_to_string(&path).map_err(|e| CheckpointError::io(&path, e))?;
        let file: CheckpointFile =
            serde_json::from_str(&contents).map_err(|e| CheckpointError::corrupt(&path, e))?;

        if file.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                path,
                version: file.version,
                expected: CHECKPOINT_VERSION,
            });
        }

        info!(
            path = %path.display(),
            documents = file.documents.len(),
            "loaded checkpoint"
        );

        Ok(Self {
            path,
            documents: file.documents,
        })
    }

    /// Returns the path of the checkpoint file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the record for `document_id`, if any.
    #[must_use]
    pub fn get(&self, document_id: &str) -> Option<&DocumentRecord> {
        self.documents.get(document_id)
    }

    /// Inserts or replaces a record and writes the checkpoint through to disk.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] if the temporary file cannot be
    /// written or renamed into place.
    pub fn upsert(&mut self, record: DocumentRecord) -> Result<(), CheckpointError> {
        debug!(
            document_id = %record.document_id,
            status = %record.status,
            "checkpoint upsert"
        );
        self.documents.insert(record.document_id.clone(), record);
        self.persist()
    }

    /// Returns all records, ordered by `document_id`.
    pub fn all(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.documents.values()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns true when no records exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Serializes the checkpoint and atomically replaces the on-disk file.
    fn persist(&self) -> Result<(), CheckpointError> {
        let file = CheckpointFile {
            version: CHECKPOINT_VERSION,
            documents: self.documents.clone(),
        };
        // Serialization of our own types cannot fail; map the error anyway
        // rather than panicking in library code.
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| CheckpointError::corrupt(&self.path, e))?;

        let tmp_path = temp_sibling(&self.path);
        fs::write(&tmp_path, json).map_err(|e| CheckpointError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| CheckpointError::io(&self.path, e))?;
        Ok(())
    }
}

/// Returns the temporary path used for atomic replacement of `path`.
fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(|| "checkpoint".into(), std::ffi::OsStr::to_os_string);
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> CheckpointStore {
        CheckpointStore::load(dir.path().join("pipeline_checkpoint.json")).unwrap()
    }

    // ==================== Load Tests ====================

    #[test]
    fn test_load_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_load_corrupt_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline_checkpoint.json");
        fs::write(&path, "{ not json").unwrap();

        let result = CheckpointStore::load(&path);
        assert!(matches!(result, Err(CheckpointError::Corrupt { .. })));
    }

    #[test]
    fn test_load_unsupported_version_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline_checkpoint.json");
        fs::write(&path, r#"{"version": 99, "documents": {}}"#).unwrap();

        let result = CheckpointStore::load(&path);
        assert!(matches!(
            result,
            Err(CheckpointError::UnsupportedVersion { version: 99, .. })
        ));
    }

    // ==================== Upsert / Persistence Tests ====================

    #[test]
    fn test_upsert_writes_through_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline_checkpoint.json");

        let mut store = CheckpointStore::load(&path).unwrap();
        store
            .upsert(DocumentRecord::discovered("10.1234/x", "a.pdf"))
            .unwrap();

        // A fresh load must see the write.
        let reloaded = CheckpointStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        let record = reloaded.get("10.1234/x").unwrap();
        assert_eq!(record.original_filename, "a.pdf");
        assert_eq!(record.status, DocStatus::Discovered);
    }

    #[test]
    fn test_upsert_replaces_existing_record() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        let mut record = DocumentRecord::discovered("10.1234/x", "a.pdf");
        store.upsert(record.clone()).unwrap();

        record.advance(DocStatus::Renamed);
        store.upsert(record).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("10.1234/x").unwrap().status, DocStatus::Renamed);
    }

    #[test]
    fn test_document_id_unique_in_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        store
            .upsert(DocumentRecord::discovered("10.1234/x", "a.pdf"))
            .unwrap();
        store
            .upsert(DocumentRecord::discovered("10.1234/x", "b.pdf"))
            .unwrap();

        // Same id appears at most once.
        assert_eq!(store.len(), 1);
        assert_eq!(store.all().count(), 1);
    }

    #[test]
    fn test_all_ordered_by_document_id() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        store
            .upsert(DocumentRecord::discovered("10.9/z", "z.pdf"))
            .unwrap();
        store
            .upsert(DocumentRecord::discovered("10.1/a", "a.pdf"))
            .unwrap();

        let ids: Vec<&str> = store.all().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["10.1/a", "10.9/z"]);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store
            .upsert(DocumentRecord::discovered("10.1/a", "a.pdf"))
            .unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp file left behind: {leftovers:?}");
    }

    #[test]
    fn test_checkpoint_file_is_human_inspectable_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline_checkpoint.json");
        let mut store = CheckpointStore::load(&path).unwrap();
        store
            .upsert(DocumentRecord::discovered("10.1/a", "a.pdf"))
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["version"], 1);
        assert!(value["documents"]["10.1/a"].is_object());
        assert_eq!(value["documents"]["10.1/a"]["status"], "discovered");
    }

    #[test]
    fn test_persisted_file_identical_for_same_state() {
        // Two stores reaching the same logical state write identical bytes;
        // this is what makes idempotence checks diffable.
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let path_a = dir_a.path().join("cp.json");
        let path_b = dir_b.path().join("cp.json");

        let mut record_one = DocumentRecord::discovered("10.1/a", "a.pdf");
        record_one.timestamps = Timestamps::default();
        let mut record_two = DocumentRecord::discovered("10.2/b", "b.pdf");
        record_two.timestamps = Timestamps::default();

        let mut store_a = CheckpointStore::load(&path_a).unwrap();
        store_a.upsert(record_one.clone()).unwrap();
        store_a.upsert(record_two.clone()).unwrap();

        // Opposite insertion order.
        let mut store_b = CheckpointStore::load(&path_b).unwrap();
        store_b.upsert(record_two).unwrap();
        store_b.upsert(record_one).unwrap();

        assert_eq!(
            fs::read_to_string(&path_a).unwrap(),
            fs::read_to_string(&path_b).unwrap()
        );
    }
}
