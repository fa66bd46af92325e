//! Aggregation of per-document records into a combined dataset.
//!
//! The aggregator is a pure function over the output directory: it reads
//! every per-document record file, merges them ordered by document id, and
//! writes `combined_data.json` plus a flattened `dataset.csv`. It never
//! touches the checkpoint or the source and processed directories, so it can
//! be re-run at any time and after partial failures.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Combined dataset filename inside the output directory.
pub const COMBINED_FILE_NAME: &str = "combined_data.json";

/// CSV export filename inside the output directory.
pub const CSV_FILE_NAME: &str = "dataset.csv";

/// One extracted document: identity plus the payload the service returned.
///
/// This is what the processor writes into the output directory, one file per
/// document, and what the aggregator reads back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    /// Stable document identifier.
    pub document_id: String,
    /// Filename the source carried at extraction time.
    pub source_filename: String,
    /// When the extraction completed.
    pub extracted_at: DateTime<Utc>,
    /// Extracted records, one JSON object per data point.
    pub data: Vec<serde_json::Value>,
}

impl ExtractionRecord {
    /// Reads a record back from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::Io`] when the file cannot be read and
    /// [`AggregateError::Parse`] when it is not a valid record.
    pub fn read_from(path: &Path) -> Result<Self, AggregateError> {
        let text = fs::read_to_string(path).map_err(|e| AggregateError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| AggregateError::parse(path, e))
    }

    /// Writes the record to `path` atomically (temp sibling then rename).
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::Io`] on serialization or filesystem failure.
    pub fn write_atomic(&self, path: &Path) -> Result<(), AggregateError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AggregateError::serialize(path, e))?;
        let tmp = temp_sibling(path);
        fs::write(&tmp, json).map_err(|e| AggregateError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| AggregateError::io(path, e))?;
        Ok(())
    }
}

/// Errors producing the combined dataset. All are fatal to aggregation but
/// not to the pipeline run that triggered it.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// File system error in the output directory.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be serialized.
    #[error("cannot serialize record for {path}: {source}")]
    Serialize {
        /// The intended destination.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A file is not a valid record.
    #[error("cannot parse record {path}: {source}")]
    Parse {
        /// The offending file.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl AggregateError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    fn serialize(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialize {
            path: path.into(),
            source,
        }
    }

    fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }
}

/// What the aggregation pass produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateSummary {
    /// Distinct documents in the combined dataset.
    pub documents: usize,
    /// Data rows written to the CSV export.
    pub rows: usize,
    /// Record files that could not be parsed and were skipped.
    pub skipped: usize,
}

/// Aggregates every per-document record in `output_dir` into
/// `combined_data.json` and `dataset.csv`.
///
/// Unparsable JSON files are skipped with a warning; duplicate document ids
/// resolve last-writer-wins in filename order.
///
/// # Errors
///
/// Returns [`AggregateError`] when the directory cannot be read or the
/// combined outputs cannot be written.
pub fn aggregate(output_dir: &Path) -> Result<AggregateSummary, AggregateError> {
    let mut record_files: Vec<PathBuf> = fs::read_dir(output_dir)
        .map_err(|e| AggregateError::io(output_dir, e))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| {
            p.extension().is_some_and(|ext| ext == "json")
                && p.file_name().is_none_or(|n| n != COMBINED_FILE_NAME)
        })
        .collect();
    record_files.sort();

    let mut merged: BTreeMap<String, ExtractionRecord> = BTreeMap::new();
    let mut skipped = 0;

    for path in &record_files {
        match ExtractionRecord::read_from(path) {
            Ok(record) => {
                debug!(path = %path.display(), document_id = %record.document_id, "merged record");
                merged.insert(record.document_id.clone(), record);
            }
            Err(reason) => {
                warn!(path = %path.display(), %reason, "skipping unparsable record file");
                skipped += 1;
            }
        }
    }

    let records: Vec<&ExtractionRecord> = merged.values().collect();

    let combined_path = output_dir.join(COMBINED_FILE_NAME);
    let json = serde_json::to_string_pretty(&records)
        .map_err(|e| AggregateError::serialize(&combined_path, e))?;
    let tmp = temp_sibling(&combined_path);
    fs::write(&tmp, json).map_err(|e| AggregateError::io(&tmp, e))?;
    fs::rename(&tmp, &combined_path).map_err(|e| AggregateError::io(&combined_path, e))?;

    let csv_path = output_dir.join(CSV_FILE_NAME);
    let (csv, rows) = build_csv(&records);
    let csv_tmp = temp_sibling(&csv_path);
    fs::write(&csv_tmp, csv).map_err(|e| AggregateError::io(&csv_tmp, e))?;
    fs::rename(&csv_tmp, &csv_path).map_err(|e| AggregateError::io(&csv_path, e))?;

    info!(
        documents = merged.len(),
        rows, skipped, "wrote combined dataset"
    );

    Ok(AggregateSummary {
        documents: merged.len(),
        rows,
        skipped,
    })
}

/// Builds the CSV export: one row per payload element, columns are
/// `document_id`, `source_filename`, then the sorted union of payload keys.
fn build_csv(records: &[&ExtractionRecord]) -> (String, usize) {
    let mut keys: BTreeSet<String> = BTreeSet::new();
    for record in records {
        for element in &record.data {
            if let serde_json::Value::Object(map) = element {
                keys.extend(map.keys().cloned());
            }
        }
    }

    let mut out = String::new();
    out.push_str("document_id,source_filename");
    for key in &keys {
        out.push(',');
        out.push_str(&csv_escape(key));
    }
    out.push('\n');

    let mut rows = 0;
    for record in records {
        for element in &record.data {
            out.push_str(&csv_escape(&record.document_id));
            out.push(',');
            out.push_str(&csv_escape(&record.source_filename));
            for key in &keys {
                out.push(',');
                let value = element.get(key).map(csv_value).unwrap_or_default();
                out.push_str(&csv_escape(&value));
            }
            out.push('\n');
            rows += 1;
        }
    }
    (out, rows)
}

/// Renders a JSON value for a CSV cell. Strings keep their content; other
/// values use their JSON form; null is empty.
fn csv_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Quotes a CSV field when it contains a delimiter, quote, or newline.
fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "record".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str, source: &str, data: Vec<serde_json::Value>) -> ExtractionRecord {
        ExtractionRecord {
            document_id: id.to_string(),
            source_filename: source.to_string(),
            extracted_at: Utc::now(),
            data,
        }
    }

    fn write_record(dir: &Path, file: &str, rec: &ExtractionRecord) {
        rec.write_atomic(&dir.join(file)).unwrap();
    }

    // ==================== Record Write Tests ====================

    #[test]
    fn test_write_atomic_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let rec = record("10.1/a", "a.pdf", vec![json!({"x": 1})]);
        write_record(dir.path(), "a.json", &rec);

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json"]);
    }

    #[test]
    fn test_record_roundtrip() {
        let dir = TempDir::new().unwrap();
        let rec = record("10.1/a", "a.pdf", vec![json!({"x": 1})]);
        write_record(dir.path(), "a.json", &rec);

        let read = ExtractionRecord::read_from(&dir.path().join("a.json")).unwrap();
        assert_eq!(read, rec);
    }

    #[test]
    fn test_read_from_rejects_non_record_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{\"unexpected\": true}").unwrap();

        let result = ExtractionRecord::read_from(&path);
        assert!(matches!(result, Err(AggregateError::Parse { .. })));
    }

    // ==================== Aggregation Tests ====================

    #[test]
    fn test_aggregate_merges_ordered_by_id() {
        let dir = TempDir::new().unwrap();
        write_record(
            dir.path(),
            "z.json",
            &record("10.1/aaa", "z.pdf", vec![json!({"v": 1})]),
        );
        write_record(
            dir.path(),
            "a.json",
            &record("10.9/zzz", "a.pdf", vec![json!({"v": 2})]),
        );

        let summary = aggregate(dir.path()).unwrap();
        assert_eq!(summary.documents, 2);

        let combined: Vec<ExtractionRecord> = serde_json::from_str(
            &fs::read_to_string(dir.path().join(COMBINED_FILE_NAME)).unwrap(),
        )
        .unwrap();
        let ids: Vec<&str> = combined.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["10.1/aaa", "10.9/zzz"]);
    }

    #[test]
    fn test_aggregate_duplicate_id_last_writer_wins() {
        let dir = TempDir::new().unwrap();
        write_record(
            dir.path(),
            "first.json",
            &record("10.1/dup", "old.pdf", vec![json!({"v": 1})]),
        );
        write_record(
            dir.path(),
            "second.json",
            &record("10.1/dup", "new.pdf", vec![json!({"v": 2})]),
        );

        let summary = aggregate(dir.path()).unwrap();
        assert_eq!(summary.documents, 1);

        let combined: Vec<ExtractionRecord> = serde_json::from_str(
            &fs::read_to_string(dir.path().join(COMBINED_FILE_NAME)).unwrap(),
        )
        .unwrap();
        assert_eq!(combined[0].source_filename, "new.pdf");
    }

    #[test]
    fn test_aggregate_skips_unparsable_with_warning() {
        let dir = TempDir::new().unwrap();
        write_record(
            dir.path(),
            "good.json",
            &record("10.1/a", "a.pdf", vec![json!({"v": 1})]),
        );
        fs::write(dir.path().join("junk.json"), "not json at all").unwrap();

        let summary = aggregate(dir.path()).unwrap();
        assert_eq!(summary.documents, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_aggregate_ignores_previous_combined_file() {
        let dir = TempDir::new().unwrap();
        write_record(
            dir.path(),
            "a.json",
            &record("10.1/a", "a.pdf", vec![json!({"v": 1})]),
        );

        // Run twice; the second run must not ingest combined_data.json.
        let first = aggregate(dir.path()).unwrap();
        let second = aggregate(dir.path()).unwrap();
        assert_eq!(first.documents, second.documents);
        assert_eq!(second.skipped, 0);
    }

    #[test]
    fn test_aggregate_is_order_independent() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let r1 = record("10.1/a", "a.pdf", vec![json!({"x": 1})]);
        let r2 = record("10.2/b", "b.pdf", vec![json!({"y": 2})]);

        write_record(dir_a.path(), "1.json", &r1);
        write_record(dir_a.path(), "2.json", &r2);
        write_record(dir_b.path(), "1.json", &r2);
        write_record(dir_b.path(), "2.json", &r1);

        aggregate(dir_a.path()).unwrap();
        aggregate(dir_b.path()).unwrap();

        let csv_a = fs::read_to_string(dir_a.path().join(CSV_FILE_NAME)).unwrap();
        let csv_b = fs::read_to_string(dir_b.path().join(CSV_FILE_NAME)).unwrap();
        assert_eq!(csv_a, csv_b);
    }

    #[test]
    fn test_aggregate_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        write_record(
            dir.path(),
            "a.json",
            &record("10.1/a", "a.pdf", vec![json!({"v": 1})]),
        );

        aggregate(dir.path()).unwrap();

        // Both derived outputs are renamed into place.
        let leftovers: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
        assert!(dir.path().join(COMBINED_FILE_NAME).exists());
        assert!(dir.path().join(CSV_FILE_NAME).exists());
    }

    #[test]
    fn test_aggregate_empty_directory() {
        let dir = TempDir::new().unwrap();
        let summary = aggregate(dir.path()).unwrap();
        assert_eq!(summary.documents, 0);
        assert_eq!(summary.rows, 0);
        assert!(dir.path().join(COMBINED_FILE_NAME).exists());
    }

    // ==================== CSV Tests ====================

    #[test]
    fn test_csv_columns_are_sorted_key_union() {
        let dir = TempDir::new().unwrap();
        write_record(
            dir.path(),
            "a.json",
            &record(
                "10.1/a",
                "a.pdf",
                vec![json!({"zeta": 1, "alpha": "x"}), json!({"mid": true})],
            ),
        );

        let summary = aggregate(dir.path()).unwrap();
        assert_eq!(summary.rows, 2);

        let csv = fs::read_to_string(dir.path().join(CSV_FILE_NAME)).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "document_id,source_filename,alpha,mid,zeta"
        );
        assert_eq!(lines.next().unwrap(), "10.1/a,a.pdf,x,,1");
        assert_eq!(lines.next().unwrap(), "10.1/a,a.pdf,,true,");
    }

    #[test]
    fn test_csv_escapes_delimiters_and_quotes() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_csv_value_rendering() {
        assert_eq!(csv_value(&json!(null)), "");
        assert_eq!(csv_value(&json!("text")), "text");
        assert_eq!(csv_value(&json!(3.5)), "3.5");
        assert_eq!(csv_value(&json!([1, 2])), "[1,2]");
    }
}
