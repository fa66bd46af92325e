//! PDF metadata reading and document identity.
//!
//! This module provides the [`MetadataReader`] trait used by the renamer and
//! the per-document processor, together with the DOI/title heuristics and the
//! content-hash identity fallback.
//!
//! # Identity
//!
//! A document's stable identifier is its normalized DOI when one can be
//! found in the PDF metadata or the first pages of text. When no DOI exists,
//! the identifier falls back to a hash of the file's leading bytes, which is
//! stable across renames and does not depend on the metadata reader at all.

mod error;
mod reader;

pub use error::MetadataError;
pub use reader::PdfFileReader;

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::trace;

/// How many leading bytes of the file participate in the content hash.
const HASH_PREFIX_BYTES: usize = 64 * 1024;

/// Hex characters of the digest kept in the fallback identifier.
const HASH_ID_CHARS: usize = 16;

/// Bare DOI: `10.XXXX/suffix`, allowing nested registrants.
#[allow(clippy::expect_used)]
static DOI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(10\.\d{4,9}(?:\.\d+)*/[-._;()/:A-Za-z0-9]+)").expect("DOI regex is valid")
});

/// `DOI:` prefixed form.
#[allow(clippy::expect_used)]
static DOI_PREFIX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)doi[\s:]+\s*(10\.\d{4,9}(?:\.\d+)*/[-._;()/:A-Za-z0-9]+)")
        .expect("DOI prefix regex is valid")
});

/// `doi.org/` URL form.
#[allow(clippy::expect_used)]
static DOI_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:dx\.doi\.org|doi\.org)/\s*(10\.\d{4,9}(?:\.\d+)*/[-._;()/:A-Za-z0-9]+)")
        .expect("DOI URL regex is valid")
});

/// Lines that disqualify a candidate title on the first page.
#[allow(clippy::expect_used)]
static TITLE_EXCLUDE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)doi[\s:]",
        r"(?i)published|received|accepted",
        r"(?i)volume|issue|page",
        r"(?i)copyright|©|\(c\)",
        r"^\d+$",
        r"^[A-Z\s]{3,}$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("title exclude regex is valid"))
    .collect()
});

/// Metadata discovered for one PDF document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdfMetadata {
    /// Normalized DOI, when one was found.
    pub doi: Option<String>,
    /// Best-effort title.
    pub title: Option<String>,
}

impl PdfMetadata {
    /// Returns true when neither a DOI nor a title was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doi.is_none() && self.title.is_none()
    }
}

/// Capability interface for reading DOI/title metadata from a PDF.
///
/// The concrete [`PdfFileReader`] parses real files; tests substitute a stub
/// so pipeline behavior can be exercised without valid PDFs.
pub trait MetadataReader: Send + Sync {
    /// Reads metadata for the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] when the file cannot be read or parsed.
    /// Callers treat this as non-fatal: renaming is skipped and the pipeline
    /// proceeds under the original filename.
    fn read(&self, path: &Path) -> Result<PdfMetadata, MetadataError>;
}

/// Derives the stable `document_id` for a file.
///
/// Prefers the DOI from `metadata`; falls back to a content hash of the
/// file's leading bytes when no DOI is available.
///
/// # Errors
///
/// Returns [`MetadataError::Io`] only when the fallback hash cannot read the
/// file, which the processor treats as a fatal per-document condition (an
/// unreadable input file cannot be processed either way).
pub fn derive_document_id(
    metadata: Option<&PdfMetadata>,
    path: &Path,
) -> Result<String, MetadataError> {
    if let Some(doi) = metadata.and_then(|m| m.doi.as_deref()) {
        return Ok(doi.to_string());
    }
    content_hash_id(path)
}

/// Computes the `sha256:`-prefixed fallback identifier for a file.
///
/// Hashes the first 64 KiB of content plus the total file length, so the
/// identifier is stable across renames and cheap for large PDFs.
pub fn content_hash_id(path: &Path) -> Result<String, MetadataError> {
    let mut file = File::open(path).map_err(|e| MetadataError::io(path, e))?;
    let len = file
        .metadata()
        .map_err(|e| MetadataError::io(path, e))?
        .len();

    let mut buffer = vec![0u8; HASH_PREFIX_BYTES];
    let mut read_total = 0;
    loop {
        let n = file
            .read(&mut buffer[read_total..])
            .map_err(|e| MetadataError::io(path, e))?;
        if n == 0 {
            break;
        }
        read_total += n;
        if read_total == buffer.len() {
            break;
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(&buffer[..read_total]);
    hasher.update(len.to_le_bytes());
    let digest = hasher.finalize();

    let hex: String = digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(HASH_ID_CHARS)
        .collect();
    Ok(format!("sha256:{hex}"))
}

/// Extracts a DOI from free text, trying the most specific patterns first.
#[must_use]
pub fn extract_doi(text: &str) -> Option<String> {
    for pattern in [&*DOI_PREFIX_PATTERN, &*DOI_URL_PATTERN, &*DOI_PATTERN] {
        if let Some(cap) = pattern.captures(text) {
            let raw = cap.get(1)?.as_str();
            let doi = normalize_doi(raw);
            // Reject degenerate matches (no suffix worth keeping).
            if doi.contains('/') && doi.len() > 7 {
                trace!(doi = %doi, "found DOI candidate");
                return Some(doi);
            }
        }
    }
    None
}

/// Normalizes a DOI: lowercase, trailing punctuation stripped.
#[must_use]
pub fn normalize_doi(raw: &str) -> String {
    raw.trim()
        .trim_end_matches([' ', '.', ',', ';', ')'])
        .to_lowercase()
}

/// Picks a plausible title from first-page text.
///
/// Prefers a line of title-ish length that matches none of the exclusion
/// patterns (dates, journal furniture, all-caps headers); falls back to the
/// first non-trivial line.
#[must_use]
pub fn title_from_text(first_page: &str) -> Option<String> {
    let lines: Vec<&str> = first_page
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    for line in lines.iter().take(10) {
        if (15..=200).contains(&line.len())
            && !TITLE_EXCLUDE_PATTERNS.iter().any(|p| p.is_match(line))
        {
            return Some((*line).to_string());
        }
    }

    lines
        .iter()
        .take(5)
        .find(|l| l.len() > 10)
        .map(|l| (*l).to_string())
}
