//! Concrete PDF metadata reader backed by lopdf and pdf-extract.

use std::fs;
use std::path::Path;

use tracing::{debug, trace, warn};

use super::{MetadataError, MetadataReader, PdfMetadata, extract_doi, title_from_text};

/// How many leading pages are scanned for a DOI in the text layer.
const DOI_TEXT_PAGES: usize = 3;

/// Info-dictionary keys that may carry a DOI.
const DOI_INFO_KEYS: [&[u8]; 4] = [b"Subject", b"Keywords", b"doi", b"DOI"];

/// Reads DOI and title from PDF files.
///
/// The Info dictionary (via `lopdf`) is consulted first; the text layer of
/// the leading pages (via `pdf-extract`) fills in whatever the dictionary
/// did not provide. Either source may be unusable on its own; the reader
/// only errors when both fail to produce anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfFileReader;

impl PdfFileReader {
    /// Creates a new reader.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MetadataReader for PdfFileReader {
    fn read(&self, path: &Path) -> Result<PdfMetadata, MetadataError> {
        let bytes = fs::read(path).map_err(|e| MetadataError::io(path, e))?;

        let mut metadata = PdfMetadata::default();
        let mut parse_failures: Vec<String> = Vec::new();

        match read_info_dictionary(&bytes) {
            Ok(info) => {
                metadata.doi = info.doi;
                metadata.title = info.title;
            }
            Err(reason) => {
                trace!(path = %path.display(), %reason, "Info dictionary unusable");
                parse_failures.push(reason);
            }
        }

        if metadata.doi.is_none() || metadata.title.is_none() {
            match pdf_extract::extract_text_from_mem_by_pages(&bytes) {
                Ok(pages) => {
                    if metadata.doi.is_none() {
                        let leading: String = pages
                            .iter()
                            .take(DOI_TEXT_PAGES)
                            .map(String::as_str)
                            .collect::<Vec<_>>()
                            .join("\n");
                        metadata.doi = extract_doi(&leading);
                    }
                    if metadata.title.is_none() {
                        metadata.title = pages.first().and_then(|p| title_from_text(p));
                    }
                }
                Err(e) => {
                    trace!(path = %path.display(), error = %e, "text layer unusable");
                    parse_failures.push(e.to_string());
                }
            }
        }

        // Both routes failed and nothing was found: report the failure so the
        // caller can log why renaming is being skipped.
        if metadata.is_empty() && parse_failures.len() == 2 {
            return Err(MetadataError::parse(path, parse_failures.join("; ")));
        }

        debug!(
            path = %path.display(),
            doi = metadata.doi.as_deref().unwrap_or("-"),
            has_title = metadata.title.is_some(),
            "read PDF metadata"
        );
        Ok(metadata)
    }
}

/// DOI/title found in the Info dictionary.
struct InfoFields {
    doi: Option<String>,
    title: Option<String>,
}

/// Reads the Info dictionary and scans its fields for a DOI and title.
fn read_info_dictionary(bytes: &[u8]) -> Result<InfoFields, String> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| e.to_string())?;

    let info = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|obj| obj.as_reference().ok())
        .and_then(|id| doc.get_object(id).ok())
        .and_then(|obj| obj.as_dict().ok());

    let Some(info) = info else {
        return Ok(InfoFields {
            doi: None,
            title: None,
        });
    };

    let mut doi = None;
    for key in DOI_INFO_KEYS {
        if doi.is_some() {
            break;
        }
        if let Some(value) = info
            .get(key)
            .ok()
            .and_then(|obj| obj.as_str().ok())
            .map(decode_pdf_string)
        {
            doi = extract_doi(&value);
        }
    }

    let title = info
        .get(b"Title")
        .ok()
        .and_then(|obj| obj.as_str().ok())
        .map(decode_pdf_string)
        .map(|t| t.trim().to_string())
        .filter(|t| t.len() > 10);

    if title.is_none() && doi.is_none() {
        warn!("Info dictionary present but carries no usable DOI or title");
    }

    Ok(InfoFields { doi, title })
}

/// Decodes a PDF string object, handling the UTF-16BE BOM form.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}
