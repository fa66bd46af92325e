//! Canonical filename derivation and collision handling.
//!
//! A document with a DOI gets `"{doi} - {title}.pdf"`; one with only a title
//! gets `"NO_DOI - {title}.pdf"`. Components are sanitized for filesystem
//! safety and length-capped. Renaming is best-effort: a document without
//! usable metadata keeps its original filename and the pipeline proceeds.

use std::path::{Path, PathBuf};

use super::metadata::PdfMetadata;

/// Maximum characters kept from a DOI component.
const MAX_DOI_CHARS: usize = 50;

/// Maximum characters kept from a title alongside a DOI.
const MAX_TITLE_CHARS: usize = 100;

/// Maximum characters kept from a title when it stands alone.
const MAX_TITLE_ONLY_CHARS: usize = 150;

/// Derives the canonical filename for a document, or `None` when the
/// metadata carries nothing usable (renaming is then skipped entirely).
#[must_use]
pub fn derive_canonical_name(metadata: &PdfMetadata) -> Option<String> {
    match (&metadata.doi, &metadata.title) {
        (Some(doi), title) => {
            let doi_clean = clean_component(doi, MAX_DOI_CHARS);
            let title_clean =
                clean_component(title.as_deref().unwrap_or("Untitled"), MAX_TITLE_CHARS);
            Some(format!("{doi_clean} - {title_clean}.pdf"))
        }
        (None, Some(title)) => {
            let title_clean = clean_component(title, MAX_TITLE_ONLY_CHARS);
            Some(format!("NO_DOI - {title_clean}.pdf"))
        }
        (None, None) => None,
    }
}

/// Sanitizes text for use as a filename component.
///
/// Strips characters invalid on common filesystems, collapses whitespace,
/// and truncates at a word boundary. Never returns an empty string.
#[must_use]
pub fn clean_component(text: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = false;
    for ch in text.chars() {
        match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => {}
            c if c.is_control() => {}
            c if c.is_whitespace() => {
                if !prev_space && !out.is_empty() {
                    out.push(' ');
                    prev_space = true;
                }
            }
            c => {
                out.push(c);
                prev_space = false;
            }
        }
    }

    let mut out = out.trim_matches(['.', ' ']).to_string();
    if out.chars().count() > max_len {
        let truncated: String = out.chars().take(max_len).collect();
        // Cut back to the last full word when possible.
        out = match truncated.rfind(' ') {
            Some(pos) if pos > 0 => truncated[..pos].to_string(),
            _ => truncated,
        };
        out = out.trim_matches(['.', ' ']).to_string();
    }

    if out.is_empty() {
        "Untitled".to_string()
    } else {
        out
    }
}

/// Resolves the rename target for `canonical` inside `dir`.
///
/// Collision policy: a path that already exists and belongs to a different
/// document gets a ` (n)` suffix (n starting at 2). The document's own
/// current filename is never treated as a collision, so re-running over an
/// already-renamed file is a no-op rather than an error.
#[must_use]
pub fn resolve_rename_target(dir: &Path, canonical: &str, current_name: &str) -> PathBuf {
    let base = dir.join(canonical);
    if canonical == current_name || !base.exists() {
        return base;
    }

    let (stem, ext) = match canonical.rfind('.') {
        Some(pos) => (&canonical[..pos], &canonical[pos..]),
        None => (canonical, ""),
    };

    for n in 2..1000 {
        let candidate_name = format!("{stem} ({n}){ext}");
        if candidate_name == current_name {
            return dir.join(candidate_name);
        }
        let candidate = dir.join(&candidate_name);
        if !candidate.exists() {
            return candidate;
        }
    }

    // Practically unreachable; fall back to a timestamp suffix.
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem} ({timestamp}){ext}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::TempDir;

    fn metadata(doi: Option<&str>, title: Option<&str>) -> PdfMetadata {
        PdfMetadata {
            doi: doi.map(str::to_string),
            title: title.map(str::to_string),
        }
    }

    // ==================== Canonical Name Tests ====================

    #[test]
    fn test_canonical_name_doi_and_title() {
        let name =
            derive_canonical_name(&metadata(Some("10.1234/abc"), Some("A Fine Title"))).unwrap();
        assert_eq!(name, "10.1234abc - A Fine Title.pdf");
    }

    #[test]
    fn test_canonical_name_doi_without_title() {
        let name = derive_canonical_name(&metadata(Some("10.1234/abc"), None)).unwrap();
        assert_eq!(name, "10.1234abc - Untitled.pdf");
    }

    #[test]
    fn test_canonical_name_title_only() {
        let name = derive_canonical_name(&metadata(None, Some("Orphan Paper"))).unwrap();
        assert_eq!(name, "NO_DOI - Orphan Paper.pdf");
    }

    #[test]
    fn test_canonical_name_no_metadata_skips() {
        assert!(derive_canonical_name(&metadata(None, None)).is_none());
    }

    // ==================== Sanitization Tests ====================

    #[test]
    fn test_clean_component_strips_invalid_chars() {
        assert_eq!(clean_component(r#"a<b>c:d"e/f\g|h?i*j"#, 100), "abcdefghij");
    }

    #[test]
    fn test_clean_component_collapses_whitespace() {
        assert_eq!(clean_component("too   many\t spaces", 100), "too many spaces");
    }

    #[test]
    fn test_clean_component_trims_dots_and_spaces() {
        assert_eq!(clean_component(" . title . ", 100), "title");
    }

    #[test]
    fn test_clean_component_truncates_at_word_boundary() {
        let text = "alpha beta gamma delta";
        let cleaned = clean_component(text, 14);
        assert_eq!(cleaned, "alpha beta");
    }

    #[test]
    fn test_clean_component_never_empty() {
        assert_eq!(clean_component("???", 100), "Untitled");
        assert_eq!(clean_component("", 100), "Untitled");
    }

    // ==================== Collision Tests ====================

    #[test]
    fn test_resolve_target_no_collision() {
        let dir = TempDir::new().unwrap();
        let target = resolve_rename_target(dir.path(), "10.1 - A.pdf", "orig.pdf");
        assert_eq!(target, dir.path().join("10.1 - A.pdf"));
    }

    #[test]
    fn test_resolve_target_own_name_is_noop() {
        let dir = TempDir::new().unwrap();
        // The file already carries its canonical name.
        fs::write(dir.path().join("10.1 - A.pdf"), b"x").unwrap();
        let target = resolve_rename_target(dir.path(), "10.1 - A.pdf", "10.1 - A.pdf");
        assert_eq!(target, dir.path().join("10.1 - A.pdf"));
    }

    #[test]
    fn test_resolve_target_different_owner_gets_suffix() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("10.1 - A.pdf"), b"other document").unwrap();
        let target = resolve_rename_target(dir.path(), "10.1 - A.pdf", "orig.pdf");
        assert_eq!(target, dir.path().join("10.1 - A (2).pdf"));
    }

    #[test]
    fn test_resolve_target_suffix_increments() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("10.1 - A.pdf"), b"x").unwrap();
        fs::write(dir.path().join("10.1 - A (2).pdf"), b"y").unwrap();
        let target = resolve_rename_target(dir.path(), "10.1 - A.pdf", "orig.pdf");
        assert_eq!(target, dir.path().join("10.1 - A (3).pdf"));
    }

    #[test]
    fn test_resolve_target_own_suffixed_name_is_noop() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("10.1 - A.pdf"), b"other").unwrap();
        fs::write(dir.path().join("10.1 - A (2).pdf"), b"mine").unwrap();
        // Re-run over a document that was previously disambiguated.
        let target = resolve_rename_target(dir.path(), "10.1 - A.pdf", "10.1 - A (2).pdf");
        assert_eq!(target, dir.path().join("10.1 - A (2).pdf"));
    }
}
