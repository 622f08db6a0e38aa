//! Content addressing for ingestion dedup.
//!
//! Documents are identified by a SHA-256 digest of their normalized content
//! prefixed with source metadata, so byte-identical re-ingestion always maps
//! to the same hash. Chunk hashes mix in the parent document hash: any change
//! to the document invalidates every chunk hash derived from it.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

use crate::models::SourceType;

/// Normalize text before hashing or chunking.
///
/// Trims, unifies line endings to `\n`, collapses runs of horizontal
/// whitespace to a single space, and collapses runs of newlines to one.
/// Pure; an empty input stays empty.
pub fn normalize_text(text: &str) -> String {
    static HORIZONTAL_WS: OnceLock<Regex> = OnceLock::new();
    static NEWLINE_RUNS: OnceLock<Regex> = OnceLock::new();

    let horizontal = HORIZONTAL_WS.get_or_init(|| Regex::new(r"[\t ]+").expect("valid regex"));
    let newlines = NEWLINE_RUNS.get_or_init(|| Regex::new(r"\n{2,}").expect("valid regex"));

    let unified = text.trim().replace("\r\n", "\n").replace('\r', "\n");
    let collapsed = horizontal.replace_all(&unified, " ");
    let collapsed = newlines.replace_all(&collapsed, "\n");
    collapsed.trim().to_string()
}

/// SHA-256 hex digest of a string. Pure, 64 lowercase hex chars.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Build the document identity string: `sourceType|library|version|content`.
///
/// The content component must already be normalized; callers hash the result
/// with [`sha256_hex`] to obtain the document-level dedup key.
pub fn document_identity(
    source_type: SourceType,
    library: &str,
    version: &str,
    normalized_content: &str,
) -> String {
    format!(
        "{}|{}|{}|{}",
        source_type.as_str(),
        library,
        version,
        normalized_content
    )
}

/// Hash of a document identity string.
pub fn document_hash(
    source_type: SourceType,
    library: &str,
    version: &str,
    normalized_content: &str,
) -> String {
    sha256_hex(&document_identity(
        source_type,
        library,
        version,
        normalized_content,
    ))
}

/// Chunk-level hash: derived from the parent document hash plus chunk text.
pub fn chunk_hash(document_hash: &str, chunk_text: &str) -> String {
    sha256_hex(&format!("{}{}", document_hash, chunk_text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_text("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_normalize_collapses_horizontal_whitespace() {
        assert_eq!(normalize_text("a \t  b"), "a b");
    }

    #[test]
    fn test_normalize_collapses_blank_lines() {
        assert_eq!(normalize_text("a\n\n\nb"), "a\nb");
    }

    #[test]
    fn test_normalize_trims() {
        assert_eq!(normalize_text("  hello  "), "hello");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn test_sha256_is_stable() {
        let a = sha256_hex("upgrade");
        let b = sha256_hex("upgrade");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_document_hash_changes_with_any_component() {
        let base = document_hash(SourceType::ReleaseNote, "boot", "3.0", "text");
        assert_ne!(
            base,
            document_hash(SourceType::MigrationGuide, "boot", "3.0", "text")
        );
        assert_ne!(
            base,
            document_hash(SourceType::ReleaseNote, "boot", "3.1", "text")
        );
        assert_ne!(
            base,
            document_hash(SourceType::ReleaseNote, "boot", "3.0", "other")
        );
    }

    #[test]
    fn test_chunk_hash_tracks_parent() {
        let h1 = chunk_hash("doc-a", "chunk");
        let h2 = chunk_hash("doc-b", "chunk");
        assert_ne!(h1, h2);
    }
}
