//! Format-aware hierarchical chunking
//!
//! Every upload is decomposed into a two-level hierarchy: coarse parent
//! chunks that go to SQL and are later surfaced to the LLM, and fine child
//! texts that get embedded into the vector store. Child texts carry a
//! breadcrumb prefix identifying their lineage so the embedding keeps
//! structural context.

mod docx;
mod epub;
mod html;
mod markdown;
pub mod numerals;
mod pdf;
pub mod splitter;
mod text;
mod tokens;

use crate::error::Result;
use crate::models::Metadata;

pub use numerals::{chinese_to_arabic, parse_complex_title, StandardizedTitle};
pub use splitter::{split_by_heading, split_by_window, split_text_by_length};
pub use tokens::count_tokens;

/// Child window size for fine-grained formats (docx/pdf/html/epub/text)
pub const CHILD_WINDOW: usize = 400;
/// Child window overlap for fine-grained formats
pub const CHILD_OVERLAP: usize = 50;
/// Markdown child window size
pub const MD_CHILD_WINDOW: usize = 500;
/// Markdown child window overlap
pub const MD_CHILD_OVERLAP: usize = 150;
/// Parent window size for flat formats (docx/text)
pub const PARENT_WINDOW: usize = 1200;
/// Parent window overlap for flat formats
pub const PARENT_OVERLAP: usize = 200;

/// Supported input formats, dispatched by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Markdown,
    Text,
    Pdf,
    Docx,
    Html,
    Epub,
}

impl FileType {
    /// Normalize an extension (with or without the leading dot) to a format.
    /// Unknown extensions fall back to plain text.
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "md" | "markdown" => FileType::Markdown,
            "pdf" => FileType::Pdf,
            "docx" | "doc" => FileType::Docx,
            "html" | "htm" => FileType::Html,
            "epub" => FileType::Epub,
            _ => FileType::Text,
        }
    }
}

/// A parent chunk together with its breadcrumb-prefixed child texts
#[derive(Debug, Clone)]
pub struct ParsedChunk {
    /// Breadcrumb-prefixed parent content
    pub content: String,
    /// Free-form metadata persisted to SQL and mirrored into the vector store
    pub metadata: Metadata,
    /// Child texts to embed, each carrying the breadcrumb prefix
    pub children: Vec<String>,
}

impl ParsedChunk {
    pub fn new(content: String, metadata: Metadata, children: Vec<String>) -> Self {
        Self {
            content,
            metadata,
            children,
        }
    }
}

/// Parse raw file bytes into the parent/child hierarchy.
///
/// `file_name` supplies both the dispatch extension and the document label
/// used in breadcrumbs.
pub fn parse_document(bytes: &[u8], file_name: &str) -> Result<Vec<ParsedChunk>> {
    let ext = file_name.rsplit('.').next().unwrap_or_default();
    let stem = file_stem(file_name);
    match FileType::from_extension(ext) {
        FileType::Markdown => {
            let content = String::from_utf8_lossy(bytes);
            Ok(markdown::parse(&content, stem))
        }
        FileType::Pdf => pdf::parse(bytes, stem),
        FileType::Docx => docx::parse(bytes, stem),
        FileType::Html => {
            let content = String::from_utf8_lossy(bytes);
            Ok(html::parse(&content, stem))
        }
        FileType::Epub => epub::parse(bytes, stem),
        FileType::Text => {
            let content = String::from_utf8_lossy(bytes);
            Ok(text::parse(&content, stem))
        }
    }
}

/// File name without its final extension
pub fn file_stem(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

pub(crate) fn metadata_from_pairs(pairs: &[(&str, serde_json::Value)]) -> Metadata {
    let mut meta = Metadata::new();
    for (k, v) in pairs {
        meta.insert((*k).to_string(), v.clone());
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_dispatch() {
        assert_eq!(FileType::from_extension("md"), FileType::Markdown);
        assert_eq!(FileType::from_extension(".markdown"), FileType::Markdown);
        assert_eq!(FileType::from_extension("DOC"), FileType::Docx);
        assert_eq!(FileType::from_extension("htm"), FileType::Html);
        assert_eq!(FileType::from_extension("epub"), FileType::Epub);
        assert_eq!(FileType::from_extension("xyz"), FileType::Text);
        assert_eq!(FileType::from_extension(""), FileType::Text);
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("guide.md"), "guide");
        assert_eq!(file_stem("archive.tar.gz"), "archive.tar");
        assert_eq!(file_stem("noext"), "noext");
        assert_eq!(file_stem(".hidden"), ".hidden");
    }

    #[test]
    fn test_unknown_format_falls_back_to_text() {
        let chunks = parse_document("hello world".as_bytes(), "notes.xyz").unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("hello world"));
    }
}
