//! Plain text chunker: the fallback for unknown formats

use super::splitter::{split_by_window, split_text_by_length};
use super::{
    metadata_from_pairs, ParsedChunk, CHILD_OVERLAP, CHILD_WINDOW, PARENT_OVERLAP, PARENT_WINDOW,
};
use serde_json::json;

pub fn parse(content: &str, file_stem: &str) -> Vec<ParsedChunk> {
    let content = content.trim();
    if content.is_empty() {
        return Vec::new();
    }
    let crumb = format!("【文档:{}】", file_stem);
    split_by_window(content, PARENT_WINDOW, PARENT_OVERLAP)
        .into_iter()
        .map(|parent| {
            let children = split_text_by_length(&parent, CHILD_WINDOW, CHILD_OVERLAP)
                .into_iter()
                .map(|w| format!("{}\n{}", crumb, w))
                .collect();
            let metadata = metadata_from_pairs(&[("doc_name", json!(file_stem))]);
            ParsedChunk::new(format!("{}\n{}", crumb, parent), metadata, children)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_parent() {
        let chunks = parse("a short note", "note");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].children.len(), 1);
        assert!(chunks[0].content.starts_with("【文档:note】"));
    }

    #[test]
    fn test_long_text_multiple_parents_and_children() {
        let text: String = std::iter::repeat('x').take(3000).collect();
        let chunks = parse(&text, "big");
        assert!(chunks.len() > 1);
        assert!(chunks[0].children.len() > 1);
    }

    #[test]
    fn test_empty_input() {
        assert!(parse("   ", "empty").is_empty());
    }
}
