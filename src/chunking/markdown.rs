//! Markdown chunker
//!
//! `#` is the document title (falling back to the file name), each `##`
//! block becomes a parent chunk, and `###` blocks inside it become the
//! embedded children.

use super::splitter::{extract_title, split_by_heading, split_text_by_length};
use super::{metadata_from_pairs, ParsedChunk, MD_CHILD_OVERLAP, MD_CHILD_WINDOW};
use serde_json::json;

pub fn parse(content: &str, file_stem: &str) -> Vec<ParsedChunk> {
    let mut title = extract_title(content, "#");
    if title.is_empty() {
        title = file_stem.to_string();
    }

    let mut chunks = Vec::new();
    for section in split_by_heading(content, "##") {
        let h2 = extract_title(&section, "##");
        if h2.is_empty() {
            // preamble before the first ## heading; drop the title line itself
            let body = strip_title_line(&section);
            if body.is_empty() {
                continue;
            }
            let crumb = format!("【文档:{}】", title);
            let children = windowed_children(&crumb, &body);
            let metadata = metadata_from_pairs(&[("h1", json!(title.clone()))]);
            chunks.push(ParsedChunk::new(
                format!("{}\n{}", crumb, body),
                metadata,
                children,
            ));
            continue;
        }

        let crumb = format!("【文档:{}】 > 【主题:{}】", title, h2);
        let mut children = Vec::new();
        for sub in split_by_heading(&section, "###") {
            let h3 = extract_title(&sub, "###");
            let prefix = if h3.is_empty() {
                crumb.clone()
            } else {
                format!("{} > 【子题:{}】", crumb, h3)
            };
            children.extend(windowed_children(&prefix, &sub));
        }

        let metadata = metadata_from_pairs(&[
            ("h1", json!(title.clone())),
            ("h2", json!(h2.clone())),
        ]);
        chunks.push(ParsedChunk::new(
            format!("{}\n{}", crumb, section),
            metadata,
            children,
        ));
    }
    chunks
}

fn windowed_children(prefix: &str, body: &str) -> Vec<String> {
    split_text_by_length(body, MD_CHILD_WINDOW, MD_CHILD_OVERLAP)
        .into_iter()
        .map(|w| format!("{}\n{}", prefix, w))
        .collect()
}

fn strip_title_line(block: &str) -> String {
    block
        .lines()
        .filter(|l| !(l.starts_with("# ") || l.trim() == "#"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Guide\n## Install\ntext1\n### Linux\nt2\n## Use\nt3";

    #[test]
    fn test_two_parents() {
        let chunks = parse(DOC, "guide");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata["h1"], "Guide");
        assert_eq!(chunks[0].metadata["h2"], "Install");
        assert_eq!(chunks[1].metadata["h2"], "Use");
    }

    #[test]
    fn test_children_carry_breadcrumbs() {
        let chunks = parse(DOC, "guide");
        let install = &chunks[0];
        assert!(install.children.len() >= 2);
        assert!(install.children[0].starts_with("【文档:Guide】 > 【主题:Install】"));
        assert!(install
            .children
            .iter()
            .any(|c| c.contains("> 【子题:Linux】")));
    }

    #[test]
    fn test_title_falls_back_to_file_name() {
        let chunks = parse("## Only\nbody", "notes");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata["h1"], "notes");
        assert!(chunks[0].children[0].starts_with("【文档:notes】 > 【主题:Only】"));
    }

    #[test]
    fn test_document_without_sections() {
        let chunks = parse("# Solo\njust text", "solo");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata["h1"], "Solo");
        assert!(chunks[0].content.contains("just text"));
        assert!(!chunks[0].content.contains("# Solo\n# Solo"));
    }

    #[test]
    fn test_long_section_is_window_split() {
        let body: String = std::iter::repeat('字').take(1200).collect();
        let doc = format!("# T\n## S\n{}", body);
        let chunks = parse(&doc, "t");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].children.len() > 1);
        for child in &chunks[0].children {
            assert!(child.starts_with("【文档:T】 > 【主题:S】"));
        }
    }
}
