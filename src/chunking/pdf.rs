//! PDF chunker
//!
//! Extracted PDF text arrives as an unstructured stream, so it runs
//! through a cleaning pipeline: normalize line endings, force boundaries
//! before chapter-like headings, split on blank lines, collapse intra-
//! paragraph whitespace, then merge fragments too short to stand alone.

use super::splitter::split_text_by_length;
use super::{metadata_from_pairs, ParsedChunk, CHILD_OVERLAP, CHILD_WINDOW};
use crate::error::{PlatformError, Result};
use regex::Regex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Fragments shorter than this merge forward; duplicates below it are dropped
const MIN_PARENT_CHARS: usize = 20;

pub fn parse(bytes: &[u8], file_stem: &str) -> Result<Vec<ParsedChunk>> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| PlatformError::FileLoad(format!("pdf extract: {}", e)))?;
    Ok(from_text(&text, file_stem))
}

pub(crate) fn from_text(text: &str, file_stem: &str) -> Vec<ParsedChunk> {
    clean_and_split(text)
        .into_iter()
        .enumerate()
        .map(|(i, parent)| {
            let page = i + 1;
            let crumb = format!("【文档:{}】> 【第{}页】", file_stem, page);
            let children = split_text_by_length(&parent, CHILD_WINDOW, CHILD_OVERLAP)
                .into_iter()
                .map(|w| format!("{}\n{}", crumb, w))
                .collect();
            let metadata = metadata_from_pairs(&[("page_num", json!(page))]);
            ParsedChunk::new(format!("{}\n{}", crumb, parent), metadata, children)
        })
        .collect()
}

fn chapter_boundary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?:Chapter\s+\d+[^\n]*|第\s*[0-9零一二三四五六七八九十百千万]+\s*[章节回][^\n]*|#)$")
            .unwrap()
    })
}

/// The cleaning pipeline: returns merged, deduplicated parent texts.
pub(crate) fn clean_and_split(text: &str) -> Vec<String> {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = chapter_boundary_re().replace_all(&text, "\n\n$0");

    static BLANK: OnceLock<Regex> = OnceLock::new();
    let blank = BLANK.get_or_init(|| Regex::new(r"\n[ \t]*\n+").unwrap());
    static WS: OnceLock<Regex> = OnceLock::new();
    let ws = WS.get_or_init(|| Regex::new(r"\s+").unwrap());

    let fragments: Vec<String> = blank
        .split(&text)
        .map(|frag| ws.replace_all(frag.trim(), " ").to_string())
        .filter(|frag| !frag.is_empty())
        .collect();

    let mut parents = Vec::new();
    let mut buf = String::new();
    for frag in &fragments {
        if !buf.is_empty() {
            buf.push(' ');
        }
        buf.push_str(frag);
        let complete = ends_with_terminator(&buf)
            || is_code_like(frag)
            || buf.chars().count() >= MIN_PARENT_CHARS;
        if complete {
            parents.push(std::mem::take(&mut buf));
        }
    }
    if !buf.is_empty() {
        parents.push(buf);
    }

    let mut seen_short = HashSet::new();
    parents.retain(|p| {
        if p.chars().count() >= MIN_PARENT_CHARS {
            return true;
        }
        seen_short.insert(p.clone())
    });
    parents
}

fn ends_with_terminator(text: &str) -> bool {
    matches!(
        text.chars().last(),
        Some('。') | Some('！') | Some('？') | Some('.') | Some('!') | Some('?')
    )
}

fn is_code_like(frag: &str) -> bool {
    frag.contains("```") || frag.contains('{') || frag.contains('}') || frag.contains(';')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chapter_heading_and_sentence() {
        let parents = clean_and_split("Chapter 1\nhello world\n\nfoo bar.");
        assert!(parents.iter().any(|p| p == "Chapter 1 hello world"));
        assert!(parents.iter().any(|p| p == "foo bar."));
    }

    #[test]
    fn test_boundary_injected_before_chinese_chapter() {
        let parents = clean_and_split("前言内容在这里结束了。\n第一章 开始\n正文第一段内容持续。");
        assert!(parents.iter().any(|p| p.starts_with("第一章")));
    }

    #[test]
    fn test_short_fragments_merge_until_terminator() {
        let parents = clean_and_split("one\n\ntwo\n\nthree end.");
        assert_eq!(parents, vec!["one two three end.".to_string()]);
    }

    #[test]
    fn test_short_duplicates_dropped() {
        let parents = clean_and_split("ok.\n\nok.\n\na much longer paragraph stays.");
        let count = parents.iter().filter(|p| p.as_str() == "ok.").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_parent_breadcrumb() {
        let chunks = from_text("Chapter 1\nhello world\n\nfoo bar.", "report");
        assert!(chunks[0].content.starts_with("【文档:report】> 【第1页】"));
        assert!(chunks[0].children[0].starts_with("【文档:report】> 【第1页】"));
        assert_eq!(chunks[1].metadata["page_num"], 2);
    }
}
