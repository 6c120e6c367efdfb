//! DOCX chunker
//!
//! The OOXML container is read directly: `word/document.xml` text outside
//! tables is the `main` section, text inside `<w:tbl>` is the `table`
//! section, and `word/header*.xml` / `word/footer*.xml` parts form the
//! `header` and `footer` sections. Each section is window-split into
//! parents, which are re-split into embedded children.

use super::splitter::{split_by_window, split_text_by_length};
use super::{
    metadata_from_pairs, ParsedChunk, CHILD_OVERLAP, CHILD_WINDOW, PARENT_OVERLAP, PARENT_WINDOW,
};
use crate::error::{PlatformError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::json;
use std::io::Read;

pub fn parse(bytes: &[u8], file_stem: &str) -> Result<Vec<ParsedChunk>> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| PlatformError::FileLoad(format!("docx container: {}", e)))?;

    let names: Vec<String> = archive.file_names().map(String::from).collect();

    let mut main = String::new();
    let mut table = String::new();
    let mut header = String::new();
    let mut footer = String::new();

    if let Ok(mut file) = archive.by_name("word/document.xml") {
        let mut xml = String::new();
        file.read_to_string(&mut xml)
            .map_err(|e| PlatformError::FileLoad(format!("docx document.xml: {}", e)))?;
        let (m, t) = extract_text(&xml);
        main = m;
        table = t;
    }

    for name in &names {
        let part = if name.starts_with("word/header") && name.ends_with(".xml") {
            Some(&mut header)
        } else if name.starts_with("word/footer") && name.ends_with(".xml") {
            Some(&mut footer)
        } else {
            None
        };
        if let Some(out) = part {
            if let Ok(mut file) = archive.by_name(name) {
                let mut xml = String::new();
                if file.read_to_string(&mut xml).is_ok() {
                    let (m, t) = extract_text(&xml);
                    out.push_str(&m);
                    out.push_str(&t);
                }
            }
        }
    }

    let sections = [
        ("main", main),
        ("header", header),
        ("footer", footer),
        ("table", table),
    ];

    let mut chunks = Vec::new();
    for (section, text) in sections {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let crumb = format!("【文档:{}】 > 【{}】", file_stem, section);
        for parent in split_by_window(text, PARENT_WINDOW, PARENT_OVERLAP) {
            let children = split_text_by_length(&parent, CHILD_WINDOW, CHILD_OVERLAP)
                .into_iter()
                .map(|w| format!("{}\n{}", crumb, w))
                .collect();
            let metadata = metadata_from_pairs(&[("section", json!(section))]);
            chunks.push(ParsedChunk::new(
                format!("{}\n{}", crumb, parent),
                metadata,
                children,
            ));
        }
    }
    Ok(chunks)
}

/// Pull paragraph text out of a WordprocessingML part, separating content
/// that lives inside `<w:tbl>` from the main flow.
fn extract_text(xml: &str) -> (String, String) {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();
    let mut main = String::new();
    let mut table = String::new();
    let mut tbl_depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:tbl" => tbl_depth += 1,
                b"w:t" => in_text = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:tbl" => tbl_depth = tbl_depth.saturating_sub(1),
                b"w:t" => in_text = false,
                b"w:p" => {
                    let out = if tbl_depth > 0 { &mut table } else { &mut main };
                    if !out.ends_with('\n') && !out.is_empty() {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if in_text {
                    let text = t.unescape().unwrap_or_default();
                    let out = if tbl_depth > 0 { &mut table } else { &mut main };
                    out.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    (main, table)
}
