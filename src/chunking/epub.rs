//! EPUB chunker
//!
//! Chapters come from the OPF spine, one parent chunk per chapter.
//! Chapter headings are normalized through the complex-title parser so
//! volume and chapter numbers (Arabic or Chinese numerals) land in the
//! metadata as integers usable for retrieval filters.

use super::numerals::parse_complex_title;
use super::splitter::split_text_by_length;
use super::{metadata_from_pairs, ParsedChunk, CHILD_OVERLAP, CHILD_WINDOW};
use crate::error::{PlatformError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::{Html, Selector};
use serde_json::json;
use std::collections::HashMap;
use std::io::Read;

pub fn parse(bytes: &[u8], file_stem: &str) -> Result<Vec<ParsedChunk>> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| PlatformError::FileLoad(format!("epub container: {}", e)))?;

    let container = read_entry(&mut archive, "META-INF/container.xml")?;
    let opf_path = rootfile_path(&container)
        .ok_or_else(|| PlatformError::FileLoad("epub rootfile missing".to_string()))?;
    let opf = read_entry(&mut archive, &opf_path)?;
    let spine = spine_hrefs(&opf);
    let base = opf_path
        .rsplit_once('/')
        .map(|(dir, _)| format!("{}/", dir))
        .unwrap_or_default();

    let mut chunks = Vec::new();
    for href in spine {
        let lower = href.to_ascii_lowercase();
        if !(lower.ends_with(".xhtml") || lower.ends_with(".html") || lower.ends_with(".htm")) {
            continue;
        }
        let path = format!("{}{}", base, href);
        let Ok(content) = read_entry(&mut archive, &path) else {
            continue;
        };
        if let Some(chunk) = chapter_chunk(&content, &href, file_stem) {
            chunks.push(chunk);
        }
    }
    Ok(chunks)
}

fn chapter_chunk(content: &str, href: &str, file_stem: &str) -> Option<ParsedChunk> {
    let document = Html::parse_document(content);
    let heading_selector = Selector::parse("h1, h2, h3").expect("static selector");
    let title_selector = Selector::parse("title").expect("static selector");
    let body_selector = Selector::parse("body").expect("static selector");

    let element_text = |el: scraper::ElementRef<'_>| {
        el.text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    };
    let title = document
        .select(&heading_selector)
        .map(element_text)
        .find(|t| !t.is_empty())
        .or_else(|| {
            document
                .select(&title_selector)
                .map(element_text)
                .find(|t| !t.is_empty())
        })
        .unwrap_or_else(|| chapter_stem(href).to_string());

    let body = document
        .select(&body_selector)
        .next()
        .map(|el| {
            el.text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    if body.is_empty() {
        return None;
    }

    let parsed = parse_complex_title(&title);
    let metadata = metadata_from_pairs(&[
        ("chapter_num", json!(parsed.chapter_num)),
        ("volume_num", json!(parsed.volume_num)),
        ("volume_name", json!(parsed.volume_name)),
        ("raw_title", json!(parsed.raw_title)),
    ]);

    let crumb = format!("【文档:{}】 > 【{}】", file_stem, title);
    let children = split_text_by_length(&body, CHILD_WINDOW, CHILD_OVERLAP)
        .into_iter()
        .map(|w| format!("{}\n{}", crumb, w))
        .collect();

    Some(ParsedChunk::new(
        format!("{}\n{}", crumb, body),
        metadata,
        children,
    ))
}

fn chapter_stem(href: &str) -> &str {
    let name = href.rsplit('/').next().unwrap_or(href);
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name)
}

fn read_entry(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<String> {
    let mut file = archive
        .by_name(name)
        .map_err(|e| PlatformError::FileLoad(format!("epub entry {}: {}", name, e)))?;
    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(|e| PlatformError::FileLoad(format!("epub entry {}: {}", name, e)))?;
    Ok(content)
}

/// `full-path` attribute of the first rootfile in container.xml
fn rootfile_path(container: &str) -> Option<String> {
    let mut reader = Reader::from_reader(container.as_bytes());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"rootfile" {
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"full-path" {
                            return String::from_utf8(attr.value.into_owned()).ok();
                        }
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

/// Manifest hrefs in spine order
fn spine_hrefs(opf: &str) -> Vec<String> {
    let mut reader = Reader::from_reader(opf.as_bytes());
    let mut buf = Vec::new();
    let mut manifest: HashMap<String, String> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"item" => {
                    let mut id = None;
                    let mut href = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.local_name().as_ref() {
                            b"id" => id = String::from_utf8(attr.value.into_owned()).ok(),
                            b"href" => href = String::from_utf8(attr.value.into_owned()).ok(),
                            _ => {}
                        }
                    }
                    if let (Some(id), Some(href)) = (id, href) {
                        manifest.insert(id, href);
                    }
                }
                b"itemref" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"idref" {
                            if let Ok(idref) = String::from_utf8(attr.value.into_owned()) {
                                order.push(idref);
                            }
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    order
        .into_iter()
        .filter_map(|idref| manifest.get(&idref).cloned())
        .collect()
}
