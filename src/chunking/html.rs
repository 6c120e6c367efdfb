//! HTML chunker
//!
//! Walks the DOM under `body` in document order, collecting heading tags,
//! atomic blocks (code, lists, tables, quotes) and leaf text paragraphs.
//! Blocks accumulate under the running (h1, h2, h3) context; the buffer
//! flushes into a parent chunk when an h1 or h2 changes or the buffer
//! reaches the size limit. Content outside `body` is ignored.

use super::splitter::split_text_by_length;
use super::{ParsedChunk, CHILD_OVERLAP, CHILD_WINDOW};
use crate::models::Metadata;
use scraper::{ElementRef, Html, Selector};
use serde_json::json;

/// Flush the accumulated buffer once it reaches this many code points
const FLUSH_LIMIT: usize = 1200;

const ATOMIC_TAGS: [&str; 7] = ["code", "pre", "blockquote", "ul", "ol", "li", "table"];

pub fn parse(content: &str, file_stem: &str) -> Vec<ParsedChunk> {
    let document = Html::parse_document(content);
    let body_selector = Selector::parse("body").expect("static selector");

    let mut walker = Walker::new(file_stem);
    if let Some(body) = document.select(&body_selector).next() {
        walker.walk(body);
    }
    walker.finish()
}

struct Walker {
    file_stem: String,
    h1: String,
    h2: String,
    h3: String,
    blocks: Vec<String>,
    buffered: usize,
    chunks: Vec<ParsedChunk>,
}

impl Walker {
    fn new(file_stem: &str) -> Self {
        Self {
            file_stem: file_stem.to_string(),
            h1: String::new(),
            h2: String::new(),
            h3: String::new(),
            blocks: Vec::new(),
            buffered: 0,
            chunks: Vec::new(),
        }
    }

    fn walk(&mut self, el: ElementRef<'_>) {
        for child in el.children() {
            if let Some(cel) = ElementRef::wrap(child) {
                let name = cel.value().name();
                match name {
                    "h1" => {
                        self.flush();
                        self.h1 = element_text(cel);
                        self.h2.clear();
                        self.h3.clear();
                        let heading = self.h1.clone();
                        self.push_block(heading);
                    }
                    "h2" => {
                        self.flush();
                        self.h2 = element_text(cel);
                        self.h3.clear();
                        let heading = self.h2.clone();
                        self.push_block(heading);
                    }
                    "h3" => {
                        self.h3 = element_text(cel);
                        let heading = self.h3.clone();
                        self.push_block(heading);
                    }
                    "h4" | "h5" | "h6" => {
                        self.push_block(element_text(cel));
                    }
                    "script" | "style" => {}
                    _ if ATOMIC_TAGS.contains(&name) => {
                        self.push_block(element_text(cel));
                    }
                    _ => self.walk(cel),
                }
            } else if let Some(text) = child.value().as_text() {
                let text = text.trim();
                if !text.is_empty() {
                    self.push_block(text.to_string());
                }
            }
        }
    }

    fn push_block(&mut self, block: String) {
        if block.is_empty() {
            return;
        }
        self.buffered += block.chars().count();
        self.blocks.push(block);
        if self.buffered >= FLUSH_LIMIT {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.blocks.is_empty() {
            return;
        }
        let body = self.blocks.join("\n");
        self.blocks.clear();
        self.buffered = 0;

        let doc_label = if self.h1.is_empty() {
            self.file_stem.as_str()
        } else {
            self.h1.as_str()
        };
        let mut crumb = format!("【文档:{}】", doc_label);
        if !self.h2.is_empty() {
            crumb.push_str(&format!(" > 【主题:{}】", self.h2));
        }
        if !self.h3.is_empty() {
            crumb.push_str(&format!(" > 【子题:{}】", self.h3));
        }

        let mut metadata = Metadata::new();
        if !self.h1.is_empty() {
            metadata.insert("h1".to_string(), json!(self.h1));
        }
        if !self.h2.is_empty() {
            metadata.insert("h2".to_string(), json!(self.h2));
        }
        if !self.h3.is_empty() {
            metadata.insert("h3".to_string(), json!(self.h3));
        }

        let children = split_text_by_length(&body, CHILD_WINDOW, CHILD_OVERLAP)
            .into_iter()
            .map(|w| format!("{}\n{}", crumb, w))
            .collect();

        self.chunks.push(ParsedChunk::new(
            format!("{}\n{}", crumb, body),
            metadata,
            children,
        ));
    }

    fn finish(mut self) -> Vec<ParsedChunk> {
        self.flush();
        self.chunks
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
