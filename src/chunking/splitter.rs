//! Windowed text splitting and heading utilities
//!
//! All window math operates on Unicode code points, never bytes, so CJK
//! content splits at character boundaries.

use regex::Regex;

/// Extract the first heading at the given mark level (e.g. `#` or `##`).
pub fn extract_title(content: &str, mark: &str) -> String {
    let re = Regex::new(&format!(r"(?m)^{}\s+(.*)", regex::escape(mark))).expect("static regex");
    re.captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Split content into blocks at headings of exactly the given mark level.
/// Content before the first heading becomes its own leading block; each
/// following block starts with its heading line.
pub fn split_by_heading(content: &str, mark: &str) -> Vec<String> {
    let re = Regex::new(&format!(r"(?m)^{}\s+", regex::escape(mark))).expect("static regex");
    let indices: Vec<usize> = re.find_iter(content).map(|m| m.start()).collect();
    if indices.is_empty() {
        return vec![content.to_string()];
    }
    let mut chunks = Vec::new();
    if indices[0] > 0 {
        let pre = content[..indices[0]].trim();
        if !pre.is_empty() {
            chunks.push(pre.to_string());
        }
    }
    for (i, &start) in indices.iter().enumerate() {
        let end = indices.get(i + 1).copied().unwrap_or(content.len());
        chunks.push(content[start..end].trim().to_string());
    }
    chunks
}

/// Window-split text longer than `limit` code points; shorter text passes
/// through as a single chunk.
pub fn split_text_by_length(content: &str, limit: usize, overlap: usize) -> Vec<String> {
    if content.chars().count() <= limit {
        return vec![content.to_string()];
    }
    split_by_window(content, limit, overlap)
}

/// Fixed-window splitter: emits windows of `max_size` code points stepping
/// by `max_size - overlap`; the final window is clipped to the text end.
pub fn split_by_window(content: &str, max_size: usize, overlap: usize) -> Vec<String> {
    let runes: Vec<char> = content.chars().collect();
    if runes.len() <= max_size {
        return vec![content.to_string()];
    }
    let step = max_size - overlap;
    let mut chunks = Vec::new();
    let mut i = 0;
    while i < runes.len() {
        let end = (i + max_size).min(runes.len());
        chunks.push(runes[i..end].iter().collect());
        if end == runes.len() {
            break;
        }
        i += step;
    }
    chunks
}
