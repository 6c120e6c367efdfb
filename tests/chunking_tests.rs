//! Chunking pipeline tests: format dispatch, hierarchy, breadcrumbs, and
//! the splitter/numeral invariants.

use atheneum::chunking::{
    chinese_to_arabic, parse_complex_title, parse_document, split_by_window, split_text_by_length,
};
use proptest::prelude::*;

#[test]
fn markdown_ingest_builds_two_level_hierarchy() {
    let doc = "# Guide\n## Install\ntext1\n### Linux\nt2\n## Use\nt3";
    let chunks = parse_document(doc.as_bytes(), "guide.md").unwrap();

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].metadata["h1"], "Guide");
    assert_eq!(chunks[0].metadata["h2"], "Install");
    assert_eq!(chunks[1].metadata["h2"], "Use");

    let install_children = &chunks[0].children;
    assert!(install_children.len() >= 2);
    assert!(install_children
        .iter()
        .all(|c| c.starts_with("【文档:Guide】 > 【主题:Install】")));
    assert!(install_children
        .iter()
        .any(|c| c.contains("> 【子题:Linux】")));
}

#[test]
fn html_document_chunks_by_heading_context() {
    let page = "<html><body><h1>Doc</h1><h2>Part A</h2><p>alpha</p><h2>Part B</h2><p>beta</p></body></html>";
    let chunks = parse_document(page.as_bytes(), "page.html").unwrap();
    assert!(chunks.len() >= 2);
    let part_a = chunks
        .iter()
        .find(|c| c.metadata.get("h2").map(|v| v == "Part A").unwrap_or(false))
        .expect("Part A parent");
    assert!(part_a.content.contains("alpha"));
}

#[test]
fn unknown_extension_falls_back_to_text_windows() {
    let body: String = std::iter::repeat('x').take(2500).collect();
    let chunks = parse_document(body.as_bytes(), "dump.log").unwrap();
    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert!(chunk.content.starts_with("【文档:dump】"));
        assert!(!chunk.children.is_empty());
    }
}

#[test]
fn epub_chapters_carry_numeric_metadata() {
    // minimal EPUB: container -> opf -> one chapter
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        use std::io::Write;
        let mut zip = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("META-INF/container.xml", options).unwrap();
        zip.write_all(
            br#"<?xml version="1.0"?>
<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf"/></rootfiles>
</container>"#,
        )
        .unwrap();
        zip.start_file("OEBPS/content.opf", options).unwrap();
        zip.write_all(
            br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf">
  <manifest><item id="c1" href="ch1.xhtml" media-type="application/xhtml+xml"/></manifest>
  <spine><itemref idref="c1"/></spine>
</package>"#,
        )
        .unwrap();
        zip.start_file("OEBPS/ch1.xhtml", options).unwrap();
        zip.write_all(
            "<html><body><h1>第五百章 决战</h1><p>山雨欲来风满楼。</p></body></html>".as_bytes(),
        )
        .unwrap();
        zip.finish().unwrap();
    }
    let chunks = parse_document(buf.get_ref(), "novel.epub").unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].metadata["chapter_num"], 500);
    assert_eq!(chunks[0].metadata["volume_num"], 0);
    assert!(chunks[0].content.contains("山雨欲来风满楼"));
}

#[test]
fn complex_title_parses_mixed_numerals() {
    let title = parse_complex_title("第四卷 风云 第五百章");
    assert_eq!(title.volume_num, 4);
    assert_eq!(title.chapter_num, 500);

    let arabic = parse_complex_title("第12卷 第34章");
    assert_eq!(arabic.volume_num, 12);
    assert_eq!(arabic.chapter_num, 34);
}

proptest! {
    /// Short inputs pass through as a single untouched chunk
    #[test]
    fn window_split_short_input_is_identity(text in ".{0,80}") {
        let chunks = split_text_by_length(&text, 80, 20);
        prop_assert_eq!(chunks, vec![text]);
    }

    /// Overlap removal reconstructs the original text exactly
    #[test]
    fn window_split_round_trip(text in ".{81,600}", max in 40usize..120, overlap in 5usize..30) {
        prop_assume!(overlap < max);
        let chunks = split_by_window(&text, max, overlap);
        let mut rebuilt: String = chunks[0].clone();
        for chunk in &chunks[1..] {
            rebuilt.extend(chunk.chars().skip(overlap));
        }
        prop_assert_eq!(rebuilt, text);
    }

    /// Every window except the last has exactly `max` code points
    #[test]
    fn window_split_sizes(text in ".{200,400}") {
        let chunks = split_by_window(&text, 100, 30);
        for chunk in &chunks[..chunks.len() - 1] {
            prop_assert_eq!(chunk.chars().count(), 100);
        }
        prop_assert!(chunks.last().unwrap().chars().count() <= 100);
    }

    /// Arabic round trip: digits in, the same number out
    #[test]
    fn chinese_numeral_arabic_round_trip(n in 0i64..=999_999) {
        prop_assert_eq!(chinese_to_arabic(&n.to_string()), n);
    }
}

#[test]
fn chinese_numeral_units_spot_checks() {
    assert_eq!(chinese_to_arabic(""), 0);
    assert_eq!(chinese_to_arabic("十"), 10);
    assert_eq!(chinese_to_arabic("十五"), 15);
    assert_eq!(chinese_to_arabic("三百二十一"), 321);
    assert_eq!(chinese_to_arabic("五百"), 500);
    assert_eq!(chinese_to_arabic("九千八百七十六"), 9876);
}
