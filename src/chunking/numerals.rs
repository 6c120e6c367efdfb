//! Chinese numeral conversion and chapter title normalization
//!
//! EPUB chapter headings mix Arabic digits and Chinese numerals
//! ("第五百章", "第12卷"); retrieval filters need plain integers.

use regex::Regex;
use std::sync::OnceLock;

/// A chapter title normalized into filterable parts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StandardizedTitle {
    pub volume_num: i64,
    pub chapter_num: i64,
    pub volume_name: String,
    pub raw_title: String,
}

fn digit_value(r: char) -> Option<i64> {
    match r {
        '零' => Some(0),
        '一' => Some(1),
        '二' | '两' => Some(2),
        '三' => Some(3),
        '四' => Some(4),
        '五' => Some(5),
        '六' => Some(6),
        '七' => Some(7),
        '八' => Some(8),
        '九' => Some(9),
        _ => None,
    }
}

fn unit_value(r: char) -> Option<i64> {
    match r {
        '十' => Some(10),
        '百' => Some(100),
        '千' => Some(1000),
        '万' => Some(10000),
        _ => None,
    }
}

/// Convert a numeral string such as "五百" or "500" to an integer.
///
/// Returns 0 for empty input. A leading 十 reads as 1-prefixed ("十一" = 11).
pub fn chinese_to_arabic(cn: &str) -> i64 {
    let cn = cn.trim();
    if cn.is_empty() {
        return 0;
    }
    if let Ok(n) = cn.parse::<i64>() {
        return n;
    }

    let runes: Vec<char> = cn.chars().collect();
    let mut section = 0i64;
    let mut number = 0i64;

    for (i, &r) in runes.iter().enumerate() {
        if let Some(val) = digit_value(r) {
            number = val;
            if i == runes.len() - 1 {
                section += number;
            }
        } else if let Some(unit) = unit_value(r) {
            if unit == 10 && number == 0 {
                number = 1;
            }
            section += number * unit;
            number = 0;
        }
    }
    section
}

fn volume_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"第?\s*([0-9零一二三四五六七八九十百]+)\s*[卷部]").unwrap())
}

fn chapter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"第?\s*([0-9零一二三四五六七八九十百千万]+)\s*[章回节]").unwrap())
}

/// Parse a complex chapter heading like "第四卷 风起 第五百章 决战" into
/// volume/chapter numbers plus the residual name parts.
pub fn parse_complex_title(title: &str) -> StandardizedTitle {
    let mut result = StandardizedTitle {
        raw_title: title.to_string(),
        ..Default::default()
    };

    if let Some(caps) = volume_re().captures(title) {
        result.volume_num = chinese_to_arabic(&caps[1]);
    }
    if let Some(caps) = chapter_re().captures(title) {
        result.chapter_num = chinese_to_arabic(&caps[1]);
    }

    for part in title.split_whitespace() {
        let part = part.trim();
        if part.is_empty() || volume_re().is_match(part) || chapter_re().is_match(part) {
            continue;
        }
        if result.volume_name.is_empty() {
            result.volume_name = part.to_string();
        } else {
            result.raw_title = part.to_string();
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(chinese_to_arabic(""), 0);
        assert_eq!(chinese_to_arabic("  "), 0);
    }

    #[test]
    fn test_arabic_passthrough() {
        assert_eq!(chinese_to_arabic("500"), 500);
        assert_eq!(chinese_to_arabic("12"), 12);
    }

    #[test]
    fn test_plain_digits() {
        assert_eq!(chinese_to_arabic("五"), 5);
        assert_eq!(chinese_to_arabic("九"), 9);
        assert_eq!(chinese_to_arabic("零"), 0);
        assert_eq!(chinese_to_arabic("两"), 2);
    }

    #[test]
    fn test_units() {
        assert_eq!(chinese_to_arabic("十"), 10);
        assert_eq!(chinese_to_arabic("十一"), 11);
        assert_eq!(chinese_to_arabic("二十三"), 23);
        assert_eq!(chinese_to_arabic("五百"), 500);
        assert_eq!(chinese_to_arabic("五百零三"), 503);
        assert_eq!(chinese_to_arabic("一千二百三十四"), 1234);
    }

    #[test]
    fn test_complex_title() {
        let parsed = parse_complex_title("第四卷 凡人 第五百章");
        assert_eq!(parsed.volume_num, 4);
        assert_eq!(parsed.chapter_num, 500);
        assert_eq!(parsed.volume_name, "凡人");
    }

    #[test]
    fn test_chapter_only() {
        let parsed = parse_complex_title("第12章 出发");
        assert_eq!(parsed.volume_num, 0);
        assert_eq!(parsed.chapter_num, 12);
        assert_eq!(parsed.volume_name, "出发");
    }

    #[test]
    fn test_title_without_numbers() {
        let parsed = parse_complex_title("序章");
        assert_eq!(parsed.chapter_num, 0);
        assert_eq!(parsed.raw_title, "序章");
    }
}
