//! LLM-assisted query intent extraction
//!
//! Rewrites a natural-language question into retrieval keywords plus
//! structured volume/chapter filters. The extractor never fails the
//! enclosing search: any model or parse problem degrades to passing the
//! original query through unfiltered.

use crate::chunking::chinese_to_arabic;
use crate::llm::{ChatMessage, ChatModel};
use crate::vector::SearchFilter;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Structured rewrite of a user query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryIntent {
    pub keywords: String,
    /// 0 = absent
    pub volume_num: i64,
    /// 0 = absent
    pub chapter_num: i64,
}

impl QueryIntent {
    pub fn passthrough(query: &str) -> Self {
        Self {
            keywords: query.to_string(),
            volume_num: 0,
            chapter_num: 0,
        }
    }

    /// Non-zero numbers become vector metadata filters
    pub fn filter(&self) -> SearchFilter {
        let mut filter = SearchFilter::new();
        if self.volume_num != 0 {
            filter.insert("volume_num".to_string(), json!(self.volume_num));
        }
        if self.chapter_num != 0 {
            filter.insert("chapter_num".to_string(), json!(self.chapter_num));
        }
        filter
    }
}

const INTENT_SYSTEM_PROMPT: &str = r#"你是一个检索意图识别助手。分析用户的问题，提取检索关键词以及问题中提到的卷号和章节号。
只输出JSON，不要输出任何其他内容，格式如下：
{"keywords": "", "volume_num": 0, "chapter_num": 0}
要求：
- keywords: 用于向量检索的查询内容
- volume_num: 问题中提到的卷号，整数，没有提到则为0，中文数字必须转为阿拉伯数字
- chapter_num: 问题中提到的章节号，整数，没有提到则为0，中文数字必须转为阿拉伯数字"#;

#[derive(Debug, Deserialize)]
struct RawIntent {
    #[serde(default)]
    keywords: String,
    #[serde(default)]
    volume_num: Value,
    #[serde(default)]
    chapter_num: Value,
}

/// Extract the query intent via the knowledge base's chat model.
pub async fn extract_intent(model: &dyn ChatModel, query: &str) -> QueryIntent {
    let messages = [
        ChatMessage::system(INTENT_SYSTEM_PROMPT),
        ChatMessage::user(query),
    ];
    let output = match model.generate(&messages).await {
        Ok(output) => output,
        Err(e) => {
            warn!("intent extraction failed, passing query through: {}", e);
            return QueryIntent::passthrough(query);
        }
    };
    parse_intent(&output, query)
}

/// Parse the model output, tolerating fenced code blocks and stringified
/// numbers; degrade to pass-through on any shape mismatch.
pub fn parse_intent(output: &str, original_query: &str) -> QueryIntent {
    let cleaned = strip_code_fence(output);
    let raw: RawIntent = match serde_json::from_str(cleaned) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("intent output not parseable ({}), passing query through", e);
            return QueryIntent::passthrough(original_query);
        }
    };
    let keywords = if raw.keywords.trim().is_empty() {
        original_query.to_string()
    } else {
        raw.keywords
    };
    let intent = QueryIntent {
        keywords,
        volume_num: numeral_value(&raw.volume_num),
        chapter_num: numeral_value(&raw.chapter_num),
    };
    debug!(
        "intent: keywords={} volume={} chapter={}",
        intent.keywords, intent.volume_num, intent.chapter_num
    );
    intent
}

fn numeral_value(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => chinese_to_arabic(s),
        _ => 0,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);
    text.trim()
}
