//! Token accounting for chunk bookkeeping

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

fn encoder() -> Option<&'static CoreBPE> {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
    BPE.get_or_init(|| tiktoken_rs::cl100k_base().ok()).as_ref()
}

/// Count tokens with the cl100k_base encoding; if the encoder cannot be
/// built, estimate conservatively at 1.5 code points per token.
pub fn count_tokens(text: &str) -> usize {
    match encoder() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => {
            let runes = text.chars().count();
            (runes as f64 / 1.5).ceil() as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn test_nonempty_text_counts() {
        assert!(count_tokens("hello world") > 0);
        assert!(count_tokens("知识库检索") > 0);
    }
}
