/// Token estimation for mixed CJK/Latin content.
///
/// CJK codepoints tokenize at roughly 1.5 characters per token while
/// everything else averages about 4, so the two populations are counted
/// separately.

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3400}'..='\u{4DBF}' | '\u{4E00}'..='\u{9FFF}' | '\u{F900}'..='\u{FAFF}')
}

/// Estimate tokens from text using the CJK/non-CJK split heuristic.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let mut cjk = 0usize;
    let mut other = 0usize;
    for c in text.chars() {
        if is_cjk(c) {
            cjk += 1;
        } else {
            other += 1;
        }
    }

    ((cjk as f64 / 1.5).ceil() + (other as f64 / 4.0).ceil()) as usize
}

/// Check if adding text would exceed the limit.
pub fn would_exceed_limit(current_tokens: usize, new_text: &str, max_tokens: usize) -> bool {
    current_tokens + estimate_tokens(new_text) > max_tokens
}

/// Truncate text to roughly `max_tokens`, keeping a 5% safety margin and
/// appending an ellipsis when anything was cut.
pub fn truncate(text: &str, max_tokens: usize) -> String {
    let budget = (max_tokens as f64 * 0.95) as usize;

    if estimate_tokens(text) <= budget {
        return text.to_string();
    }

    let mut cjk = 0usize;
    let mut other = 0usize;
    let mut end = 0usize;

    for (idx, c) in text.char_indices() {
        if is_cjk(c) {
            cjk += 1;
        } else {
            other += 1;
        }
        let running = ((cjk as f64 / 1.5).ceil() + (other as f64 / 4.0).ceil()) as usize;
        if running > budget {
            break;
        }
        end = idx + c.len_utf8();
    }

    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_ascii_only() {
        // 8 chars / 4 = 2 tokens
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        // 9 chars -> ceil(9/4) = 3
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }

    #[test]
    fn test_cjk_only() {
        // 3 CJK chars -> ceil(3/1.5) = 2
        assert_eq!(estimate_tokens("你好吗"), 2);
    }

    #[test]
    fn test_mixed_content() {
        // "hi你好" -> ceil(2/4) + ceil(2/1.5) = 1 + 2 = 3
        assert_eq!(estimate_tokens("hi你好"), 3);
    }

    #[test]
    fn test_truncate_noop_when_under_budget() {
        let text = "short text";
        assert_eq!(truncate(text, 100), text);
    }

    #[test]
    fn test_truncate_respects_budget() {
        let text = "word ".repeat(400);
        let out = truncate(&text, 50);
        assert!(out.ends_with("..."));
        assert!(estimate_tokens(out.trim_end_matches("...")) <= 50);
        assert!(out.len() < text.len());
    }

    #[test]
    fn test_would_exceed() {
        assert!(would_exceed_limit(10, "abcdefgh", 11));
        assert!(!would_exceed_limit(10, "abcdefgh", 12));
    }
}
