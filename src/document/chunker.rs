use crate::models::{chunk_id, Chunk};
use crate::utils::token_estimator;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{5,}").expect("static regex"));
static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").expect("static regex"));
// A sentence boundary is terminal punctuation, whitespace, then the start of
// the next sentence (uppercase or CJK).
static SENTENCE_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[.?!]\s+([\p{Lu}\u{3400}-\u{4DBF}\u{4E00}-\u{9FFF}\u{F900}-\u{FAFF}])")
        .expect("static regex")
});

/// Splits cleaned text into overlapping, sentence-aligned chunks.
///
/// `chunk_size` is a target, not a ceiling: a single paragraph larger than
/// the target passes through whole.
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

struct Paragraph<'a> {
    text: &'a str,
    char_start: usize,
    char_len: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }

    /// Normalize newlines, trim every line, and collapse runs of four or
    /// more blank lines down to exactly three.
    pub fn clean(text: &str) -> String {
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
        let trimmed: String = normalized
            .split('\n')
            .map(str::trim)
            .collect::<Vec<_>>()
            .join("\n");
        BLANK_RUNS.replace_all(&trimmed, "\n\n\n\n").into_owned()
    }

    pub fn chunk(
        &self,
        text: &str,
        document_id: &str,
        document_title: &str,
        user_metadata: &Map<String, Value>,
    ) -> Vec<Chunk> {
        let cleaned = Self::clean(text);
        if cleaned.trim().is_empty() {
            return Vec::new();
        }

        let paragraphs = split_paragraphs(&cleaned);

        let mut drafts: Vec<(String, usize, usize)> = Vec::new();
        let mut current = String::new();
        let mut current_chars = 0usize;
        let mut current_start = 0usize;
        let mut current_end = 0usize;
        let mut has_paragraph = false;

        for para in &paragraphs {
            let sep_chars = if current.is_empty() { 0 } else { 2 };
            if has_paragraph && current_chars + sep_chars + para.char_len > self.chunk_size {
                drafts.push((current.clone(), current_start, current_end));

                let overlap = self.derive_overlap(&current);
                let overlap_chars = overlap.chars().count();
                current = overlap;
                current_chars = overlap_chars;
                current_start = current_end.saturating_sub(overlap_chars);
                has_paragraph = false;
            }

            if current.is_empty() {
                if !has_paragraph && current_chars == 0 {
                    current_start = para.char_start;
                }
            } else {
                current.push_str("\n\n");
                current_chars += 2;
            }
            current.push_str(para.text);
            current_chars += para.char_len;
            current_end = para.char_start + para.char_len;
            has_paragraph = true;
        }

        if has_paragraph && !current.is_empty() {
            drafts.push((current, current_start, current_end));
        }

        if drafts.is_empty() {
            let total = cleaned.chars().count();
            drafts.push((cleaned, 0, total));
        }

        drafts
            .into_iter()
            .enumerate()
            .map(|(index, (body, start_char, end_char))| {
                let mut metadata = user_metadata.clone();
                metadata.insert("document_id".to_string(), json!(document_id));
                metadata.insert("document_title".to_string(), json!(document_title));
                metadata.insert("chunk_index".to_string(), json!(index));
                metadata.insert("start_char".to_string(), json!(start_char));
                metadata.insert("end_char".to_string(), json!(end_char));
                metadata.insert(
                    "tokens".to_string(),
                    json!(token_estimator::estimate_tokens(&body)),
                );
                Chunk {
                    chunk_id: chunk_id(document_id, index as u32),
                    text: body,
                    metadata,
                }
            })
            .collect()
    }

    /// Tail of the just-emitted chunk that seeds the next one: the last
    /// `2 * overlap` characters, cut forward to a sentence boundary when one
    /// exists in that window, otherwise the last `overlap` characters.
    fn derive_overlap(&self, emitted: &str) -> String {
        if self.chunk_overlap == 0 {
            return String::new();
        }

        let total_chars = emitted.chars().count();
        let window_chars = (2 * self.chunk_overlap).min(total_chars);
        if window_chars == 0 {
            return String::new();
        }

        let window_byte_start = char_offset_to_byte(emitted, total_chars - window_chars);
        let window = &emitted[window_byte_start..];

        if let Some(caps) = SENTENCE_BOUNDARY.captures(window) {
            if let Some(next_sentence) = caps.get(1) {
                return window[next_sentence.start()..].to_string();
            }
        }

        let fallback_chars = self.chunk_overlap.min(total_chars);
        let fallback_start = char_offset_to_byte(emitted, total_chars - fallback_chars);
        emitted[fallback_start..].to_string()
    }
}

fn char_offset_to_byte(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map(|(b, _)| b)
        .unwrap_or(text.len())
}

fn split_paragraphs(cleaned: &str) -> Vec<Paragraph<'_>> {
    let mut paragraphs = Vec::new();
    let mut byte_cursor = 0usize;
    let mut char_cursor = 0usize;

    let mut push = |slice: &str, byte_start: usize, char_start: usize| -> usize {
        let char_len = slice.chars().count();
        if !slice.trim().is_empty() {
            paragraphs.push(Paragraph {
                text: &cleaned[byte_start..byte_start + slice.len()],
                char_start,
                char_len,
            });
        }
        char_len
    };

    for sep in PARAGRAPH_BREAK.find_iter(cleaned) {
        let slice = &cleaned[byte_cursor..sep.start()];
        char_cursor += push(slice, byte_cursor, char_cursor);
        char_cursor += cleaned[sep.start()..sep.end()].chars().count();
        byte_cursor = sep.end();
    }
    let tail = &cleaned[byte_cursor..];
    push(tail, byte_cursor, char_cursor);

    paragraphs
}
