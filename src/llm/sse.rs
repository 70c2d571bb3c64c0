/// Incremental Server-Sent-Events line decoder.
///
/// Network reads split frames arbitrarily, including inside multi-byte
/// codepoints, so bytes are buffered raw and only complete lines are
/// decoded.
#[derive(Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every line completed by this read.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop(); // the \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Whatever is left after the upstream closed mid-line.
    pub fn finish(self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.buffer).into_owned())
        }
    }
}

/// Extract the payload of a `data:` frame, if the line is one.
pub fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_line() {
        let mut decoder = SseLineDecoder::new();
        let lines = decoder.push(b"data: {\"x\":1}\n");
        assert_eq!(lines, vec!["data: {\"x\":1}"]);
    }

    #[test]
    fn test_line_split_across_reads() {
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.push(b"data: {\"con").is_empty());
        let lines = decoder.push(b"tent\":\"hi\"}\n\n");
        assert_eq!(lines, vec!["data: {\"content\":\"hi\"}", ""]);
    }

    #[test]
    fn test_crlf_lines() {
        let mut decoder = SseLineDecoder::new();
        let lines = decoder.push(b"data: a\r\ndata: b\r\n");
        assert_eq!(lines, vec!["data: a", "data: b"]);
    }

    #[test]
    fn test_multibyte_char_split_across_reads() {
        let mut decoder = SseLineDecoder::new();
        let encoded = "data: 你\n".as_bytes();
        let (head, tail) = encoded.split_at(8); // splits inside 你
        assert!(decoder.push(head).is_empty());
        let lines = decoder.push(tail);
        assert_eq!(lines, vec!["data: 你"]);
    }

    #[test]
    fn test_finish_returns_partial_tail() {
        let mut decoder = SseLineDecoder::new();
        decoder.push(b"data: complete\ndata: partial");
        assert_eq!(decoder.finish().as_deref(), Some("data: partial"));
    }

    #[test]
    fn test_data_payload() {
        assert_eq!(data_payload("data: [DONE]"), Some("[DONE]"));
        assert_eq!(data_payload("data:{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(data_payload(": keep-alive comment"), None);
        assert_eq!(data_payload("event: ping"), None);
    }
}
