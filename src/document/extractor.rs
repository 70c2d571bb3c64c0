use crate::utils::error::ApiError;
use tracing::debug;

pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Extracts plain text from uploaded bytes according to the declared MIME
/// type. Media files (image/video/audio) never pass through here; they get
/// a synthetic description chunk instead.
pub struct TextExtractor;

impl TextExtractor {
    pub fn extract(bytes: &[u8], mime: &str) -> Result<String, ApiError> {
        match mime {
            "application/pdf" => Self::extract_pdf(bytes),
            DOCX_MIME | "application/msword" => Self::extract_docx(bytes),
            "application/json" | "application/xml" => {
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
            m if m.starts_with("text/") => Ok(String::from_utf8_lossy(bytes).into_owned()),
            other => Err(ApiError::UnsupportedMediaType(format!(
                "no text extractor for '{}'",
                other
            ))),
        }
    }

    fn extract_pdf(bytes: &[u8]) -> Result<String, ApiError> {
        let doc = lopdf::Document::load_mem(bytes)
            .map_err(|e| ApiError::InvalidRequest(format!("unreadable PDF: {}", e)))?;
        let page_count = doc.get_pages().len();

        let mut content = String::new();
        for page_num in 1..=page_count {
            if let Ok(text) = doc.extract_text(&[page_num as u32]) {
                content.push_str(&text);
                content.push('\n');
            }
        }
        debug!(pages = page_count, "extracted pdf text");
        Ok(content)
    }

    fn extract_docx(bytes: &[u8]) -> Result<String, ApiError> {
        use docx_rs::{DocumentChild, ParagraphChild, RunChild};

        let docx = docx_rs::read_docx(bytes)
            .map_err(|e| ApiError::InvalidRequest(format!("unreadable DOCX: {}", e)))?;

        let mut content = String::new();
        for child in docx.document.children {
            if let DocumentChild::Paragraph(para) = child {
                for child in para.children {
                    if let ParagraphChild::Run(run) = child {
                        for child in run.children {
                            if let RunChild::Text(text) = child {
                                content.push_str(&text.text);
                            }
                        }
                    }
                }
                content.push('\n');
            }
        }
        Ok(content)
    }
}

/// Reject uploads that are oversized or whose bytes do not match the
/// declared MIME type (magic-number check).
pub fn validate_upload(bytes: &[u8], mime: &str, max_bytes: usize) -> Result<(), ApiError> {
    if bytes.len() > max_bytes {
        return Err(ApiError::FileTooLarge(format!(
            "{} bytes exceeds the {} byte ceiling",
            bytes.len(),
            max_bytes
        )));
    }

    let detected = infer::get(bytes).map(|k| k.mime_type());
    debug!(declared = mime, detected = ?detected, "upload validation");

    match detected {
        // Text-like payloads carry no magic number; trust the declaration.
        None => Ok(()),
        Some(found) => {
            let consistent = match mime {
                "application/pdf" => found == "application/pdf",
                DOCX_MIME => found == DOCX_MIME || found == "application/zip",
                m if m.starts_with("image/") => found.starts_with("image/"),
                m if m.starts_with("video/") => found.starts_with("video/"),
                m if m.starts_with("audio/") => found.starts_with("audio/"),
                m if m.starts_with("text/") => found.starts_with("text/"),
                _ => true,
            };
            if consistent {
                Ok(())
            } else {
                Err(ApiError::UnsupportedMediaType(format!(
                    "declared '{}' but content looks like '{}'",
                    mime, found
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_extraction() {
        let out = TextExtractor::extract(b"hello text", "text/plain").unwrap();
        assert_eq!(out, "hello text");
    }

    #[test]
    fn test_markdown_extraction() {
        let out = TextExtractor::extract(b"# Title\n\nBody", "text/markdown").unwrap();
        assert!(out.contains("# Title"));
    }

    #[test]
    fn test_unknown_mime_rejected() {
        let err = TextExtractor::extract(b"\x00\x01", "application/octet-stream").unwrap_err();
        assert_eq!(err.kind(), "unsupported_media_type");
    }

    #[test]
    fn test_size_ceiling() {
        let err = validate_upload(&[0u8; 100], "text/plain", 50).unwrap_err();
        assert_eq!(err.kind(), "file_too_large");
    }

    #[test]
    fn test_text_without_magic_passes() {
        assert!(validate_upload(b"just words", "text/plain", 1024).is_ok());
    }

    #[test]
    fn test_mismatched_magic_rejected() {
        // PNG header declared as PDF.
        let png = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let err = validate_upload(&png, "application/pdf", 1024).unwrap_err();
        assert_eq!(err.kind(), "unsupported_media_type");
    }

    #[test]
    fn test_matching_image_magic_passes() {
        let png = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert!(validate_upload(&png, "image/png", 1024).is_ok());
    }
}
