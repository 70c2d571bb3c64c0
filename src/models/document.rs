use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Indexed,
    Processing,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "indexed" => Some(DocumentStatus::Indexed),
            "processing" => Some(DocumentStatus::Processing),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Text => "text",
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MediaType::Text),
            "image" => Some(MediaType::Image),
            "video" => Some(MediaType::Video),
            "audio" => Some(MediaType::Audio),
            "document" => Some(MediaType::Document),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            MediaType::Image
        } else if mime.starts_with("video/") {
            MediaType::Video
        } else if mime.starts_with("audio/") {
            MediaType::Audio
        } else if mime.starts_with("text/") {
            MediaType::Text
        } else {
            MediaType::Document
        }
    }
}

/// One ingested unit of content, as persisted in the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub status: DocumentStatus,
    pub chunks_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Absent on failed documents so a retry is not deduped against them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// A unit of indexed text; owned by the vector backend, reconstructed here
/// only to the extent ingestion needs it.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub metadata: Map<String, Value>,
}

fn to_base36(mut n: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Generate a `doc_<timebase36>_<rand36>` identifier.
pub fn generate_document_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u128;
    let mut rng = rand::rng();
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let suffix: String = (0..8)
        .map(|_| DIGITS[rng.random_range(0..36)] as char)
        .collect();
    format!("doc_{}_{}", to_base36(millis), suffix)
}

/// Chunk IDs are a pure function of `(document_id, chunk_index)`.
pub fn chunk_id(document_id: &str, index: u32) -> String {
    format!("{}_chunk_{}", document_id, index)
}

/// Split a chunk ID back into its owning document ID and index.
pub fn parse_chunk_id(chunk_id: &str) -> Option<(&str, u32)> {
    let pos = chunk_id.rfind("_chunk_")?;
    let index = chunk_id[pos + "_chunk_".len()..].parse().ok()?;
    Some((&chunk_id[..pos], index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_round_trip() {
        let id = chunk_id("doc_abc_123", 7);
        assert_eq!(id, "doc_abc_123_chunk_7");
        assert_eq!(parse_chunk_id(&id), Some(("doc_abc_123", 7)));
    }

    #[test]
    fn test_parse_chunk_id_rejects_garbage() {
        assert_eq!(parse_chunk_id("no-separator"), None);
        assert_eq!(parse_chunk_id("doc_chunk_notanumber_chunk_x"), None);
    }

    #[test]
    fn test_parse_chunk_id_uses_last_separator() {
        // Document IDs may themselves contain "_chunk_".
        assert_eq!(
            parse_chunk_id("doc_chunk_0_chunk_3"),
            Some(("doc_chunk_0", 3))
        );
    }

    #[test]
    fn test_generated_id_shape() {
        let id = generate_document_id();
        assert!(id.starts_with("doc_"));
        let parts: Vec<&str> = id.splitn(3, '_').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[1].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_document_id();
        let b = generate_document_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_media_type_from_mime() {
        assert_eq!(MediaType::from_mime("image/png"), MediaType::Image);
        assert_eq!(MediaType::from_mime("video/mp4"), MediaType::Video);
        assert_eq!(MediaType::from_mime("text/plain"), MediaType::Text);
        assert_eq!(MediaType::from_mime("application/pdf"), MediaType::Document);
    }
}
