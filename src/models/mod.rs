pub mod chat;
pub mod document;
pub mod search;

pub use chat::{ChatEvent, ChatOptions, ChatRequest, ChatResponse, KnowledgeSource};
pub use document::{
    chunk_id, generate_document_id, parse_chunk_id, Chunk, DocumentRecord, DocumentStatus,
    MediaType,
};
pub use search::{ProviderChunk, SearchRequest, SearchResponse, SearchResponseMetadata, SearchResult};
