pub mod chat;
pub mod ingestion;
pub mod query_processor;
pub mod search_engine;

pub use chat::ChatService;
pub use ingestion::IngestionService;
pub use query_processor::{ProcessedQuery, QueryMethod, QueryProcessor};
pub use search_engine::SearchEngine;
