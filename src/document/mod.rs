pub mod chunker;
pub mod extractor;
pub mod media;

pub use chunker::TextChunker;
pub use extractor::{validate_upload, TextExtractor};
pub use media::MediaStorage;
