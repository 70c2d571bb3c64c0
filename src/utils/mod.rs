pub mod error;
pub mod hashing;
pub mod limiters;
pub mod token_estimator;

pub use error::ApiError;
pub use limiters::{RequestQueue, TokenBucket};
