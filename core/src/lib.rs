pub mod classifier;
pub mod encoder;
pub mod features;
pub mod ranker;
pub mod similarity;

use paper_rank_backend::BackendError;
use thiserror::Error;
use tokio::sync::TryAcquireError;

#[derive(Error, Debug)]
pub enum RankError {
    #[error("embedding batch shapes are incompatible: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("document {0} has no title embedding")]
    MissingEmbedding(String),
    #[error("feature store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Input validation error: {0}")]
    Validation(String),
    #[error("Service is overloaded")]
    Overloaded(#[from] TryAcquireError),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}
