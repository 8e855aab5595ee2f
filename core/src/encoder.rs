//! Async front-end for the embedding backend.

use crate::RankError;
use paper_rank_backend::Backend;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::instrument;

/// Embedding entry point shared by all request handlers.
///
/// Wraps the channel-backed [`Backend`] handle with a semaphore so the number
/// of requests waiting on the model thread stays bounded.
#[derive(Debug, Clone)]
pub struct Encoder {
    backend: Backend,
    /// Inference limit
    limit_concurrent_requests: Arc<Semaphore>,
}

impl Encoder {
    pub fn new(backend: Backend, max_concurrent_requests: usize) -> Self {
        let semaphore = Arc::new(Semaphore::new(max_concurrent_requests));

        Self {
            backend,
            limit_concurrent_requests: semaphore,
        }
    }

    /// Output dimensionality of the underlying model.
    pub fn dimension(&self) -> usize {
        self.backend.dimension
    }

    #[instrument(skip(self))]
    pub fn try_acquire_permit(&self) -> Result<OwnedSemaphorePermit, RankError> {
        // Limit concurrent requests by acquiring a permit from the semaphore
        self.limit_concurrent_requests
            .clone()
            .try_acquire_owned()
            .map_err(|err| {
                let counter = metrics::counter!("pr_request_failure", "err" => "overloaded");
                counter.increment(1);
                tracing::error!("{err}");
                RankError::from(err)
            })
    }

    /// Encode a batch of texts into one L2-normalized vector per text.
    ///
    /// The permit ties the call to the request that acquired it; encoding the
    /// empty string is valid and yields the model's empty-text embedding.
    #[instrument(skip_all)]
    pub async fn encode_batch(
        &self,
        texts: Vec<String>,
        _permit: &OwnedSemaphorePermit,
    ) -> Result<Vec<Vec<f32>>, RankError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let start_time = Instant::now();
        let counter = metrics::counter!("pr_embed_count");
        counter.increment(1);

        let (embeddings, inference_duration) =
            self.backend.embed(texts).await.map_err(|err| {
                let counter = metrics::counter!("pr_request_failure", "err" => "inference");
                counter.increment(1);
                tracing::error!("{err}");
                err
            })?;

        let counter = metrics::counter!("pr_embed_success");
        counter.increment(1);
        let histogram = metrics::histogram!("pr_embed_duration");
        histogram.record(start_time.elapsed().as_secs_f64());
        let histogram = metrics::histogram!("pr_embed_inference_duration");
        histogram.record(inference_duration.as_secs_f64());

        Ok(embeddings)
    }

    #[instrument(skip(self))]
    pub async fn health(&self) -> bool {
        self.backend.health().await.is_ok()
    }
}
