//! Reranking and personalized pointwise scoring.

use crate::classifier::LogisticModel;
use crate::encoder::Encoder;
use crate::features::{Document, DocumentSnapshot, UserFeatures};
use crate::similarity::similarity;
use crate::RankError;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tracing::instrument;

/// Number of documents returned by the recommendation path.
pub const RECOMMEND_TOP_K: usize = 10;

/// A document augmented with its similarity features and final score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    #[serde(flatten)]
    pub document: Document,
    /// Similarity between the user's aggregated queries and the title
    pub qe_score: f32,
    /// Similarity between the user's interacted titles and the title
    pub te_score: f32,
    /// Positive-class probability from the classifier
    pub score: f32,
}

/// The ranking core: an embedding encoder plus the trained classifier.
///
/// Stateless per call; safe to clone and share across request handlers.
#[derive(Debug, Clone)]
pub struct Ranker {
    encoder: Encoder,
    classifier: Arc<LogisticModel>,
}

impl Ranker {
    pub fn new(encoder: Encoder, classifier: Arc<LogisticModel>) -> Self {
        Self {
            encoder,
            classifier,
        }
    }

    /// Rerank candidate ids by similarity of their titles to the query.
    ///
    /// Returns a permutation of `ids`: descending similarity, input order on
    /// ties. `ids` and `titles` correspond positionally.
    #[instrument(skip_all, fields(candidates = ids.len()))]
    pub async fn rerank(
        &self,
        query: &str,
        ids: Vec<String>,
        titles: Vec<String>,
        permit: &OwnedSemaphorePermit,
    ) -> Result<Vec<String>, RankError> {
        if ids.len() != titles.len() {
            return Err(RankError::Validation(format!(
                "`result_ids` and `titles` must have the same length ({} vs {})",
                ids.len(),
                titles.len()
            )));
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .encoder
            .encode_batch(vec![query.to_string()], permit)
            .await?;
        let title_embeddings = self.encoder.encode_batch(titles, permit).await?;

        let similarities = similarity(&query_embedding, &title_embeddings)?;

        let mut ranked: Vec<(String, f32)> = ids.into_iter().zip(similarities).collect();
        // Stable descending sort keeps input order on ties
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(ranked.into_iter().map(|(id, _)| id).collect())
    }

    /// Score every document in the snapshot for one user and sort descending.
    ///
    /// Documents without a precomputed title embedding are excluded from the
    /// result and logged; partial results beat failing the whole request.
    #[instrument(skip_all, fields(documents = snapshot.len(), user_id = %user.user_id))]
    pub async fn score(
        &self,
        snapshot: &DocumentSnapshot,
        user: &UserFeatures,
        permit: &OwnedSemaphorePermit,
    ) -> Result<Vec<ScoredDocument>, RankError> {
        let mut documents = Vec::with_capacity(snapshot.len());
        let mut embeddings = Vec::with_capacity(snapshot.len());
        for document in &snapshot.documents {
            match &document.title_embeddings {
                Some(embedding) => {
                    documents.push(document);
                    embeddings.push(embedding);
                }
                None => {
                    let counter =
                        metrics::counter!("pr_request_failure", "err" => "missing_embedding");
                    counter.increment(1);
                    tracing::warn!("{}", RankError::MissingEmbedding(document.entry_id.clone()));
                }
            }
        }
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        // One vectorized pass for both user aggregates; the empty string is a
        // valid input and encodes to the model's empty-text embedding.
        let user_embeddings = self
            .encoder
            .encode_batch(vec![user.query.clone(), user.title.clone()], permit)
            .await?;

        let qe_scores = similarity(&user_embeddings[0..1], &embeddings)?;
        let te_scores = similarity(&user_embeddings[1..2], &embeddings)?;

        let features: Vec<[f32; LogisticModel::NUM_FEATURES]> = qe_scores
            .iter()
            .zip(te_scores.iter())
            .map(|(&qe, &te)| [qe, te])
            .collect();
        let scores = self.classifier.predict_proba(&features);

        let mut results: Vec<ScoredDocument> = documents
            .into_iter()
            .zip(features)
            .zip(scores)
            .map(|((document, [qe_score, te_score]), score)| ScoredDocument {
                document: document.clone(),
                qe_score,
                te_score,
                score,
            })
            .collect();
        // Stable descending sort keeps input order on ties
        results.sort_by(|a, b| b.score.total_cmp(&a.score));

        Ok(results)
    }
}
