/// Paper ranking webserver
mod logging;
pub mod server;

pub use logging::init_logging;
pub use server::run;

use paper_rank_core::ranker::ScoredDocument;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct Info {
    /// Model info
    #[schema(example = "128")]
    pub embedding_dimension: usize,
    /// Documents in the snapshot loaded at startup
    #[schema(example = "1432")]
    pub documents: usize,
    /// Router Parameters
    #[schema(example = "512")]
    pub max_concurrent_requests: usize,
    #[schema(example = "256")]
    pub max_client_batch_size: usize,
    /// Router Info
    #[schema(example = "0.1.0")]
    pub version: &'static str,
}

#[derive(Deserialize, ToSchema)]
pub(crate) struct RerankRequest {
    #[schema(example = "neural networks")]
    pub query: String,
    /// Candidate identifiers, positionally aligned with `titles`
    #[schema(example = json!(["http://arxiv.org/abs/2401.00001"]))]
    pub result_ids: Vec<String>,
    #[schema(example = json!(["A survey of neural ranking models"]))]
    pub titles: Vec<String>,
}

/// Permutation of the request's `result_ids`, most relevant first
#[derive(Serialize, ToSchema)]
#[schema(example = json!(["http://arxiv.org/abs/2401.00001"]))]
pub(crate) struct RerankResponse(pub Vec<String>);

#[derive(Deserialize, IntoParams)]
pub(crate) struct RecommendQuery {
    pub user_id: String,
}

#[derive(Serialize, ToSchema)]
pub(crate) struct RankedDocument {
    #[schema(example = "http://arxiv.org/abs/2401.00001")]
    pub entry_id: String,
    #[schema(example = "A survey of neural ranking models")]
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[schema(example = "0.31")]
    pub qe_score: f32,
    #[schema(example = "0.12")]
    pub te_score: f32,
    #[schema(example = "0.87")]
    pub score: f32,
}

impl From<ScoredDocument> for RankedDocument {
    fn from(scored: ScoredDocument) -> Self {
        let document = scored.document;
        Self {
            entry_id: document.entry_id,
            title: document.title,
            authors: document.authors,
            categories: document.categories,
            comment: document.comment,
            summary: document.summary,
            primary_category: document.primary_category,
            doi: document.doi,
            submitted: document.submitted,
            journal_ref: document.journal_ref,
            updated: document.updated,
            published: document.published,
            qe_score: scored.qe_score,
            te_score: scored.te_score,
            score: scored.score,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ErrorType {
    Unhealthy,
    Backend,
    Overloaded,
    Validation,
    Store,
}

#[derive(Serialize, ToSchema)]
pub(crate) struct ErrorResponse {
    pub error: String,
    pub error_type: ErrorType,
}
