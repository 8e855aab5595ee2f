/// HTTP Server logic
use crate::{
    ErrorResponse, ErrorType, Info, RankedDocument, RecommendQuery, RerankRequest, RerankResponse,
};
use anyhow::Context;
use axum::extract::{Extension, Query};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{http, Json, Router};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use paper_rank_backend::Backend;
use paper_rank_core::classifier::LogisticModel;
use paper_rank_core::encoder::Encoder;
use paper_rank_core::features::FileFeatureStore;
use paper_rank_core::ranker::{Ranker, RECOMMEND_TOP_K};
use paper_rank_core::RankError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::instrument;
use utoipa::OpenApi;

///Paper ranking endpoint info
#[utoipa::path(
get,
tag = "Paper Rank",
path = "/info",
responses((status = 200, description = "Served model and router info", body = Info))
)]
#[instrument]
async fn get_info(info: Extension<Info>) -> Json<Info> {
    Json(info.0)
}

#[utoipa::path(
get,
tag = "Paper Rank",
path = "/health",
responses(
(status = 200, description = "Everything is working fine"),
(status = 503, description = "Ranking service is down", body = ErrorResponse,
example = json ! ({"error": "unhealthy", "error_type": "unhealthy"})),
)
)]
#[instrument(skip(encoder))]
/// Health check method
async fn health(encoder: Extension<Encoder>) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    match encoder.health().await {
        true => Ok(()),
        false => Err(ErrorResponse {
            error: "unhealthy".to_string(),
            error_type: ErrorType::Unhealthy,
        })?,
    }
}

/// Rerank ad-hoc search candidates
///
/// Orders `result_ids` by embedding similarity of the matching title to the
/// query. The response is always a permutation of the request ids.
#[utoipa::path(
post,
tag = "Paper Rank",
path = "/rerank",
request_body = RerankRequest,
responses(
(status = 200, description = "Reranked ids", body = RerankResponse),
(status = 424, description = "Rerank Error", body = ErrorResponse,
example = json ! ({"error": "Inference failed", "error_type": "backend"})),
(status = 429, description = "Service is overloaded", body = ErrorResponse,
example = json ! ({"error": "Service is overloaded", "error_type": "overloaded"})),
(status = 413, description = "Batch size error", body = ErrorResponse,
example = json ! ({"error": "Batch size error", "error_type": "validation"})),
)
)]
#[instrument(skip_all, fields(total_time, candidates = req.result_ids.len()))]
async fn rerank(
    ranker: Extension<Ranker>,
    encoder: Extension<Encoder>,
    info: Extension<Info>,
    Json(req): Json<RerankRequest>,
) -> Result<Json<RerankResponse>, (StatusCode, Json<ErrorResponse>)> {
    let span = tracing::Span::current();
    let start_time = Instant::now();

    let counter = metrics::counter!("pr_request_count", "method" => "rerank");
    counter.increment(1);

    let batch_size = req.result_ids.len();
    if batch_size > info.max_client_batch_size {
        let message = format!(
            "batch size {batch_size} > maximum allowed batch size {}",
            info.max_client_batch_size
        );
        tracing::error!("{message}");
        let err = ErrorResponse {
            error: message,
            error_type: ErrorType::Validation,
        };
        let counter = metrics::counter!("pr_request_failure", "err" => "batch_size");
        counter.increment(1);
        Err(err)?;
    }

    let permit = encoder.try_acquire_permit().map_err(ErrorResponse::from)?;
    let response = ranker
        .rerank(&req.query, req.result_ids, req.titles, &permit)
        .await
        .map_err(ErrorResponse::from)?;

    let total_time = start_time.elapsed();
    span.record("total_time", format!("{total_time:?}"));
    let counter = metrics::counter!("pr_request_success", "method" => "rerank");
    counter.increment(1);
    let histogram = metrics::histogram!("pr_rerank_duration");
    histogram.record(total_time.as_secs_f64());

    tracing::info!("Success");

    Ok(Json(RerankResponse(response)))
}

/// Personalized recommendations
///
/// Scores the current document snapshot against the user's aggregated
/// interaction history and returns the top 10. Unknown users get a ranking
/// over default (empty) aggregates.
#[utoipa::path(
get,
tag = "Paper Rank",
path = "/recommendations",
params(RecommendQuery),
responses(
(status = 200, description = "Ranked documents", body = Vec<RankedDocument>),
(status = 424, description = "Scoring Error", body = ErrorResponse,
example = json ! ({"error": "Inference failed", "error_type": "backend"})),
(status = 429, description = "Service is overloaded", body = ErrorResponse,
example = json ! ({"error": "Service is overloaded", "error_type": "overloaded"})),
(status = 503, description = "Feature store unavailable", body = ErrorResponse,
example = json ! ({"error": "feature store unavailable", "error_type": "store"})),
)
)]
#[instrument(skip_all, fields(total_time, user_id = %query.user_id))]
async fn recommendations(
    ranker: Extension<Ranker>,
    encoder: Extension<Encoder>,
    feature_store: Extension<Arc<FileFeatureStore>>,
    Query(query): Query<RecommendQuery>,
) -> Result<Json<Vec<RankedDocument>>, (StatusCode, Json<ErrorResponse>)> {
    let span = tracing::Span::current();
    let start_time = Instant::now();

    let counter = metrics::counter!("pr_request_count", "method" => "recommend");
    counter.increment(1);

    let permit = encoder.try_acquire_permit().map_err(ErrorResponse::from)?;

    let user = feature_store
        .user_features(&query.user_id)
        .await
        .map_err(ErrorResponse::from)?;
    let snapshot = feature_store.document_features();

    let mut scored = ranker
        .score(&snapshot, &user, &permit)
        .await
        .map_err(ErrorResponse::from)?;
    scored.truncate(RECOMMEND_TOP_K);

    let response: Vec<RankedDocument> = scored.into_iter().map(RankedDocument::from).collect();

    let total_time = start_time.elapsed();
    span.record("total_time", format!("{total_time:?}"));
    let counter = metrics::counter!("pr_request_success", "method" => "recommend");
    counter.increment(1);
    let histogram = metrics::histogram!("pr_recommend_duration");
    histogram.record(total_time.as_secs_f64());

    tracing::info!("Success");

    Ok(Json(response))
}

/// Prometheus metrics scrape endpoint
#[utoipa::path(
get,
tag = "Paper Rank",
path = "/metrics",
responses((status = 200, description = "Prometheus Metrics", body = String))
)]
async fn metrics(prom_handle: Extension<PrometheusHandle>) -> String {
    prom_handle.render()
}

/// Serving method
#[allow(clippy::too_many_arguments)]
pub async fn run(
    backend: Backend,
    classifier_path: PathBuf,
    documents_path: PathBuf,
    user_features_path: PathBuf,
    max_concurrent_requests: usize,
    max_client_batch_size: usize,
    addr: SocketAddr,
    allow_origin: Option<AllowOrigin>,
) -> anyhow::Result<()> {
    // OpenAPI documentation
    #[derive(OpenApi)]
    #[openapi(
    paths(
    get_info,
    health,
    rerank,
    recommendations,
    metrics,
    ),
    components(
    schemas(
    Info,
    RerankRequest,
    RerankResponse,
    RankedDocument,
    ErrorResponse,
    ErrorType,
    )
    ),
    tags(
    (name = "Paper Rank", description = "arXiv paper ranking and recommendation API")
    ),
    info(
    title = "Paper Rank",
    license(
    name = "MIT",
    )
    )
    )]
    struct ApiDoc;

    // Shared service context, loaded once and read-only afterwards
    let classifier = Arc::new(
        LogisticModel::from_file(&classifier_path)
            .with_context(|| format!("loading classifier from {}", classifier_path.display()))?,
    );
    let feature_store = Arc::new(
        FileFeatureStore::new(documents_path, user_features_path)
            .context("loading feature store")?,
    );
    let encoder = Encoder::new(backend, max_concurrent_requests);
    let ranker = Ranker::new(encoder.clone(), classifier);

    let info = Info {
        embedding_dimension: encoder.dimension(),
        documents: feature_store.document_features().len(),
        max_concurrent_requests,
        max_client_batch_size,
        version: env!("CARGO_PKG_VERSION"),
    };

    // Duration buckets
    let duration_matcher = Matcher::Suffix(String::from("duration"));
    let n_duration_buckets = 35;
    let mut duration_buckets = Vec::with_capacity(n_duration_buckets);
    // Minimum duration in seconds
    let mut value = 0.00001;
    for _ in 0..n_duration_buckets {
        // geometric sequence
        value *= 1.5;
        duration_buckets.push(value);
    }

    // Prometheus handler
    let builder =
        PrometheusBuilder::new().set_buckets_for_metric(duration_matcher, &duration_buckets)?;
    let prom_handle = builder
        .install_recorder()
        .context("failed to install metrics recorder")?;

    // CORS layer
    let allow_origin = allow_origin.unwrap_or(AllowOrigin::any());
    let cors_layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_origin(allow_origin);

    // Create router
    let app = Router::new()
        .route("/", post(rerank))
        .route("/info", get(get_info))
        .route("/rerank", post(rerank))
        .route("/recommendations", get(recommendations))
        // OpenAPI document
        .route(
            "/api-doc/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        // Base Health route
        .route("/health", get(health))
        // Inference API health route
        .route("/", get(health))
        // Prometheus metrics route
        .route("/metrics", get(metrics))
        .layer(Extension(ranker))
        .layer(Extension(encoder))
        .layer(Extension(feature_store))
        .layer(Extension(info))
        .layer(Extension(prom_handle.clone()))
        .layer(cors_layer);

    // Run server
    tracing::info!("Starting HTTP server: {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;
    axum::serve(listener, app)
        // Wait until all requests are finished to shut down
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}

/// Parse CORS origins from the CLI into an axum allow-list.
pub fn parse_cors_origins(origins: Vec<String>) -> anyhow::Result<AllowOrigin> {
    let origins = origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("invalid CORS origin: {origin}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(AllowOrigin::list(origins))
}

impl From<RankError> for ErrorResponse {
    fn from(err: RankError) -> Self {
        let error_type = match err {
            RankError::DimensionMismatch { .. } => ErrorType::Backend,
            RankError::MissingEmbedding(_) => ErrorType::Backend,
            RankError::StoreUnavailable(_) => ErrorType::Store,
            RankError::Validation(_) => ErrorType::Validation,
            RankError::Overloaded(_) => ErrorType::Overloaded,
            RankError::Backend(_) => ErrorType::Backend,
        };
        Self {
            error: err.to_string(),
            error_type,
        }
    }
}

impl From<&ErrorType> for StatusCode {
    fn from(value: &ErrorType) -> Self {
        match value {
            ErrorType::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            ErrorType::Backend => StatusCode::FAILED_DEPENDENCY,
            ErrorType::Overloaded => StatusCode::TOO_MANY_REQUESTS,
            ErrorType::Validation => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorType::Store => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Convert to Axum supported formats
impl From<ErrorResponse> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: ErrorResponse) -> Self {
        (StatusCode::from(&err.error_type), Json(err))
    }
}
