use anyhow::{Context, Result};
use clap::Parser;
use paper_rank_backend::Backend;
use std::net::SocketAddr;
use std::path::PathBuf;

/// App Configuration
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Local directory containing the static embedding model
    /// (`config.json`, `tokenizer.json`, `model.safetensors`)
    #[clap(default_value = "data/model", long, env)]
    model_path: PathBuf,

    /// JSON artifact of the trained scoring classifier, exported by the
    /// offline training job
    #[clap(default_value = "data/scoring_model.json", long, env)]
    classifier_path: PathBuf,

    /// Document snapshot with precomputed title embeddings, written by the
    /// preprocessing pipeline
    #[clap(default_value = "data/latest_document_features.json", long, env)]
    documents_path: PathBuf,

    /// Per-user aggregated interaction features, written by the preprocessing
    /// pipeline
    #[clap(default_value = "data/latest_user_features.json", long, env)]
    user_features_path: PathBuf,

    /// The maximum amount of concurrent requests for this particular deployment.
    /// Having a low limit will refuse clients requests instead of having them
    /// wait for too long and is usually good to handle backpressure correctly.
    #[clap(default_value = "512", long, env)]
    max_concurrent_requests: usize,

    /// Control the maximum number of candidates that a client can send in a
    /// single rerank request
    #[clap(default_value = "256", long, env)]
    max_client_batch_size: usize,

    /// The IP address to listen on
    #[clap(default_value = "0.0.0.0", long, env)]
    hostname: String,

    /// The port to listen on.
    #[clap(default_value = "8000", long, short, env)]
    port: u16,

    /// Outputs the logs in JSON format (useful for telemetry)
    #[clap(long, env)]
    json_output: bool,

    #[clap(long, env)]
    cors_allow_origin: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Pattern match configuration
    let args: Args = Args::parse();

    // Initialize logging
    paper_rank_router::init_logging(args.json_output);

    tracing::info!("{args:?}");

    let addr: SocketAddr = format!("{}:{}", args.hostname, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.hostname, args.port))?;

    let allow_origin = args
        .cors_allow_origin
        .map(paper_rank_router::server::parse_cors_origins)
        .transpose()?;

    let backend = Backend::from_path(&args.model_path)?;

    paper_rank_router::run(
        backend,
        args.classifier_path,
        args.documents_path,
        args.user_features_path,
        args.max_concurrent_requests,
        args.max_client_batch_size,
        addr,
        allow_origin,
    )
    .await?;

    Ok(())
}
