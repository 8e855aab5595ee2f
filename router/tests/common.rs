use anyhow::Result;
use paper_rank_backend::{Backend, BackendError, EmbeddingModel};
use paper_rank_router::run;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

/// Deterministic embedding model for tests: each token lands in a bucket
/// keyed by its first two letters, so titles sharing a token prefix with the
/// query score higher than unrelated titles.
pub struct FakeModel;

const FAKE_DIM: usize = 26 * 26 + 26 + 1;

fn bucket(token: &str) -> usize {
    let letters: Vec<u8> = token
        .bytes()
        .filter(u8::is_ascii_alphabetic)
        .map(|b| b.to_ascii_lowercase())
        .take(2)
        .collect();
    match letters[..] {
        [a, b] => 27 + (a - b'a') as usize * 26 + (b - b'a') as usize,
        [a] => 1 + (a - b'a') as usize,
        _ => 0,
    }
}

impl EmbeddingModel for FakeModel {
    fn dimension(&self) -> usize {
        FAKE_DIM
    }

    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, BackendError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vec = vec![0.0_f32; FAKE_DIM];
                for token in text.split_whitespace() {
                    vec[bucket(token)] += 1.0;
                }
                let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt() + 1e-8;
                vec.iter_mut().for_each(|x| *x /= norm);
                vec
            })
            .collect())
    }
}

pub fn fake_embedding(text: &str) -> Vec<f32> {
    FakeModel
        .embed(vec![text.to_string()])
        .unwrap()
        .pop()
        .unwrap()
}

pub struct Fixtures {
    pub classifier_path: PathBuf,
    pub documents_path: PathBuf,
    pub user_features_path: PathBuf,
}

/// Write the classifier artifact and feature files the server loads at startup.
pub fn write_fixtures(
    dir: &Path,
    documents: &serde_json::Value,
    users: &serde_json::Value,
) -> Fixtures {
    let classifier_path = dir.join("scoring_model.json");
    std::fs::write(
        &classifier_path,
        r#"{"coefficients": [2.0, 1.0], "intercept": -0.5}"#,
    )
    .unwrap();

    let documents_path = dir.join("latest_document_features.json");
    std::fs::write(&documents_path, serde_json::to_string(documents).unwrap()).unwrap();

    let user_features_path = dir.join("latest_user_features.json");
    std::fs::write(&user_features_path, serde_json::to_string(users).unwrap()).unwrap();

    Fixtures {
        classifier_path,
        documents_path,
        user_features_path,
    }
}

async fn check_health(port: u16, timeout: Duration) -> Result<()> {
    let addr = format!("http://127.0.0.1:{port}/health");
    let client = reqwest::ClientBuilder::new()
        .timeout(timeout)
        .build()
        .unwrap();

    let start = Instant::now();
    loop {
        if client.get(&addr).send().await.is_ok() {
            return Ok(());
        }
        if start.elapsed() < timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;
        } else {
            anyhow::bail!("Backend is not healthy");
        }
    }
}

pub async fn start_server(port: u16, fixtures: Fixtures) -> Result<()> {
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse()?;

    let server_task = tokio::spawn(run(
        Backend::new(Box::new(FakeModel)),
        fixtures.classifier_path,
        fixtures.documents_path,
        fixtures.user_features_path,
        4,
        32,
        addr,
        None,
    ));

    tokio::select! {
        err = server_task => err?,
        _ = check_health(port, Duration::from_secs(30)) => Ok(())
    }?;
    Ok(())
}
