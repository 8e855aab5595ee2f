mod common;

use anyhow::Result;
use serde_json::json;

const PORT: u16 = 8092;

fn url(path: &str) -> String {
    format!("http://127.0.0.1:{PORT}{path}")
}

fn document(entry_id: &str, title: &str) -> serde_json::Value {
    json!({
        "entry_id": entry_id,
        "title": title,
        "title_embeddings": common::fake_embedding(title),
    })
}

#[tokio::test]
async fn test_recommendations() -> Result<()> {
    let dir = tempfile::tempdir()?;

    // One clear match for alice's history, a pile of unrelated documents and
    // one document without an embedding
    let documents = json!([
        document("n1", "neural networks in ranking"),
        document("u1", "protein folding dynamics"),
        document("u2", "quantum gravity waves"),
        document("u3", "topological order"),
        document("u4", "sparse coding theory"),
        {"entry_id": "no-embed", "title": "lost in preprocessing"},
        document("u5", "galaxy cluster surveys"),
        document("u6", "black hole thermodynamics"),
        document("u7", "superconducting qubits"),
        document("u8", "bayesian optimization"),
        document("u9", "graph kernels"),
        document("u10", "category theory basics"),
        document("u11", "knot polynomials"),
    ]);
    let users = json!({
        "alice": {"query": "neural networks", "title": "neural ranking methods"}
    });
    let fixtures = common::write_fixtures(dir.path(), &documents, &users);
    common::start_server(PORT, fixtures).await?;

    let client = reqwest::Client::new();

    let info: serde_json::Value = client.get(url("/info")).send().await?.json().await?;
    assert_eq!(info["documents"], 13);
    assert_eq!(info["embedding_dimension"], 703);

    let response = client
        .get(url("/recommendations"))
        .query(&[("user_id", "alice")])
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let ranked: Vec<serde_json::Value> = response.json().await?;

    // Top 10 of the 12 scorable documents, best first
    assert_eq!(ranked.len(), 10);
    assert_eq!(ranked[0]["entry_id"], "n1");

    let scores: Vec<f64> = ranked
        .iter()
        .map(|doc| doc["score"].as_f64().unwrap())
        .collect();
    assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));

    let mut ids: Vec<&str> = ranked
        .iter()
        .map(|doc| doc["entry_id"].as_str().unwrap())
        .collect();
    assert!(!ids.contains(&"no-embed"));
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 10);

    // Unknown users get a ranking over empty aggregates: every document
    // scores the classifier prior and snapshot order is preserved
    let response = client
        .get(url("/recommendations"))
        .query(&[("user_id", "nobody")])
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let ranked: Vec<serde_json::Value> = response.json().await?;
    assert_eq!(ranked.len(), 10);
    let ids: Vec<&str> = ranked
        .iter()
        .map(|doc| doc["entry_id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        vec!["n1", "u1", "u2", "u3", "u4", "u5", "u6", "u7", "u8", "u9"]
    );
    let scores: Vec<f64> = ranked
        .iter()
        .map(|doc| doc["score"].as_f64().unwrap())
        .collect();
    assert!(scores.iter().all(|score| (score - scores[0]).abs() < 1e-6));

    Ok(())
}
