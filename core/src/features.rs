//! Typed feature records and the file-backed feature store.
//!
//! The snapshot and per-user aggregates are produced out-of-band by the
//! offline preprocessing pipeline; at serving time this module only reads.

use crate::RankError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::instrument;

/// A single arXiv paper with its precomputed title embedding.
///
/// Everything except `entry_id`, `title` and `title_embeddings` is
/// passthrough metadata: carried on responses, never used for scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub entry_id: String,
    pub title: String,
    #[serde(default, skip_serializing)]
    pub title_embeddings: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
}

/// Aggregated interaction history for one user.
///
/// `query` is the comma-joined set of distinct historical search queries,
/// `title` the same for titles of clicked/expanded documents. Both default
/// to the empty string when the user is unknown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserFeatures {
    pub user_id: String,
    pub query: String,
    pub title: String,
}

#[derive(Debug, Default, Deserialize)]
struct UserFeatureRow {
    #[serde(default)]
    query: String,
    #[serde(default)]
    title: String,
}

/// Immutable view of the current document batch.
#[derive(Debug, Default)]
pub struct DocumentSnapshot {
    pub documents: Vec<Document>,
}

impl DocumentSnapshot {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

const STORE_MAX_ATTEMPTS: usize = 3;
const STORE_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// File-backed feature store.
///
/// The document snapshot is loaded once and refreshed only through
/// [`FileFeatureStore::reload_documents`], which swaps the `Arc` atomically
/// so in-flight requests keep the version they started with. User lookups
/// hit the backing file on every call, off the async runtime.
#[derive(Debug)]
pub struct FileFeatureStore {
    documents: RwLock<Arc<DocumentSnapshot>>,
    documents_path: PathBuf,
    user_features_path: PathBuf,
}

impl FileFeatureStore {
    pub fn new(documents_path: PathBuf, user_features_path: PathBuf) -> Result<Self, RankError> {
        let snapshot = load_snapshot(&documents_path)?;
        tracing::info!(
            "Loaded document snapshot with {} documents from {}",
            snapshot.len(),
            documents_path.display()
        );

        Ok(Self {
            documents: RwLock::new(Arc::new(snapshot)),
            documents_path,
            user_features_path,
        })
    }

    /// Current snapshot; a cheap `Arc` clone.
    pub fn document_features(&self) -> Arc<DocumentSnapshot> {
        self.documents
            .read()
            .expect("snapshot lock poisoned")
            .clone()
    }

    /// Re-read the snapshot file and swap it in atomically.
    #[instrument(skip(self))]
    pub fn reload_documents(&self) -> Result<usize, RankError> {
        let snapshot = Arc::new(load_snapshot(&self.documents_path)?);
        let len = snapshot.len();
        *self.documents.write().expect("snapshot lock poisoned") = snapshot;
        tracing::info!("Document snapshot reloaded: {len} documents");
        Ok(len)
    }

    /// Online per-user lookup.
    ///
    /// Unknown users are not an error: they resolve to empty-string
    /// aggregates. Backing-store failures are retried with exponential
    /// backoff before surfacing as [`RankError::StoreUnavailable`].
    #[instrument(skip(self))]
    pub async fn user_features(&self, user_id: &str) -> Result<UserFeatures, RankError> {
        let mut backoff = STORE_INITIAL_BACKOFF;
        let mut last_err = String::new();

        for attempt in 1..=STORE_MAX_ATTEMPTS {
            let path = self.user_features_path.clone();
            let result = tokio::task::spawn_blocking(move || read_user_rows(&path))
                .await
                .expect("user feature lookup task panicked");

            match result {
                Ok(mut rows) => {
                    let row = rows.remove(user_id).unwrap_or_default();
                    return Ok(UserFeatures {
                        user_id: user_id.to_string(),
                        query: row.query,
                        title: row.title,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        "user feature lookup failed (attempt {attempt}/{STORE_MAX_ATTEMPTS}): {err}"
                    );
                    last_err = err;
                    if attempt < STORE_MAX_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        let counter = metrics::counter!("pr_request_failure", "err" => "store");
        counter.increment(1);
        Err(RankError::StoreUnavailable(last_err))
    }
}

fn read_user_rows(path: &Path) -> Result<HashMap<String, UserFeatureRow>, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| format!("could not read {}: {err}", path.display()))?;
    serde_json::from_str(&raw).map_err(|err| format!("could not parse {}: {err}", path.display()))
}

fn load_snapshot(path: &Path) -> Result<DocumentSnapshot, RankError> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        RankError::StoreUnavailable(format!("could not read {}: {err}", path.display()))
    })?;
    let documents: Vec<Document> = serde_json::from_str(&raw).map_err(|err| {
        RankError::StoreUnavailable(format!("could not parse {}: {err}", path.display()))
    })?;

    // Embeddings must agree on dimensionality; rows without one are kept and
    // excluded later by the scorer.
    let mut dimension = None;
    let mut missing = 0_usize;
    for document in &documents {
        match &document.title_embeddings {
            Some(embedding) => match dimension {
                None => dimension = Some(embedding.len()),
                Some(dim) if dim != embedding.len() => {
                    return Err(RankError::DimensionMismatch {
                        left: dim,
                        right: embedding.len(),
                    });
                }
                Some(_) => {}
            },
            None => missing += 1,
        }
    }
    if missing > 0 {
        tracing::warn!("{missing} documents in the snapshot have no title embedding");
    }

    Ok(DocumentSnapshot { documents })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{content}").unwrap();
        path
    }

    const DOCS: &str = r#"[
        {"entry_id": "http://arxiv.org/abs/1", "title": "one", "title_embeddings": [1.0, 0.0]},
        {"entry_id": "http://arxiv.org/abs/2", "title": "two", "title_embeddings": [0.0, 1.0]}
    ]"#;

    #[tokio::test]
    async fn test_known_and_unknown_user() {
        let dir = tempfile::tempdir().unwrap();
        let docs = write_file(&dir, "documents.json", DOCS);
        let users = write_file(
            &dir,
            "users.json",
            r#"{"alice": {"query": "graphs", "title": "Graph nets"}}"#,
        );
        let store = FileFeatureStore::new(docs, users).unwrap();

        let alice = store.user_features("alice").await.unwrap();
        assert_eq!(alice.query, "graphs");
        assert_eq!(alice.title, "Graph nets");

        // Unknown user resolves to empty defaults, not an error
        let nobody = store.user_features("nobody").await.unwrap();
        assert_eq!(nobody.query, "");
        assert_eq!(nobody.title, "");
    }

    #[tokio::test]
    async fn test_missing_user_file_is_store_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let docs = write_file(&dir, "documents.json", DOCS);
        let store = FileFeatureStore::new(docs, dir.path().join("absent.json")).unwrap();

        let err = store.user_features("alice").await.unwrap_err();
        assert!(matches!(err, RankError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_snapshot_reload_swaps_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let docs = write_file(&dir, "documents.json", DOCS);
        let users = write_file(&dir, "users.json", "{}");
        let store = FileFeatureStore::new(docs.clone(), users).unwrap();

        let before = store.document_features();
        assert_eq!(before.len(), 2);

        write_file(
            &dir,
            "documents.json",
            r#"[{"entry_id": "http://arxiv.org/abs/3", "title": "three", "title_embeddings": [1.0, 0.0]}]"#,
        );
        assert_eq!(store.reload_documents().unwrap(), 1);

        // The old handle still sees the snapshot it started with
        assert_eq!(before.len(), 2);
        assert_eq!(store.document_features().len(), 1);
    }

    #[test]
    fn test_snapshot_rejects_inconsistent_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let docs = write_file(
            &dir,
            "documents.json",
            r#"[
                {"entry_id": "a", "title": "a", "title_embeddings": [1.0, 0.0]},
                {"entry_id": "b", "title": "b", "title_embeddings": [1.0, 0.0, 0.0]}
            ]"#,
        );
        assert!(matches!(
            FileFeatureStore::new(docs, dir.path().join("users.json")),
            Err(RankError::DimensionMismatch { left: 2, right: 3 })
        ));
    }

    #[test]
    fn test_document_metadata_roundtrip() {
        let raw = r#"{
            "entry_id": "http://arxiv.org/abs/2401.00001",
            "title": "A survey",
            "title_embeddings": [0.5, 0.5],
            "authors": ["Ada"],
            "categories": ["cs.LG"],
            "primary_category": "cs.LG",
            "published": "2024-01-01"
        }"#;
        let document: Document = serde_json::from_str(raw).unwrap();
        assert_eq!(document.authors.as_deref(), Some(&["Ada".to_string()][..]));

        // Embeddings never leave the service on serialization
        let out = serde_json::to_value(&document).unwrap();
        assert!(out.get("title_embeddings").is_none());
        assert!(out.get("comment").is_none());
        assert_eq!(out["primary_category"], "cs.LG");
    }
}
