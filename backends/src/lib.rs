mod static_model;

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{instrument, Span};

pub use crate::static_model::{StaticModel, StaticModelConfig};

#[derive(Debug, Error, Clone)]
pub enum BackendError {
    #[error("Could not start backend: {0}")]
    Start(String),
    #[error("{0}")]
    Inference(String),
    #[error("Backend is unhealthy")]
    Unhealthy,
}

/// Embedding model contract: batch text in, one fixed-length vector per input out.
///
/// Implementations run on the dedicated backend thread and are free to block.
pub trait EmbeddingModel {
    /// Output dimensionality; every returned vector has exactly this length.
    fn dimension(&self) -> usize;

    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, BackendError>;

    fn health(&self) -> Result<(), BackendError> {
        self.embed(vec![String::from("ok")]).map(|_| ())
    }
}

/// Handle to the embedding model running on its own thread.
///
/// Cloning is cheap: all clones talk to the same thread over a bounded channel,
/// so a slow forward pass never blocks the async runtime itself.
#[derive(Debug, Clone)]
pub struct Backend {
    /// Channel to communicate with the background thread
    backend_sender: mpsc::Sender<BackendCommand>,
    /// Health status
    health_receiver: watch::Receiver<bool>,
    _backend_thread: Arc<BackendThread>,
    pub dimension: usize,
}

impl Backend {
    pub fn new(model: Box<dyn EmbeddingModel + Send>) -> Self {
        let (backend_sender, backend_receiver) = mpsc::channel(8);
        let (health_sender, health_receiver) = watch::channel(false);

        let dimension = model.dimension();
        let _backend_thread = Arc::new(BackendThread::new(model, backend_receiver, health_sender));

        Self {
            backend_sender,
            health_receiver,
            _backend_thread,
            dimension,
        }
    }

    /// Load the static embedding model from a local directory and start the
    /// backend thread for it.
    pub fn from_path(model_path: &Path) -> Result<Self, BackendError> {
        let start = Instant::now();
        let model = StaticModel::load(model_path)?;
        tracing::info!(
            "Embedding model loaded from {} in {:?}",
            model_path.display(),
            start.elapsed()
        );
        Ok(Self::new(Box::new(model)))
    }

    #[instrument(skip(self))]
    pub async fn health(&self) -> Result<(), BackendError> {
        let (sender, receiver) = oneshot::channel();
        self.backend_sender
            .send(BackendCommand::Health(Span::current(), sender))
            .await
            .expect("No backend receiver. This is a bug.");
        receiver
            .await
            .expect("Backend thread dropped the sender without sending a response. This is a bug.")
    }

    #[instrument(skip(self))]
    pub fn health_watcher(&self) -> watch::Receiver<bool> {
        self.health_receiver.clone()
    }

    #[instrument(skip_all)]
    pub async fn embed(
        &self,
        texts: Vec<String>,
    ) -> Result<(Vec<Vec<f32>>, Duration), BackendError> {
        let (sender, receiver) = oneshot::channel();

        self.backend_sender
            .send(BackendCommand::Embed(texts, Span::current(), sender))
            .await
            .expect("No backend receiver. This is a bug.");
        receiver
            .await
            .expect("Backend thread dropped the sender without sending a response. This is a bug.")
    }
}

#[derive(Debug)]
struct BackendThread(Option<JoinHandle<()>>);

impl BackendThread {
    fn new(
        model: Box<dyn EmbeddingModel + Send>,
        mut backend_receiver: mpsc::Receiver<BackendCommand>,
        health_sender: watch::Sender<bool>,
    ) -> Self {
        let handle = std::thread::spawn(move || {
            while let Some(cmd) = backend_receiver.blocking_recv() {
                let start = Instant::now();
                let mut healthy = false;
                match cmd {
                    BackendCommand::Health(span, sender) => {
                        let _span = span.entered();
                        let _ = sender.send(model.health().map(|_| healthy = true));
                    }
                    BackendCommand::Embed(texts, span, sender) => {
                        let _span = span.entered();
                        let _ = sender.send(model.embed(texts).map(|e| {
                            healthy = true;
                            (e, start.elapsed())
                        }));
                    }
                };
                let _ = health_sender.send(healthy);
            }
        });
        Self(Some(handle))
    }
}

impl Drop for BackendThread {
    fn drop(&mut self) {
        self.0.take().unwrap().join().unwrap();
    }
}

enum BackendCommand {
    Health(Span, oneshot::Sender<Result<(), BackendError>>),
    Embed(
        Vec<String>,
        Span,
        #[allow(clippy::type_complexity)]
        oneshot::Sender<Result<(Vec<Vec<f32>>, Duration), BackendError>>,
    ),
}
