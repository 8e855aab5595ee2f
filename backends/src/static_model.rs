use crate::{BackendError, EmbeddingModel};
use candle::{DType, Device, Module, Tensor};
use candle_nn::{Embedding, VarBuilder};
use serde::Deserialize;
use std::path::Path;
use tokenizers::Tokenizer;

/// `config.json` of a static (model2vec style) embedding model directory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StaticModelConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
}

/// Static token-embedding model: a tokenizer plus a single embedding matrix.
///
/// Embedding a batch is one padded lookup followed by attention-masked mean
/// pooling, so encoding N titles is a single vectorized forward pass instead
/// of N model calls.
pub struct StaticModel {
    tokenizer: Tokenizer,
    embedding: Embedding,
    config: StaticModelConfig,
    device: Device,

    span: tracing::Span,
}

impl StaticModel {
    /// Load `config.json`, `tokenizer.json` and `model.safetensors` from a
    /// local model directory.
    pub fn load(model_path: &Path) -> Result<Self, BackendError> {
        let config_str = std::fs::read_to_string(model_path.join("config.json"))
            .map_err(|err| BackendError::Start(format!("could not read config.json: {err}")))?;
        let config: StaticModelConfig = serde_json::from_str(&config_str)
            .map_err(|err| BackendError::Start(format!("could not parse config.json: {err}")))?;

        let tokenizer = Tokenizer::from_file(model_path.join("tokenizer.json"))
            .map_err(|err| BackendError::Start(format!("could not load tokenizer: {err}")))?;

        let device = Device::Cpu;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(
                &[model_path.join("model.safetensors")],
                DType::F32,
                &device,
            )
        }
        .map_err(|err| BackendError::Start(format!("could not load safetensors: {err}")))?;

        let weights = vb
            .get((config.vocab_size, config.hidden_size), "embedding.weight")
            .or_else(|_| vb.get((config.vocab_size, config.hidden_size), "embeddings"))
            .map_err(|err| BackendError::Start(format!("embedding weights not found: {err}")))?;
        let embedding = Embedding::new(weights, config.hidden_size);

        Ok(Self {
            tokenizer,
            embedding,
            config,
            device,
            span: tracing::span!(tracing::Level::TRACE, "static_model"),
        })
    }

    fn forward(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, BackendError> {
        let batch_size = texts.len();

        let encodings = self
            .tokenizer
            .encode_batch(texts, true)
            .map_err(|err| BackendError::Inference(format!("tokenization failed: {err}")))?;

        // A text can tokenize to zero ids (e.g. the empty string with a
        // tokenizer that adds no special tokens). Pad those rows to length 1
        // with a fully masked position so shapes stay rectangular.
        let max_length = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .max(1);

        let elems = batch_size * max_length;
        let mut input_ids = Vec::with_capacity(elems);
        let mut attention_mask = Vec::with_capacity(elems);
        let mut input_lengths = Vec::with_capacity(batch_size);

        for encoding in &encodings {
            let ids = encoding.get_ids();
            input_ids.extend_from_slice(ids);
            attention_mask.extend(std::iter::repeat(1.0_f32).take(ids.len()));

            let padding = max_length - ids.len();
            input_ids.extend(std::iter::repeat(0_u32).take(padding));
            attention_mask.extend(std::iter::repeat(0.0_f32).take(padding));

            // Avoid a division by zero for fully masked rows
            input_lengths.push((ids.len() as f32).max(1.0));
        }

        let shape = (batch_size, max_length);
        let (pooled, lengths) = {
            let input_ids = Tensor::from_vec(input_ids, shape, &self.device).map_err(wrap)?;
            let attention_mask =
                Tensor::from_vec(attention_mask, shape, &self.device).map_err(wrap)?;
            let input_lengths =
                Tensor::from_vec(input_lengths, (batch_size, 1), &self.device).map_err(wrap)?;

            let embeddings = self.embedding.forward(&input_ids).map_err(wrap)?;
            let masked = embeddings
                .broadcast_mul(&attention_mask.unsqueeze(2).map_err(wrap)?)
                .map_err(wrap)?;
            (masked.sum(1).map_err(wrap)?, input_lengths)
        };
        let mean = pooled.broadcast_div(&lengths).map_err(wrap)?;

        let mut results = mean.to_vec2::<f32>().map_err(wrap)?;
        for row in results.iter_mut() {
            l2_normalize(row);
        }
        Ok(results)
    }
}

impl EmbeddingModel for StaticModel {
    fn dimension(&self) -> usize {
        self.config.hidden_size
    }

    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, BackendError> {
        let _enter = self.span.enter();

        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.forward(texts)
    }
}

fn wrap(err: candle::Error) -> BackendError {
    BackendError::Inference(err.to_string())
}

fn l2_normalize(vec: &mut [f32]) {
    const EPS: f32 = 1e-8;

    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt() + EPS;
    for x in vec.iter_mut() {
        *x /= norm;
    }
}
