//! BGE-M3 text embeddings on candle's XLM-RoBERTa.
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use polyrag_core::error::{Error, Result};
use polyrag_core::traits::EmbeddingProvider;

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_on_device;

pub const BGE_M3_DIM: usize = 1024;
const PAD_ID: u32 = 1;

struct LoadedModel {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl LoadedModel {
    fn load(model_dir: &Path) -> Result<Self> {
        let device = select_device();
        info!(model_dir = %model_dir.display(), "loading BGE-M3");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::ModelLoad(format!("tokenizer {}: {e}", tokenizer_path.display())))?;
        let config_path = model_dir.join("config.json");
        let config_src = std::fs::read_to_string(&config_path)
            .map_err(|e| Error::ModelLoad(format!("config {}: {e}", config_path.display())))?;
        let config: XLMRobertaConfig = serde_json::from_str(&config_src).map_err(|e| Error::ModelLoad(format!("config: {e}")))?;
        let weights_path = model_dir.join("pytorch_model.bin");
        let weights = candle_core::pickle::read_all(&weights_path)
            .map_err(|e| Error::ModelLoad(format!("weights {}: {e}", weights_path.display())))?;
        let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb).map_err(|e| Error::ModelLoad(e.to_string()))?;
        info!("BGE-M3 loaded");
        Ok(Self { model, tokenizer, device })
    }

    fn embed(&self, text: &str, max_len: usize) -> candle_core::Result<Vec<f32>> {
        let (input_ids, attention_mask) = tokenize_on_device(&self.tokenizer, text, max_len, PAD_ID, &self.device)
            .map_err(|e| candle_core::Error::Msg(e.to_string()))?;
        let token_type_ids = Tensor::zeros((1, max_len), DType::I64, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1()
    }
}

pub struct BgeM3Provider {
    model_dir: Option<PathBuf>,
    max_len: usize,
    max_batch_size: usize,
    model: RwLock<Option<Arc<LoadedModel>>>,
}

impl BgeM3Provider {
    /// `model_dir` falls back to `APP_MODEL_DIR`, `MODEL_DIR`, then `models/bge-m3`.
    pub fn new(model_dir: Option<PathBuf>) -> Self {
        Self { model_dir, max_len: 256, max_batch_size: 32, model: RwLock::new(None) }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(8);
        self
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max.max(1);
        self
    }

    fn loaded(&self) -> Result<Arc<LoadedModel>> {
        self.model.read().clone().ok_or_else(|| Error::NotInitialized("bge-m3".to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for BgeM3Provider {
    fn name(&self) -> &str {
        "bge-m3"
    }

    fn dim(&self) -> usize {
        BGE_M3_DIM
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn initialize(&self) -> Result<()> {
        if self.model.read().is_some() {
            return Ok(());
        }
        let dir = resolve_model_dir(self.model_dir.as_deref(), "bge-m3")?;
        let loaded = tokio::task::spawn_blocking(move || LoadedModel::load(&dir))
            .await
            .map_err(|e| Error::ModelLoad(format!("loader task failed: {e}")))??;
        *self.model.write() = Some(Arc::new(loaded));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.model.write().take();
        Ok(())
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(Error::EmptyInput);
        }
        if texts.len() > self.max_batch_size {
            return Err(Error::BatchTooLarge { size: texts.len(), max: self.max_batch_size });
        }
        let model = self.loaded()?;
        let texts = texts.to_vec();
        let max_len = self.max_len;
        tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let out = texts
                .iter()
                .map(|t| model.embed(t, max_len).map_err(Error::backend))
                .collect::<Result<Vec<_>>>();
            let elapsed_ms = start.elapsed().as_millis();
            if elapsed_ms > 100 * texts.len() as u128 {
                warn!(elapsed_ms, batch = texts.len(), "slow embedding batch");
            } else {
                debug!(elapsed_ms, batch = texts.len(), "embedded batch");
            }
            out
        })
        .await
        .map_err(Error::backend)?
    }

    async fn embed_images(&self, _paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        Err(Error::UnsupportedOperation("bge-m3 embeds text only".to_string()))
    }

    async fn health_check(&self) -> bool {
        self.model.read().is_some()
    }
}

/// Locate a model directory: explicit path, then `APP_MODEL_DIR`/`MODEL_DIR`, then `models/<name>`.
pub fn resolve_model_dir(explicit: Option<&Path>, name: &str) -> Result<PathBuf> {
    if let Some(p) = explicit {
        if p.exists() {
            return Ok(p.to_path_buf());
        }
        return Err(Error::ModelLoad(format!("model directory {} does not exist", p.display())));
    }
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            let p = PathBuf::from(dir).join(name);
            if p.exists() {
                debug!(var, path = %p.display(), "using model dir from env");
                return Ok(p);
            }
        }
    }
    for candidate in [Path::new("../models").join(name), Path::new("models").join(name)] {
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(Error::ModelLoad(format!("could not locate {name} model directory")))
}
