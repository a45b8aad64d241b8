//! CLIP ViT-B/32 text and image embeddings sharing one vector space.
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip::{ClipConfig, ClipModel};
use image::imageops::FilterType;
use tokenizers::Tokenizer;
use tracing::info;

use polyrag_core::error::{Error, Result};
use polyrag_core::traits::EmbeddingProvider;

use crate::bge::resolve_model_dir;
use crate::device::select_device;
use crate::pool::l2_normalize_rows;

pub const CLIP_DIM: usize = 512;
const IMAGE_SIZE: usize = 224;
const MAX_TEXT_LEN: usize = 77;

struct LoadedClip {
    model: ClipModel,
    tokenizer: Tokenizer,
    pad_id: u32,
    device: Device,
}

impl LoadedClip {
    fn load(model_dir: &Path) -> Result<Self> {
        let device = select_device();
        info!(model_dir = %model_dir.display(), "loading CLIP");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::ModelLoad(format!("tokenizer {}: {e}", tokenizer_path.display())))?;
        let pad_id = tokenizer
            .get_vocab(true)
            .get("<|endoftext|>")
            .copied()
            .ok_or_else(|| Error::ModelLoad("tokenizer has no <|endoftext|> token".to_string()))?;
        let weights_path = model_dir.join("model.safetensors");
        let weights = candle_core::safetensors::load(&weights_path, &device)
            .map_err(|e| Error::ModelLoad(format!("weights {}: {e}", weights_path.display())))?;
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = ClipModel::new(vb, &ClipConfig::vit_base_patch32()).map_err(|e| Error::ModelLoad(e.to_string()))?;
        info!("CLIP loaded");
        Ok(Self { model, tokenizer, pad_id, device })
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut rows = Vec::with_capacity(texts.len());
        for text in texts {
            let enc = self.tokenizer.encode(text.as_str(), true).map_err(|e| Error::Backend(format!("Tokenization failed: {e}")))?;
            let mut ids = enc.get_ids().to_vec();
            ids.truncate(MAX_TEXT_LEN);
            ids.resize(MAX_TEXT_LEN, self.pad_id);
            rows.push(Tensor::new(ids.as_slice(), &self.device).map_err(Error::backend)?);
        }
        let input_ids = Tensor::stack(&rows, 0).map_err(Error::backend)?;
        let features = self.model.get_text_features(&input_ids).map_err(Error::backend)?;
        to_rows(&features)
    }

    fn embed_images(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            images.push(load_image(path)?.to_device(&self.device).map_err(Error::backend)?);
        }
        let pixels = Tensor::stack(&images, 0).map_err(Error::backend)?;
        let features = self.model.get_image_features(&pixels).map_err(Error::backend)?;
        to_rows(&features)
    }
}

fn to_rows(features: &Tensor) -> Result<Vec<Vec<f32>>> {
    l2_normalize_rows(features)
        .and_then(|t| t.to_device(&Device::Cpu))
        .and_then(|t| t.to_vec2::<f32>())
        .map_err(Error::backend)
}

/// Resize to fill 224x224 and scale pixels to [-1, 1], channels first.
fn load_image(path: &Path) -> Result<Tensor> {
    if !path.exists() {
        return Err(Error::ImageNotFound(path.to_path_buf()));
    }
    let load_err = |reason: String| Error::ImageLoad { path: path.to_path_buf(), reason };
    let img = image::ImageReader::open(path)
        .map_err(|e| load_err(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| load_err(e.to_string()))?
        .decode()
        .map_err(|e| load_err(e.to_string()))?;
    let img = img.resize_to_fill(IMAGE_SIZE as u32, IMAGE_SIZE as u32, FilterType::Triangle).to_rgb8();
    Tensor::from_vec(img.into_raw(), (IMAGE_SIZE, IMAGE_SIZE, 3), &Device::Cpu)
        .and_then(|t| t.permute((2, 0, 1)))
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.affine(2. / 255., -1.))
        .map_err(Error::backend)
}

pub struct ClipProvider {
    model_dir: Option<PathBuf>,
    max_batch_size: usize,
    model: RwLock<Option<Arc<LoadedClip>>>,
}

impl ClipProvider {
    pub fn new(model_dir: Option<PathBuf>) -> Self {
        Self { model_dir, max_batch_size: 32, model: RwLock::new(None) }
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max.max(1);
        self
    }

    fn loaded(&self) -> Result<Arc<LoadedClip>> {
        self.model.read().clone().ok_or_else(|| Error::NotInitialized("clip".to_string()))
    }

    fn check_batch(&self, len: usize) -> Result<()> {
        if len == 0 {
            return Err(Error::EmptyInput);
        }
        if len > self.max_batch_size {
            return Err(Error::BatchTooLarge { size: len, max: self.max_batch_size });
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for ClipProvider {
    fn name(&self) -> &str {
        "clip-vit-b32"
    }

    fn dim(&self) -> usize {
        CLIP_DIM
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn initialize(&self) -> Result<()> {
        if self.model.read().is_some() {
            return Ok(());
        }
        let dir = resolve_model_dir(self.model_dir.as_deref(), "clip-vit-base-patch32")?;
        let loaded = tokio::task::spawn_blocking(move || LoadedClip::load(&dir))
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
        self.check_batch(texts.len())?;
        let model = self.loaded()?;
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || model.embed_texts(&texts)).await.map_err(Error::backend)?
    }

    async fn embed_images(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        self.check_batch(paths.len())?;
        let model = self.loaded()?;
        let paths = paths.to_vec();
        tokio::task::spawn_blocking(move || model.embed_images(&paths)).await.map_err(Error::backend)?
    }

    async fn health_check(&self) -> bool {
        self.model.read().is_some()
    }
}
