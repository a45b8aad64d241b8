//! polyrag-embed
//!
//! Embedding providers: BGE-M3 for text, CLIP for text and images, a
//! deterministic hash fallback, and the resilient wrapper that picks between
//! them once at startup.
use std::path::PathBuf;
use std::sync::Arc;

use polyrag_core::config::{expand_path, EmbeddingSettings, ImageModel, TextModel};
use polyrag_core::traits::EmbeddingProvider;

pub mod bge;
pub mod clip;
pub mod device;
pub mod hash;
pub mod pool;
pub mod resilient;
pub mod tokenize;

pub use bge::BgeM3Provider;
pub use clip::ClipProvider;
pub use hash::HashEmbeddingProvider;
pub use pool::masked_mean_l2;
pub use resilient::ResilientEmbedder;

fn model_dir(setting: Option<&String>) -> Option<PathBuf> {
    setting.map(expand_path)
}

/// Provider used to embed text chunks and text queries.
pub async fn text_embedder(settings: &EmbeddingSettings) -> ResilientEmbedder {
    if settings.fake_requested() || settings.text_model == TextModel::Hash {
        return ResilientEmbedder::fallback_only(settings.text_dim);
    }
    let primary: Arc<dyn EmbeddingProvider> = match settings.text_model {
        TextModel::Clip => Arc::new(ClipProvider::new(model_dir(settings.clip_model_dir.as_ref())).with_max_batch_size(settings.max_batch_size)),
        _ => Arc::new(
            BgeM3Provider::new(model_dir(settings.bge_model_dir.as_ref()))
                .with_max_len(settings.max_tokens)
                .with_max_batch_size(settings.max_batch_size),
        ),
    };
    ResilientEmbedder::initialize(primary).await
}

/// Cross-modal provider used for images and for text queries against images.
pub async fn image_embedder(settings: &EmbeddingSettings) -> ResilientEmbedder {
    if settings.fake_requested() || settings.image_model == ImageModel::Hash {
        return ResilientEmbedder::fallback_only(settings.image_dim);
    }
    let primary = ClipProvider::new(model_dir(settings.clip_model_dir.as_ref())).with_max_batch_size(settings.max_batch_size);
    ResilientEmbedder::initialize(Arc::new(primary)).await
}
