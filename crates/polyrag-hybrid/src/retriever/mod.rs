//! Per-modality retrievers behind one trait.

mod image;
mod structured;
mod text;

pub use image::ImageRetriever;
pub use structured::StructuredRetriever;
pub use text::TextRetriever;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use polyrag_core::error::{Error, Result};
use polyrag_core::health::{ComponentHealth, HealthStatus};
use polyrag_core::traits::{EmbeddingProvider, VectorStore};
use polyrag_core::types::{ChunkId, ContentType, Filters, Modality, SearchResult};

#[async_trait]
pub trait ModalityRetriever: Send + Sync {
    fn modality(&self) -> Modality;

    async fn search(&self, query: &str, top_k: usize, filters: &Filters) -> Result<Vec<SearchResult>>;

    async fn search_by_image(&self, _path: &Path, _top_k: usize) -> Result<Vec<SearchResult>> {
        Err(Error::UnsupportedOperation(format!("{} retriever cannot search by image", self.modality())))
    }

    /// Ingest one file; returns the ids of the chunks or records written.
    async fn index(&self, path: &Path, content_type: ContentType, description: Option<&str>) -> Result<Vec<ChunkId>>;

    async fn count(&self) -> Result<usize>;

    async fn health(&self) -> ComponentHealth;
}

/// Health of an embedder + vector store pair.
async fn embedded_health(
    modality: Modality,
    embedder: &Arc<dyn EmbeddingProvider>,
    store: &Arc<dyn VectorStore>,
) -> ComponentHealth {
    let (embedder_ok, store_ok) = tokio::join!(embedder.health_check(), store.health_check());
    let status = if !embedder_ok || !store_ok {
        HealthStatus::Unhealthy
    } else if embedder.is_degraded() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };
    ComponentHealth::new(modality.as_str(), status)
        .with_detail(format!("embedder={} store_ok={store_ok}", embedder.name()))
        .with_degradations(embedder.degradation_events())
}
