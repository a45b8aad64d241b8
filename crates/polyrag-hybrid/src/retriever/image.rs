use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use polyrag_core::data_processor::document_id_for;
use polyrag_core::error::{Error, Result};
use polyrag_core::health::ComponentHealth;
use polyrag_core::traits::{EmbeddingProvider, SearchOptions, VectorStore};
use polyrag_core::types::{Chunk, ChunkId, ChunkMetadata, ContentType, Filters, Modality, SearchResult};

use super::{embedded_health, ModalityRetriever};

/// Cross-modal retrieval: images are embedded with the same model that embeds
/// text queries, so both can search one collection.
pub struct ImageRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl ImageRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Result<Self> {
        if embedder.dim() != store.dimension() {
            return Err(Error::Configuration(format!(
                "image embedder produces {} dims but the store holds {}",
                embedder.dim(),
                store.dimension()
            )));
        }
        Ok(Self { embedder, store })
    }
}

#[async_trait]
impl ModalityRetriever for ImageRetriever {
    fn modality(&self) -> Modality {
        Modality::Image
    }

    async fn search(&self, query: &str, top_k: usize, filters: &Filters) -> Result<Vec<SearchResult>> {
        let vector = self.embedder.embed_query(query).await?;
        self.store.search(&vector, &SearchOptions::top_k(top_k).with_filters(filters.clone())).await
    }

    async fn search_by_image(&self, path: &Path, top_k: usize) -> Result<Vec<SearchResult>> {
        let mut vectors = self.embedder.embed_images(&[path.to_path_buf()]).await?;
        let vector = vectors.pop().ok_or(Error::EmptyInput)?;
        self.store.search(&vector, &SearchOptions::top_k(top_k)).await
    }

    async fn index(&self, path: &Path, content_type: ContentType, description: Option<&str>) -> Result<Vec<ChunkId>> {
        if content_type != ContentType::Image {
            return Err(Error::UnsupportedContentType(format!("{content_type} content for the image retriever")));
        }
        let paths: Vec<PathBuf> = vec![path.to_path_buf()];
        let mut vectors = self.embedder.embed_images(&paths).await?;
        let embedding = vectors.pop().ok_or(Error::EmptyInput)?;

        let document_id = document_id_for(path);
        let mut custom = std::collections::HashMap::new();
        if let Some(d) = description {
            custom.insert("description".to_string(), Value::from(d));
        }
        let meta = ChunkMetadata {
            source: Some(path.to_string_lossy().to_string()),
            title: description.map(str::to_string).or_else(|| path.file_name().map(|n| n.to_string_lossy().to_string())),
            custom,
            ..ChunkMetadata::for_modality(Modality::Image)
        };
        let chunk = Chunk::new(document_id.clone(), document_id, path.to_string_lossy().to_string())
            .with_embedding(embedding)
            .with_metadata(meta);
        let ids = self.store.add(vec![chunk]).await?;
        info!(path = %path.display(), "image indexed");
        Ok(ids)
    }

    async fn count(&self) -> Result<usize> {
        self.store.count().await
    }

    async fn health(&self) -> ComponentHealth {
        embedded_health(Modality::Image, &self.embedder, &self.store).await
    }
}
