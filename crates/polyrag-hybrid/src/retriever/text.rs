use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use polyrag_core::data_processor::{document_id_for, read_text_lossy, ParagraphChunker};
use polyrag_core::error::{Error, Result};
use polyrag_core::health::ComponentHealth;
use polyrag_core::traits::{EmbeddingProvider, SearchOptions, VectorStore};
use polyrag_core::types::{Chunk, ChunkId, ChunkMetadata, ContentType, Filters, Modality, SearchResult};

use super::{embedded_health, ModalityRetriever};

/// Dense retrieval over paragraph chunks and JSON documents.
pub struct TextRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    chunker: ParagraphChunker,
}

impl TextRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Result<Self> {
        if embedder.dim() != store.dimension() {
            return Err(Error::Configuration(format!(
                "text embedder produces {} dims but the store holds {}",
                embedder.dim(),
                store.dimension()
            )));
        }
        Ok(Self { embedder, store, chunker: ParagraphChunker::default() })
    }

    pub fn with_chunker(mut self, chunker: ParagraphChunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// `(content, text to embed)` pairs for one file.
    fn pieces(&self, path: &Path, content_type: ContentType) -> Result<Vec<(String, String)>> {
        let raw = read_text_lossy(path)?;
        match content_type {
            ContentType::Text => Ok(self.chunker.chunk(&raw).into_iter().map(|p| (p.clone(), p)).collect()),
            ContentType::Json => {
                let value: Value = serde_json::from_str(&raw)?;
                let mut lines = Vec::new();
                flatten_json("", &value, &mut lines);
                Ok(vec![(raw, lines.join("\n"))])
            }
            other => Err(Error::UnsupportedContentType(format!("{other} content for the text retriever"))),
        }
    }

    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let batch = self.embedder.max_batch_size().max(1);
        let mut out = Vec::with_capacity(texts.len());
        for slice in texts.chunks(batch) {
            out.extend(self.embedder.embed_texts(slice).await?);
        }
        Ok(out)
    }
}

/// `a.b[0]: value` lines for every leaf of a JSON document.
pub(crate) fn flatten_json(prefix: &str, value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                flatten_json(&key, v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_json(&format!("{prefix}[{i}]"), v, out);
            }
        }
        Value::Null => {}
        Value::String(s) => out.push(format!("{prefix}: {s}")),
        other => out.push(format!("{prefix}: {other}")),
    }
}

#[async_trait]
impl ModalityRetriever for TextRetriever {
    fn modality(&self) -> Modality {
        Modality::Text
    }

    async fn search(&self, query: &str, top_k: usize, filters: &Filters) -> Result<Vec<SearchResult>> {
        let vector = self.embedder.embed_query(query).await?;
        let hits = self.store.search(&vector, &SearchOptions::top_k(top_k).with_filters(filters.clone())).await?;
        debug!(hits = hits.len(), "text search");
        Ok(hits)
    }

    async fn index(&self, path: &Path, content_type: ContentType, description: Option<&str>) -> Result<Vec<ChunkId>> {
        let pieces = self.pieces(path, content_type)?;
        let document_id = document_id_for(path);
        if pieces.is_empty() {
            self.store.delete_document(&document_id).await?;
            return Ok(Vec::new());
        }
        let to_embed: Vec<String> = pieces.iter().map(|(_, e)| e.clone()).collect();
        let embeddings = self.embed_all(&to_embed).await?;

        let title = description
            .map(str::to_string)
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().to_string()));
        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, ((content, _), embedding))| {
                let meta = ChunkMetadata {
                    source: Some(path.to_string_lossy().to_string()),
                    title: title.clone(),
                    custom: [("content_type".to_string(), Value::from(content_type.as_str()))].into_iter().collect(),
                    ..ChunkMetadata::for_modality(Modality::Text)
                };
                Chunk::new(format!("{document_id}:{i}"), document_id.clone(), content)
                    .with_embedding(embedding)
                    .with_index(i)
                    .with_metadata(meta)
            })
            .collect();
        // a shorter new version must not leave the old tail searchable
        let replaced = self.store.delete_document(&document_id).await?;
        let ids = self.store.add(chunks).await?;
        info!(path = %path.display(), chunks = ids.len(), replaced, "text indexed");
        Ok(ids)
    }

    async fn count(&self) -> Result<usize> {
        self.store.count().await
    }

    async fn health(&self) -> ComponentHealth {
        embedded_health(Modality::Text, &self.embedder, &self.store).await
    }
}
