//! Collaborator contracts.
//!
//! The retrieval layer only talks to these traits; concrete providers, stores
//! and engines live in the sibling crates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::health::DegradationEvent;
use crate::types::{Chunk, ChunkId, Filters, SearchResult};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `bge-m3`, `hash:d512`).
    fn name(&self) -> &str;
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;
    fn max_batch_size(&self) -> usize {
        32
    }
    /// True when serving from a fallback instead of the real model.
    fn is_degraded(&self) -> bool {
        false
    }
    fn degradation_events(&self) -> Vec<DegradationEvent> {
        Vec::new()
    }

    /// Load weights and tokenizers. Fails with `ModelLoad` when unavailable.
    async fn initialize(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
    /// L2-normalized embeddings, one per input.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    async fn embed_images(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>>;
    async fn health_check(&self) -> bool;

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_texts(&[query.to_string()]).await?;
        out.pop().ok_or(crate::error::Error::EmptyInput)
    }
}

/// Options for a vector similarity search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub top_k: usize,
    /// Minimum score in [0,1]; results below are dropped.
    pub threshold: Option<f32>,
    #[serde(default)]
    pub filters: Filters,
    #[serde(default)]
    pub include_embeddings: bool,
}

impl SearchOptions {
    pub fn top_k(top_k: usize) -> Self {
        Self { top_k, ..Self::default() }
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }
}

/// A single collection of chunks with a fixed embedding dimension.
///
/// Implementations must tolerate concurrent readers.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn dimension(&self) -> usize;
    /// Insert or replace chunks by id. Fails with `DimensionMismatch` before writing anything.
    async fn add(&self, chunks: Vec<Chunk>) -> Result<Vec<ChunkId>>;
    /// Results sorted by descending score, ranked 1..n.
    async fn search(&self, vector: &[f32], options: &SearchOptions) -> Result<Vec<SearchResult>>;
    async fn get(&self, id: &str) -> Result<Option<Arc<Chunk>>>;
    /// Returns how many chunks were removed.
    async fn delete(&self, ids: &[ChunkId]) -> Result<usize>;
    /// Remove every chunk of one document; returns how many were removed.
    async fn delete_document(&self, document_id: &str) -> Result<usize>;
    /// Replace content, embedding and metadata of an existing chunk; `NotFound` if absent.
    async fn update(&self, chunk: Chunk) -> Result<()>;
    async fn count(&self) -> Result<usize>;
    async fn clear(&self) -> Result<()>;
    async fn health_check(&self) -> bool;
}

/// Re-scores candidates against a query. Output length never exceeds the input.
#[async_trait]
pub trait ReRanker: Send + Sync {
    fn name(&self) -> &str;
    async fn rerank(&self, query: &str, candidates: &[SearchResult]) -> Result<Vec<SearchResult>>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub text: String,
    #[serde(default)]
    pub filters: Filters,
    pub limit: usize,
}

impl StructuredQuery {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self { text: text.into(), filters: Filters::new(), limit }
    }
}

#[async_trait]
pub trait StructuredQueryEngine: Send + Sync {
    /// Load a tabular file; returns the ids of the indexed records.
    async fn index(&self, path: &Path) -> Result<Vec<ChunkId>>;
    async fn query(&self, query: &StructuredQuery) -> Result<Vec<SearchResult>>;
    async fn count(&self) -> Result<usize>;
    async fn health_check(&self) -> bool;
}
