use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use polyrag_core::error::{Error, Result};
use polyrag_core::traits::{SearchOptions, VectorStore};
use polyrag_core::types::{sort_and_rank, Chunk, ChunkId, SearchResult};

use crate::{cosine, distance_to_score};

#[derive(Default)]
struct Collection {
    chunks: Vec<Arc<Chunk>>,
    positions: HashMap<ChunkId, usize>,
}

impl Collection {
    fn upsert(&mut self, chunk: Chunk) {
        let chunk = Arc::new(chunk);
        match self.positions.get(&chunk.id) {
            Some(&pos) => self.chunks[pos] = chunk,
            None => {
                self.positions.insert(chunk.id.clone(), self.chunks.len());
                self.chunks.push(chunk);
            }
        }
    }

    fn remove(&mut self, id: &str) -> bool {
        let Some(pos) = self.positions.remove(id) else { return false };
        self.chunks.remove(pos);
        for p in self.positions.values_mut() {
            if *p > pos {
                *p -= 1;
            }
        }
        true
    }

    fn remove_document(&mut self, document_id: &str) -> usize {
        let before = self.chunks.len();
        self.chunks.retain(|c| c.document_id != document_id);
        self.positions = self.chunks.iter().enumerate().map(|(i, c)| (c.id.clone(), i)).collect();
        before - self.chunks.len()
    }
}

/// One collection held in memory. Searches are brute-force cosine.
///
/// Readers share the lock; `add`, `delete`, `update` and `clear` take it exclusively.
pub struct InMemoryVectorStore {
    name: String,
    dim: usize,
    inner: RwLock<Collection>,
}

impl InMemoryVectorStore {
    pub fn new(name: impl Into<String>, dim: usize) -> Self {
        Self { name: name.into(), dim, inner: RwLock::new(Collection::default()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_dim(&self, len: usize) -> Result<()> {
        if len == self.dim {
            Ok(())
        } else {
            Err(Error::DimensionMismatch { expected: self.dim, actual: len })
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn dimension(&self) -> usize {
        self.dim
    }

    async fn add(&self, chunks: Vec<Chunk>) -> Result<Vec<ChunkId>> {
        for c in &chunks {
            self.check_dim(c.embedding.len())?;
        }
        let ids: Vec<ChunkId> = chunks.iter().map(|c| c.id.clone()).collect();
        let mut inner = self.inner.write();
        for c in chunks {
            inner.upsert(c);
        }
        debug!(collection = %self.name, added = ids.len(), total = inner.chunks.len(), "chunks added");
        Ok(ids)
    }

    async fn search(&self, vector: &[f32], options: &SearchOptions) -> Result<Vec<SearchResult>> {
        self.check_dim(vector.len())?;
        if options.top_k == 0 {
            return Ok(Vec::new());
        }
        let threshold = options.threshold.unwrap_or(f32::MIN);
        let hits: Vec<SearchResult> = {
            let inner = self.inner.read();
            inner
                .chunks
                .iter()
                .filter(|c| c.matches_filters(&options.filters))
                .filter_map(|c| {
                    let distance = 1.0 - cosine(vector, &c.embedding);
                    let score = distance_to_score(distance);
                    if score < threshold {
                        return None;
                    }
                    let chunk = if options.include_embeddings { Arc::clone(c) } else { Arc::new(c.without_embedding()) };
                    Some(SearchResult::new(chunk, score).with_distance(distance))
                })
                .collect()
        };
        let mut ranked = sort_and_rank(hits);
        ranked.truncate(options.top_k);
        Ok(ranked)
    }

    async fn get(&self, id: &str) -> Result<Option<Arc<Chunk>>> {
        let inner = self.inner.read();
        Ok(inner.positions.get(id).map(|&p| Arc::clone(&inner.chunks[p])))
    }

    async fn delete(&self, ids: &[ChunkId]) -> Result<usize> {
        let mut inner = self.inner.write();
        Ok(ids.iter().filter(|id| inner.remove(id)).count())
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        Ok(self.inner.write().remove_document(document_id))
    }

    async fn update(&self, chunk: Chunk) -> Result<()> {
        self.check_dim(chunk.embedding.len())?;
        let mut inner = self.inner.write();
        if !inner.positions.contains_key(&chunk.id) {
            return Err(Error::NotFound(chunk.id));
        }
        inner.upsert(chunk);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().chunks.len())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.chunks.clear();
        inner.positions.clear();
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }
}
