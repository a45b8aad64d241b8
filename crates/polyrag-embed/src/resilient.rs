//! Primary-or-fallback embedding provider.
//!
//! The primary model is tried exactly once, at construction. If it cannot be
//! initialized the hash provider takes over for the lifetime of the value and
//! the switch is recorded as a degradation event.
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use polyrag_core::error::Result;
use polyrag_core::health::DegradationEvent;
use polyrag_core::traits::EmbeddingProvider;

use crate::hash::HashEmbeddingProvider;

pub struct ResilientEmbedder {
    name: String,
    active: Arc<dyn EmbeddingProvider>,
    degradation: Option<DegradationEvent>,
}

impl ResilientEmbedder {
    pub async fn initialize(primary: Arc<dyn EmbeddingProvider>) -> Self {
        let primary_name = primary.name().to_string();
        match primary.initialize().await {
            Ok(()) => {
                info!(provider = %primary_name, dim = primary.dim(), "embedding provider ready");
                Self { name: primary_name, active: primary, degradation: None }
            }
            Err(e) => {
                let fallback = HashEmbeddingProvider::ready(primary.dim()).with_max_batch_size(primary.max_batch_size());
                warn!(provider = %primary_name, error = %e, fallback = fallback.name(), "embedding provider failed to initialize, using hash fallback");
                let event = DegradationEvent::now(primary_name.clone(), e.to_string(), fallback.name());
                Self { name: primary_name, active: Arc::new(fallback), degradation: Some(event) }
            }
        }
    }

    /// Hash embeddings only, no model load attempted.
    pub fn fallback_only(dim: usize) -> Self {
        let fallback = HashEmbeddingProvider::ready(dim);
        Self { name: fallback.name().to_string(), active: Arc::new(fallback), degradation: None }
    }

    /// Name of the provider actually serving requests.
    pub fn active_name(&self) -> &str {
        self.active.name()
    }
}

#[async_trait]
impl EmbeddingProvider for ResilientEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.active.dim()
    }

    fn max_batch_size(&self) -> usize {
        self.active.max_batch_size()
    }

    fn is_degraded(&self) -> bool {
        self.degradation.is_some()
    }

    fn degradation_events(&self) -> Vec<DegradationEvent> {
        self.degradation.iter().cloned().collect()
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.active.close().await
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.active.embed_texts(texts).await
    }

    async fn embed_images(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        self.active.embed_images(paths).await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.active.embed_query(query).await
    }

    async fn health_check(&self) -> bool {
        self.active.health_check().await
    }
}
