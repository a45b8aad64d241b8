use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use polyrag_core::error::{Error, Result};
use polyrag_core::health::{ComponentHealth, HealthStatus};
use polyrag_core::traits::{StructuredQuery, StructuredQueryEngine};
use polyrag_core::types::{ChunkId, ContentType, Filters, Modality, SearchResult};

use super::ModalityRetriever;

pub struct StructuredRetriever {
    engine: Arc<dyn StructuredQueryEngine>,
}

impl StructuredRetriever {
    pub fn new(engine: Arc<dyn StructuredQueryEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ModalityRetriever for StructuredRetriever {
    fn modality(&self) -> Modality {
        Modality::Structured
    }

    async fn search(&self, query: &str, top_k: usize, filters: &Filters) -> Result<Vec<SearchResult>> {
        let query = StructuredQuery { filters: filters.clone(), ..StructuredQuery::new(query, top_k) };
        self.engine.query(&query).await
    }

    async fn index(&self, path: &Path, content_type: ContentType, _description: Option<&str>) -> Result<Vec<ChunkId>> {
        if content_type != ContentType::Tabular {
            return Err(Error::UnsupportedContentType(format!("{content_type} content for the structured retriever")));
        }
        self.engine.index(path).await
    }

    async fn count(&self) -> Result<usize> {
        self.engine.count().await
    }

    async fn health(&self) -> ComponentHealth {
        let status = if self.engine.health_check().await { HealthStatus::Healthy } else { HealthStatus::Unhealthy };
        ComponentHealth::new(Modality::Structured.as_str(), status)
    }
}
