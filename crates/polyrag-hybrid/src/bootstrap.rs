//! Wiring a full pipeline from [`Settings`].

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use polyrag_core::config::{expand_path, Settings, StoreBackend, StoreSettings};
use polyrag_core::error::Result;
use polyrag_core::traits::{EmbeddingProvider, VectorStore};
use polyrag_core::types::ModalityFusionConfig;
use polyrag_embed::{image_embedder, text_embedder};
use polyrag_structured::TantivyStructuredEngine;
use polyrag_vector::{InMemoryVectorStore, LanceVectorStore};

use crate::enhance::QueryEnhancer;
use crate::orchestrator::HybridOrchestrator;
use crate::rerank::LexicalReRanker;
use crate::retriever::{ImageRetriever, StructuredRetriever, TextRetriever};
use crate::unified::{RetrievalBackend, UnifiedRetriever, UnifiedRetrieverBuilder};

pub struct Pipeline {
    pub retriever: Arc<UnifiedRetriever>,
    pub orchestrator: HybridOrchestrator,
}

pub async fn open_store(settings: &StoreSettings, collection: &str, dim: usize) -> Result<Arc<dyn VectorStore>> {
    Ok(match settings.backend {
        StoreBackend::Memory => Arc::new(InMemoryVectorStore::new(collection, dim)),
        StoreBackend::Lance => {
            let uri = expand_path(&settings.lance_uri);
            Arc::new(LanceVectorStore::open(&uri.to_string_lossy(), collection, dim).await?)
        }
    })
}

/// [`build_pipeline`] with relative paths taken from the configuration directory.
pub async fn build_pipeline_in(settings: &Settings, base: &Path) -> Result<Pipeline> {
    build_pipeline(&settings.clone().rooted_at(base)).await
}

pub async fn build_pipeline(settings: &Settings) -> Result<Pipeline> {
    settings.validate()?;
    let fusion = ModalityFusionConfig::new(settings.fusion.clone())?;
    let mut builder = UnifiedRetrieverBuilder::from_settings(&settings.unified, fusion);

    if settings.unified.enable_text {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(text_embedder(&settings.embedding).await);
        let store = open_store(&settings.store, &settings.store.text_collection, embedder.dim()).await?;
        builder = builder.retriever(Arc::new(TextRetriever::new(embedder, store)?));
    }
    if settings.unified.enable_image {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(image_embedder(&settings.embedding).await);
        let store = open_store(&settings.store, &settings.store.image_collection, embedder.dim()).await?;
        builder = builder.retriever(Arc::new(ImageRetriever::new(embedder, store)?));
    }
    if settings.unified.enable_structured {
        let engine = Arc::new(TantivyStructuredEngine::open(&settings.structured)?);
        builder = builder.retriever(Arc::new(StructuredRetriever::new(engine)));
    }

    let retriever = Arc::new(builder.build()?);
    let backend: Arc<dyn RetrievalBackend> = retriever.clone();
    let mut orchestrator = HybridOrchestrator::new(backend, settings.orchestrator.clone())
        .with_enhancer(QueryEnhancer::rule_based(retriever.detector().clone()));
    if settings.orchestrator.enable_rerank {
        orchestrator = orchestrator.with_reranker(Arc::new(LexicalReRanker::new(settings.rerank.clone())));
    }
    info!(modalities = ?retriever.modalities(), "pipeline ready");
    Ok(Pipeline { retriever, orchestrator })
}

pub async fn build_orchestrator(settings: &Settings) -> Result<HybridOrchestrator> {
    Ok(build_pipeline(settings).await?.orchestrator)
}
