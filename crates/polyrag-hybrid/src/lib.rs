pub mod bootstrap;
pub mod enhance;
pub mod eval;
pub mod fusion;
pub mod modality;
pub mod orchestrator;
pub mod rerank;
pub mod retriever;
pub mod stats;
pub mod unified;

pub use bootstrap::{build_orchestrator, build_pipeline, build_pipeline_in, Pipeline};
pub use enhance::{EnhancedQuery, QueryEnhancer, RoutingInfo};
pub use fusion::{fuse, rrf_fusion, weighted_fusion, ModalityResults};
pub use modality::ModalityDetector;
pub use orchestrator::{HybridOrchestrator, HybridResponse};
pub use rerank::{LexicalReRanker, ReRankingConfig};
pub use retriever::{ImageRetriever, ModalityRetriever, StructuredRetriever, TextRetriever};
pub use unified::{IngestReport, RetrievalBackend, SearchRequest, UnifiedRetriever};
