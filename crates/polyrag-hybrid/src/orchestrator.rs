//! Enhancement, retrieval and re-ranking composed into one search call.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use polyrag_core::config::OrchestratorSettings;
use polyrag_core::error::Result;
use polyrag_core::health::HealthReport;
use polyrag_core::traits::ReRanker;
use polyrag_core::types::SearchResult;

use crate::enhance::{QueryEnhancer, RoutingInfo};
use crate::stats::{LatencySnapshot, LatencyStats, StageTimings};
use crate::unified::{RetrievalBackend, SearchRequest};

#[derive(Debug, Clone, Serialize)]
pub struct HybridResponse {
    pub query: String,
    pub working_query: String,
    pub results: Vec<SearchResult>,
    pub routing: Option<RoutingInfo>,
    pub reranked: bool,
    pub timings: StageTimings,
}

pub struct HybridOrchestrator {
    backend: Arc<dyn RetrievalBackend>,
    enhancer: Option<QueryEnhancer>,
    reranker: Option<Arc<dyn ReRanker>>,
    settings: OrchestratorSettings,
    stats: LatencyStats,
}

impl HybridOrchestrator {
    pub fn new(backend: Arc<dyn RetrievalBackend>, settings: OrchestratorSettings) -> Self {
        Self { backend, enhancer: None, reranker: None, settings, stats: LatencyStats::default() }
    }

    pub fn with_enhancer(mut self, enhancer: QueryEnhancer) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn ReRanker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn latency(&self) -> LatencySnapshot {
        self.stats.snapshot()
    }

    pub async fn health(&self) -> HealthReport {
        self.backend.health().await
    }

    /// At most `top_k` results, best first, ranks 1..n.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        Ok(self.search_detailed(query, SearchRequest::new(top_k)).await?.results)
    }

    /// Full pipeline. Enhancement and re-ranking failures fall back to the
    /// previous stage; a retrieval failure has nothing to fall back on and is
    /// returned.
    pub async fn search_detailed(&self, query: &str, request: SearchRequest) -> Result<HybridResponse> {
        let started = Instant::now();
        let top_k = request.top_k;
        if top_k == 0 {
            return Ok(HybridResponse {
                query: query.to_string(),
                working_query: query.to_string(),
                results: Vec::new(),
                routing: None,
                reranked: false,
                timings: StageTimings::default(),
            });
        }

        let t = Instant::now();
        let enhanced = match &self.enhancer {
            Some(enhancer) if self.settings.enable_enhancement => Some(enhancer.enhance(query)),
            _ => None,
        };
        let enhance_ms = elapsed_ms(t);
        let working_query = enhanced.as_ref().map_or_else(|| query.to_string(), |e| e.query.clone());
        let routing = enhanced.map(|e| e.routing);

        let mut backend_request = request.clone();
        backend_request.top_k = top_k.saturating_mul(self.settings.candidate_multiplier.max(1));
        if let Some(info) = &routing {
            backend_request.weights = backend_request.weights.or(info.weights);
            backend_request.method = backend_request.method.or(info.fusion_method);
            if backend_request.modality.is_none() && backend_request.route_hint.is_none() {
                backend_request.route_hint = info.route.clone();
            }
        }

        let t = Instant::now();
        let candidates = self.backend.retrieve(&working_query, &backend_request).await?;
        let retrieve_ms = elapsed_ms(t);

        let budget = Duration::from_millis(self.settings.latency_budget_ms);
        let mut rerank_ms = None;
        let mut reranked = false;
        let mut results = match &self.reranker {
            Some(reranker) if self.settings.enable_rerank && !candidates.is_empty() => {
                if self.settings.skip_rerank_over_budget && started.elapsed() >= budget {
                    debug!(elapsed_ms = elapsed_ms(started), "latency budget spent before re-ranking; skipping");
                    candidates
                } else {
                    let t = Instant::now();
                    // re-rank against what the user typed, not the enhanced probe
                    let outcome = reranker.rerank(query, &candidates).await;
                    rerank_ms = Some(elapsed_ms(t));
                    match outcome {
                        Ok(r) => {
                            reranked = true;
                            r
                        }
                        Err(e) => {
                            warn!(reranker = reranker.name(), error = %e, "re-ranking failed; keeping retrieval order");
                            candidates
                        }
                    }
                }
            }
            _ => candidates,
        };
        results.truncate(top_k);

        let timings = StageTimings { enhance_ms, retrieve_ms, rerank_ms, total_ms: elapsed_ms(started) };
        self.stats.record(&timings);
        if started.elapsed() > budget {
            debug!(total_ms = timings.total_ms, budget_ms = self.settings.latency_budget_ms, "latency budget exceeded");
        }
        if self.settings.annotate_timings {
            results = annotate_timings(results, &timings);
        }

        Ok(HybridResponse { query: query.to_string(), working_query, results, routing, reranked, timings })
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1_000.0
}

/// Best effort: results pass through unchanged if the note cannot be built.
fn annotate_timings(results: Vec<SearchResult>, timings: &StageTimings) -> Vec<SearchResult> {
    match serde_json::to_string(timings) {
        Ok(note) => results.iter().map(|r| r.annotated(format!("timings={note}"))).collect(),
        Err(e) => {
            debug!(error = %e, "timing annotation skipped");
            results
        }
    }
}
