//! One entry point over every configured modality retriever.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use polyrag_core::config::UnifiedSettings;
use polyrag_core::data_processor::collect_files;
use polyrag_core::error::{Error, Result};
use polyrag_core::health::{ComponentHealth, HealthReport, HealthStatus};
use polyrag_core::types::{
    ChunkId, ContentType, Filters, FusionMethod, Modality, ModalityFusionConfig, ModalityWeights, Route, SearchResult,
};

use crate::fusion::{fuse, ModalityResults};
use crate::modality::ModalityDetector;
use crate::retriever::ModalityRetriever;

/// Per-call retrieval options. Nothing here touches shared configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub top_k: usize,
    /// Explicit modality; overrides detection and fails if not configured.
    pub modality: Option<Modality>,
    /// Route computed upstream (e.g. by the query classifier).
    pub route_hint: Option<Route>,
    pub filters: Filters,
    pub weights: Option<ModalityWeights>,
    pub method: Option<FusionMethod>,
}

impl SearchRequest {
    pub fn new(top_k: usize) -> Self {
        Self { top_k, modality: None, route_hint: None, filters: Filters::new(), weights: None, method: None }
    }

    pub fn with_modality(mut self, modality: Option<Modality>) -> Self {
        self.modality = modality;
        self
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Outcome of a directory ingestion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Chunks or records written, per modality.
    pub indexed: BTreeMap<Modality, usize>,
    pub files_indexed: usize,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl IngestReport {
    pub fn total_chunks(&self) -> usize {
        self.indexed.values().sum()
    }
}

pub struct UnifiedRetrieverBuilder {
    retrievers: BTreeMap<Modality, Arc<dyn ModalityRetriever>>,
    detector: ModalityDetector,
    fusion: ModalityFusionConfig,
    parallel: bool,
    modality_timeout: Duration,
}

impl Default for UnifiedRetrieverBuilder {
    fn default() -> Self {
        Self {
            retrievers: BTreeMap::new(),
            detector: ModalityDetector::default(),
            fusion: ModalityFusionConfig::default(),
            parallel: true,
            modality_timeout: Duration::from_secs(2),
        }
    }
}

impl UnifiedRetrieverBuilder {
    pub fn from_settings(settings: &UnifiedSettings, fusion: ModalityFusionConfig) -> Self {
        Self {
            detector: ModalityDetector::new(settings.default_modality, settings.auto_detect),
            fusion,
            parallel: settings.parallel,
            modality_timeout: Duration::from_millis(settings.modality_timeout_ms),
            ..Self::default()
        }
    }

    pub fn retriever(mut self, retriever: Arc<dyn ModalityRetriever>) -> Self {
        self.retrievers.insert(retriever.modality(), retriever);
        self
    }

    pub fn detector(mut self, detector: ModalityDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn fusion(mut self, fusion: ModalityFusionConfig) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn modality_timeout(mut self, timeout: Duration) -> Self {
        self.modality_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<UnifiedRetriever> {
        if self.retrievers.is_empty() {
            return Err(Error::Configuration("at least one modality retriever is required".to_string()));
        }
        info!(
            modalities = ?self.retrievers.keys().collect::<Vec<_>>(),
            parallel = self.parallel,
            "unified retriever ready"
        );
        Ok(UnifiedRetriever {
            retrievers: self.retrievers,
            detector: self.detector,
            fusion: self.fusion,
            parallel: self.parallel,
            modality_timeout: self.modality_timeout,
        })
    }
}

pub struct UnifiedRetriever {
    retrievers: BTreeMap<Modality, Arc<dyn ModalityRetriever>>,
    detector: ModalityDetector,
    fusion: ModalityFusionConfig,
    parallel: bool,
    modality_timeout: Duration,
}

impl UnifiedRetriever {
    pub fn builder() -> UnifiedRetrieverBuilder {
        UnifiedRetrieverBuilder::default()
    }

    pub fn modalities(&self) -> Vec<Modality> {
        self.retrievers.keys().copied().collect()
    }

    pub fn detector(&self) -> &ModalityDetector {
        &self.detector
    }

    pub fn fusion_config(&self) -> &ModalityFusionConfig {
        &self.fusion
    }

    pub async fn search(&self, query: &str, top_k: usize, modality: Option<Modality>) -> Result<Vec<SearchResult>> {
        self.search_with(query, &SearchRequest::new(top_k).with_modality(modality)).await
    }

    pub async fn search_with(&self, query: &str, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        if request.top_k == 0 {
            return Ok(Vec::new());
        }
        let modalities = self.select(query, request)?;
        // the fused list must be able to fill the requested page
        let mut fusion = self.fusion.with_max_results_at_least(request.top_k);
        if let Some(weights) = request.weights {
            fusion = fusion.with_weights(weights)?;
        }
        if let Some(method) = request.method {
            fusion = fusion.with_method(method);
        }

        let outcomes = if self.parallel {
            self.dispatch_parallel(query, request, &modalities).await
        } else {
            self.dispatch_sequential(query, request, &modalities).await
        };

        let mut results = ModalityResults::new();
        let mut answered = 0usize;
        for (modality, outcome) in outcomes {
            match outcome {
                Ok(hits) => {
                    answered += 1;
                    debug!(modality = %modality, hits = hits.len(), "modality answered");
                    results.insert(modality, hits);
                }
                Err(e) => {
                    if e.is_modality_failure() {
                        warn!(modality = %modality, error = %e, "modality search failed; contributing no results");
                    } else {
                        error!(modality = %modality, error = %e, "modality search rejected the query; contributing no results");
                    }
                    results.insert(modality, Vec::new());
                }
            }
        }
        if answered == 0 {
            return Err(Error::NoModalityAvailable);
        }

        let mut fused = fuse(&results, &fusion);
        fused.truncate(request.top_k);
        Ok(fused)
    }

    /// Image-to-image search. Fails outright without an image retriever.
    pub async fn search_by_image(&self, path: &Path, top_k: usize) -> Result<Vec<SearchResult>> {
        let retriever = self.retrievers.get(&Modality::Image).ok_or(Error::ModalityUnavailable(Modality::Image))?;
        let mut hits = retriever.search_by_image(path, top_k).await?;
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Route one file by a content type name such as `text`, `image` or `tabular`.
    pub async fn index_content(&self, content_type: &str, path: &Path, description: Option<&str>) -> Result<Vec<ChunkId>> {
        let content_type: ContentType = content_type.parse()?;
        self.index_typed(content_type, path, description).await
    }

    pub async fn index_typed(
        &self,
        content_type: ContentType,
        path: &Path,
        description: Option<&str>,
    ) -> Result<Vec<ChunkId>> {
        let modality = match content_type {
            ContentType::Text | ContentType::Json => Modality::Text,
            ContentType::Image => Modality::Image,
            ContentType::Tabular => Modality::Structured,
            ContentType::Audio | ContentType::Video => {
                return Err(Error::UnsupportedContentType(content_type.as_str().to_string()))
            }
        };
        let retriever = self.retrievers.get(&modality).ok_or(Error::ModalityUnavailable(modality))?;
        retriever.index(path, content_type, description).await
    }

    /// Index a file, guessing its content type from the extension.
    pub async fn index_path(&self, path: &Path) -> Result<Vec<ChunkId>> {
        let content_type = ContentType::from_path(path).ok_or_else(|| {
            let ext = path.extension().map(|e| e.to_string_lossy().to_string()).unwrap_or_default();
            Error::UnsupportedContentType(format!("file extension '{ext}'"))
        })?;
        self.index_typed(content_type, path, None).await
    }

    pub async fn ingest_directory(&self, dir: &Path) -> Result<IngestReport> {
        if !dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", dir.display()),
            )));
        }
        Ok(self.ingest_files(collect_files(dir), |_| {}).await)
    }

    /// Index each file in order; `on_file` runs after every file.
    pub async fn ingest_files(
        &self,
        files: Vec<(PathBuf, Option<ContentType>)>,
        mut on_file: impl FnMut(&Path) + Send,
    ) -> IngestReport {
        let mut report = IngestReport::default();
        for (path, content_type) in files {
            match content_type {
                None => {
                    debug!(path = %path.display(), "skipping unsupported file");
                    report.skipped.push(path.clone());
                }
                Some(ct) => match self.index_typed(ct, &path, None).await {
                    Ok(ids) => {
                        let modality = match ct {
                            ContentType::Image => Modality::Image,
                            ContentType::Tabular => Modality::Structured,
                            _ => Modality::Text,
                        };
                        *report.indexed.entry(modality).or_default() += ids.len();
                        report.files_indexed += 1;
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to index file");
                        report.failed.push((path.clone(), e.to_string()));
                    }
                },
            }
            on_file(&path);
        }
        info!(files = report.files_indexed, chunks = report.total_chunks(), failed = report.failed.len(), "ingest finished");
        report
    }

    /// Own status plus one entry per configured modality retriever.
    pub async fn health(&self) -> HealthReport {
        let mut components: Vec<ComponentHealth> =
            join_all(self.retrievers.values().map(|r| r.health())).await;
        let serving = components.iter().filter(|c| c.status.is_serving()).count();
        let healthy = components.iter().filter(|c| c.status == HealthStatus::Healthy).count();
        let own = if healthy == components.len() {
            HealthStatus::Healthy
        } else if serving > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
        let names: Vec<&str> = self.retrievers.keys().map(|m| m.as_str()).collect();
        components.insert(
            0,
            ComponentHealth::new("unified", own).with_detail(format!("{serving}/{} modalities serving: {}", names.len(), names.join(","))),
        );
        HealthReport::aggregate(components)
    }

    /// Modalities to query, in fixed order.
    fn select(&self, query: &str, request: &SearchRequest) -> Result<Vec<Modality>> {
        let route = match &request.route_hint {
            Some(hint) if request.modality.is_none() => hint.clone(),
            _ => self.detector.resolve(query, request.modality),
        };
        let mut wanted: Vec<Modality> =
            route.modalities().into_iter().filter(|m| self.retrievers.contains_key(m)).collect();
        wanted.sort();
        wanted.dedup();
        if !wanted.is_empty() {
            return Ok(wanted);
        }
        if let Some(m) = request.modality {
            return Err(Error::ModalityUnavailable(m));
        }
        let default = self.detector.default_modality();
        if self.retrievers.contains_key(&default) {
            debug!(?route, modality = %default, "detected modalities not configured; using default");
            return Ok(vec![default]);
        }
        Ok(self.modalities())
    }

    async fn dispatch_parallel(
        &self,
        query: &str,
        request: &SearchRequest,
        modalities: &[Modality],
    ) -> Vec<(Modality, Result<Vec<SearchResult>>)> {
        let handles: Vec<_> = modalities
            .iter()
            .filter_map(|m| self.retrievers.get(m).map(|r| (*m, Arc::clone(r))))
            .map(|(modality, retriever)| {
                let query = query.to_string();
                let filters = request.filters.clone();
                let top_k = request.top_k;
                let timeout = self.modality_timeout;
                let handle = tokio::spawn(async move {
                    guarded(modality, timeout, retriever.search(&query, top_k, &filters)).await
                });
                (modality, handle)
            })
            .collect();
        let (order, handles): (Vec<Modality>, Vec<_>) = handles.into_iter().unzip();
        join_all(handles)
            .await
            .into_iter()
            .zip(order)
            .map(|(joined, modality)| {
                let outcome = joined.unwrap_or_else(|e| {
                    Err(Error::TransientRetrieval { modality, reason: format!("search task failed: {e}") })
                });
                (modality, outcome)
            })
            .collect()
    }

    async fn dispatch_sequential(
        &self,
        query: &str,
        request: &SearchRequest,
        modalities: &[Modality],
    ) -> Vec<(Modality, Result<Vec<SearchResult>>)> {
        let mut out = Vec::with_capacity(modalities.len());
        for &modality in modalities {
            if let Some(retriever) = self.retrievers.get(&modality) {
                let outcome =
                    guarded(modality, self.modality_timeout, retriever.search(query, request.top_k, &request.filters))
                        .await;
                out.push((modality, outcome));
            }
        }
        out
    }
}

/// A timed-out call counts as a failed modality.
async fn guarded<F>(modality: Modality, timeout: Duration, call: F) -> Result<Vec<SearchResult>>
where
    F: Future<Output = Result<Vec<SearchResult>>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::TransientRetrieval {
            modality,
            reason: format!("no answer within {}ms", timeout.as_millis()),
        }),
    }
}

/// The retrieval stage as seen by the orchestrator.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    async fn retrieve(&self, query: &str, request: &SearchRequest) -> Result<Vec<SearchResult>>;
    async fn health(&self) -> HealthReport;
}

#[async_trait]
impl RetrievalBackend for UnifiedRetriever {
    async fn retrieve(&self, query: &str, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        self.search_with(query, request).await
    }

    async fn health(&self) -> HealthReport {
        UnifiedRetriever::health(self).await
    }
}
