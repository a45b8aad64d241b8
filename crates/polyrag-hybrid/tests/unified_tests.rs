use anyhow::Result;
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use polyrag_core::error::Error;
use polyrag_core::health::{ComponentHealth, HealthStatus};
use polyrag_core::traits::{EmbeddingProvider, VectorStore};
use polyrag_core::types::{ChunkId, ContentType, Filters, Modality, Route, SearchResult};
use polyrag_embed::{HashEmbeddingProvider, ResilientEmbedder};
use polyrag_hybrid::{ModalityRetriever, SearchRequest, StructuredRetriever, TextRetriever, UnifiedRetriever};
use polyrag_structured::TantivyStructuredEngine;
use polyrag_vector::InMemoryVectorStore;

const DIM: usize = 64;

fn text_retriever() -> Arc<TextRetriever> {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::ready(DIM));
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new("text", DIM));
    Arc::new(TextRetriever::new(embedder, store).expect("dims agree"))
}

fn structured_retriever() -> Arc<StructuredRetriever> {
    let engine = TantivyStructuredEngine::in_memory(20_000_000).expect("ram index");
    Arc::new(StructuredRetriever::new(Arc::new(engine)))
}

fn write_notes(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("notes.txt");
    fs::write(
        &path,
        "Rotate the chickens to fresh pasture every week.\n\nMulch tomato beds with straw to keep moisture in.\n\nCheck the rain barrel filter after storms.",
    )
    .expect("write notes");
    path
}

fn write_inventory(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("inventory.csv");
    fs::write(&path, "item,count\nstraw bales,12\ntomato cages,30\n").expect("write csv");
    path
}

struct StalledRetriever {
    modality: Modality,
    delay: Duration,
}

#[async_trait]
impl ModalityRetriever for StalledRetriever {
    fn modality(&self) -> Modality {
        self.modality
    }

    async fn search(&self, _query: &str, _top_k: usize, _filters: &Filters) -> polyrag_core::Result<Vec<SearchResult>> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }

    async fn index(&self, _path: &Path, _ct: ContentType, _d: Option<&str>) -> polyrag_core::Result<Vec<ChunkId>> {
        Ok(Vec::new())
    }

    async fn count(&self) -> polyrag_core::Result<usize> {
        Ok(0)
    }

    async fn health(&self) -> ComponentHealth {
        ComponentHealth::new(self.modality.as_str(), HealthStatus::Unhealthy)
    }
}

struct BrokenRetriever(Modality);

#[async_trait]
impl ModalityRetriever for BrokenRetriever {
    fn modality(&self) -> Modality {
        self.0
    }

    async fn search(&self, _query: &str, _top_k: usize, _filters: &Filters) -> polyrag_core::Result<Vec<SearchResult>> {
        Err(Error::Backend("store offline".into()))
    }

    async fn index(&self, _path: &Path, _ct: ContentType, _d: Option<&str>) -> polyrag_core::Result<Vec<ChunkId>> {
        Err(Error::Backend("store offline".into()))
    }

    async fn count(&self) -> polyrag_core::Result<usize> {
        Ok(0)
    }

    async fn health(&self) -> ComponentHealth {
        ComponentHealth::new(self.0.as_str(), HealthStatus::Unhealthy)
    }
}

/// Fails every search with an input error rather than an outage.
struct RejectingRetriever;

#[async_trait]
impl ModalityRetriever for RejectingRetriever {
    fn modality(&self) -> Modality {
        Modality::Structured
    }

    async fn search(&self, _query: &str, _top_k: usize, _filters: &Filters) -> polyrag_core::Result<Vec<SearchResult>> {
        Err(Error::EmptyInput)
    }

    async fn index(&self, _path: &Path, _ct: ContentType, _d: Option<&str>) -> polyrag_core::Result<Vec<ChunkId>> {
        Ok(Vec::new())
    }

    async fn count(&self) -> polyrag_core::Result<usize> {
        Ok(0)
    }

    async fn health(&self) -> ComponentHealth {
        ComponentHealth::new("structured", HealthStatus::Healthy)
    }
}

#[tokio::test]
async fn indexed_paragraph_comes_back_first() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let unified = UnifiedRetriever::builder().retriever(text_retriever()).build()?;
    let ids = unified.index_content("text", &write_notes(tmp.path()), Some("homestead notes")).await?;
    assert_eq!(ids.len(), 3);

    let hits = unified.search("Mulch tomato beds with straw to keep moisture in.", 3, Some(Modality::Text)).await?;
    assert_eq!(hits[0].rank, 1);
    assert_eq!(hits[0].chunk.content, "Mulch tomato beds with straw to keep moisture in.");
    assert!(hits[0].score > 0.999);
    assert_eq!(hits[0].chunk.metadata.title.as_deref(), Some("homestead notes"));
    Ok(())
}

#[tokio::test]
async fn reindexing_a_shorter_file_drops_its_old_chunks() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("log.txt");
    fs::write(&path, "alpha one\n\nbeta two\n\ngamma obsolete paragraph")?;
    let text = text_retriever();
    let unified = UnifiedRetriever::builder().retriever(text.clone()).build()?;
    assert_eq!(unified.index_content("text", &path, None).await?.len(), 3);

    fs::write(&path, "alpha one")?;
    assert_eq!(unified.index_content("text", &path, None).await?.len(), 1);
    assert_eq!(text.count().await?, 1);

    let hits = unified.search("gamma obsolete paragraph", 5, Some(Modality::Text)).await?;
    assert!(hits.iter().all(|h| h.chunk.content == "alpha one"), "stale chunk survived: {hits:?}");
    Ok(())
}

#[tokio::test]
async fn image_search_fails_without_image_retriever_but_text_still_answers() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let unified = UnifiedRetriever::builder().retriever(text_retriever()).build()?;
    unified.index_path(&write_notes(tmp.path())).await?;

    let err = unified.search_by_image(&tmp.path().join("car.png"), 5).await.unwrap_err();
    assert!(matches!(err, Error::ModalityUnavailable(Modality::Image)));

    let hits = unified.search("rain barrel", 5, Some(Modality::Text)).await?;
    assert!(!hits.is_empty());
    Ok(())
}

#[tokio::test]
async fn explicit_unconfigured_modality_is_unavailable() -> Result<()> {
    let unified = UnifiedRetriever::builder().retriever(text_retriever()).build()?;
    let err = unified.search("anything", 5, Some(Modality::Structured)).await.unwrap_err();
    assert!(matches!(err, Error::ModalityUnavailable(Modality::Structured)));
    Ok(())
}

#[tokio::test]
async fn explicit_modality_beats_a_route_hint() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let unified = UnifiedRetriever::builder().retriever(text_retriever()).retriever(structured_retriever()).build()?;
    unified.index_path(&write_notes(tmp.path())).await?;
    unified.index_path(&write_inventory(tmp.path())).await?;
    let request = SearchRequest {
        route_hint: Some(Route::Single(Modality::Structured)),
        ..SearchRequest::new(5).with_modality(Some(Modality::Text))
    };
    let hits = unified.search_with("tomato cages", &request).await?;
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.chunk.metadata.modality == Modality::Text));
    Ok(())
}

#[tokio::test]
async fn detected_but_unconfigured_modality_falls_back_to_default() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let unified = UnifiedRetriever::builder().retriever(text_retriever()).build()?;
    unified.index_path(&write_notes(tmp.path())).await?;
    let hits = unified.search("show me pictures of a red car", 5, None).await?;
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.chunk.metadata.modality == Modality::Text));
    Ok(())
}

#[tokio::test]
async fn parallel_and_sequential_dispatch_agree() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let text = text_retriever();
    let structured = structured_retriever();
    let parallel = UnifiedRetriever::builder().retriever(text.clone()).retriever(structured.clone()).parallel(true).build()?;
    let sequential = UnifiedRetriever::builder().retriever(text).retriever(structured).parallel(false).build()?;
    parallel.index_path(&write_notes(tmp.path())).await?;
    parallel.index_path(&write_inventory(tmp.path())).await?;

    let query = "how many tomato cages are in the document";
    let a = parallel.search(query, 10, None).await?;
    let b = sequential.search(query, 10, None).await?;
    assert!(!a.is_empty());
    let summary = |hits: &[SearchResult]| hits.iter().map(|h| (h.id().to_string(), h.score, h.rank)).collect::<Vec<_>>();
    assert_eq!(summary(&a), summary(&b));
    assert!(a.iter().any(|h| h.chunk.metadata.modality == Modality::Structured));
    Ok(())
}

#[tokio::test]
async fn slow_modality_times_out_without_failing_the_query() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let unified = UnifiedRetriever::builder()
        .retriever(text_retriever())
        .retriever(Arc::new(StalledRetriever { modality: Modality::Image, delay: Duration::from_secs(5) }))
        .modality_timeout(Duration::from_millis(50))
        .build()?;
    unified.index_path(&write_notes(tmp.path())).await?;

    let started = std::time::Instant::now();
    let hits = unified.search("show me a document about chickens", 5, None).await?;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!hits.is_empty());
    Ok(())
}

#[tokio::test]
async fn every_modality_failing_is_an_error() -> Result<()> {
    for parallel in [true, false] {
        let unified = UnifiedRetriever::builder()
            .retriever(Arc::new(BrokenRetriever(Modality::Text)))
            .retriever(Arc::new(BrokenRetriever(Modality::Structured)))
            .parallel(parallel)
            .build()?;
        let err = unified.search("how many documents", 5, None).await.unwrap_err();
        assert!(matches!(err, Error::NoModalityAvailable));
    }
    Ok(())
}

#[tokio::test]
async fn one_broken_modality_contributes_nothing() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let unified = UnifiedRetriever::builder()
        .retriever(text_retriever())
        .retriever(Arc::new(BrokenRetriever(Modality::Structured)))
        .build()?;
    unified.index_path(&write_notes(tmp.path())).await?;
    let hits = unified.search("how many chickens are in the document", 5, None).await?;
    assert!(!hits.is_empty());
    Ok(())
}

#[tokio::test]
async fn a_large_page_is_filled_across_two_modalities() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let notes = tmp.path().join("seeds.txt");
    let paragraphs: Vec<String> = (0..25).map(|i| format!("seed packet note {i}")).collect();
    fs::write(&notes, paragraphs.join("\n\n"))?;
    let sheet = tmp.path().join("seeds.csv");
    let rows: String = (0..25).map(|i| format!("seed packet {i},{i}\n")).collect();
    fs::write(&sheet, format!("entry,count\n{rows}"))?;

    let unified = UnifiedRetriever::builder().retriever(text_retriever()).retriever(structured_retriever()).build()?;
    unified.index_path(&notes).await?;
    unified.index_path(&sheet).await?;
    assert!(unified.fusion_config().max_results() < 30);

    let request = SearchRequest {
        route_hint: Some(Route::Multi(vec![Modality::Text, Modality::Structured])),
        ..SearchRequest::new(30)
    };
    let hits = unified.search_with("seed packet", &request).await?;
    assert_eq!(hits.len(), 30);
    assert!(hits.iter().any(|h| h.chunk.metadata.modality == Modality::Structured));
    assert!(hits.iter().any(|h| h.chunk.metadata.modality == Modality::Text));
    Ok(())
}

#[tokio::test]
async fn a_rejected_query_still_leaves_other_modalities_answering() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let unified = UnifiedRetriever::builder()
        .retriever(text_retriever())
        .retriever(Arc::new(RejectingRetriever))
        .build()?;
    unified.index_path(&write_notes(tmp.path())).await?;
    let hits = unified.search("how many chickens are in the document", 5, None).await?;
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.chunk.metadata.modality == Modality::Text));
    Ok(())
}

#[tokio::test]
async fn content_types_are_routed_or_rejected_by_name() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let unified = UnifiedRetriever::builder().retriever(text_retriever()).build()?;
    let path = write_notes(tmp.path());

    let err = unified.index_content("hologram", &path, None).await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedContentType(ref name) if name == "hologram"));

    let err = unified.index_content("audio", &path, None).await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedContentType(ref name) if name == "audio"));

    let err = unified.index_content("tabular", &write_inventory(tmp.path()), None).await.unwrap_err();
    assert!(matches!(err, Error::ModalityUnavailable(Modality::Structured)));

    let json = tmp.path().join("plan.json");
    fs::write(&json, r#"{"season":"spring","crops":["peas","kale"]}"#)?;
    let ids = unified.index_content("json", &json, None).await?;
    assert_eq!(ids.len(), 1);
    Ok(())
}

#[tokio::test]
async fn directory_ingest_reports_per_modality() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    write_notes(tmp.path());
    write_inventory(tmp.path());
    fs::write(tmp.path().join("firmware.bin"), [0u8, 1, 2])?;
    fs::write(tmp.path().join("broken.json"), "{not json")?;

    let unified = UnifiedRetriever::builder().retriever(text_retriever()).retriever(structured_retriever()).build()?;
    let report = unified.ingest_directory(tmp.path()).await?;
    assert_eq!(report.indexed.get(&Modality::Text), Some(&3));
    assert_eq!(report.indexed.get(&Modality::Structured), Some(&2));
    assert_eq!(report.files_indexed, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.total_chunks(), 5);
    Ok(())
}

struct RefusingModel;

#[async_trait]
impl EmbeddingProvider for RefusingModel {
    fn name(&self) -> &str {
        "refusing"
    }
    fn dim(&self) -> usize {
        DIM
    }
    async fn initialize(&self) -> polyrag_core::Result<()> {
        Err(Error::ModelLoad("weights missing".into()))
    }
    async fn close(&self) -> polyrag_core::Result<()> {
        Ok(())
    }
    async fn embed_texts(&self, _texts: &[String]) -> polyrag_core::Result<Vec<Vec<f32>>> {
        Err(Error::NotInitialized("refusing".into()))
    }
    async fn embed_images(&self, _paths: &[std::path::PathBuf]) -> polyrag_core::Result<Vec<Vec<f32>>> {
        Err(Error::NotInitialized("refusing".into()))
    }
    async fn health_check(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn degraded_modality_is_distinguishable_from_outage() -> Result<()> {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(ResilientEmbedder::initialize(Arc::new(RefusingModel)).await);
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new("text", DIM));
    let degraded_text = Arc::new(TextRetriever::new(embedder, store)?);
    let unified = UnifiedRetriever::builder().retriever(degraded_text).retriever(structured_retriever()).build()?;

    let report = unified.health().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    let text = report.component("text").expect("text component");
    assert_eq!(text.status, HealthStatus::Degraded);
    assert_eq!(text.degradations.len(), 1);
    assert_eq!(report.component("structured").map(|c| c.status), Some(HealthStatus::Healthy));
    assert_eq!(report.component("unified").map(|c| c.status), Some(HealthStatus::Degraded));

    let outage = UnifiedRetriever::builder().retriever(Arc::new(BrokenRetriever(Modality::Text))).build()?;
    assert_eq!(outage.health().await.status, HealthStatus::Unhealthy);
    Ok(())
}
