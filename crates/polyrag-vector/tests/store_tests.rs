use std::sync::Arc;

use polyrag_core::error::Error;
use polyrag_core::traits::{SearchOptions, VectorStore};
use polyrag_core::types::{Chunk, ChunkMetadata, FilterValue, Filters, Modality};
use polyrag_embed::HashEmbeddingProvider;
use polyrag_vector::{InMemoryVectorStore, LanceVectorStore};

const DIM: usize = 64;

fn corpus() -> Vec<Chunk> {
    let embedder = HashEmbeddingProvider::ready(DIM);
    let texts = [
        ("c1", "doc-a", "raised bed soil mix with compost", vec!["garden"]),
        ("c2", "doc-a", "drip irrigation timer settings", vec!["garden", "water"]),
        ("c3", "doc-b", "wood stove chimney cleaning", vec!["heating"]),
        ("c4", "doc-c", "rainwater cistern first flush diverter", vec!["water"]),
    ];
    texts
        .iter()
        .enumerate()
        .map(|(i, (id, doc, text, tags))| {
            let meta = ChunkMetadata {
                source: Some(format!("/notes/{doc}.txt")),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..ChunkMetadata::for_modality(Modality::Text)
            };
            Chunk::new(*id, *doc, *text)
                .with_index(i)
                .with_embedding(embedder.embed_text_sync(text))
                .with_metadata(meta)
        })
        .collect()
}

async fn exercise_store(store: &dyn VectorStore) {
    let chunks = corpus();
    let ids = store.add(chunks.clone()).await.expect("add");
    assert_eq!(ids.len(), 4);
    assert_eq!(store.count().await.expect("count"), 4);

    // searching with a chunk's own embedding returns it first with the top score
    for chunk in &chunks {
        let hits = store.search(&chunk.embedding, &SearchOptions::top_k(3)).await.expect("search");
        assert_eq!(hits[0].id(), chunk.id);
        assert_eq!(hits[0].rank, 1);
        assert!(hits[0].score > 0.999, "score={}", hits[0].score);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score && w[0].rank < w[1].rank));
        assert!(hits[0].chunk.embedding.is_empty(), "embeddings omitted by default");
    }

    // equality on a list field is containment; a list value is membership
    let mut filters = Filters::new();
    filters.insert("tags".into(), FilterValue::from("water"));
    let water = store.search(&chunks[0].embedding, &SearchOptions::top_k(10).with_filters(filters)).await.expect("search");
    let mut water_ids: Vec<&str> = water.iter().map(|h| h.id()).collect();
    water_ids.sort_unstable();
    assert_eq!(water_ids, vec!["c2", "c4"]);

    let mut filters = Filters::new();
    filters.insert("document_id".into(), FilterValue::OneOf(vec!["doc-b".into(), "doc-c".into()]));
    let docs = store.search(&chunks[0].embedding, &SearchOptions::top_k(10).with_filters(filters)).await.expect("search");
    assert_eq!(docs.len(), 2);

    let with_vectors = SearchOptions { include_embeddings: true, ..SearchOptions::top_k(1) };
    let hit = store.search(&chunks[2].embedding, &with_vectors).await.expect("search");
    assert_eq!(hit[0].chunk.embedding.len(), DIM);

    let strict = SearchOptions { threshold: Some(0.999), ..SearchOptions::top_k(10) };
    let exact = store.search(&chunks[1].embedding, &strict).await.expect("search");
    assert_eq!(exact.iter().map(|h| h.id()).collect::<Vec<_>>(), vec!["c2"], "threshold drops weaker hits");

    // update replaces content and embedding atomically
    let replacement = Chunk::new("c3", "doc-b", "pellet stove hopper")
        .with_embedding(HashEmbeddingProvider::ready(DIM).embed_text_sync("pellet stove hopper"))
        .with_metadata(ChunkMetadata::for_modality(Modality::Text));
    store.update(replacement.clone()).await.expect("update");
    let got = store.get("c3").await.expect("get").expect("present");
    assert_eq!(got.content, "pellet stove hopper");
    assert_eq!(got.embedding, replacement.embedding);

    let missing = store.update(Chunk::new("nope", "d", "x").with_embedding(vec![0.0; DIM])).await;
    assert!(matches!(missing, Err(Error::NotFound(_))));

    let wrong_dim = store.add(vec![Chunk::new("short", "d", "x").with_embedding(vec![1.0; 3])]).await;
    assert!(matches!(wrong_dim, Err(Error::DimensionMismatch { expected: DIM, actual: 3 })));
    assert_eq!(store.count().await.expect("count"), 4, "rejected batch writes nothing");

    let removed = store.delete(&["c1".to_string(), "zzz".to_string()]).await.expect("delete");
    assert_eq!(removed, 1);
    assert!(store.get("c1").await.expect("get").is_none());

    // c2 is the only chunk of doc-a left
    assert_eq!(store.delete_document("doc-a").await.expect("delete document"), 1);
    assert_eq!(store.delete_document("doc-a").await.expect("delete document"), 0);
    assert!(store.get("c2").await.expect("get").is_none());
    assert_eq!(store.count().await.expect("count"), 2);
    let hits = store.search(&chunks[3].embedding, &SearchOptions::top_k(1)).await.expect("search");
    assert_eq!(hits[0].id(), "c4", "positions stay consistent after a document delete");

    store.clear().await.expect("clear");
    assert_eq!(store.count().await.expect("count"), 0);
    assert!(store.health_check().await);
}

#[tokio::test]
async fn in_memory_store_contract() {
    let store = InMemoryVectorStore::new("notes", DIM);
    exercise_store(&store).await;
}

#[tokio::test]
async fn lance_store_contract() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let uri = tmp.path().to_string_lossy().to_string();
    let store = LanceVectorStore::open(&uri, "notes", DIM).await?;
    exercise_store(&store).await;
    Ok(())
}

#[tokio::test]
async fn lance_store_persists_across_reopen() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let uri = tmp.path().to_string_lossy().to_string();
    {
        let store = LanceVectorStore::open(&uri, "notes", DIM).await?;
        store.add(corpus()).await?;
    }
    let reopened = LanceVectorStore::open(&uri, "notes", DIM).await?;
    assert_eq!(reopened.count().await?, 4);
    let chunk = reopened.get("c2").await?.expect("persisted");
    assert_eq!(chunk.metadata.tags, vec!["garden".to_string(), "water".to_string()]);
    Ok(())
}

#[tokio::test]
async fn concurrent_readers_share_the_store() {
    let store = Arc::new(InMemoryVectorStore::new("notes", DIM));
    store.add(corpus()).await.expect("add");
    let query = corpus()[1].embedding.clone();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let query = query.clone();
            tokio::spawn(async move { store.search(&query, &SearchOptions::top_k(1)).await })
        })
        .collect();
    for h in handles {
        let hits = h.await.expect("join").expect("search");
        assert_eq!(hits[0].id(), "c2");
    }
}
