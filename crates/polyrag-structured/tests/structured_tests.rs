use anyhow::Result;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::Duration;

use polyrag_core::error::Error;
use polyrag_core::traits::{StructuredQuery, StructuredQueryEngine};
use polyrag_core::types::{FilterValue, Filters, Modality};
use polyrag_structured::TantivyStructuredEngine;

const HEAP: usize = 20_000_000;

fn write_harvest(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("harvest.csv");
    fs::write(
        &path,
        "crop,bed,yield_kg,organic\nkale,north,12,true\ngarlic,south,7.5,false\npotato,north,40,true\n",
    )
    .expect("write csv");
    path
}

#[tokio::test]
async fn csv_rows_are_searchable_records() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let engine = TantivyStructuredEngine::in_memory(HEAP)?;
    let ids = engine.index(&write_harvest(tmp.path())).await?;
    assert_eq!(ids.len(), 3);
    assert_eq!(engine.count().await?, 3);

    let hits = engine.query(&StructuredQuery::new("garlic", 5)).await?;
    assert_eq!(hits.len(), 1);
    let top = &hits[0];
    assert_eq!(top.rank, 1);
    assert!(top.score > 0.0 && top.score < 1.0);
    assert_eq!(top.chunk.metadata.modality, Modality::Structured);
    assert_eq!(top.chunk.metadata.custom.get("crop"), Some(&Value::from("garlic")));
    assert!(top.chunk.embedding.is_empty());
    Ok(())
}

#[tokio::test]
async fn reindexing_a_file_replaces_its_rows() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let engine = TantivyStructuredEngine::in_memory(HEAP)?;
    let path = write_harvest(tmp.path());
    engine.index(&path).await?;
    fs::write(&path, "crop,bed\nonion,east\n")?;
    engine.index(&path).await?;
    assert_eq!(engine.count().await?, 1);
    assert!(engine.query(&StructuredQuery::new("kale", 5)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn column_filters_narrow_results() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let engine = TantivyStructuredEngine::in_memory(HEAP)?;
    engine.index(&write_harvest(tmp.path())).await?;

    let mut filters = Filters::new();
    filters.insert("bed".to_string(), FilterValue::from("north"));
    let query = StructuredQuery { filters, ..StructuredQuery::new("", 10) };
    let hits = engine.query(&query).await?;
    let crops: Vec<_> = hits.iter().filter_map(|h| h.chunk.metadata.custom.get("crop").cloned()).collect();
    assert_eq!(crops.len(), 2);
    assert!(crops.contains(&Value::from("kale")));
    assert!(crops.contains(&Value::from("potato")));
    Ok(())
}

#[tokio::test]
async fn json_lines_and_json_arrays_index() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let engine = TantivyStructuredEngine::in_memory(HEAP)?;
    let jsonl = tmp.path().join("tools.jsonl");
    fs::write(&jsonl, "{\"tool\":\"hoe\",\"count\":2}\n{\"tool\":\"rake\",\"count\":1}\n")?;
    let json = tmp.path().join("seeds.json");
    fs::write(&json, r#"{"seeds":[{"name":"bean"},{"name":"pea"}]}"#)?;
    engine.index(&jsonl).await?;
    engine.index(&json).await?;
    assert_eq!(engine.count().await?, 4);
    let hits = engine.query(&StructuredQuery::new("rake", 3)).await?;
    assert_eq!(hits[0].chunk.metadata.custom.get("tool"), Some(&Value::from("rake")));
    Ok(())
}

#[tokio::test]
async fn unknown_tabular_extension_is_rejected() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let engine = TantivyStructuredEngine::in_memory(HEAP)?;
    let path = tmp.path().join("sheet.xlsx");
    fs::write(&path, "binary")?;
    let err = engine.index(&path).await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedContentType(_)));
    Ok(())
}

#[tokio::test]
async fn on_disk_index_survives_reopen() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let data = tempfile::tempdir()?;
    {
        let engine = TantivyStructuredEngine::open_in_dir(tmp.path(), HEAP)?;
        engine.index(&write_harvest(data.path())).await?;
    }
    let reopened = TantivyStructuredEngine::open_in_dir(tmp.path(), HEAP)?;
    assert_eq!(reopened.count().await?, 3);
    assert!(reopened.health_check().await);
    let hits = reopened.query(&StructuredQuery::new("potato", 2)).await?;
    assert_eq!(hits.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn caller_timeout_fires_while_a_large_file_indexes() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("ledger.csv");
    let mut rows = String::from("entry,dozens\n");
    for i in 0..20_000 {
        rows.push_str(&format!("egg sale {i},{}\n", i % 17));
    }
    fs::write(&path, rows)?;
    let engine = TantivyStructuredEngine::in_memory(HEAP)?;

    let attempt = tokio::time::timeout(Duration::from_millis(1), engine.index(&path)).await;
    assert!(attempt.is_err(), "the single runtime thread stayed free to fire the timer");

    // the abandoned write still lands
    for _ in 0..400 {
        if engine.count().await? == 20_000 {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("background indexing never finished");
}
