use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{AllQuery, Query, QueryParser};
use tantivy::schema::{Field, Value as _};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info};

use polyrag_core::config::{expand_path, StructuredSettings};
use polyrag_core::data_processor::document_id_for;
use polyrag_core::error::{Error, Result};
use polyrag_core::traits::{StructuredQuery, StructuredQueryEngine};
use polyrag_core::types::{sort_and_rank, Chunk, ChunkId, ChunkMetadata, Filters, Modality, SearchResult};

use crate::records::{flatten_record, load_records, Record};
use crate::tantivy_utils::{build_schema, register_tokenizer};

const MIN_WRITER_HEAP: usize = 15_000_000;

#[derive(Clone, Copy)]
struct Fields {
    id: Field,
    document_id: Field,
    source: Field,
    row: Field,
    body: Field,
    record: Field,
}

/// BM25 search over tabular records.
///
/// Each record is one document: its flattened `key: value` text is indexed,
/// the raw JSON is stored. Scores are squashed into [0,1] as `s / (1 + s)`.
/// Index and search work runs on the blocking pool, never on an async worker.
pub struct TantivyStructuredEngine {
    core: Arc<Core>,
}

struct Core {
    index: Index,
    reader: IndexReader,
    fields: Fields,
    writer_heap: usize,
    write_lock: Mutex<()>,
}

impl TantivyStructuredEngine {
    pub fn open(settings: &StructuredSettings) -> Result<Self> {
        match settings.index_dir.as_deref() {
            Some(dir) => Self::open_in_dir(&expand_path(dir), settings.writer_heap_bytes),
            None => Self::in_memory(settings.writer_heap_bytes),
        }
    }

    pub fn in_memory(writer_heap: usize) -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()), writer_heap)
    }

    /// Open the index in `dir`, creating it when the directory holds none.
    pub fn open_in_dir(dir: &Path, writer_heap: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir).map_err(Error::backend)?
        } else {
            Index::create_in_dir(dir, build_schema()).map_err(Error::backend)?
        };
        info!(dir = %dir.display(), "structured index ready");
        Self::from_index(index, writer_heap)
    }

    fn from_index(index: Index, writer_heap: usize) -> Result<Self> {
        register_tokenizer(&index);
        let schema = index.schema();
        let field = |name: &str| schema.get_field(name).map_err(Error::backend);
        let fields = Fields {
            id: field("id")?,
            document_id: field("document_id")?,
            source: field("source")?,
            row: field("row")?,
            body: field("body")?,
            record: field("record")?,
        };
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(Error::backend)?;
        let core = Core { index, reader, fields, writer_heap: writer_heap.max(MIN_WRITER_HEAP), write_lock: Mutex::new(()) };
        Ok(Self { core: Arc::new(core) })
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Core) -> Result<T> + Send + 'static,
    {
        let core = Arc::clone(&self.core);
        tokio::task::spawn_blocking(move || work(&core)).await.map_err(Error::backend)?
    }
}

impl Core {
    /// Replace all records of `document_id` with `records`.
    fn index_records(&self, document_id: &str, source: &str, records: &[Record]) -> Result<Vec<ChunkId>> {
        let f = self.fields;
        let _guard = self.write_lock.lock();
        let mut writer: IndexWriter = self.index.writer_with_num_threads(1, self.writer_heap).map_err(Error::backend)?;
        writer.delete_term(Term::from_field_text(f.document_id, document_id));
        let mut ids = Vec::with_capacity(records.len());
        for (row, record) in records.iter().enumerate() {
            let id = format!("{document_id}:{row}");
            writer
                .add_document(doc!(
                    f.id => id.clone(),
                    f.document_id => document_id.to_string(),
                    f.source => source.to_string(),
                    f.row => row as u64,
                    f.body => flatten_record(record),
                    f.record => serde_json::to_string(record)?,
                ))
                .map_err(Error::backend)?;
            ids.push(id);
        }
        writer.commit().map_err(Error::backend)?;
        self.reader.reload().map_err(Error::backend)?;
        debug!(document_id, records = ids.len(), "records indexed");
        Ok(ids)
    }

    fn search(&self, query: &StructuredQuery) -> Result<Vec<SearchResult>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let f = self.fields;
        let searcher = self.reader.searcher();
        let parsed: Box<dyn Query> = if query.text.trim().is_empty() {
            Box::new(AllQuery)
        } else {
            let parser = QueryParser::for_index(&self.index, vec![f.body]);
            let (parsed, errors) = parser.parse_query_lenient(&query.text);
            if !errors.is_empty() {
                debug!(dropped = errors.len(), "lenient parse skipped query fragments");
            }
            parsed
        };
        let fetch = if query.filters.is_empty() { query.limit } else { query.limit.saturating_mul(4).max(50) };
        let top_docs = searcher.search(parsed.as_ref(), &TopDocs::with_limit(fetch)).map_err(Error::backend)?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr).map_err(Error::backend)?;
            let text = |field: Field| doc.get_first(field).and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let document_id = text(f.document_id);
            let record_json = text(f.record);
            let record: Record = serde_json::from_str(&record_json)?;
            if !record_matches(&record, &document_id, &query.filters) {
                continue;
            }
            let row = doc.get_first(f.row).and_then(|v| v.as_u64()).unwrap_or(0);
            let meta = ChunkMetadata {
                source: Some(text(f.source)),
                custom: record.into_iter().collect(),
                ..ChunkMetadata::for_modality(Modality::Structured)
            };
            let chunk = Chunk::new(text(f.id), document_id, record_json).with_index(row as usize).with_metadata(meta);
            hits.push(SearchResult::new(Arc::new(chunk), score / (1.0 + score)).annotated(format!("bm25={score:.3}")));
        }
        let mut ranked = sort_and_rank(hits);
        ranked.truncate(query.limit);
        Ok(ranked)
    }

    fn num_records(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }
}

/// Filters address record columns, plus `document_id`.
fn record_matches(record: &Record, document_id: &str, filters: &Filters) -> bool {
    filters.iter().all(|(key, expected)| {
        if key == "document_id" {
            expected.matches(Some(&Value::String(document_id.to_string())))
        } else {
            expected.matches(record.get(key))
        }
    })
}

#[async_trait]
impl StructuredQueryEngine for TantivyStructuredEngine {
    async fn index(&self, path: &Path) -> Result<Vec<ChunkId>> {
        let path = path.to_path_buf();
        let ids = self
            .blocking({
                let path = path.clone();
                move |core| {
                    let records = load_records(&path)?;
                    core.index_records(&document_id_for(&path), &path.to_string_lossy(), &records)
                }
            })
            .await?;
        info!(path = %path.display(), records = ids.len(), "tabular file indexed");
        Ok(ids)
    }

    async fn query(&self, query: &StructuredQuery) -> Result<Vec<SearchResult>> {
        let query = query.clone();
        self.blocking(move |core| core.search(&query)).await
    }

    async fn count(&self) -> Result<usize> {
        self.blocking(|core| Ok(core.num_records())).await
    }

    async fn health_check(&self) -> bool {
        self.blocking(|core| Ok(core.reader.reload().is_ok())).await.unwrap_or(false)
    }
}
