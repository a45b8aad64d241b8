//! LanceDB-backed chunk collection.
//!
//! One table per collection. Search uses cosine distance; metadata filters are
//! applied after the ANN query on an over-fetched candidate set.
use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Int32Type};
use arrow_array::{FixedSizeListArray, Int32Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};
use std::sync::Arc;
use tracing::{debug, info};

use polyrag_core::error::{Error, Result};
use polyrag_core::traits::{SearchOptions, VectorStore};
use polyrag_core::types::{sort_and_rank, Chunk, ChunkId, ChunkMetadata, SearchResult};

use crate::distance_to_score;
use crate::schema::build_chunk_schema;

const FILTER_OVERFETCH: usize = 10;

pub struct LanceVectorStore {
    table: Table,
    name: String,
    dim: usize,
}

impl LanceVectorStore {
    /// Open (creating if needed) the table `name` in the database at `uri`.
    pub async fn open(uri: &str, name: &str, dim: usize) -> Result<Self> {
        let db = connect(uri).execute().await.map_err(Error::backend)?;
        let table = ensure_table(&db, name, dim).await?;
        info!(uri, table = name, dim, "lance collection ready");
        Ok(Self { table, name: name.to_string(), dim })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_dim(&self, len: usize) -> Result<()> {
        if len == self.dim {
            Ok(())
        } else {
            Err(Error::DimensionMismatch { expected: self.dim, actual: len })
        }
    }

    fn chunks_to_batch(&self, chunks: &[Chunk]) -> Result<RecordBatch> {
        let schema = build_chunk_schema(self.dim);
        let ids = StringArray::from_iter_values(chunks.iter().map(|c| c.id.as_str()));
        let doc_ids = StringArray::from_iter_values(chunks.iter().map(|c| c.document_id.as_str()));
        let contents = StringArray::from_iter_values(chunks.iter().map(|c| c.content.as_str()));
        let indices = Int32Array::from(chunks.iter().map(|c| c.index as i32).collect::<Vec<_>>());
        let metadata = chunks
            .iter()
            .map(|c| serde_json::to_string(&c.metadata))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let vectors = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            chunks.iter().map(|c| Some(c.embedding.iter().map(|&x| Some(x)).collect::<Vec<_>>())),
            self.dim as i32,
        );
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(ids),
                Arc::new(doc_ids),
                Arc::new(contents),
                Arc::new(indices),
                Arc::new(StringArray::from(metadata)),
                Arc::new(vectors),
            ],
        )
        .map_err(Error::backend)
    }

    async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        let batch = self.chunks_to_batch(chunks)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        let mut mi = self.table.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.map_err(Error::backend)?;
        Ok(())
    }

    async fn count_where(&self, predicate: String) -> Result<usize> {
        self.table.count_rows(Some(predicate)).await.map_err(Error::backend)
    }
}

async fn ensure_table(conn: &Connection, name: &str, dim: usize) -> Result<Table> {
    let names = conn.table_names().execute().await.map_err(Error::backend)?;
    if !names.iter().any(|n| n == name) {
        // empty table with 0 rows
        let schema = build_chunk_schema(dim);
        let iter = RecordBatchIterator::new(vec![].into_iter(), schema);
        conn.create_table(name, Box::new(iter)).execute().await.map_err(Error::backend)?;
    }
    conn.open_table(name).execute().await.map_err(Error::backend)
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn missing(col: &str) -> Error {
    Error::Backend(format!("column '{col}' missing or of unexpected type"))
}

/// Decode rows into chunks plus the `_distance` column when present.
fn batch_to_chunks(batch: &RecordBatch, with_vectors: bool) -> Result<Vec<(Chunk, Option<f32>)>> {
    let ids = batch.column_by_name("id").and_then(|c| c.as_string_opt::<i32>()).ok_or_else(|| missing("id"))?;
    let doc_ids = batch
        .column_by_name("document_id")
        .and_then(|c| c.as_string_opt::<i32>())
        .ok_or_else(|| missing("document_id"))?;
    let contents = batch.column_by_name("content").and_then(|c| c.as_string_opt::<i32>()).ok_or_else(|| missing("content"))?;
    let indices = batch
        .column_by_name("chunk_index")
        .and_then(|c| c.as_primitive_opt::<Int32Type>())
        .ok_or_else(|| missing("chunk_index"))?;
    let metadata = batch.column_by_name("metadata").and_then(|c| c.as_string_opt::<i32>()).ok_or_else(|| missing("metadata"))?;
    let distances = batch.column_by_name("_distance").and_then(|c| c.as_primitive_opt::<Float32Type>());
    let vectors = if with_vectors {
        Some(batch.column_by_name("vector").and_then(|c| c.as_fixed_size_list_opt()).ok_or_else(|| missing("vector"))?)
    } else {
        None
    };

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let meta: ChunkMetadata = serde_json::from_str(metadata.value(i))?;
        let embedding = match vectors {
            Some(list) => {
                let row = list.value(i);
                row.as_primitive_opt::<Float32Type>().ok_or_else(|| missing("vector"))?.values().to_vec()
            }
            None => Vec::new(),
        };
        let chunk = Chunk::new(ids.value(i), doc_ids.value(i), contents.value(i))
            .with_index(indices.value(i).max(0) as usize)
            .with_metadata(meta)
            .with_embedding(embedding);
        out.push((chunk, distances.map(|d| d.value(i))));
    }
    Ok(out)
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    fn dimension(&self) -> usize {
        self.dim
    }

    async fn add(&self, chunks: Vec<Chunk>) -> Result<Vec<ChunkId>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        for c in &chunks {
            self.check_dim(c.embedding.len())?;
        }
        self.upsert(&chunks).await?;
        debug!(table = %self.name, added = chunks.len(), "chunks added");
        Ok(chunks.into_iter().map(|c| c.id).collect())
    }

    async fn search(&self, vector: &[f32], options: &SearchOptions) -> Result<Vec<SearchResult>> {
        self.check_dim(vector.len())?;
        if options.top_k == 0 {
            return Ok(Vec::new());
        }
        let fetch = if options.filters.is_empty() { options.top_k } else { options.top_k * FILTER_OVERFETCH };
        let mut stream = self
            .table
            .vector_search(vector.to_vec())
            .map_err(Error::backend)?
            .distance_type(DistanceType::Cosine)
            .limit(fetch)
            .execute()
            .await
            .map_err(Error::backend)?;

        let threshold = options.threshold.unwrap_or(f32::MIN);
        let mut hits = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::backend)? {
            for (chunk, distance) in batch_to_chunks(&batch, options.include_embeddings)? {
                if !chunk.matches_filters(&options.filters) {
                    continue;
                }
                let distance = distance.unwrap_or(1.0);
                let score = distance_to_score(distance);
                if score < threshold {
                    continue;
                }
                hits.push(SearchResult::new(Arc::new(chunk), score).with_distance(distance));
            }
        }
        let mut ranked = sort_and_rank(hits);
        ranked.truncate(options.top_k);
        Ok(ranked)
    }

    async fn get(&self, id: &str) -> Result<Option<Arc<Chunk>>> {
        let mut stream = self
            .table
            .query()
            .only_if(format!("id = {}", quote(id)))
            .limit(1)
            .execute()
            .await
            .map_err(Error::backend)?;
        while let Some(batch) = stream.try_next().await.map_err(Error::backend)? {
            if let Some((chunk, _)) = batch_to_chunks(&batch, true)?.into_iter().next() {
                return Ok(Some(Arc::new(chunk)));
            }
        }
        Ok(None)
    }

    async fn delete(&self, ids: &[ChunkId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let predicate = format!("id IN ({})", ids.iter().map(|id| quote(id)).collect::<Vec<_>>().join(", "));
        let matched = self.count_where(predicate.clone()).await?;
        self.table.delete(&predicate).await.map_err(Error::backend)?;
        Ok(matched)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let predicate = format!("document_id = {}", quote(document_id));
        let matched = self.count_where(predicate.clone()).await?;
        if matched > 0 {
            self.table.delete(&predicate).await.map_err(Error::backend)?;
        }
        Ok(matched)
    }

    async fn update(&self, chunk: Chunk) -> Result<()> {
        self.check_dim(chunk.embedding.len())?;
        if self.count_where(format!("id = {}", quote(&chunk.id))).await? == 0 {
            return Err(Error::NotFound(chunk.id));
        }
        self.upsert(std::slice::from_ref(&chunk)).await
    }

    async fn count(&self) -> Result<usize> {
        self.table.count_rows(None).await.map_err(Error::backend)
    }

    async fn clear(&self) -> Result<()> {
        self.table.delete("id IS NOT NULL").await.map_err(Error::backend)?;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.table.count_rows(None).await.is_ok()
    }
}
