//! Domain types shared by the retrievers, stores and fusion engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};

pub type ChunkId = String;

/// The kind of content a retriever understands.
///
/// The declaration order (text, image, structured) is the fixed order used for
/// dispatch, fan-in and tie-breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
    Structured,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Text, Modality::Image, Modality::Structured];

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
            Modality::Structured => "structured",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Modality::Text),
            "image" | "images" => Ok(Modality::Image),
            "structured" | "tabular" | "table" => Ok(Modality::Structured),
            other => Err(Error::Configuration(format!("unknown modality '{other}'"))),
        }
    }
}

/// Where a query should be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Single(Modality),
    Multi(Vec<Modality>),
}

impl Route {
    pub fn modalities(&self) -> Vec<Modality> {
        match self {
            Route::Single(m) => vec![*m],
            Route::Multi(ms) => ms.clone(),
        }
    }
}

/// Content types accepted by `index_content`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Json,
    Image,
    Tabular,
    Audio,
    Video,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Json => "json",
            ContentType::Image => "image",
            ContentType::Tabular => "tabular",
            ContentType::Audio => "audio",
            ContentType::Video => "video",
        }
    }

    /// Guess the content type from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" | "markdown" => Some(ContentType::Text),
            "json" => Some(ContentType::Json),
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" => Some(ContentType::Image),
            "csv" | "tsv" | "jsonl" | "ndjson" => Some(ContentType::Tabular),
            "mp3" | "wav" | "flac" | "ogg" => Some(ContentType::Audio),
            "mp4" | "mov" | "mkv" | "avi" => Some(ContentType::Video),
            _ => None,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" | "markdown" | "md" => Ok(ContentType::Text),
            "json" => Ok(ContentType::Json),
            "image" | "img" => Ok(ContentType::Image),
            "tabular" | "table" | "csv" | "tsv" | "jsonl" => Ok(ContentType::Tabular),
            "audio" => Ok(ContentType::Audio),
            "video" => Ok(ContentType::Video),
            _ => Err(Error::UnsupportedContentType(s.to_string())),
        }
    }
}

/// Metadata attached to every chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub modality: Modality,
    #[serde(default)]
    pub custom: HashMap<String, Value>,
}

impl Default for ChunkMetadata {
    fn default() -> Self {
        Self { source: None, title: None, tags: Vec::new(), modality: Modality::Text, custom: HashMap::new() }
    }
}

impl ChunkMetadata {
    pub fn for_modality(modality: Modality) -> Self {
        Self { modality, ..Self::default() }
    }

    /// Look up a metadata field by name as a JSON value. Named fields shadow custom ones.
    pub fn field(&self, key: &str) -> Option<Value> {
        match key {
            "source" => self.source.clone().map(Value::String),
            "title" => self.title.clone().map(Value::String),
            "tags" => Some(Value::Array(self.tags.iter().cloned().map(Value::String).collect())),
            "modality" => Some(Value::String(self.modality.as_str().to_string())),
            other => self.custom.get(other).cloned(),
        }
    }
}

/// An indexed content unit.
///
/// - `id`: stable chunk identifier, unique within a collection
/// - `document_id`: identity of the owning document
/// - `content`: text, an image path, or a serialized record
/// - `embedding`: immutable vector; empty for structured records
/// - `index`: ordinal position within the owning document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: String,
    pub content: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub index: usize,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn new(id: impl Into<ChunkId>, document_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            document_id: document_id.into(),
            content: content.into(),
            embedding: Vec::new(),
            index: 0,
            metadata: ChunkMetadata::default(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn with_metadata(mut self, metadata: ChunkMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Copy of the chunk with the embedding dropped.
    pub fn without_embedding(&self) -> Self {
        Self {
            id: self.id.clone(),
            document_id: self.document_id.clone(),
            content: self.content.clone(),
            embedding: Vec::new(),
            index: self.index,
            metadata: self.metadata.clone(),
        }
    }

    /// Field lookup used by filters: `id`, `document_id`, then metadata.
    pub fn field(&self, key: &str) -> Option<Value> {
        match key {
            "id" => Some(Value::String(self.id.clone())),
            "document_id" => Some(Value::String(self.document_id.clone())),
            other => self.metadata.field(other),
        }
    }

    pub fn matches_filters(&self, filters: &Filters) -> bool {
        filters.iter().all(|(key, expected)| expected.matches(self.field(key).as_ref()))
    }
}

/// A filter condition: a single value means equality, a list means membership.
///
/// When the stored field is itself a list (e.g. tags) equality becomes containment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    OneOf(Vec<Value>),
    Equals(Value),
}

impl FilterValue {
    pub fn matches(&self, actual: Option<&Value>) -> bool {
        let Some(actual) = actual else { return false };
        match self {
            FilterValue::Equals(expected) => value_matches(actual, expected),
            FilterValue::OneOf(options) => options.iter().any(|o| value_matches(actual, o)),
        }
    }
}

fn value_matches(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| scalar_eq(item, expected)),
        other => scalar_eq(other, expected),
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Equals(Value::String(v.to_string()))
    }
}

impl From<Value> for FilterValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Array(items) => FilterValue::OneOf(items),
            other => FilterValue::Equals(other),
        }
    }
}

pub type Filters = HashMap<String, FilterValue>;

/// A ranked hit.
///
/// Values are rebuilt at every pipeline stage; the chunk itself is shared and
/// never mutated. Within one list `rank` runs 1..n in descending score order.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk: Arc<Chunk>,
    pub score: f32,
    pub rank: usize,
    pub distance: Option<f32>,
    pub sources: Vec<Modality>,
    pub explanation: Vec<String>,
}

impl SearchResult {
    pub fn new(chunk: Arc<Chunk>, score: f32) -> Self {
        let sources = vec![chunk.metadata.modality];
        Self { chunk, score, rank: 1, distance: None, sources, explanation: Vec::new() }
    }

    pub fn id(&self) -> &str {
        &self.chunk.id
    }

    pub fn with_score(&self, score: f32) -> Self {
        Self { score, ..self.clone() }
    }

    pub fn with_rank(&self, rank: usize) -> Self {
        Self { rank, ..self.clone() }
    }

    pub fn with_distance(mut self, distance: f32) -> Self {
        self.distance = Some(distance);
        self
    }

    pub fn annotated(&self, note: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.explanation.push(note.into());
        next
    }
}

/// Stable sort by descending score, then assign ranks 1..n.
///
/// Equal scores keep their input order.
pub fn sort_and_rank(mut results: Vec<SearchResult>) -> Vec<SearchResult> {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results
        .into_iter()
        .enumerate()
        .map(|(i, r)| r.with_rank(i + 1))
        .collect()
}

/// Per-modality fusion weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModalityWeights {
    pub text: f32,
    pub image: f32,
    pub structured: f32,
}

impl Default for ModalityWeights {
    fn default() -> Self {
        Self { text: 0.5, image: 0.3, structured: 0.2 }
    }
}

impl ModalityWeights {
    pub fn new(text: f32, image: f32, structured: f32) -> Self {
        Self { text, image, structured }
    }

    pub fn get(&self, modality: Modality) -> f32 {
        match modality {
            Modality::Text => self.text,
            Modality::Image => self.image,
            Modality::Structured => self.structured,
        }
    }

    pub fn sum(&self) -> f32 {
        self.text + self.image + self.structured
    }

    /// Validate and rescale so the weights sum to 1.0.
    pub fn normalized(&self) -> Result<Self> {
        for m in Modality::ALL {
            let w = self.get(m);
            if !w.is_finite() || w < 0.0 {
                return Err(Error::Configuration(format!("weight for {m} must be a finite non-negative number, got {w}")));
            }
        }
        let sum = self.sum();
        if sum <= f32::EPSILON {
            return Err(Error::Configuration("modality weights must not all be zero".to_string()));
        }
        if (sum - 1.0).abs() <= 1e-6 {
            return Ok(*self);
        }
        Ok(Self { text: self.text / sum, image: self.image / sum, structured: self.structured / sum })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    #[default]
    Weighted,
    #[serde(alias = "rrf")]
    ReciprocalRank,
}

/// Raw, unvalidated fusion settings as read from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    pub method: FusionMethod,
    pub weights: ModalityWeights,
    pub rrf_k: f32,
    pub max_results: usize,
    pub min_score: f32,
    pub normalize: bool,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            method: FusionMethod::Weighted,
            weights: ModalityWeights::default(),
            rrf_k: 60.0,
            max_results: 20,
            min_score: 0.0,
            normalize: true,
        }
    }
}

/// Validated fusion configuration. Weights always sum to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FusionSettings", into = "FusionSettings")]
pub struct ModalityFusionConfig {
    method: FusionMethod,
    weights: ModalityWeights,
    rrf_k: f32,
    max_results: usize,
    min_score: f32,
    normalize: bool,
}

impl ModalityFusionConfig {
    pub fn new(settings: FusionSettings) -> Result<Self> {
        if !settings.rrf_k.is_finite() || settings.rrf_k <= 0.0 {
            return Err(Error::Configuration(format!("rrf_k must be positive, got {}", settings.rrf_k)));
        }
        if settings.max_results == 0 {
            return Err(Error::Configuration("max_results must be at least 1".to_string()));
        }
        if !settings.min_score.is_finite() {
            return Err(Error::Configuration("min_score must be finite".to_string()));
        }
        Ok(Self {
            method: settings.method,
            weights: settings.weights.normalized()?,
            rrf_k: settings.rrf_k,
            max_results: settings.max_results,
            min_score: settings.min_score,
            normalize: settings.normalize,
        })
    }

    pub fn method(&self) -> FusionMethod {
        self.method
    }

    pub fn weights(&self) -> ModalityWeights {
        self.weights
    }

    pub fn rrf_k(&self) -> f32 {
        self.rrf_k
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn min_score(&self) -> f32 {
        self.min_score
    }

    pub fn normalize(&self) -> bool {
        self.normalize
    }

    /// A copy with different weights; the receiver is left untouched.
    pub fn with_weights(&self, weights: ModalityWeights) -> Result<Self> {
        Ok(Self { weights: weights.normalized()?, ..self.clone() })
    }

    pub fn with_method(&self, method: FusionMethod) -> Self {
        Self { method, ..self.clone() }
    }

    /// A copy that keeps at least `max_results` fused hits.
    pub fn with_max_results_at_least(&self, max_results: usize) -> Self {
        Self { max_results: self.max_results.max(max_results), ..self.clone() }
    }
}

impl Default for ModalityFusionConfig {
    fn default() -> Self {
        let s = FusionSettings::default();
        Self {
            method: s.method,
            weights: s.weights,
            rrf_k: s.rrf_k,
            max_results: s.max_results,
            min_score: s.min_score,
            normalize: s.normalize,
        }
    }
}

impl TryFrom<FusionSettings> for ModalityFusionConfig {
    type Error = Error;

    fn try_from(settings: FusionSettings) -> Result<Self> {
        Self::new(settings)
    }
}

impl From<ModalityFusionConfig> for FusionSettings {
    fn from(c: ModalityFusionConfig) -> Self {
        Self {
            method: c.method,
            weights: c.weights,
            rrf_k: c.rrf_k,
            max_results: c.max_results,
            min_score: c.min_score,
            normalize: c.normalize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Factual,
    Procedural,
    Conceptual,
    Comparative,
    Visual,
    Tabular,
    #[default]
    General,
}

/// Typed retrieval-tuning hints produced by classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalTuning {
    pub weights: Option<ModalityWeights>,
    pub fusion_method: Option<FusionMethod>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub route: Route,
    pub query_type: QueryType,
    pub confidence: f32,
    pub tuning: RetrievalTuning,
}
