//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge defaults + `config.toml` + `config.<env>.toml` + `APP_*` env vars.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{FusionSettings, Modality};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."), None)
    }

    /// Merge `config.toml`, `config.<env>.toml` and `APP_*` variables found under `base`.
    ///
    /// `env_name` overrides `RUST_ENV`. Nested keys use `__`, e.g. `APP_FUSION__RRF_K=30`.
    pub fn load_from(base: &Path, env_name: Option<&str>) -> Result<Self> {
        let env_name = env_name
            .map(str::to_string)
            .unwrap_or_else(|| env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string()));

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file(base.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(base.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(base.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(base.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::Configuration(format!("Failed to get '{key}': {e}")))
    }

    /// Typed view of the whole configuration, validated.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::Configuration(format!("Failed to extract settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub embedding: EmbeddingSettings,
    pub store: StoreSettings,
    pub structured: StructuredSettings,
    pub fusion: FusionSettings,
    pub unified: UnifiedSettings,
    pub orchestrator: OrchestratorSettings,
    pub rerank: RerankSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        crate::types::ModalityFusionConfig::new(self.fusion.clone())?;
        if self.embedding.text_dim == 0 || self.embedding.image_dim == 0 {
            return Err(Error::Configuration("embedding dimensions must be positive".to_string()));
        }
        if self.embedding.max_batch_size == 0 {
            return Err(Error::Configuration("embedding.max_batch_size must be positive".to_string()));
        }
        if self.orchestrator.candidate_multiplier == 0 {
            return Err(Error::Configuration("orchestrator.candidate_multiplier must be positive".to_string()));
        }
        let r = &self.rerank;
        if r.original_weight < 0.0 || r.reranker_weight < 0.0 || r.original_weight + r.reranker_weight <= 0.0 {
            return Err(Error::Configuration("rerank weights must be non-negative and not both zero".to_string()));
        }
        Ok(())
    }

    /// Relative data and model paths re-anchored under `base`. Remote store URIs are left alone.
    pub fn rooted_at(mut self, base: &Path) -> Self {
        let anchor = |p: &str| resolve_with_base(base, p).to_string_lossy().to_string();
        if !self.store.lance_uri.contains("://") {
            self.store.lance_uri = anchor(&self.store.lance_uri);
        }
        self.structured.index_dir = self.structured.index_dir.as_deref().map(anchor);
        self.embedding.bge_model_dir = self.embedding.bge_model_dir.as_deref().map(anchor);
        self.embedding.clip_model_dir = self.embedding.clip_model_dir.as_deref().map(anchor);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextModel {
    Bge,
    Clip,
    Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageModel {
    Clip,
    Hash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub text_model: TextModel,
    pub image_model: ImageModel,
    pub bge_model_dir: Option<String>,
    pub clip_model_dir: Option<String>,
    pub text_dim: usize,
    pub image_dim: usize,
    pub max_batch_size: usize,
    pub max_tokens: usize,
    /// Skip model loading entirely and serve hash embeddings.
    pub use_fake: bool,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            text_model: TextModel::Bge,
            image_model: ImageModel::Clip,
            bge_model_dir: None,
            clip_model_dir: None,
            text_dim: 1024,
            image_dim: 512,
            max_batch_size: 32,
            max_tokens: 256,
            use_fake: false,
        }
    }
}

impl EmbeddingSettings {
    /// `use_fake` or the legacy `APP_USE_FAKE_EMBEDDINGS=1` switch.
    pub fn fake_requested(&self) -> bool {
        self.use_fake
            || env::var("APP_USE_FAKE_EMBEDDINGS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Lance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub lance_uri: String,
    pub text_collection: String,
    pub image_collection: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Lance,
            lance_uri: "./data/lancedb".to_string(),
            text_collection: "text_chunks".to_string(),
            image_collection: "image_chunks".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredSettings {
    /// `None` keeps the index in memory.
    pub index_dir: Option<String>,
    pub writer_heap_bytes: usize,
}

impl Default for StructuredSettings {
    fn default() -> Self {
        Self { index_dir: Some("./data/tantivy".to_string()), writer_heap_bytes: 50_000_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnifiedSettings {
    pub default_modality: Modality,
    pub auto_detect: bool,
    pub parallel: bool,
    pub modality_timeout_ms: u64,
    pub enable_text: bool,
    pub enable_image: bool,
    pub enable_structured: bool,
}

impl Default for UnifiedSettings {
    fn default() -> Self {
        Self {
            default_modality: Modality::Text,
            auto_detect: true,
            parallel: true,
            modality_timeout_ms: 2_000,
            enable_text: true,
            enable_image: true,
            enable_structured: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub enable_enhancement: bool,
    pub enable_rerank: bool,
    pub candidate_multiplier: usize,
    pub latency_budget_ms: u64,
    pub skip_rerank_over_budget: bool,
    pub annotate_timings: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            enable_enhancement: true,
            enable_rerank: true,
            candidate_multiplier: 2,
            latency_budget_ms: 150,
            skip_rerank_over_budget: false,
            annotate_timings: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankStrategy {
    /// Reranker score only.
    Replace,
    /// `original_weight * original + reranker_weight * reranker`.
    #[default]
    Weighted,
    /// Reciprocal-rank combination of the original and reranker orderings.
    ReciprocalRank,
    /// Weighted combination after min-max normalizing both score sets.
    Normalized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankSettings {
    pub strategy: RerankStrategy,
    pub original_weight: f32,
    pub reranker_weight: f32,
    /// Only the first `top_k` candidates are re-scored.
    pub top_k: usize,
    /// Candidates scoring below this keep their original score.
    pub score_threshold: f32,
    pub normalize_scores: bool,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            strategy: RerankStrategy::Weighted,
            original_weight: 0.3,
            reranker_weight: 0.7,
            top_k: 100,
            score_threshold: 0.0,
            normalize_scores: true,
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
