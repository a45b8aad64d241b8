use std::path::PathBuf;

use thiserror::Error;

use crate::types::Modality;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("{0} used before initialization")]
    NotInitialized(String),

    #[error("Modality unavailable: {0}")]
    ModalityUnavailable(Modality),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Transient retrieval failure ({modality}): {reason}")]
    TransientRetrieval { modality: Modality, reason: String },

    #[error("No modality could be queried")]
    NoModalityAvailable,

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Empty input")]
    EmptyInput,

    #[error("Batch of {size} inputs exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("Failed to load image {}: {reason}", path.display())]
    ImageLoad { path: PathBuf, reason: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wrap any collaborator error (tantivy, lancedb, candle, ...) as a backend failure.
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }

    /// Errors that take a single modality out of a fused query without failing it.
    pub fn is_modality_failure(&self) -> bool {
        matches!(
            self,
            Self::ModalityUnavailable(_)
                | Self::TransientRetrieval { .. }
                | Self::NotInitialized(_)
                | Self::Backend(_)
                | Self::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
