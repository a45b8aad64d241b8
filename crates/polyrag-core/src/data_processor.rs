//! Paragraph chunking and directory walking used by ingestion.
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::types::ContentType;

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_percent: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_tokens: 500, overlap_percent: 0.2 }
    }
}

/// Splits text on blank lines; paragraphs longer than `max_tokens` are cut
/// into overlapping word windows.
#[derive(Debug, Clone, Default)]
pub struct ParagraphChunker {
    config: ChunkingConfig,
}

impl ParagraphChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn chunk(&self, content: &str) -> Vec<String> {
        let mut out = Vec::new();
        for paragraph in content.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }
            if count_tokens(paragraph) <= self.config.max_tokens {
                out.push(paragraph.to_string());
            } else {
                out.extend(self.split_with_overlap(paragraph));
            }
        }
        out
    }

    fn split_with_overlap(&self, paragraph: &str) -> Vec<String> {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        // ~0.75 words per token
        let words_per_chunk = ((self.config.max_tokens as f32 * 0.75) as usize).max(1);
        let overlap = ((words_per_chunk as f32 * self.config.overlap_percent) as usize).min(words_per_chunk - 1);
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < words.len() {
            let end = (start + words_per_chunk).min(words.len());
            chunks.push(words[start..end].join(" "));
            if end >= words.len() {
                break;
            }
            start = end - overlap;
        }
        chunks
    }
}

fn count_tokens(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    (word_count as f32 / 0.75) as usize
}

/// Read a file as UTF-8, replacing invalid sequences instead of failing.
pub fn read_text_lossy(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => Ok(String::from_utf8_lossy(&fs::read(path)?).to_string()),
        Err(e) => Err(e.into()),
    }
}

/// Stable document identity: file stem plus a short hash of the full path.
pub fn document_id_for(path: &Path) -> String {
    let stem = path.file_stem().map_or_else(|| "doc".to_string(), |s| s.to_string_lossy().to_string());
    let digest = blake3::hash(path.to_string_lossy().as_bytes()).to_hex();
    format!("{stem}-{}", &digest.as_str()[..8])
}

/// All regular files under `root`, sorted, each with its guessed content type.
pub fn collect_files(root: &Path) -> Vec<(PathBuf, Option<ContentType>)> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    debug!(root = %root.display(), files = files.len(), "collected files");
    files.into_iter().map(|p| { let t = ContentType::from_path(&p); (p, t) }).collect()
}
