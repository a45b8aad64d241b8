//! Deterministic hash embeddings.
//!
//! Text is hashed token by token into buckets; images are hashed as whole
//! files. Identical inputs always produce identical unit vectors, so
//! nearest-neighbour lookups of identical content keep working without a model.
use async_trait::async_trait;
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use twox_hash::XxHash64;

use polyrag_core::error::{Error, Result};
use polyrag_core::traits::EmbeddingProvider;

use crate::pool::l2_normalize;

pub struct HashEmbeddingProvider {
    name: String,
    dim: usize,
    max_batch_size: usize,
    ready: AtomicBool,
}

impl HashEmbeddingProvider {
    pub fn new(dim: usize) -> Self {
        Self { name: format!("hash:d{dim}"), dim: dim.max(1), max_batch_size: 32, ready: AtomicBool::new(false) }
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max.max(1);
        self
    }

    /// Already-initialized provider.
    pub fn ready(dim: usize) -> Self {
        let p = Self::new(dim);
        p.ready.store(true, Ordering::Release);
        p
    }

    pub fn embed_text_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let mut any = false;
        for (i, token) in tokens(text).enumerate() {
            let h = xxhash(token.as_bytes());
            let idx = (h % self.dim as u64) as usize;
            let val = ((h >> 32) as u32) as f32 / u32::MAX as f32;
            v[idx] += val + (i as f32 % 3.0) * 0.01;
            any = true;
        }
        if !any {
            // punctuation-only or empty text
            v = seeded_vector(xxhash(text.as_bytes()), self.dim);
        }
        l2_normalize(&mut v);
        v
    }

    pub fn embed_bytes_sync(&self, bytes: &[u8]) -> Vec<f32> {
        let mut v = seeded_vector(xxhash(bytes), self.dim);
        l2_normalize(&mut v);
        v
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::NotInitialized(self.name.clone()))
        }
    }

    fn check_batch(&self, len: usize) -> Result<()> {
        if len == 0 {
            return Err(Error::EmptyInput);
        }
        if len > self.max_batch_size {
            return Err(Error::BatchTooLarge { size: len, max: self.max_batch_size });
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn initialize(&self) -> Result<()> {
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.ready.store(false, Ordering::Release);
        Ok(())
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.ensure_ready()?;
        self.check_batch(texts.len())?;
        Ok(texts.iter().map(|t| self.embed_text_sync(t)).collect())
    }

    async fn embed_images(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        self.ensure_ready()?;
        self.check_batch(paths.len())?;
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = read_image_bytes(path).await?;
            out.push(self.embed_bytes_sync(&bytes));
        }
        Ok(out)
    }

    async fn health_check(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Read an image file and check that it is a recognizable image format.
pub(crate) async fn read_image_bytes(path: &Path) -> Result<Vec<u8>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::ImageNotFound(path.to_path_buf())),
        Err(e) => return Err(Error::ImageLoad { path: path.to_path_buf(), reason: e.to_string() }),
    };
    image::guess_format(&bytes).map_err(|e| Error::ImageLoad { path: path.to_path_buf(), reason: e.to_string() })?;
    Ok(bytes)
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn xxhash(bytes: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    hasher.finish()
}

/// splitmix64 stream mapped to [-1, 1].
fn seeded_vector(seed: u64, dim: usize) -> Vec<f32> {
    let mut state = seed;
    (0..dim)
        .map(|_| {
            state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^= z >> 31;
            (z >> 40) as f32 / (1u64 << 23) as f32 - 1.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn identical_text_gives_identical_vectors() {
        let p = HashEmbeddingProvider::ready(64);
        assert_eq!(p.embed_text_sync("Compost the kitchen scraps"), p.embed_text_sync("Compost the kitchen scraps"));
    }

    #[test]
    fn case_and_punctuation_do_not_matter() {
        let p = HashEmbeddingProvider::ready(64);
        let a = p.embed_text_sync("Rain barrel, overflow!");
        let b = p.embed_text_sync("rain barrel overflow");
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_token_text_still_unit_length() {
        let p = HashEmbeddingProvider::ready(32);
        let v = p.embed_text_sync("?!");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn shared_words_are_closer_than_unrelated_text() {
        let p = HashEmbeddingProvider::ready(256);
        let a = p.embed_text_sync("solar panel wiring guide");
        let b = p.embed_text_sync("solar panel mounting guide");
        let c = p.embed_text_sync("sourdough starter feeding");
        assert!(cosine(&a, &b) > cosine(&a, &c));
    }

    #[tokio::test]
    async fn calls_before_initialize_fail() {
        let p = HashEmbeddingProvider::new(8);
        assert!(matches!(p.embed_texts(&["x".to_string()]).await, Err(Error::NotInitialized(_))));
        p.initialize().await.expect("init");
        assert!(matches!(p.embed_texts(&[]).await, Err(Error::EmptyInput)));
        let too_many = vec!["x".to_string(); 33];
        assert!(matches!(p.embed_texts(&too_many).await, Err(Error::BatchTooLarge { size: 33, max: 32 })));
    }
}
