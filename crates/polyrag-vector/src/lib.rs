//! polyrag-vector
//!
//! `VectorStore` implementations: an in-process store guarded by a
//! per-collection read-write lock, and a persistent LanceDB table.

pub mod lance;
pub mod memory;
pub mod schema;

pub use lance::LanceVectorStore;
pub use memory::InMemoryVectorStore;

/// Cosine similarity; 0.0 when either vector has zero norm.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0f32;
    let mut na = 0f32;
    let mut nb = 0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Map a cosine distance in [0, 2] to a similarity score in [0, 1].
pub fn distance_to_score(distance: f32) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}
