pub mod engine;
pub mod records;
pub mod tantivy_utils;

pub use engine::TantivyStructuredEngine;
pub use records::{load_records, Record};
