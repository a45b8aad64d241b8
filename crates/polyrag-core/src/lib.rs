//! polyrag-core
//!
//! Domain types, the error taxonomy, collaborator traits and configuration
//! shared by every polyrag crate.

pub mod config;
pub mod data_processor;
pub mod error;
pub mod health;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
