//! Data ingestion module - functional pipeline for multi-source ballot measure data

pub mod enrich;
pub mod export;
pub mod fetch;
pub mod fingerprint;
pub mod parse;
pub mod pipeline;
pub mod reconcile;
pub mod types;
pub mod utils;
pub mod write;

pub use types::*;
