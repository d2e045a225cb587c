//! Persisted ingestion state.

pub mod watermark;

pub use watermark::*;
