//! Artifact output: the generation lock and the idempotent writer.

pub mod lock;
pub mod writer;

pub use lock::*;
pub use writer::*;
