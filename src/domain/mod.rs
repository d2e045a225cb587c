//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - source records (`RawRecord`) and their normalized form (`CanonicalRecord`)
//! - date resolution results (`DateCandidate`, `ResolvedDate`)
//! - artifact write types (`WriteMode`, `WriteOutcome`, `ArtifactDescriptor`)
//! - run configuration and summary (`RunConfig`, `RunSummary`)

pub mod types;

pub use types::*;
