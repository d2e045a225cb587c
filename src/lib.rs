//! `jobdocs` library crate.
//!
//! The binary is a thin wrapper around this library so that:
//!
//! - the ingestion pipeline is testable without spawning processes
//! - sources, renderers and audit sinks can be swapped by embedding callers

pub mod app;
pub mod audit;
pub mod cli;
pub mod dates;
pub mod domain;
pub mod error;
pub mod filter;
pub mod logging;
pub mod normalize;
pub mod output;
pub mod render;
pub mod report;
pub mod source;
pub mod state;
