// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod calibrate;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod llm;
pub mod metrics;
pub mod monitor;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod types;

// ---- Re-exports for stable public API ----
pub use crate::config::PipelineConfig;
pub use crate::metrics::{PipelineStats, StatsSnapshot};
pub use crate::pipeline::Pipeline;
pub use crate::types::{Candidate, NewsItem, Signal, TimeHorizon};
