// src/config/mod.rs
pub mod pipeline;

pub use pipeline::{
    FeedKind, FeedSource, FetchExhaustedPolicy, LlmProvider, PipelineConfig, ThermalProbeKind,
};
