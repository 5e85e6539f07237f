//! Inference capability: `infer(prompt, temperature) -> text`.
//! The local and remote backends are interchangeable behind one trait.

pub mod ollama;
pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{LlmProvider, PipelineConfig};
use crate::error::InferenceError;

pub use ollama::OllamaBackend;
pub use openai::OpenAiCompatBackend;

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn infer(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, InferenceError>;

    /// Cheap reachability check used at startup.
    async fn probe(&self) -> Result<()>;

    fn name(&self) -> &'static str;
}

pub type DynBackend = Arc<dyn InferenceBackend>;

/// Factory: build the backend selected by `cfg.provider`.
pub fn build_backend(cfg: &PipelineConfig) -> Result<DynBackend> {
    let timeout = cfg.inference_timeout();
    match cfg.provider {
        LlmProvider::Local => Ok(Arc::new(OllamaBackend::new(
            &cfg.local_base_url,
            &cfg.model,
            cfg.context_window,
            timeout,
        )?)),
        LlmProvider::Remote => Ok(Arc::new(OpenAiCompatBackend::new(
            &cfg.remote_base_url,
            &cfg.api_key,
            &cfg.model,
            timeout,
        )?)),
    }
}

pub(crate) fn trim_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

/// Shorten a backend error body for logs.
pub(crate) fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push_str("...");
        out
    }
}
