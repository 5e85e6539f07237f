// src/llm/ollama.rs
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::InferenceError;
use crate::llm::{clip, trim_base, InferenceBackend};

/// Local inference server speaking the Ollama `/api/generate` protocol.
pub struct OllamaBackend {
    http: reqwest::Client,
    base: String,
    model: String,
    num_ctx: u32,
}

#[derive(Serialize)]
struct Options {
    temperature: f32,
    num_ctx: u32,
    num_predict: u32,
}

#[derive(Serialize)]
struct GenerateReq<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: Options,
}

#[derive(Deserialize)]
struct GenerateResp {
    #[serde(default)]
    response: String,
}

impl OllamaBackend {
    pub fn new(base: &str, model: &str, num_ctx: u32, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .context("building ollama http client")?;
        Ok(Self {
            http,
            base: trim_base(base),
            model: model.to_string(),
            num_ctx,
        })
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    async fn infer(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, InferenceError> {
        let req = GenerateReq {
            model: &self.model,
            prompt,
            stream: false,
            options: Options {
                temperature,
                num_ctx: self.num_ctx,
                num_predict: max_tokens,
            },
        };
        let resp = self
            .http
            .post(format!("{}/api/generate", self.base))
            .json(&req)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                message: clip(&body, 200),
            });
        }
        let body: GenerateResp = resp
            .json()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))?;
        Ok(body.response)
    }

    async fn probe(&self) -> Result<()> {
        let resp = self
            .http
            .get(format!("{}/api/tags", self.base))
            .send()
            .await
            .with_context(|| format!("local inference server unreachable at {}", self.base))?;
        if !resp.status().is_success() {
            bail!("local inference server answered {}", resp.status());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
