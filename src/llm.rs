//!
//! tabletalk LLM collaborator client
//! ---------------------------------
//! Thin client for the external model service, abstracted behind the
//! `QueryGenerator` trait so the service layer can be tested with a stub.
//! The production implementation speaks the OpenAI-compatible chat
//! completions protocol (OpenRouter by default) using a blocking reqwest
//! client; the service invokes it from `spawn_blocking`.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use tracing::debug;

use crate::config::LlmConfig;

/// Capability contract for the collaborator: one prompt in, raw text out.
/// Network, auth and model selection are the implementation's concern.
pub trait QueryGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String>;
}

/// OpenAI-compatible chat completions client.
///
/// The blocking reqwest client is built per call, inside the blocking
/// context `generate` runs on; it must never be constructed on an async
/// worker thread.
pub struct ChatCompletionsClient {
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }
}

impl QueryGenerator for ChatCompletionsClient {
    fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        debug!(target: "tabletalk::llm", "chat completion request: model='{}'", self.model);
        let http = reqwest::blocking::Client::builder()
            // Generation is slow; cap it rather than hanging a request forever.
            .timeout(Duration::from_secs(120))
            .build()
            .context("building http client")?;
        let resp = http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .context("sending chat completion request")?;
        let status = resp.status();
        let payload: serde_json::Value = resp.json().context("decoding chat completion response")?;
        if !status.is_success() {
            let detail = payload
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .unwrap_or("no error detail");
            return Err(anyhow!("model service returned {status}: {detail}"));
        }
        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("chat completion response had no message content"))?;
        Ok(content.to_string())
    }
}
