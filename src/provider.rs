//! LLM Provider
//!
//! Seam between the advisory analyzer and whichever chat-completion
//! service backs it. The analyzer only ever sees this trait; transport
//! failures bubble up as errors and are absorbed by its deterministic
//! fallback.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String>;
}

/// Client for any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(json!({ "role": "system", "content": sys }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        // Low temperature, capped reply; the caller parses one JSON object.
        let body = json!({
            "model": model,
            "messages": messages,
            "temperature": 0.1,
            "max_tokens": 600,
            "stream": false,
        });

        let mut request = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .json(&body);

        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send().await?.error_for_status()?;
        let json: serde_json::Value = res.json().await?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .context("failed to parse content from chat-completion response")?;

        Ok(content.to_string())
    }
}
