//! Text-completion boundary for answer synthesis.
//!
//! One operation: prompt in, prose out. The service is a black box — no
//! retries, no streaming; a failure surfaces as `SynthesisFailed` and the
//! caller decides what to do with the already-retrieved sources.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::SynthesisConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Generates via a local Ollama instance's `POST /api/generate` endpoint.
pub struct OllamaSynthesizer {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaSynthesizer {
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::SynthesisFailed(e.to_string()))?;

        Ok(Self {
            model: config.model.clone(),
            url: config.url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Synthesizer for OllamaSynthesizer {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                Error::SynthesisFailed(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::SynthesisFailed(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::SynthesisFailed(e.to_string()))?;

        let text = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| {
                Error::SynthesisFailed("invalid Ollama response: missing response field".into())
            })?;

        Ok(text.trim().to_string())
    }
}
