use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::prompt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Ollama client used by the extraction step; always requests JSON output.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client,
        })
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }

    /// Generate, asking the model to repair its output when it is not valid JSON.
    pub async fn generate_json_with_retry(&self, prompt: &str, max_attempts: usize) -> Result<String> {
        let mut response = self.generate(prompt).await?;

        for attempt in 1..=max_attempts {
            if serde_json::from_str::<serde_json::Value>(&response).is_ok() {
                debug!(attempt, "Model returned valid JSON");
                return Ok(response);
            }
            if attempt == max_attempts {
                break;
            }

            warn!(attempt, max_attempts, "Model returned invalid JSON, asking for a repair");
            response = self.generate(&prompt::build_retry_prompt(&response)).await?;
        }

        anyhow::bail!("Failed to get valid JSON after {} attempts", max_attempts)
    }
}
