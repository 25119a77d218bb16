use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use globaliq_core::config::{LlmConfig, LlmProvider};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// OpenAI-compatible `/v1/chat/completions` client. Ollama exposes the same surface.
#[derive(Clone, Debug)]
pub struct ChatCompletionsClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl ChatCompletionsClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let base_url = match (config.provider, config.base_url.as_deref()) {
            (_, Some(base_url)) if !base_url.trim().is_empty() => base_url.to_string(),
            (LlmProvider::OpenAi, _) => OPENAI_BASE_URL.to_string(),
            (LlmProvider::Ollama, _) => {
                return Err(anyhow!("llm.base_url is required for the ollama provider"))
            }
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build llm http client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_once(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": 0.0,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.context("chat completion request failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("chat completion endpoint returned {status}"));
        }

        let payload: ChatCompletionResponse =
            response.json().await.context("failed to decode chat completion response")?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| anyhow!("chat completion response had no content"))
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.send_once(prompt).await {
                Ok(content) => return Ok(content),
                Err(error) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "llm.retry",
                        attempt,
                        error = %error,
                        "chat completion failed, retrying"
                    );
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Pulls the first JSON object out of a completion, tolerating code fences and prose around it.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}
