//! OpenRouter chat-completions client.
//!
//! One request per call, no retries. The HTTP client carries the per-request
//! timeout; callers may add their own deadline on top.

use crate::store::{CallFuture, CompletionService};
use crate::util::{mask_secret, sanitize_error_body};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenRouter direct API URL
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl std::fmt::Debug for OpenRouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterClient")
            .field("api_key", &mask_secret(&self.api_key))
            .field("model", &self.model)
            .field("url", &self.url)
            .finish()
    }
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            url: OPENROUTER_URL.to_string(),
        })
    }

    /// Point the client at a different endpoint (tests, proxies).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens,
            stream: false,
        };

        let response = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://github.com/reposage")
            .header("X-Title", "RepoSage")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .context("Failed to send OpenRouter request")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read OpenRouter response")?;

        if !status.is_success() {
            let error_msg = match status.as_u16() {
                401 => "Invalid OpenRouter API key".to_string(),
                429 => "Rate limited by OpenRouter".to_string(),
                500..=599 => format!(
                    "OpenRouter server error ({}). The service may be temporarily unavailable.",
                    status
                ),
                _ => format!("API error {}: {}", status, sanitize_error_body(&text)),
            };
            return Err(anyhow::anyhow!("{}", error_msg));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            anyhow::anyhow!(
                "Failed to parse OpenRouter response: {}: {}",
                e,
                sanitize_error_body(&text)
            )
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("OpenRouter returned an empty completion"))
    }
}

impl CompletionService for OpenRouterClient {
    fn complete<'a>(&'a self, system_prompt: &'a str, user_prompt: &'a str, max_tokens: u32) -> CallFuture<'a, String> {
        Box::pin(self.chat(system_prompt, user_prompt, max_tokens))
    }
}
