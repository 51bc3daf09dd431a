//! Text-generation provider clients used for summarization.

use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Request envelope shared by the providers: a system instruction, the
/// user content, and a token budget.
pub struct ProviderRequest<'a> {
    /// System-role instruction.
    pub system: &'a str,
    /// User-role content.
    pub user: &'a str,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: usize,
}

/// Trait implemented by concrete text-generation providers.
pub trait LlmProvider: Send + Sync {
    /// Generates a completion for the request.
    fn complete(&self, request: &ProviderRequest) -> Result<String>;

    /// Identifier of the model answering requests.
    fn model(&self) -> &str;
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    let jitter = rand::thread_rng().gen_range(0..250);
    Duration::from_millis(500 * (1 << capped) + jitter)
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_retries: usize,
}

impl OpenAiProvider {
    /// Builds a new provider client.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
            max_retries,
        })
    }
}

impl LlmProvider for OpenAiProvider {
    fn complete(&self, request: &ProviderRequest) -> Result<String> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.user,
                },
            ],
        };

        let mut attempt = 0usize;
        loop {
            let resp = self
                .client
                .post(&self.endpoint)
                .headers(headers.clone())
                .json(&body)
                .send()
                .context("failed to call OpenAI chat completions")?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp
                    .text()
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                if should_retry(status) && attempt + 1 < self.max_retries {
                    attempt += 1;
                    thread::sleep(retry_backoff(attempt));
                    continue;
                }
                bail!("OpenAI returned {}: {}", status, text);
            }
            let parsed: ChatResponse = resp.json().context("failed to parse OpenAI response")?;
            let answer = parsed
                .choices
                .into_iter()
                .find_map(|choice| Some(choice.message.content))
                .unwrap_or_default();
            if answer.trim().is_empty() {
                bail!("OpenAI response missing content");
            }
            return Ok(answer);
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}

/// Messages-API client for Anthropic models.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    max_retries: usize,
}

impl AnthropicProvider {
    /// Builds a new provider client.
    pub fn new(api_key: String, model: String, timeout: Duration, max_retries: usize) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Anthropic API key");
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Anthropic HTTP client")?;
        Ok(Self {
            client,
            api_key,
            model,
            max_retries,
        })
    }
}

impl LlmProvider for AnthropicProvider {
    fn complete(&self, request: &ProviderRequest) -> Result<String> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(self.api_key.trim()).context("invalid Anthropic API key")?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: vec![AnthropicContentBlock {
                    kind: "text",
                    text: request.user,
                }],
            }],
        };

        let mut attempt = 0usize;
        loop {
            let resp = self
                .client
                .post("https://api.anthropic.com/v1/messages")
                .headers(headers.clone())
                .json(&body)
                .send()
                .context("failed to call Anthropic messages API")?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp
                    .text()
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                if should_retry(status) && attempt + 1 < self.max_retries {
                    attempt += 1;
                    thread::sleep(retry_backoff(attempt));
                    continue;
                }
                bail!("Anthropic returned {}: {}", status, text);
            }
            let parsed: AnthropicResponse =
                resp.json().context("failed to parse Anthropic response")?;
            let answer = parsed
                .content
                .into_iter()
                .filter_map(|block| match block {
                    AnthropicResponseBlock::Text { text } => Some(text),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            if answer.trim().is_empty() {
                bail!("Anthropic response missing text content");
            }
            return Ok(answer);
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: Vec<AnthropicContentBlock<'a>>,
}

#[derive(Serialize)]
struct AnthropicContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
