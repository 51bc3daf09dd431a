//! Batch embedding of chunk text into fixed-dimension vectors.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;

/// Knobs for the embedding stage.
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Upstream ceiling on inputs per call.
    pub batch_size: usize,
    /// Approximate-token budget per batch across all inputs.
    pub batch_token_budget: usize,
    /// Context window of the embedding model; longer chunks are truncated
    /// to a safe prefix and flagged, never rejected.
    pub max_chunk_tokens: usize,
    /// Pause between batches to respect downstream rate limits.
    pub batch_pause: Duration,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            batch_token_budget: 8000,
            max_chunk_tokens: 8192,
            batch_pause: Duration::from_millis(150),
        }
    }
}

/// Rough token estimate used for batch budgeting: four characters per
/// token, rounded up.
pub fn approx_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Cuts `text` to a prefix that fits `max_tokens`, returning the prefix
/// and whether anything was removed.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> (&str, bool) {
    if approx_tokens(text) <= max_tokens {
        return (text, false);
    }
    let max_chars = max_tokens * 4;
    let mut end = 0usize;
    for (count, (byte, ch)) in text.char_indices().enumerate() {
        if count >= max_chars {
            break;
        }
        end = byte + ch.len_utf8();
    }
    (&text[..end], true)
}

/// Packs chunk indices into batches respecting both the count ceiling and
/// the per-batch token budget. A single over-budget chunk still gets its
/// own batch; truncation happens at request-build time.
pub fn plan_batches(chunks: &[Chunk], config: &EmbedderConfig) -> Vec<Vec<usize>> {
    let mut batches = Vec::new();
    let mut batch: Vec<usize> = Vec::new();
    let mut batch_tokens = 0usize;
    for (i, chunk) in chunks.iter().enumerate() {
        let tokens = approx_tokens(&chunk.content).min(config.max_chunk_tokens);
        let over_count = batch.len() >= config.batch_size;
        let over_budget = !batch.is_empty() && batch_tokens + tokens > config.batch_token_budget;
        if over_count || over_budget {
            batches.push(std::mem::take(&mut batch));
            batch_tokens = 0;
        }
        batch.push(i);
        batch_tokens += tokens;
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}

/// One positional embedding from a service response. Responses are not
/// guaranteed to arrive in request order.
#[derive(Debug, Deserialize)]
pub struct IndexedEmbedding {
    /// Position of the corresponding input in the request.
    pub index: usize,
    /// The vector.
    pub embedding: Vec<f32>,
}

/// Restores request order before vectors are zipped back onto chunks.
pub fn sort_by_index(mut entries: Vec<IndexedEmbedding>) -> Vec<Vec<f32>> {
    entries.sort_by_key(|entry| entry.index);
    entries.into_iter().map(|entry| entry.embedding).collect()
}

/// Batch embedding backend.
pub trait EmbeddingService: Send + Sync {
    /// Embeds a batch of inputs, one vector per input, in request order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Identifier of the embedding model.
    fn model(&self) -> &str;
}

/// Blocking embeddings client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct HttpEmbeddingClient {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_retries: usize,
}

impl HttpEmbeddingClient {
    /// Builds a new embeddings client.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        dimensions: Option<usize>,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing embedding API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing embedding model name");
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid embedding API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build embedding HTTP client")?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
            dimensions,
            max_retries,
        })
    }

    fn should_retry(&self, status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn is_retryable_error(&self, err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() || err.is_decode()
    }

    fn retry_backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        let jitter = rand::thread_rng().gen_range(0..250);
        Duration::from_millis(500 * (1 << capped) + jitter)
    }
}

impl EmbeddingService for HttpEmbeddingClient {
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: inputs,
                dimensions: self.dimensions,
            };
            let response = self.client.post(&self.endpoint).json(&request).send();
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = resp
                            .json()
                            .context("failed to parse embedding response")?;
                        anyhow::ensure!(
                            parsed.data.len() == inputs.len(),
                            "embedding service returned {} vectors for {} inputs",
                            parsed.data.len(),
                            inputs.len()
                        );
                        return Ok(sort_by_index(parsed.data));
                    }

                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if self.should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(self.retry_backoff(attempt));
                        continue;
                    }
                    anyhow::bail!("embedding request failed ({}): {}", status, body);
                }
                Err(err) => {
                    if self.is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(self.retry_backoff(attempt));
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<IndexedEmbedding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shuffled_response_is_reassembled_in_request_order() {
        let entries = vec![
            IndexedEmbedding {
                index: 2,
                embedding: vec![2.0],
            },
            IndexedEmbedding {
                index: 0,
                embedding: vec![0.0],
            },
            IndexedEmbedding {
                index: 1,
                embedding: vec![1.0],
            },
        ];
        let sorted = sort_by_index(entries);
        assert_eq!(sorted, vec![vec![0.0], vec![1.0], vec![2.0]]);
    }

    #[test]
    fn oversized_chunk_is_truncated_to_safe_prefix() {
        // Roughly 9000 tokens of content against an 8192-token window.
        let text = "a".repeat(36_000);
        let (prefix, truncated) = truncate_to_tokens(&text, 8192);
        assert!(truncated);
        assert_eq!(prefix.chars().count(), 8192 * 4);
        let (same, untouched) = truncate_to_tokens("short", 8192);
        assert!(!untouched);
        assert_eq!(same, "short");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(100);
        let (prefix, truncated) = truncate_to_tokens(&text, 10);
        assert!(truncated);
        assert_eq!(prefix.chars().count(), 40);
    }

    #[test]
    fn batches_respect_count_and_token_budget() {
        let chunks: Vec<Chunk> = (0..5)
            .map(|i| Chunk::new("d", i, "word ".repeat(100), 100, None))
            .collect();
        let config = EmbedderConfig {
            batch_size: 2,
            batch_token_budget: 1_000_000,
            ..EmbedderConfig::default()
        };
        let batches = plan_batches(&chunks, &config);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], vec![0, 1]);
        assert_eq!(batches[2], vec![4]);

        let tight = EmbedderConfig {
            batch_size: 64,
            batch_token_budget: 150,
            ..EmbedderConfig::default()
        };
        let batches = plan_batches(&chunks, &tight);
        // 125 approx tokens per chunk, so every chunk rides alone.
        assert_eq!(batches.len(), 5);
    }
}
