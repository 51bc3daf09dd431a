//! Speech-to-text submission for uploaded audio.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde::Deserialize;

/// Connection settings for the speech-to-text service.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// API key for the transcription endpoint.
    pub api_key: String,
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// Transcription model identifier.
    pub model: String,
    /// Request timeout; audio uploads can be large.
    pub timeout: Duration,
}

/// Blocking client for an OpenAI-compatible transcription endpoint.
pub struct SpeechToTextClient {
    client: Client,
    endpoint: String,
    model: String,
}

impl SpeechToTextClient {
    /// Builds a new transcription client.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        anyhow::ensure!(!config.api_key.trim().is_empty(), "missing speech-to-text API key");
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid speech-to-text API key")?,
        );
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .context("failed to build speech-to-text HTTP client")?;
        let endpoint = format!(
            "{}/audio/transcriptions",
            config.base_url.trim_end_matches('/')
        );
        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
        })
    }

    /// Submits one audio blob and returns the transcript text.
    ///
    /// Single attempt: a failed transcription is fatal for the document,
    /// so there is nothing useful to retry here.
    pub fn transcribe(&self, bytes: Vec<u8>, file_name: &str) -> Result<String> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")
            .context("invalid audio part")?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        let resp = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .context("failed to call speech-to-text service")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("speech-to-text returned {}: {}", status, body);
        }
        let parsed: TranscriptionResponse = resp
            .json()
            .context("failed to parse speech-to-text response")?;
        anyhow::ensure!(
            !parsed.text.trim().is_empty(),
            "speech-to-text returned an empty transcript"
        );
        Ok(parsed.text)
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}
