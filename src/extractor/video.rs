//! Caption-track retrieval for recognized video hosts.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use url::Url;

use crate::chunker::time_marker;
use crate::error::{PipelineError, TranscriptClass};

/// Connection settings for the transcript-fetch service.
#[derive(Debug, Clone)]
pub struct VideoConfig {
    /// Base URL of the transcript-fetch service.
    pub endpoint: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Languages tried in order after the default track fails.
    pub fallback_languages: Vec<String>,
}

impl VideoConfig {
    /// Default fallback language list.
    pub fn default_languages() -> Vec<String> {
        ["en", "en-US", "en-GB", "es", "fr", "de", "pt", "hi"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

/// True when the URL matches a recognized video hosting pattern.
pub fn is_video_url(url: &str) -> bool {
    video_id(url).is_some()
}

/// Extracts the host-specific video identifier, if the URL is recognized.
pub fn video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.");
    match host {
        "youtube.com" | "m.youtube.com" => {
            if parsed.path() == "/watch" {
                return parsed
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned());
            }
            // Shorts and embeds carry the id as the last path segment.
            let mut segments = parsed.path_segments()?;
            match segments.next() {
                Some("shorts") | Some("embed") => segments.next().map(|s| s.to_string()),
                _ => None,
            }
        }
        "youtu.be" => parsed
            .path_segments()?
            .next()
            .filter(|segment| !segment.is_empty())
            .map(|s| s.to_string()),
        "vimeo.com" => parsed
            .path_segments()?
            .find(|segment| segment.chars().all(|c| c.is_ascii_digit()) && !segment.is_empty())
            .map(|s| s.to_string()),
        _ => None,
    }
}

/// Blocking client for the transcript-fetch service.
pub struct TranscriptClient {
    client: Client,
    endpoint: String,
    fallback_languages: Vec<String>,
}

impl TranscriptClient {
    /// Builds a new transcript client.
    pub fn new(config: &VideoConfig) -> Result<Self> {
        anyhow::ensure!(
            !config.endpoint.trim().is_empty(),
            "missing transcript service endpoint"
        );
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build transcript HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            fallback_languages: config.fallback_languages.clone(),
        })
    }

    /// Fetches a transcript for a video URL, trying the default track
    /// first and then each fallback language.
    ///
    /// Failures that no language change can fix (captions disabled,
    /// private video, missing video, region lock) abort immediately with
    /// their own classification; only per-language misses keep the loop
    /// going. There is no audio-transcription fallback for videos; the
    /// user-facing error says so rather than failing silently.
    pub fn fetch(&self, url: &str) -> Result<String, PipelineError> {
        let id = video_id(url).ok_or_else(|| PipelineError::Transcript {
            class: TranscriptClass::NotFound,
            detail: format!("unrecognized video URL: {url}"),
        })?;

        let mut languages: Vec<Option<&str>> = vec![None];
        languages.extend(self.fallback_languages.iter().map(|lang| Some(lang.as_str())));

        let mut last_detail = String::new();
        for lang in languages {
            match self.fetch_track(&id, lang) {
                Ok(segments) if !segments.is_empty() => {
                    return Ok(render_transcript(&segments));
                }
                Ok(_) => {
                    last_detail = format!("empty track for lang {lang:?}");
                }
                Err(TrackError::Terminal { class, detail }) => {
                    return Err(PipelineError::Transcript { class, detail });
                }
                Err(TrackError::LanguageMiss { detail }) => {
                    tracing::debug!(video = %id, ?lang, detail = %detail, "caption track miss");
                    last_detail = detail;
                }
            }
        }

        Err(PipelineError::Transcript {
            class: TranscriptClass::Unavailable,
            detail: format!("no caption track in any attempted language; last: {last_detail}"),
        })
    }

    fn fetch_track(&self, id: &str, lang: Option<&str>) -> Result<Vec<CaptionSegment>, TrackError> {
        let mut request = self
            .client
            .get(format!("{}/transcripts", self.endpoint))
            .query(&[("video_id", id)]);
        if let Some(lang) = lang {
            request = request.query(&[("lang", lang)]);
        }
        let resp = request.send().map_err(|err| TrackError::LanguageMiss {
            detail: format!("transcript request failed: {err}"),
        })?;
        let status = resp.status();
        if status.is_success() {
            let parsed: TranscriptResponse = resp.json().map_err(|err| TrackError::LanguageMiss {
                detail: format!("invalid transcript payload: {err}"),
            })?;
            return Ok(parsed.segments);
        }

        let body: ServiceError = resp.json().unwrap_or_default();
        let detail = format!(
            "service returned {} ({}): {}",
            status,
            body.code.as_deref().unwrap_or("unknown"),
            body.message.as_deref().unwrap_or("no message")
        );
        match body.code.as_deref() {
            Some("transcripts_disabled") => Err(TrackError::Terminal {
                class: TranscriptClass::Disabled,
                detail,
            }),
            Some("access_denied") | Some("private") => Err(TrackError::Terminal {
                class: TranscriptClass::AccessDenied,
                detail,
            }),
            Some("video_not_found") => Err(TrackError::Terminal {
                class: TranscriptClass::NotFound,
                detail,
            }),
            Some("region_restricted") => Err(TrackError::Terminal {
                class: TranscriptClass::RegionRestricted,
                detail,
            }),
            _ => Err(TrackError::LanguageMiss { detail }),
        }
    }
}

enum TrackError {
    /// No other language can help; stop and classify.
    Terminal {
        class: TranscriptClass,
        detail: String,
    },
    /// This language has no track; try the next one.
    LanguageMiss { detail: String },
}

fn render_transcript(segments: &[CaptionSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&time_marker(segment.start.max(0.0) as u64));
        out.push(' ');
        out.push_str(text);
    }
    out
}

/// One timed caption segment from the transcript service.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptionSegment {
    /// Segment start in seconds.
    pub start: f64,
    /// Caption text.
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    segments: Vec<CaptionSegment>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceError {
    code: Option<String>,
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_hosting_patterns() {
        assert_eq!(
            video_id("https://www.youtube.com/watch?v=abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(video_id("https://youtu.be/xyz789").as_deref(), Some("xyz789"));
        assert_eq!(video_id("https://vimeo.com/123456").as_deref(), Some("123456"));
        assert_eq!(
            video_id("https://www.youtube.com/shorts/short1").as_deref(),
            Some("short1")
        );
        assert!(video_id("https://example.com/watch?v=abc").is_none());
        assert!(!is_video_url("https://example.com/article"));
    }

    #[test]
    fn transcript_rendering_carries_time_markers() {
        let segments = vec![
            CaptionSegment {
                start: 5.2,
                text: "welcome".into(),
            },
            CaptionSegment {
                start: 65.0,
                text: "next topic".into(),
            },
        ];
        let text = render_transcript(&segments);
        assert!(text.starts_with("[time 00:00:05] welcome"));
        assert!(text.contains("[time 00:01:05] next topic"));
    }
}
