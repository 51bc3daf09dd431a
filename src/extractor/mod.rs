//! Source-kind detection and extraction dispatch.
//!
//! One extractor per source kind behind a single entry point, selected by
//! a type-detection function over the document's declared type and
//! metadata. Every variant feeds the same sanitizer before anything is
//! persisted.

use anyhow::Result;
use crc32fast::Hasher as Crc32;

use crate::document::Document;
use crate::error::PipelineError;
use crate::progress::ProgressSink;
use crate::sanitize::clean_text;
use crate::store::BlobStore;

pub mod audio;
pub mod pdf;
pub mod text;
pub mod video;
pub mod web;

pub use audio::{AudioConfig, SpeechToTextClient};
pub use pdf::{PdfConfig, PdfExtractor};
pub use video::{TranscriptClient, VideoConfig};
pub use web::{WebConfig, WebExtractor};

/// The five source kinds the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Uploaded PDF.
    Pdf,
    /// Non-video source URL.
    Web,
    /// Recognized video hosting URL.
    Video,
    /// Uploaded audio.
    Audio,
    /// Uploaded plain text or word-processor document.
    Text,
}

impl SourceKind {
    /// Stable name recorded in document metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Web => "web",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
        }
    }
}

/// Determines which extractor handles a document.
///
/// URL-bearing documents are video or web by URL pattern; uploads are
/// routed by declared media type. Anything else is a fatal, non-retryable
/// input error.
pub fn detect(document: &Document) -> Result<SourceKind, PipelineError> {
    if let Some(url) = document.source_url() {
        if video::is_video_url(url) {
            return Ok(SourceKind::Video);
        }
        return Ok(SourceKind::Web);
    }
    let media_type = document.media_type.to_ascii_lowercase();
    if media_type == "application/pdf" {
        return Ok(SourceKind::Pdf);
    }
    if media_type.starts_with("audio/") {
        return Ok(SourceKind::Audio);
    }
    if media_type.starts_with("text/") || text::is_word_processor(&media_type) {
        return Ok(SourceKind::Text);
    }
    Err(PipelineError::UnsupportedType {
        declared: document.media_type.clone(),
    })
}

/// A single extraction result with light metadata.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    /// Sanitized extraction output.
    pub text: String,
    /// Which extractor produced it.
    pub kind: SourceKind,
    /// CRC32 checksum of the sanitized text.
    pub checksum: u32,
    /// Page or document title when one was found.
    pub title: Option<String>,
    /// Total pages in the source, for paged formats.
    pub pages_total: Option<usize>,
    /// Pages whose text made it into the output.
    pub pages_extracted: Option<usize>,
    /// True when a sampled page subset was used.
    pub sampled: bool,
    /// Extraction tier used for web pages.
    pub strategy: Option<&'static str>,
}

impl ExtractedText {
    fn new(text: String, kind: SourceKind) -> Self {
        let mut hasher = Crc32::new();
        hasher.update(text.as_bytes());
        Self {
            checksum: hasher.finalize(),
            text,
            kind,
            title: None,
            pages_total: None,
            pages_extracted: None,
            sampled: false,
            strategy: None,
        }
    }
}

/// Optional service clients plus per-kind limits.
pub struct ExtractorConfig {
    /// PDF limits.
    pub pdf: PdfConfig,
    /// Web fetch limits.
    pub web: WebConfig,
    /// Transcript service; `None` disables video sources.
    pub video: Option<VideoConfig>,
    /// Speech-to-text service; `None` disables audio sources.
    pub audio: Option<AudioConfig>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            pdf: PdfConfig::default(),
            web: WebConfig::default(),
            video: None,
            audio: None,
        }
    }
}

/// Converts a registered source into sanitized plain text.
pub struct Extractor {
    pdf: PdfExtractor,
    web: WebExtractor,
    video: Option<TranscriptClient>,
    audio: Option<SpeechToTextClient>,
}

impl Extractor {
    /// Builds every variant up front so configuration problems surface at
    /// construction rather than mid-pipeline.
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        let video = config
            .video
            .as_ref()
            .map(TranscriptClient::new)
            .transpose()?;
        let audio = config
            .audio
            .as_ref()
            .map(SpeechToTextClient::new)
            .transpose()?;
        Ok(Self {
            pdf: PdfExtractor::new(config.pdf),
            web: WebExtractor::new(&config.web)?,
            video,
            audio,
        })
    }

    /// Runs the extractor matching the document's source kind.
    pub fn extract(
        &self,
        document: &Document,
        blobs: &dyn BlobStore,
        progress: &dyn ProgressSink,
    ) -> Result<ExtractedText, PipelineError> {
        let kind = detect(document)?;
        tracing::info!(document_id = %document.id, kind = kind.as_str(), "extracting");
        match kind {
            SourceKind::Pdf => {
                let bytes = self.download(document, blobs)?;
                let page_text = self.pdf.extract(&bytes, progress)?;
                let mut extracted = ExtractedText::new(clean_text(&page_text.text), kind);
                extracted.pages_total = Some(page_text.pages_total);
                extracted.pages_extracted = Some(page_text.pages_extracted);
                extracted.sampled = page_text.sampled;
                Ok(extracted)
            }
            SourceKind::Web => {
                let url = document.source_url().ok_or(PipelineError::MissingSource)?;
                let page = self.web.extract(url)?;
                let mut extracted = ExtractedText::new(clean_text(&page.text), kind);
                extracted.title = page.title;
                extracted.strategy = Some(page.strategy);
                Ok(extracted)
            }
            SourceKind::Video => {
                let url = document.source_url().ok_or(PipelineError::MissingSource)?;
                let client = self.video.as_ref().ok_or_else(|| PipelineError::Transcript {
                    class: crate::error::TranscriptClass::Unavailable,
                    detail: "no transcript service configured".to_string(),
                })?;
                let transcript = client.fetch(url)?;
                Ok(ExtractedText::new(clean_text(&transcript), kind))
            }
            SourceKind::Audio => {
                let client = self
                    .audio
                    .as_ref()
                    .ok_or_else(|| PipelineError::Transcription {
                        detail: "no speech-to-text service configured".to_string(),
                    })?;
                let bytes = self.download(document, blobs)?;
                let file_name = document
                    .storage_path
                    .as_deref()
                    .and_then(|path| path.rsplit('/').next())
                    .unwrap_or("audio")
                    .to_string();
                let transcript = client
                    .transcribe(bytes, &file_name)
                    .map_err(|err| PipelineError::Transcription {
                        detail: format!("{err:#}"),
                    })?;
                Ok(ExtractedText::new(clean_text(&transcript), kind))
            }
            SourceKind::Text => {
                let bytes = self.download(document, blobs)?;
                let decoded = text::extract(&bytes, &document.media_type)?;
                Ok(ExtractedText::new(decoded, kind))
            }
        }
    }

    fn download(&self, document: &Document, blobs: &dyn BlobStore) -> Result<Vec<u8>, PipelineError> {
        let path = document
            .storage_path
            .as_deref()
            .ok_or(PipelineError::MissingSource)?;
        Ok(blobs.download(&document.bucket(), path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detection_routes_by_url_then_type() {
        let mut doc = Document::new("d", "org", "text/html");
        doc.metadata.insert(
            "source_url".into(),
            json!("https://www.youtube.com/watch?v=abc"),
        );
        assert_eq!(detect(&doc).expect("video"), SourceKind::Video);

        doc.metadata
            .insert("source_url".into(), json!("https://example.com/post"));
        assert_eq!(detect(&doc).expect("web"), SourceKind::Web);

        let pdf = Document::new("d", "org", "application/pdf");
        assert_eq!(detect(&pdf).expect("pdf"), SourceKind::Pdf);

        let audio = Document::new("d", "org", "audio/mpeg");
        assert_eq!(detect(&audio).expect("audio"), SourceKind::Audio);

        let doc_file = Document::new(
            "d",
            "org",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        );
        assert_eq!(detect(&doc_file).expect("text"), SourceKind::Text);
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let doc = Document::new("d", "org", "application/zip");
        assert!(matches!(
            detect(&doc),
            Err(PipelineError::UnsupportedType { .. })
        ));
    }
}
