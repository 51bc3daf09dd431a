//! Pipeline error taxonomy and the structured report persisted on documents.
//!
//! Library code surfaces [`PipelineError`] values; stage boundaries convert
//! them into [`ErrorReport`]s that are merged into the document's metadata so
//! a polling UI can render a cause, a plain-language explanation, and
//! concrete next steps without ever seeing an unhandled failure.

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::store::StoreError;

/// Machine-readable error code recorded on the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Declared media type is not handled by any extractor.
    UnsupportedType,
    /// Document carries neither a storage path nor a source URL.
    MissingSource,
    /// A collaborator store rejected a read or write.
    StoreFailure,
    /// PDF bytes could not be parsed.
    PdfParse,
    /// Web fetch exhausted every header profile.
    FetchFailed,
    /// Transcript retrieval failed.
    TranscriptFailed,
    /// Speech-to-text submission failed.
    TranscriptionFailed,
    /// Extracted content failed the quality gate.
    ContentQuality,
    /// Chunking produced nothing to work with.
    NoChunks,
    /// Embedding service failed for the whole stage.
    EmbeddingFailed,
    /// Summarization failed at the document level.
    SummaryFailed,
    /// Nothing usable reached document-level finalization.
    NoContent,
    /// A status transition violated the forward-only state machine.
    InvalidTransition,
}

/// Cause classification for an exhausted web fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchClass {
    /// Every attempt timed out.
    Timeout,
    /// The site is blocking automated access (401/403).
    Blocked,
    /// The page does not exist (404).
    NotFound,
    /// The origin server kept failing (5xx).
    Upstream,
    /// TLS negotiation failed.
    Tls,
    /// Mixed or unrecognized causes.
    Unknown,
}

impl FetchClass {
    fn user_message(self) -> &'static str {
        match self {
            Self::Timeout => "The page took too long to respond.",
            Self::Blocked => "This site is blocking automated access.",
            Self::NotFound => "The page could not be found.",
            Self::Upstream => "The site is having server trouble.",
            Self::Tls => "A secure connection to the site could not be established.",
            Self::Unknown => "The page could not be fetched.",
        }
    }

    fn suggested_actions(self) -> Vec<String> {
        let actions: &[&str] = match self {
            Self::Timeout => &["Try again later", "Check that the URL loads in a browser"],
            Self::Blocked => &[
                "Copy the article text into a plain text file and upload that instead",
                "Try a different source for the same content",
            ],
            Self::NotFound => &["Check the URL for typos", "Use an archived copy if one exists"],
            Self::Upstream => &["Try again in a few minutes"],
            Self::Tls => &["Check that the site's certificate is valid"],
            Self::Unknown => &["Verify the URL and try again"],
        };
        actions.iter().map(|s| s.to_string()).collect()
    }
}

/// Cause classification for a failed transcript retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptClass {
    /// The uploader disabled captions for this video.
    Disabled,
    /// The video is private or requires sign-in.
    AccessDenied,
    /// No video exists at this URL.
    NotFound,
    /// The video is not available in the service's region.
    RegionRestricted,
    /// No caption track was found in any attempted language.
    Unavailable,
}

impl TranscriptClass {
    fn user_message(self) -> &'static str {
        match self {
            Self::Disabled => "Captions are disabled for this video.",
            Self::AccessDenied => "This video is private or requires sign-in.",
            Self::NotFound => "No video was found at this URL.",
            Self::RegionRestricted => "This video is not available in this region.",
            Self::Unavailable => "No transcript could be retrieved for this video.",
        }
    }

    fn suggested_actions(self) -> Vec<String> {
        let actions: &[&str] = match self {
            Self::Disabled => &[
                "Try a different video that has captions enabled",
                "Audio transcription of videos is not supported yet",
            ],
            Self::AccessDenied => &["Make the video public or unlisted", "Try a different video"],
            Self::NotFound => &["Check the video URL for typos"],
            Self::RegionRestricted => &["Try a mirror of the video that is not region locked"],
            Self::Unavailable => &[
                "Try a different video",
                "Audio transcription of videos is not supported yet",
            ],
        };
        actions.iter().map(|s| s.to_string()).collect()
    }
}

/// Errors surfaced by pipeline stages.
#[derive(Debug)]
pub enum PipelineError {
    /// The declared media type matches no extractor.
    UnsupportedType {
        /// The declared type as registered.
        declared: String,
    },
    /// The document has no storage path or source URL to read from.
    MissingSource,
    /// A collaborator store failed.
    Store(StoreError),
    /// PDF bytes could not be loaded or yielded no text.
    Pdf {
        /// Parser-level detail.
        detail: String,
    },
    /// Web fetch exhausted all header profiles.
    Fetch {
        /// Aggregated cause across attempts.
        class: FetchClass,
        /// Number of profiles attempted.
        attempts: usize,
        /// Per-attempt detail, joined.
        detail: String,
    },
    /// Transcript retrieval failed for every attempted language.
    Transcript {
        /// Cause classification.
        class: TranscriptClass,
        /// Service-level detail.
        detail: String,
    },
    /// The speech-to-text service rejected or failed the submission.
    Transcription {
        /// Service-level detail.
        detail: String,
    },
    /// Extracted content failed the quality gate.
    ContentQuality {
        /// What the gate observed.
        detail: String,
    },
    /// The chunker produced zero chunks from non-empty extraction.
    NoChunks,
    /// Nothing usable reached document-level finalization.
    NoContent,
    /// The embedding stage failed before any batch could run.
    Embedding {
        /// Service-level detail.
        detail: String,
    },
    /// Document-level summarization failed.
    Summary {
        /// Provider-level detail.
        detail: String,
    },
    /// A requested status change violated the state machine.
    InvalidTransition {
        /// Status the document held.
        from: &'static str,
        /// Status that was requested.
        to: &'static str,
    },
}

impl PipelineError {
    /// Machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedType { .. } => ErrorCode::UnsupportedType,
            Self::MissingSource => ErrorCode::MissingSource,
            Self::Store(_) => ErrorCode::StoreFailure,
            Self::Pdf { .. } => ErrorCode::PdfParse,
            Self::Fetch { .. } => ErrorCode::FetchFailed,
            Self::Transcript { .. } => ErrorCode::TranscriptFailed,
            Self::Transcription { .. } => ErrorCode::TranscriptionFailed,
            Self::ContentQuality { .. } => ErrorCode::ContentQuality,
            Self::NoChunks => ErrorCode::NoChunks,
            Self::NoContent => ErrorCode::NoContent,
            Self::Embedding { .. } => ErrorCode::EmbeddingFailed,
            Self::Summary { .. } => ErrorCode::SummaryFailed,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
        }
    }

    /// True for input and content errors that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedType { .. }
                | Self::MissingSource
                | Self::ContentQuality { .. }
                | Self::NoChunks
                | Self::InvalidTransition { .. }
        )
    }

    /// Short, non-technical explanation suitable for end users.
    pub fn user_message(&self) -> String {
        match self {
            Self::UnsupportedType { declared } => {
                format!("Files of type '{declared}' are not supported.")
            }
            Self::MissingSource => {
                "The document has no uploaded file or source link to process.".to_string()
            }
            Self::Store(_) => "Something went wrong saving progress. Please retry.".to_string(),
            Self::Pdf { .. } => {
                "The PDF could not be read. It may be scanned, encrypted, or damaged.".to_string()
            }
            Self::Fetch { class, .. } => class.user_message().to_string(),
            Self::Transcript { class, .. } => class.user_message().to_string(),
            Self::Transcription { .. } => "The audio could not be transcribed.".to_string(),
            Self::ContentQuality { .. } => {
                "The document may be corrupted or in an unsupported format.".to_string()
            }
            Self::NoChunks => "The document contained no readable text.".to_string(),
            Self::NoContent => "There was no content to summarize.".to_string(),
            Self::Embedding { .. } => {
                "Search indexing failed for this document. Please retry.".to_string()
            }
            Self::Summary { .. } => {
                "The document summary could not be generated. Please retry.".to_string()
            }
            Self::InvalidTransition { .. } => {
                "The document is already being processed elsewhere.".to_string()
            }
        }
    }

    /// Concrete next steps shown alongside the user message.
    pub fn suggested_actions(&self) -> Vec<String> {
        match self {
            Self::UnsupportedType { .. } => vec![
                "Convert the file to PDF or plain text and upload again".to_string(),
            ],
            Self::MissingSource => vec!["Re-upload the file or re-add the link".to_string()],
            Self::Store(_) | Self::Embedding { .. } | Self::Summary { .. } => {
                vec!["Retry the document".to_string()]
            }
            Self::Pdf { .. } => vec![
                "If the PDF is scanned, run OCR and upload the result".to_string(),
                "Remove password protection if the PDF is encrypted".to_string(),
            ],
            Self::Fetch { class, .. } => class.suggested_actions(),
            Self::Transcript { class, .. } => class.suggested_actions(),
            Self::Transcription { .. } => vec![
                "Check that the file is a supported audio format".to_string(),
                "Try a shorter recording".to_string(),
            ],
            Self::ContentQuality { .. } => vec![
                "Export the document as PDF or plain text and upload again".to_string(),
            ],
            Self::NoChunks => vec!["Check that the source actually contains text".to_string()],
            Self::NoContent => vec!["Retry the document from the beginning".to_string()],
            Self::InvalidTransition { .. } => {
                vec!["Wait for the current run to finish before retrying".to_string()]
            }
        }
    }

    /// Converts into the structured report persisted on the document.
    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code(),
            message: self.to_string(),
            user_message: self.user_message(),
            suggested_actions: self.suggested_actions(),
            occurred_at_epoch_ms: epoch_ms(),
            trace: truncated_trace(self),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedType { declared } => {
                write!(f, "unsupported declared media type '{declared}'")
            }
            Self::MissingSource => write!(f, "document has no storage path or source URL"),
            Self::Store(err) => write!(f, "store failure: {err}"),
            Self::Pdf { detail } => write!(f, "pdf extraction failed: {detail}"),
            Self::Fetch {
                class,
                attempts,
                detail,
            } => write!(
                f,
                "web fetch failed after {attempts} profile attempt(s) ({class:?}): {detail}"
            ),
            Self::Transcript { class, detail } => {
                write!(f, "transcript retrieval failed ({class:?}): {detail}")
            }
            Self::Transcription { detail } => write!(f, "speech-to-text failed: {detail}"),
            Self::ContentQuality { detail } => write!(f, "content quality gate failed: {detail}"),
            Self::NoChunks => write!(f, "no chunks created"),
            Self::NoContent => write!(f, "no content to summarize"),
            Self::Embedding { detail } => write!(f, "embedding stage failed: {detail}"),
            Self::Summary { detail } => write!(f, "summarization failed: {detail}"),
            Self::InvalidTransition { from, to } => {
                write!(f, "illegal status transition {from} -> {to}")
            }
        }
    }
}

impl StdError for PipelineError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Structured error record merged into document metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Technical log message.
    pub message: String,
    /// Plain-language explanation for end users.
    pub user_message: String,
    /// Concrete remediation steps.
    pub suggested_actions: Vec<String>,
    /// When the error was recorded, epoch milliseconds.
    pub occurred_at_epoch_ms: u64,
    /// Truncated cause chain for debugging.
    pub trace: String,
}

const MAX_TRACE_CHARS: usize = 600;

fn truncated_trace(err: &PipelineError) -> String {
    let mut trace = err.to_string();
    let mut source = StdError::source(err);
    while let Some(cause) = source {
        trace.push_str("\n  caused by: ");
        trace.push_str(&cause.to_string());
        source = cause.source();
    }
    if trace.chars().count() > MAX_TRACE_CHARS {
        let cut: String = trace.chars().take(MAX_TRACE_CHARS).collect();
        trace = format!("{cut}...");
    }
    trace
}

pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_carries_user_guidance() {
        let err = PipelineError::Fetch {
            class: FetchClass::Blocked,
            attempts: 3,
            detail: "403 x3".into(),
        };
        let report = err.to_report();
        assert_eq!(report.code, ErrorCode::FetchFailed);
        assert!(report.user_message.contains("blocking automated access"));
        assert!(!report.suggested_actions.is_empty());
        assert!(report.message.contains("3 profile attempt"));
    }

    #[test]
    fn fatal_classification() {
        assert!(PipelineError::UnsupportedType { declared: "x".into() }.is_fatal());
        assert!(PipelineError::NoChunks.is_fatal());
        assert!(!PipelineError::Embedding { detail: "429".into() }.is_fatal());
    }

    #[test]
    fn trace_is_truncated() {
        let err = PipelineError::Pdf {
            detail: "y".repeat(2000),
        };
        assert!(err.to_report().trace.chars().count() <= MAX_TRACE_CHARS + 3);
    }
}
