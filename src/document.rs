//! Document records and the ingestion status state machine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle status of a document moving through the pipeline.
///
/// Transitions only move forward, with `Error` reachable from any
/// non-terminal state. [`DocumentStatus::can_transition_to`] encodes the
/// allowed edges; stores are expected to reject anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Registered, nothing has run yet.
    Queued,
    /// Extraction in progress.
    Processing,
    /// Text extracted, chunk creation in progress.
    Chunking,
    /// Chunk-level summaries being generated.
    SummarizingChunks,
    /// Document-level rollup being generated.
    SummarizingDocument,
    /// Every stage finished without entity-level failures.
    Completed,
    /// Pipeline finished but some chunks or sections degraded.
    CompletedWithErrors,
    /// A stage failed outright.
    Error,
    /// Document-level finalization could not produce a summary.
    ProcessingFailed,
}

impl DocumentStatus {
    /// Forward rank used to enforce monotonic progress.
    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Processing => 1,
            Self::Chunking => 2,
            Self::SummarizingChunks => 3,
            Self::SummarizingDocument => 4,
            Self::Completed
            | Self::CompletedWithErrors
            | Self::Error
            | Self::ProcessingFailed => 5,
        }
    }

    /// True once the document will receive no further pipeline writes.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Error | Self::ProcessingFailed
        )
    }

    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Error {
            return true;
        }
        next.rank() > self.rank() || next == self
    }

    /// Stable string form matching the serialized representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Chunking => "chunking",
            Self::SummarizingChunks => "summarizing_chunks",
            Self::SummarizingDocument => "summarizing_document",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Error => "error",
            Self::ProcessingFailed => "processing_failed",
        }
    }
}

/// One ingested source registered with the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Store-assigned identifier.
    pub id: String,
    /// Owning organization identifier.
    pub org_id: String,
    /// Opaque locator into the organization's blob bucket, if the source
    /// was uploaded rather than referenced by URL.
    pub storage_path: Option<String>,
    /// Declared media type supplied at registration.
    pub media_type: String,
    /// Free-form metadata map. Pipeline stages merge keys into it; nothing
    /// ever replaces the whole map.
    pub metadata: Map<String, Value>,
    /// Current lifecycle status.
    pub status: DocumentStatus,
}

impl Document {
    /// Creates a freshly registered document in `Queued` state.
    pub fn new(id: impl Into<String>, org_id: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            org_id: org_id.into(),
            storage_path: None,
            media_type: media_type.into(),
            metadata: Map::new(),
            status: DocumentStatus::Queued,
        }
    }

    /// Blob bucket holding this organization's uploads.
    pub fn bucket(&self) -> String {
        format!("org-{}-uploads", self.org_id)
    }

    /// Source URL recorded at registration, if any.
    pub fn source_url(&self) -> Option<&str> {
        self.metadata.get("source_url").and_then(Value::as_str)
    }

    /// Extracted text persisted by the extraction stage, if it has run.
    pub fn extracted_text(&self) -> Option<&str> {
        self.metadata.get("extracted_text").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        assert!(DocumentStatus::Queued.can_transition_to(DocumentStatus::Processing));
        assert!(DocumentStatus::Processing.can_transition_to(DocumentStatus::Chunking));
        assert!(DocumentStatus::Chunking.can_transition_to(DocumentStatus::SummarizingChunks));
        assert!(
            DocumentStatus::SummarizingDocument.can_transition_to(DocumentStatus::Completed)
        );
    }

    #[test]
    fn backward_transitions_rejected() {
        assert!(!DocumentStatus::Chunking.can_transition_to(DocumentStatus::Processing));
        assert!(!DocumentStatus::SummarizingDocument.can_transition_to(DocumentStatus::Queued));
    }

    #[test]
    fn error_reachable_from_any_live_state() {
        for status in [
            DocumentStatus::Queued,
            DocumentStatus::Processing,
            DocumentStatus::Chunking,
            DocumentStatus::SummarizingChunks,
            DocumentStatus::SummarizingDocument,
        ] {
            assert!(status.can_transition_to(DocumentStatus::Error), "{status:?}");
        }
    }

    #[test]
    fn terminal_states_frozen() {
        assert!(!DocumentStatus::Completed.can_transition_to(DocumentStatus::Error));
        assert!(!DocumentStatus::Error.can_transition_to(DocumentStatus::Processing));
        assert!(!DocumentStatus::ProcessingFailed.can_transition_to(DocumentStatus::Completed));
    }

    #[test]
    fn bucket_naming() {
        let doc = Document::new("d1", "acme", "application/pdf");
        assert_eq!(doc.bucket(), "org-acme-uploads");
    }
}
