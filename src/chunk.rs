//! Chunk records, the unit of embedding and summarization.

use serde::{Deserialize, Serialize};

/// State of a single summarization attempt for one chunk or section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    /// Not yet attempted.
    Pending,
    /// Summary text written.
    Completed,
    /// Attempt failed; the failure is recorded but siblings continue.
    Error,
}

/// One bounded span of a document's extracted text.
///
/// Chunks are created in a single batch by the chunker with contiguous
/// zero-based indices; later stages only fill in embedding and summary
/// fields, never content or ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Store identifier, derived from the owning document and index.
    pub id: String,
    /// Owning document.
    pub document_id: String,
    /// Ordinal position within the document, assigned once at chunk time.
    pub index: usize,
    /// Raw chunk text.
    pub content: String,
    /// Rough token estimate (word count heuristic).
    pub token_estimate: usize,
    /// Human-readable grouping key: `Page N`, `Time hh:mm:ss`, a heading,
    /// or `Part N` as the fallback. `None` when no grouping applies.
    pub section_id: Option<String>,
    /// Stable key used for source attribution.
    pub citation_key: String,
    /// Embedding vector, set once by the embedder. Stays `None` when the
    /// embedding call was exhausted without success.
    pub embedding: Option<Vec<f32>>,
    /// True when the content was cut to fit the embedding context window.
    pub truncated: bool,
    /// Failure detail when the embedding degraded to null.
    pub embed_error: Option<String>,
    /// Chunk-level summary text.
    pub summary: Option<String>,
    /// Chunk-level summary state.
    pub summary_status: SummaryStatus,
    /// Section-level summary text, shared by every chunk in the section.
    pub section_summary: Option<String>,
    /// Section-level summary state. `None` when the chunk has no section.
    pub section_summary_status: Option<SummaryStatus>,
}

impl Chunk {
    /// Builds a chunk from freshly split content.
    pub fn new(
        document_id: &str,
        index: usize,
        content: String,
        token_estimate: usize,
        section_id: Option<String>,
    ) -> Self {
        let citation_key = citation_key(document_id, section_id.as_deref(), index);
        let section_summary_status = section_id.as_ref().map(|_| SummaryStatus::Pending);
        Self {
            id: format!("{document_id}:{index}"),
            document_id: document_id.to_string(),
            index,
            content,
            token_estimate,
            section_id,
            citation_key,
            embedding: None,
            truncated: false,
            embed_error: None,
            summary: None,
            summary_status: SummaryStatus::Pending,
            section_summary: None,
            section_summary_status,
        }
    }
}

/// Derives the citation key for a chunk: a short document prefix, the
/// section identifier with whitespace collapsed to dashes, and the chunk
/// index. Unique per document because indices are unique.
pub fn citation_key(document_id: &str, section_id: Option<&str>, index: usize) -> String {
    let prefix: String = document_id.chars().take(8).collect();
    let section = section_id
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join("-"))
        .unwrap_or_else(|| "doc".to_string());
    format!("{prefix}:{section}:{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citation_keys_unique_per_document() {
        let a = citation_key("document-1234", Some("Page 1"), 0);
        let b = citation_key("document-1234", Some("Page 1"), 1);
        let c = citation_key("document-1234", Some("Page 2"), 2);
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(a, "document:Page-1:0");
    }

    #[test]
    fn sectionless_chunk_has_no_section_summary_state() {
        let chunk = Chunk::new("doc", 0, "text".into(), 1, None);
        assert_eq!(chunk.section_summary_status, None);
        assert_eq!(chunk.summary_status, SummaryStatus::Pending);
    }

    #[test]
    fn sectioned_chunk_starts_pending() {
        let chunk = Chunk::new("doc", 3, "text".into(), 1, Some("Page 2".into()));
        assert_eq!(chunk.section_summary_status, Some(SummaryStatus::Pending));
        assert_eq!(chunk.id, "doc:3");
    }
}
