//! Collaborator store interfaces.
//!
//! The pipeline never talks to a database directly; every stage reads and
//! writes through these traits so any stage can be re-invoked against
//! persisted state. All writes are scoped to a single document's rows.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error as StdError;
use std::fmt;

use crate::chunk::{Chunk, SummaryStatus};
use crate::document::{Document, DocumentStatus};

pub mod memory;

/// Errors surfaced by store implementations.
#[derive(Debug)]
pub enum StoreError {
    /// The requested row does not exist.
    NotFound {
        /// Description of what was looked up.
        what: String,
    },
    /// A write conflicted with the current row state, e.g. an illegal
    /// status transition raced by another writer.
    Conflict {
        /// What the store rejected.
        detail: String,
    },
    /// The backing store failed.
    Backend {
        /// Backend-level detail.
        detail: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { what } => write!(f, "not found: {what}"),
            Self::Conflict { detail } => write!(f, "conflicting write: {detail}"),
            Self::Backend { detail } => write!(f, "backend failure: {detail}"),
        }
    }
}

impl StdError for StoreError {}

/// Patch applied to a document row. `metadata` keys are merged into the
/// existing map; omitted keys are left untouched.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    /// New lifecycle status, validated against the state machine.
    pub status: Option<DocumentStatus>,
    /// Metadata keys to merge.
    pub metadata: Map<String, Value>,
}

impl DocumentPatch {
    /// Empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target status.
    pub fn with_status(mut self, status: DocumentStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Merges one metadata key.
    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Patch applied to a set of chunk rows. Every `Some` field is written to
/// each targeted chunk; `None` fields are left untouched. Nested options
/// distinguish "set to null" from "leave alone".
#[derive(Debug, Clone, Default)]
pub struct ChunkPatch {
    /// Embedding vector (outer `Some` writes, inner `None` writes null).
    pub embedding: Option<Option<Vec<f32>>>,
    /// Truncation flag.
    pub truncated: Option<bool>,
    /// Embedding failure detail.
    pub embed_error: Option<Option<String>>,
    /// Chunk-level summary text.
    pub summary: Option<Option<String>>,
    /// Chunk-level summary status.
    pub summary_status: Option<SummaryStatus>,
    /// Section-level summary text.
    pub section_summary: Option<Option<String>>,
    /// Section-level summary status.
    pub section_summary_status: Option<Option<SummaryStatus>>,
}

impl ChunkPatch {
    /// Empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch recording a successful chunk summary.
    pub fn summary_completed(text: String) -> Self {
        Self {
            summary: Some(Some(text)),
            summary_status: Some(SummaryStatus::Completed),
            ..Self::default()
        }
    }

    /// Patch recording a failed chunk summary.
    pub fn summary_failed() -> Self {
        Self {
            summary_status: Some(SummaryStatus::Error),
            ..Self::default()
        }
    }

    /// Patch recording a successful section summary.
    pub fn section_completed(text: String) -> Self {
        Self {
            section_summary: Some(Some(text)),
            section_summary_status: Some(Some(SummaryStatus::Completed)),
            ..Self::default()
        }
    }

    /// Patch recording a failed section summary.
    pub fn section_failed() -> Self {
        Self {
            section_summary_status: Some(Some(SummaryStatus::Error)),
            ..Self::default()
        }
    }

    /// Patch recording a successful embedding.
    pub fn embedded(vector: Vec<f32>, truncated: bool) -> Self {
        Self {
            embedding: Some(Some(vector)),
            truncated: Some(truncated),
            embed_error: Some(None),
            ..Self::default()
        }
    }

    /// Patch recording an exhausted embedding attempt.
    pub fn embedding_degraded(detail: String) -> Self {
        Self {
            embedding: Some(None),
            embed_error: Some(Some(detail)),
            ..Self::default()
        }
    }

    /// Applies the patch to one chunk in place.
    pub fn apply(&self, chunk: &mut Chunk) {
        if let Some(embedding) = &self.embedding {
            chunk.embedding = embedding.clone();
        }
        if let Some(truncated) = self.truncated {
            chunk.truncated = truncated;
        }
        if let Some(embed_error) = &self.embed_error {
            chunk.embed_error = embed_error.clone();
        }
        if let Some(summary) = &self.summary {
            chunk.summary = summary.clone();
        }
        if let Some(status) = self.summary_status {
            chunk.summary_status = status;
        }
        if let Some(section_summary) = &self.section_summary {
            chunk.section_summary = section_summary.clone();
        }
        if let Some(status) = self.section_summary_status {
            chunk.section_summary_status = status;
        }
    }
}

/// Hierarchy level of a stored summary row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryLevel {
    /// The single document-level rollup.
    Document,
}

impl SummaryLevel {
    /// Stable string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
        }
    }
}

/// One summary row, at most one per (document, level).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// Summary text.
    pub summary: String,
    /// Completion state of this row.
    pub status: SummaryStatus,
    /// Identifier of the model that produced the text.
    pub model: String,
}

/// Read-only access to uploaded source blobs.
pub trait BlobStore: Send + Sync {
    /// Downloads one object from an organization bucket.
    fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StoreError>;
}

/// Access to document rows.
pub trait DocumentStore: Send + Sync {
    /// Fetches a document by id.
    fn get(&self, id: &str) -> Result<Document, StoreError>;

    /// Applies a patch. Metadata merges key-by-key; a status change that
    /// violates the forward-only state machine is rejected with
    /// [`StoreError::Conflict`].
    fn update(&self, id: &str, patch: DocumentPatch) -> Result<(), StoreError>;
}

/// Access to chunk rows.
pub trait ChunkStore: Send + Sync {
    /// Inserts a batch of freshly created chunks.
    fn insert_many(&self, chunks: Vec<Chunk>) -> Result<(), StoreError>;

    /// Returns every chunk of a document ordered by index.
    fn for_document(&self, document_id: &str) -> Result<Vec<Chunk>, StoreError>;

    /// Applies one patch to each of the listed chunk ids.
    fn update_many(&self, ids: &[String], patch: &ChunkPatch) -> Result<(), StoreError>;
}

/// Access to summary rows.
pub trait SummaryStore: Send + Sync {
    /// Inserts or replaces the row keyed by (document, level).
    fn upsert(
        &self,
        document_id: &str,
        level: SummaryLevel,
        record: SummaryRecord,
    ) -> Result<(), StoreError>;

    /// Fetches the row for (document, level), if present.
    fn get(&self, document_id: &str, level: SummaryLevel)
        -> Result<Option<SummaryRecord>, StoreError>;
}
