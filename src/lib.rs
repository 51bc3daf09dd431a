#![warn(missing_docs)]
//! Document ingestion and hierarchical summarization pipeline.
//!
//! Five independently invocable stages chained through persisted state:
//! extraction, chunking, embedding, three-level summarization, and
//! cross-cutting status tracking. Any stage can be retried without
//! re-running its predecessors.

pub mod chunk;
pub mod chunker;
pub mod config;
pub mod document;
pub mod embedder;
pub mod error;
pub mod extractor;
pub mod pipeline;
pub mod progress;
pub mod sanitize;
pub mod status;
pub mod store;
pub mod summarizer;

pub use chunk::{Chunk, SummaryStatus};
pub use chunker::{chunk_text, ChunkDraft, ChunkerConfig};
pub use config::PipelineConfig;
pub use document::{Document, DocumentStatus};
pub use embedder::{EmbedderConfig, EmbeddingService, HttpEmbeddingClient};
pub use error::{ErrorCode, ErrorReport, FetchClass, PipelineError, TranscriptClass};
pub use extractor::{ExtractedText, Extractor, ExtractorConfig, SourceKind};
pub use pipeline::{Pipeline, PipelineStores, StageResponse, SummarizeLevel};
pub use progress::{ProgressSink, Stage};
pub use status::StatusTracker;
pub use store::{
    BlobStore, ChunkPatch, ChunkStore, DocumentPatch, DocumentStore, StoreError, SummaryLevel,
    SummaryRecord, SummaryStore,
};
pub use summarizer::{
    AnthropicProvider, LlmProvider, OpenAiProvider, ProviderRequest, Summarizer, SummarizerConfig,
};
