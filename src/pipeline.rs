//! Stage entry points and their error boundaries.
//!
//! Each entry point is an independent, re-invocable unit of work chained
//! to its neighbors only through the persisted stores. Every boundary
//! catches the library error, records a structured report on the
//! document, and answers with a non-throwing response the caller can
//! poll, never an unhandled failure.

use std::sync::Arc;
use std::thread;

use serde::Serialize;
use serde_json::json;

use crate::chunk::{Chunk, SummaryStatus};
use crate::chunker::{chunk_text, ChunkerConfig};
use crate::document::DocumentStatus;
use crate::embedder::{plan_batches, truncate_to_tokens, EmbedderConfig, EmbeddingService};
use crate::error::{ErrorReport, PipelineError};
use crate::extractor::Extractor;
use crate::progress::{ProgressSink, Stage};
use crate::status::StatusTracker;
use crate::store::{
    BlobStore, ChunkPatch, ChunkStore, DocumentPatch, DocumentStore, SummaryLevel, SummaryRecord,
    SummaryStore,
};
use crate::summarizer::{DocumentOutcome, Summarizer};

/// Response returned by every stage entry point.
#[derive(Debug, Clone, Serialize)]
pub struct StageResponse {
    /// Whether the stage ran to a usable conclusion.
    pub success: bool,
    /// Document the stage operated on.
    pub document_id: String,
    /// Human-readable outcome.
    pub message: String,
    /// Structured report when the stage failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

/// Which summarization level an invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarizeLevel {
    /// Per-chunk summaries.
    Chunks,
    /// Per-section summaries.
    Sections,
    /// The document rollup.
    Document,
}

/// Collaborator store handles used by the pipeline.
pub struct PipelineStores {
    /// Document rows.
    pub documents: Arc<dyn DocumentStore>,
    /// Chunk rows.
    pub chunks: Arc<dyn ChunkStore>,
    /// Summary rows.
    pub summaries: Arc<dyn SummaryStore>,
    /// Uploaded blobs.
    pub blobs: Arc<dyn BlobStore>,
}

/// The ingestion pipeline: extraction, chunking, embedding, and
/// hierarchical summarization over one document at a time.
pub struct Pipeline {
    documents: Arc<dyn DocumentStore>,
    chunks: Arc<dyn ChunkStore>,
    summaries: Arc<dyn SummaryStore>,
    blobs: Arc<dyn BlobStore>,
    extractor: Extractor,
    chunker: ChunkerConfig,
    embedding: Arc<dyn EmbeddingService>,
    embedder: EmbedderConfig,
    summarizer: Summarizer,
    tracker: StatusTracker,
}

impl Pipeline {
    /// Assembles a pipeline from its collaborators.
    pub fn new(
        stores: PipelineStores,
        extractor: Extractor,
        embedding: Arc<dyn EmbeddingService>,
        summarizer: Summarizer,
        chunker: ChunkerConfig,
        embedder: EmbedderConfig,
    ) -> Self {
        let tracker = StatusTracker::new(stores.documents.clone());
        Self {
            documents: stores.documents,
            chunks: stores.chunks,
            summaries: stores.summaries,
            blobs: stores.blobs,
            extractor,
            chunker,
            embedding,
            embedder,
            summarizer,
            tracker,
        }
    }

    /// Runs every stage in order, stopping at the first failure.
    pub fn process_document(&self, document_id: &str) -> StageResponse {
        let response = self.extract_document(document_id);
        if !response.success {
            return response;
        }
        let response = self.chunk_document(document_id);
        if !response.success {
            return response;
        }
        let response = self.embed_chunks(document_id);
        if !response.success {
            return response;
        }
        let response = self.summarize(document_id, SummarizeLevel::Chunks);
        if !response.success {
            return response;
        }
        let response = self.summarize(document_id, SummarizeLevel::Sections);
        if !response.success {
            return response;
        }
        self.summarize(document_id, SummarizeLevel::Document)
    }

    /// Extraction stage: source bytes or URL to sanitized text persisted
    /// on the document.
    pub fn extract_document(&self, document_id: &str) -> StageResponse {
        self.guard(document_id, DocumentStatus::Error, |pipeline| {
            pipeline.run_extract(document_id)
        })
    }

    /// Chunking stage: persisted text to chunk rows.
    pub fn chunk_document(&self, document_id: &str) -> StageResponse {
        self.guard(document_id, DocumentStatus::Error, |pipeline| {
            pipeline.run_chunk(document_id)
        })
    }

    /// Embedding stage: chunk rows to vectors, degrading to null on
    /// exhausted retries rather than blocking the document.
    pub fn embed_chunks(&self, document_id: &str) -> StageResponse {
        self.guard(document_id, DocumentStatus::Error, |pipeline| {
            pipeline.run_embed(document_id)
        })
    }

    /// Targeted re-summarization of one chunk, for callers retrying a
    /// single failed entity rather than the whole level.
    pub fn summarize_chunk(&self, document_id: &str, chunk_id: &str) -> StageResponse {
        self.guard(document_id, DocumentStatus::Error, |pipeline| {
            let retried = pipeline.summarizer.summarize_chunk(
                document_id,
                chunk_id,
                pipeline.chunks.as_ref(),
            )?;
            Ok(if retried {
                format!("chunk {chunk_id} summarized")
            } else {
                format!("chunk {chunk_id} already summarized; skipping")
            })
        })
    }

    /// Summarization stages. A finalization failure parks the document in
    /// `processing_failed` rather than `error`.
    pub fn summarize(&self, document_id: &str, level: SummarizeLevel) -> StageResponse {
        let failure_status = match level {
            SummarizeLevel::Document => DocumentStatus::ProcessingFailed,
            _ => DocumentStatus::Error,
        };
        self.guard(document_id, failure_status, |pipeline| match level {
            SummarizeLevel::Chunks => pipeline.run_summarize_chunks(document_id),
            SummarizeLevel::Sections => pipeline.run_summarize_sections(document_id),
            SummarizeLevel::Document => pipeline.run_finalize(document_id),
        })
    }

    fn guard(
        &self,
        document_id: &str,
        failure_status: DocumentStatus,
        inner: impl FnOnce(&Self) -> Result<String, PipelineError>,
    ) -> StageResponse {
        match inner(self) {
            Ok(message) => {
                tracing::info!(document_id, message = %message, "stage complete");
                StageResponse {
                    success: true,
                    document_id: document_id.to_string(),
                    message,
                    error: None,
                }
            }
            Err(err) => {
                let report = err.to_report();
                tracing::error!(document_id, error = %err, code = ?report.code, "stage failed");
                self.tracker.record_error(document_id, &report, failure_status);
                StageResponse {
                    success: false,
                    document_id: document_id.to_string(),
                    message: report.user_message.clone(),
                    error: Some(report),
                }
            }
        }
    }

    fn run_extract(&self, document_id: &str) -> Result<String, PipelineError> {
        let document = self.documents.get(document_id)?;
        self.tracker
            .begin_stage(document_id, Stage::Extraction, Some(DocumentStatus::Processing))?;
        let sink = self.tracker.sink_for(document_id);
        let extracted = self
            .extractor
            .extract(&document, self.blobs.as_ref(), &sink)?;

        let mut extraction_meta = json!({
            "checksum": extracted.checksum,
            "kind": extracted.kind.as_str(),
            "sampled": extracted.sampled,
        });
        if let Some(map) = extraction_meta.as_object_mut() {
            if let Some(pages_total) = extracted.pages_total {
                map.insert("pages_total".into(), json!(pages_total));
            }
            if let Some(pages_extracted) = extracted.pages_extracted {
                map.insert("pages_extracted".into(), json!(pages_extracted));
            }
            if let Some(strategy) = extracted.strategy {
                map.insert("strategy".into(), json!(strategy));
            }
            if let Some(title) = &extracted.title {
                map.insert("title".into(), json!(title));
            }
        }
        let chars = extracted.text.chars().count();
        self.documents.update(
            document_id,
            DocumentPatch::new()
                .with_meta("extracted_text", json!(extracted.text))
                .with_meta("source_kind", json!(extracted.kind.as_str()))
                .with_meta("extraction", extraction_meta),
        )?;
        self.tracker.complete_stage(
            document_id,
            Stage::Extraction,
            &format!("{chars} chars extracted"),
        )?;
        Ok(format!("extracted {chars} chars from {} source", extracted.kind.as_str()))
    }

    fn run_chunk(&self, document_id: &str) -> Result<String, PipelineError> {
        let document = self.documents.get(document_id)?;
        let existing = self.chunks.for_document(document_id)?;
        if !existing.is_empty() {
            return Ok(format!("{} chunks already exist; skipping", existing.len()));
        }
        let text = document
            .extracted_text()
            .map(str::to_string)
            .ok_or_else(|| PipelineError::ContentQuality {
                detail: "no extracted text on document; run extraction first".to_string(),
            })?;

        self.tracker
            .begin_stage(document_id, Stage::Chunking, Some(DocumentStatus::Chunking))?;
        let drafts = chunk_text(&text, &self.chunker);
        if drafts.is_empty() {
            return Err(PipelineError::NoChunks);
        }
        let rows: Vec<Chunk> = drafts
            .into_iter()
            .enumerate()
            .map(|(index, draft)| {
                Chunk::new(
                    document_id,
                    index,
                    draft.content,
                    draft.token_estimate,
                    draft.section_id,
                )
            })
            .collect();
        let count = rows.len();
        self.chunks.insert_many(rows)?;
        self.documents.update(
            document_id,
            DocumentPatch::new().with_meta("chunk_count", json!(count)),
        )?;
        self.tracker
            .complete_stage(document_id, Stage::Chunking, &format!("{count} chunks"))?;
        Ok(format!("created {count} chunks"))
    }

    fn run_embed(&self, document_id: &str) -> Result<String, PipelineError> {
        let rows = self.chunks.for_document(document_id)?;
        if rows.is_empty() {
            return Err(PipelineError::NoChunks);
        }
        let pending: Vec<Chunk> = rows
            .into_iter()
            .filter(|chunk| chunk.embedding.is_none())
            .collect();
        if pending.is_empty() {
            return Ok("all chunks already embedded".to_string());
        }

        self.tracker
            .begin_stage(document_id, Stage::Embedding, None)?;
        let sink = self.tracker.sink_for(document_id);
        let batches = plan_batches(&pending, &self.embedder);
        let batch_count = batches.len();
        let total = pending.len();
        let mut embedded = 0usize;
        let mut degraded = 0usize;
        for (batch_no, batch) in batches.into_iter().enumerate() {
            let prepared: Vec<(&Chunk, &str, bool)> = batch
                .iter()
                .map(|&i| {
                    let chunk = &pending[i];
                    let (input, truncated) =
                        truncate_to_tokens(&chunk.content, self.embedder.max_chunk_tokens);
                    (chunk, input, truncated)
                })
                .collect();
            let inputs: Vec<&str> = prepared.iter().map(|(_, input, _)| *input).collect();

            match self.embedding.embed_batch(&inputs) {
                Ok(vectors) if vectors.len() == prepared.len() => {
                    for ((chunk, _, truncated), vector) in prepared.iter().zip(vectors) {
                        self.chunks.update_many(
                            std::slice::from_ref(&chunk.id),
                            &ChunkPatch::embedded(vector, *truncated),
                        )?;
                        embedded += 1;
                    }
                }
                Ok(vectors) => {
                    let detail = format!(
                        "embedding service returned {} vectors for {} inputs",
                        vectors.len(),
                        prepared.len()
                    );
                    tracing::warn!(document_id, detail = %detail, "degrading batch to null embeddings");
                    for (chunk, _, _) in &prepared {
                        self.chunks.update_many(
                            std::slice::from_ref(&chunk.id),
                            &ChunkPatch::embedding_degraded(detail.clone()),
                        )?;
                        degraded += 1;
                    }
                }
                Err(err) => {
                    let detail = format!("{err:#}");
                    tracing::warn!(document_id, detail = %detail, "embedding batch exhausted retries");
                    for (chunk, _, _) in &prepared {
                        self.chunks.update_many(
                            std::slice::from_ref(&chunk.id),
                            &ChunkPatch::embedding_degraded(detail.clone()),
                        )?;
                        degraded += 1;
                    }
                }
            }
            sink.report(Stage::Embedding, embedded + degraded, total);
            if batch_no + 1 < batch_count && !self.embedder.batch_pause.is_zero() {
                thread::sleep(self.embedder.batch_pause);
            }
        }
        self.tracker.complete_stage(
            document_id,
            Stage::Embedding,
            &format!("{embedded} embedded, {degraded} degraded"),
        )?;
        Ok(format!(
            "embedded {embedded} of {total} chunks ({degraded} degraded to null)"
        ))
    }

    fn run_summarize_chunks(&self, document_id: &str) -> Result<String, PipelineError> {
        self.tracker.begin_stage(
            document_id,
            Stage::SummarizingChunks,
            Some(DocumentStatus::SummarizingChunks),
        )?;
        let sink = self.tracker.sink_for(document_id);
        let outcome = self
            .summarizer
            .summarize_chunks(document_id, self.chunks.as_ref(), &sink)?;
        self.tracker.complete_stage(
            document_id,
            Stage::SummarizingChunks,
            &format!(
                "{} summarized, {} failed, {} skipped",
                outcome.summarized, outcome.failed, outcome.skipped
            ),
        )?;
        Ok(format!(
            "chunk summaries: {} completed, {} failed, {} skipped",
            outcome.summarized, outcome.failed, outcome.skipped
        ))
    }

    fn run_summarize_sections(&self, document_id: &str) -> Result<String, PipelineError> {
        self.tracker
            .begin_stage(document_id, Stage::SummarizingSections, None)?;
        let sink = self.tracker.sink_for(document_id);
        let outcome = self
            .summarizer
            .summarize_sections(document_id, self.chunks.as_ref(), &sink)?;
        self.tracker.complete_stage(
            document_id,
            Stage::SummarizingSections,
            &format!(
                "{} sections completed, {} failed, {} gated",
                outcome.completed, outcome.failed, outcome.gated
            ),
        )?;
        Ok(format!(
            "section summaries: {} completed, {} failed, {} gated",
            outcome.completed, outcome.failed, outcome.gated
        ))
    }

    fn run_finalize(&self, document_id: &str) -> Result<String, PipelineError> {
        self.tracker.begin_stage(
            document_id,
            Stage::SummarizingDocument,
            Some(DocumentStatus::SummarizingDocument),
        )?;
        let rows = self.chunks.for_document(document_id)?;
        match self.summarizer.finalize_document(&rows)? {
            DocumentOutcome::NoContent => {
                // Not an exception path: the caller gets a successful
                // response and the document is parked as failed.
                self.documents.update(
                    document_id,
                    DocumentPatch::new()
                        .with_status(DocumentStatus::ProcessingFailed)
                        .with_meta("finalize_note", json!("no content to summarize")),
                )?;
                Ok("no content to summarize".to_string())
            }
            DocumentOutcome::Completed { summary } => {
                self.summaries.upsert(
                    document_id,
                    SummaryLevel::Document,
                    SummaryRecord {
                        summary,
                        status: SummaryStatus::Completed,
                        model: self.summarizer.model().to_string(),
                    },
                )?;
                let degraded = rows.iter().any(|chunk| {
                    chunk.summary_status == SummaryStatus::Error
                        || chunk.section_summary_status == Some(SummaryStatus::Error)
                        || chunk.embedding.is_none()
                });
                let status = if degraded {
                    DocumentStatus::CompletedWithErrors
                } else {
                    DocumentStatus::Completed
                };
                self.tracker.complete_stage(
                    document_id,
                    Stage::SummarizingDocument,
                    status.as_str(),
                )?;
                self.tracker.set_status(document_id, status)?;
                Ok(format!("document summary stored; status {}", status.as_str()))
            }
        }
    }
}
