//! Aggregate pipeline configuration.
//!
//! Components read nothing from the ambient environment; everything they
//! need arrives through these structs, assembled by the binary from CLI
//! flags and their env fallbacks.

use crate::chunker::ChunkerConfig;
use crate::embedder::EmbedderConfig;
use crate::extractor::ExtractorConfig;
use crate::summarizer::SummarizerConfig;

/// Every tunable the pipeline carries, grouped per component.
#[derive(Default)]
pub struct PipelineConfig {
    /// Extraction limits and optional service connections.
    pub extractor: ExtractorConfig,
    /// Window sizing.
    pub chunker: ChunkerConfig,
    /// Batch and truncation limits.
    pub embedder: EmbedderConfig,
    /// Summarization knobs.
    pub summarizer: SummarizerConfig,
}
