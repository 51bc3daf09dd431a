//! Progress reporting port decoupled from the extraction and chunking loops.

use std::sync::Mutex;

/// Pipeline stages, in execution order.
///
/// Each stage owns a slice of the overall progress percentage so a polling
/// UI sees one monotonic number across the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Source bytes to plain text.
    Extraction,
    /// Text to chunk rows.
    Chunking,
    /// Chunk rows to embedding vectors.
    Embedding,
    /// Per-chunk summaries.
    SummarizingChunks,
    /// Per-section summaries.
    SummarizingSections,
    /// Document-level rollup.
    SummarizingDocument,
}

impl Stage {
    /// Stage name recorded in document metadata.
    pub fn name(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::SummarizingChunks => "summarizing_chunks",
            Self::SummarizingSections => "summarizing_sections",
            Self::SummarizingDocument => "summarizing_document",
        }
    }

    /// Overall-percentage window this stage fills.
    pub fn weight_range(self) -> (u8, u8) {
        match self {
            Self::Extraction => (10, 30),
            Self::Chunking => (30, 60),
            Self::Embedding => (60, 80),
            Self::SummarizingChunks => (80, 90),
            Self::SummarizingSections => (90, 95),
            Self::SummarizingDocument => (95, 100),
        }
    }

    /// Maps stage-local progress onto the overall percentage.
    pub fn percent(self, current: usize, total: usize) -> u8 {
        let (lo, hi) = self.weight_range();
        if total == 0 {
            return hi;
        }
        let span = (hi - lo) as f32;
        let fraction = (current.min(total) as f32) / (total as f32);
        lo + (span * fraction).round() as u8
    }
}

/// Sink invoked at well-defined checkpoints inside stage work loops.
pub trait ProgressSink: Send + Sync {
    /// Reports that `current` of `total` units of the stage are done.
    fn report(&self, stage: Stage, current: usize, total: usize);
}

/// Sink that discards every report.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _stage: Stage, _current: usize, _total: usize) {}
}

/// Sink that logs reports through `tracing`, used by the CLI.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn report(&self, stage: Stage, current: usize, total: usize) {
        tracing::info!(
            stage = stage.name(),
            current,
            total,
            percent = stage.percent(current, total),
            "progress"
        );
    }
}

/// Sink that records every report, for assertions in tests.
#[derive(Default)]
pub struct CollectingSink {
    reports: Mutex<Vec<(Stage, usize, usize)>>,
}

impl CollectingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything reported so far.
    pub fn reports(&self) -> Vec<(Stage, usize, usize)> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for CollectingSink {
    fn report(&self, stage: Stage, current: usize, total: usize) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((stage, current, total));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentages_stay_inside_stage_window() {
        assert_eq!(Stage::Extraction.percent(0, 10), 10);
        assert_eq!(Stage::Extraction.percent(10, 10), 30);
        assert_eq!(Stage::Chunking.percent(1, 2), 45);
        assert_eq!(Stage::SummarizingDocument.percent(1, 1), 100);
    }

    #[test]
    fn zero_total_counts_as_done() {
        assert_eq!(Stage::Embedding.percent(0, 0), 80);
    }
}
