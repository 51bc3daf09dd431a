//! Three-level hierarchical summarization: chunk, section, document.
//!
//! Chunk summaries run in sub-batches with a strict positional response
//! format; parsing falls back to line-oriented heuristics and then to
//! per-chunk calls, because batching is cheaper but must never silently
//! drop a chunk. Section summaries start only once every sibling chunk
//! summary is complete. Failures stay scoped to their entity; siblings
//! always continue.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::bounded;
use regex::Regex;

use crate::chunk::{Chunk, SummaryStatus};
use crate::error::PipelineError;
use crate::progress::{ProgressSink, Stage};
use crate::store::{ChunkPatch, ChunkStore};

pub mod provider;

pub use provider::{AnthropicProvider, LlmProvider, OpenAiProvider, ProviderRequest};

/// Summarization knobs.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Chunks summarized together per batch call.
    pub batch_size: usize,
    /// Token budget for one chunk summary.
    pub chunk_summary_tokens: usize,
    /// Token budget for one section summary.
    pub section_summary_tokens: usize,
    /// Token budget for the document rollup.
    pub document_summary_tokens: usize,
    /// Sampling temperature for every call.
    pub temperature: f32,
    /// Character cap on any single prompt's source material.
    pub max_input_chars: usize,
    /// Pause between chunk batches to respect rate limits.
    pub batch_pause: Duration,
    /// Worker threads for independent section summaries.
    pub section_workers: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            chunk_summary_tokens: 160,
            section_summary_tokens: 220,
            document_summary_tokens: 320,
            temperature: 0.2,
            max_input_chars: 24_000,
            batch_pause: Duration::from_millis(200),
            section_workers: 2,
        }
    }
}

/// Counts from a chunk-level summarization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkSummaryOutcome {
    /// Chunks that received a summary this pass.
    pub summarized: usize,
    /// Chunks whose summary attempt failed.
    pub failed: usize,
    /// Chunks skipped because they were no longer pending.
    pub skipped: usize,
}

/// Counts from a section-level summarization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionSummaryOutcome {
    /// Sections summarized this pass.
    pub completed: usize,
    /// Sections whose summary attempt failed.
    pub failed: usize,
    /// Sections skipped because their chunks are not all summarized yet.
    pub gated: usize,
}

/// Result of document-level finalization.
#[derive(Debug, Clone)]
pub enum DocumentOutcome {
    /// A rollup summary was produced.
    Completed {
        /// The document summary text.
        summary: String,
    },
    /// No chunk or section summaries were usable.
    NoContent,
}

const CHUNK_SYSTEM: &str =
    "You write short factual summaries of document excerpts. Respond with only the summary text.";
const BATCH_SYSTEM: &str = "You summarize numbered document excerpts. For every excerpt, output \
                            its marker line `=== CHUNK k ===` exactly as given, followed by a 2-3 \
                            sentence factual summary of that excerpt.";
const SECTION_SYSTEM: &str =
    "You write concise factual summaries of document sections. Respond with only the summary text.";
const DOCUMENT_SYSTEM: &str =
    "You write concise factual summaries of whole documents. Respond with only the summary text.";

/// Drives all three summarization levels against the chunk store.
pub struct Summarizer {
    provider: Arc<dyn LlmProvider>,
    config: SummarizerConfig,
}

impl Summarizer {
    /// Builds a summarizer over a provider.
    pub fn new(provider: Arc<dyn LlmProvider>, config: SummarizerConfig) -> Self {
        Self { provider, config }
    }

    /// Identifier of the model used for summaries.
    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Summarizes every chunk still pending for the document.
    ///
    /// Before each batch runs, chunk state is re-read and entries another
    /// writer already finished are skipped, so concurrent invocations
    /// converge instead of double-writing.
    pub fn summarize_chunks(
        &self,
        document_id: &str,
        chunks: &dyn ChunkStore,
        progress: &dyn ProgressSink,
    ) -> Result<ChunkSummaryOutcome, PipelineError> {
        let rows = chunks.for_document(document_id)?;
        let pending_ids: Vec<String> = rows
            .iter()
            .filter(|chunk| chunk.summary_status == SummaryStatus::Pending)
            .map(|chunk| chunk.id.clone())
            .collect();
        let total = pending_ids.len();
        let mut outcome = ChunkSummaryOutcome {
            skipped: rows.len() - total,
            ..ChunkSummaryOutcome::default()
        };
        if total == 0 {
            return Ok(outcome);
        }

        let mut done = 0usize;
        let batch_count = pending_ids.len().div_ceil(self.config.batch_size.max(1));
        for (batch_no, batch_ids) in pending_ids.chunks(self.config.batch_size.max(1)).enumerate() {
            let current = chunks.for_document(document_id)?;
            let batch: Vec<&Chunk> = current
                .iter()
                .filter(|chunk| {
                    batch_ids.contains(&chunk.id)
                        && chunk.summary_status == SummaryStatus::Pending
                })
                .collect();
            outcome.skipped += batch_ids.len() - batch.len();
            if batch.is_empty() {
                continue;
            }

            for (chunk_id, result) in self.summarize_chunk_batch(&batch) {
                match result {
                    Ok(text) => {
                        chunks.update_many(
                            std::slice::from_ref(&chunk_id),
                            &ChunkPatch::summary_completed(text),
                        )?;
                        outcome.summarized += 1;
                    }
                    Err(err) => {
                        tracing::warn!(chunk_id = %chunk_id, error = %format!("{err:#}"), "chunk summary failed");
                        chunks.update_many(
                            std::slice::from_ref(&chunk_id),
                            &ChunkPatch::summary_failed(),
                        )?;
                        outcome.failed += 1;
                    }
                }
            }
            done += batch.len();
            progress.report(Stage::SummarizingChunks, done, total);
            if batch_no + 1 < batch_count && !self.config.batch_pause.is_zero() {
                thread::sleep(self.config.batch_pause);
            }
        }
        Ok(outcome)
    }

    /// Summarizes a batch, falling back from positional parsing to
    /// heuristic parsing to individual per-chunk calls.
    fn summarize_chunk_batch(&self, batch: &[&Chunk]) -> Vec<(String, Result<String>)> {
        if batch.len() == 1 {
            let chunk = batch[0];
            return vec![(chunk.id.clone(), self.chunk_call(&chunk.content))];
        }

        let per_chunk_budget = self.config.max_input_chars / batch.len();
        let mut prompt = String::new();
        for (i, chunk) in batch.iter().enumerate() {
            prompt.push_str(&format!("=== CHUNK {} ===\n", i + 1));
            prompt.push_str(clip(&chunk.content, per_chunk_budget));
            prompt.push('\n');
        }
        let request = ProviderRequest {
            system: BATCH_SYSTEM,
            user: &prompt,
            temperature: self.config.temperature,
            max_tokens: self.config.chunk_summary_tokens * batch.len(),
        };

        match self.provider.complete(&request) {
            Ok(response) => {
                let mut parsed = parse_batch_response(&response, batch.len());
                if parsed.is_empty() {
                    if let Some(blocks) = heuristic_parse(&response, batch.len()) {
                        parsed = blocks
                            .into_iter()
                            .enumerate()
                            .map(|(i, text)| (i + 1, text))
                            .collect();
                    }
                }
                batch
                    .iter()
                    .enumerate()
                    .map(|(i, chunk)| match parsed.remove(&(i + 1)) {
                        Some(text) => (chunk.id.clone(), Ok(text)),
                        None => (chunk.id.clone(), self.chunk_call(&chunk.content)),
                    })
                    .collect()
            }
            Err(err) => {
                tracing::warn!(
                    batch_len = batch.len(),
                    error = %format!("{err:#}"),
                    "batch summary call failed, falling back to individual calls"
                );
                batch
                    .iter()
                    .map(|chunk| (chunk.id.clone(), self.chunk_call(&chunk.content)))
                    .collect()
            }
        }
    }

    /// Re-summarizes one chunk by id. Returns `false` when the chunk is
    /// already summarized and nothing was done.
    pub fn summarize_chunk(
        &self,
        document_id: &str,
        chunk_id: &str,
        chunks: &dyn ChunkStore,
    ) -> Result<bool, PipelineError> {
        let rows = chunks.for_document(document_id)?;
        let chunk = rows
            .iter()
            .find(|chunk| chunk.id == chunk_id)
            .ok_or_else(|| {
                PipelineError::Store(crate::store::StoreError::NotFound {
                    what: format!("chunk {chunk_id}"),
                })
            })?;
        if chunk.summary_status == SummaryStatus::Completed {
            return Ok(false);
        }
        match self.chunk_call(&chunk.content) {
            Ok(text) => {
                chunks.update_many(
                    std::slice::from_ref(&chunk.id),
                    &ChunkPatch::summary_completed(text),
                )?;
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(chunk_id = %chunk_id, error = %format!("{err:#}"), "chunk summary retry failed");
                chunks.update_many(
                    std::slice::from_ref(&chunk.id),
                    &ChunkPatch::summary_failed(),
                )?;
                Ok(true)
            }
        }
    }

    fn chunk_call(&self, content: &str) -> Result<String> {
        let user = format!(
            "Summarize the following excerpt in 2-3 factual sentences:\n\n{}",
            clip(content, self.config.max_input_chars)
        );
        let request = ProviderRequest {
            system: CHUNK_SYSTEM,
            user: &user,
            temperature: self.config.temperature,
            max_tokens: self.config.chunk_summary_tokens,
        };
        self.provider.complete(&request).map(|s| s.trim().to_string())
    }

    /// Summarizes every section whose chunks are all summarized and which
    /// still has a pending section status.
    ///
    /// Sections are independent of one another and fan out over a small
    /// worker pool; each section's chunks are updated as a set, completed
    /// or failed together.
    pub fn summarize_sections(
        &self,
        document_id: &str,
        chunks: &dyn ChunkStore,
        progress: &dyn ProgressSink,
    ) -> Result<SectionSummaryOutcome, PipelineError> {
        let rows = chunks.for_document(document_id)?;
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<&Chunk>> = HashMap::new();
        for chunk in &rows {
            if let Some(section) = &chunk.section_id {
                if !groups.contains_key(section) {
                    order.push(section.clone());
                }
                groups.entry(section.clone()).or_default().push(chunk);
            }
        }

        let mut outcome = SectionSummaryOutcome::default();
        let mut tasks: Vec<SectionTask> = Vec::new();
        for section in &order {
            let members = &groups[section];
            let all_summarized = members
                .iter()
                .all(|chunk| chunk.summary_status == SummaryStatus::Completed);
            let any_pending = members
                .iter()
                .any(|chunk| chunk.section_summary_status == Some(SummaryStatus::Pending));
            if !any_pending {
                continue;
            }
            if !all_summarized {
                outcome.gated += 1;
                continue;
            }
            let content = members
                .iter()
                .map(|chunk| chunk.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            tasks.push(SectionTask {
                section_id: section.clone(),
                chunk_ids: members.iter().map(|chunk| chunk.id.clone()).collect(),
                content,
            });
        }
        let total = tasks.len();
        if total == 0 {
            return Ok(outcome);
        }

        let workers = self.config.section_workers.clamp(1, total);
        let (task_tx, task_rx) = bounded::<SectionTask>(total);
        let (result_tx, result_rx) = bounded::<(SectionTask, Result<String>)>(total);
        thread::scope(|scope| {
            for _ in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for task in task_rx.iter() {
                        let result = self.section_call(&task.content);
                        if result_tx.send((task, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(task_rx);
            drop(result_tx);
            for task in tasks {
                let _ = task_tx.send(task);
            }
            drop(task_tx);

            let mut done = 0usize;
            for (task, result) in result_rx.iter() {
                let write = match result {
                    Ok(text) => {
                        outcome.completed += 1;
                        ChunkPatch::section_completed(text)
                    }
                    Err(err) => {
                        tracing::warn!(
                            section = %task.section_id,
                            error = %format!("{err:#}"),
                            "section summary failed"
                        );
                        outcome.failed += 1;
                        ChunkPatch::section_failed()
                    }
                };
                if let Err(err) = chunks.update_many(&task.chunk_ids, &write) {
                    tracing::error!(section = %task.section_id, error = %err, "section write failed");
                }
                done += 1;
                progress.report(Stage::SummarizingSections, done, total);
            }
        });
        Ok(outcome)
    }

    fn section_call(&self, content: &str) -> Result<String> {
        let user = format!(
            "Summarize the following document section in 3-4 concise factual sentences:\n\n{}",
            clip(content, self.config.max_input_chars)
        );
        let request = ProviderRequest {
            system: SECTION_SYSTEM,
            user: &user,
            temperature: self.config.temperature,
            max_tokens: self.config.section_summary_tokens,
        };
        self.provider.complete(&request).map(|s| s.trim().to_string())
    }

    /// Produces the document-level rollup from completed section
    /// summaries, synthesizing pseudo-sections from bare chunk summaries
    /// where no section exists.
    pub fn finalize_document(&self, chunks: &[Chunk]) -> Result<DocumentOutcome, PipelineError> {
        let parts = collect_section_material(chunks);
        if parts.is_empty() {
            return Ok(DocumentOutcome::NoContent);
        }

        let mut material = String::new();
        for (label, text) in &parts {
            material.push_str(&format!("[{label}]\n{text}\n\n"));
        }
        let user = format!(
            "Write a 4-5 sentence summary of the whole document from these section summaries:\n\n{}",
            clip(material.trim_end(), self.config.max_input_chars)
        );
        let request = ProviderRequest {
            system: DOCUMENT_SYSTEM,
            user: &user,
            temperature: self.config.temperature,
            max_tokens: self.config.document_summary_tokens,
        };
        match self.provider.complete(&request) {
            Ok(summary) => Ok(DocumentOutcome::Completed {
                summary: summary.trim().to_string(),
            }),
            Err(err) => Err(PipelineError::Summary {
                detail: format!("{err:#}"),
            }),
        }
    }
}

struct SectionTask {
    section_id: String,
    chunk_ids: Vec<String>,
    content: String,
}

/// One summary per distinct section, in first-appearance order, with
/// pseudo-sections of up to five bare chunk summaries filling in for
/// chunks that have no section.
fn collect_section_material(chunks: &[Chunk]) -> Vec<(String, String)> {
    const PSEUDO_SECTION_CHUNKS: usize = 5;
    let mut parts: Vec<(String, String)> = Vec::new();
    let mut seen_sections: Vec<&str> = Vec::new();
    let mut loose: Vec<&str> = Vec::new();

    let flush_loose = |loose: &mut Vec<&str>, parts: &mut Vec<(String, String)>| {
        if loose.is_empty() {
            return;
        }
        let label = format!("Excerpts {}", parts.len() + 1);
        parts.push((label, loose.join("\n")));
        loose.clear();
    };

    for chunk in chunks {
        match (&chunk.section_id, &chunk.section_summary, &chunk.summary) {
            (Some(section), Some(summary), _)
                if chunk.section_summary_status == Some(SummaryStatus::Completed) =>
            {
                if !seen_sections.contains(&section.as_str()) {
                    flush_loose(&mut loose, &mut parts);
                    seen_sections.push(section.as_str());
                    parts.push((section.clone(), summary.clone()));
                }
            }
            (_, _, Some(summary)) if chunk.summary_status == SummaryStatus::Completed => {
                loose.push(summary.as_str());
                if loose.len() >= PSEUDO_SECTION_CHUNKS {
                    flush_loose(&mut loose, &mut parts);
                }
            }
            _ => {}
        }
    }
    flush_loose(&mut loose, &mut parts);
    parts
}

fn batch_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"===\s*CHUNK\s+(\d+)\s*===").expect("batch marker regex"))
}

fn numbering_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:\d+[.):]|[-*])\s*").expect("numbering regex"))
}

/// Parses a batch response by its positional markers. Markers outside
/// `1..=count` are ignored; an empty map signals the caller to fall back.
fn parse_batch_response(response: &str, count: usize) -> HashMap<usize, String> {
    let mut matches: Vec<(usize, usize, usize)> = Vec::new();
    for capture in batch_marker_re().captures_iter(response) {
        let whole = capture.get(0).expect("whole match");
        if let Ok(k) = capture[1].parse::<usize>() {
            matches.push((whole.start(), whole.end(), k));
        }
    }
    let mut parsed = HashMap::new();
    for (i, &(_, end, k)) in matches.iter().enumerate() {
        if k == 0 || k > count {
            continue;
        }
        let until = matches
            .get(i + 1)
            .map(|&(start, _, _)| start)
            .unwrap_or(response.len());
        let text = response[end..until].trim();
        if !text.is_empty() {
            parsed.insert(k, text.to_string());
        }
    }
    parsed
}

/// Line-oriented fallback: blank-line-separated blocks, optionally
/// numbered, accepted only when the block count matches exactly.
fn heuristic_parse(response: &str, count: usize) -> Option<Vec<String>> {
    let blocks: Vec<String> = response
        .split("\n\n")
        .map(|block| numbering_re().replace(block.trim(), "").to_string())
        .filter(|block| !block.is_empty())
        .collect();
    if blocks.len() == count {
        Some(blocks)
    } else {
        None
    }
}

fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    #[test]
    fn batch_markers_parse_in_any_order() {
        let response = "=== CHUNK 2 ===\nSecond summary.\n=== CHUNK 1 ===\nFirst summary.";
        let parsed = parse_batch_response(response, 2);
        assert_eq!(parsed[&1], "First summary.");
        assert_eq!(parsed[&2], "Second summary.");
    }

    #[test]
    fn out_of_range_markers_ignored() {
        let response = "=== CHUNK 9 ===\nGhost.\n=== CHUNK 1 ===\nReal.";
        let parsed = parse_batch_response(response, 2);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[&1], "Real.");
    }

    #[test]
    fn heuristic_accepts_exact_block_count() {
        let response = "1. First thing.\n\n2. Second thing.\n\n3. Third thing.";
        let blocks = heuristic_parse(response, 3).expect("blocks");
        assert_eq!(blocks, ["First thing.", "Second thing.", "Third thing."]);
        assert!(heuristic_parse(response, 4).is_none());
    }

    #[test]
    fn pseudo_sections_fill_in_for_loose_chunks() {
        let mut sectioned = Chunk::new("d", 0, "content".into(), 1, Some("Page 1".into()));
        sectioned.summary = Some("chunk summary".into());
        sectioned.summary_status = SummaryStatus::Completed;
        sectioned.section_summary = Some("section summary".into());
        sectioned.section_summary_status = Some(SummaryStatus::Completed);

        let mut loose = Chunk::new("d", 1, "content".into(), 1, None);
        loose.summary = Some("loose summary".into());
        loose.summary_status = SummaryStatus::Completed;

        let parts = collect_section_material(&[sectioned, loose]);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0, "Page 1");
        assert_eq!(parts[0].1, "section summary");
        assert!(parts[1].1.contains("loose summary"));
    }

    #[test]
    fn no_usable_summaries_yields_empty_material() {
        let chunk = Chunk::new("d", 0, "content".into(), 1, Some("Page 1".into()));
        assert!(collect_section_material(&[chunk]).is_empty());
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("héllo", 2), "hé");
        assert_eq!(clip("hi", 10), "hi");
    }
}
