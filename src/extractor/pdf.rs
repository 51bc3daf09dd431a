//! Page-by-page PDF extraction with sampling and budget enforcement.

use std::time::{Duration, Instant};

use crate::chunker::page_marker;
use crate::error::PipelineError;
use crate::progress::{ProgressSink, Stage};
use crate::sanitize::clean_text;

/// Limits applied while walking a PDF's pages.
#[derive(Debug, Clone)]
pub struct PdfConfig {
    /// Documents with more pages than this get a sampled subset.
    pub sample_threshold_pages: usize,
    /// Ceiling on sampled pages for very large documents.
    pub max_sampled_pages: usize,
    /// Wall-clock budget for the whole extraction.
    pub max_wall_clock: Duration,
    /// Accumulated-text byte budget.
    pub max_text_bytes: usize,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            sample_threshold_pages: 250,
            max_sampled_pages: 200,
            max_wall_clock: Duration::from_secs(60),
            max_text_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Extraction result plus the bookkeeping recorded on the document.
#[derive(Debug, Clone)]
pub struct PdfText {
    /// Concatenated page text with page-boundary markers.
    pub text: String,
    /// Pages in the document.
    pub pages_total: usize,
    /// Pages whose text made it into the output.
    pub pages_extracted: usize,
    /// True when a sampled subset was used instead of every page.
    pub sampled: bool,
    /// True when a budget breach stopped the walk early.
    pub stopped_early: bool,
}

/// Page-oriented PDF extractor.
pub struct PdfExtractor {
    config: PdfConfig,
}

impl PdfExtractor {
    /// Builds a new extractor with the given limits.
    pub fn new(config: PdfConfig) -> Self {
        Self { config }
    }

    /// Extracts text from PDF bytes.
    ///
    /// Budget breaches stop the page walk and keep whatever was extracted
    /// so far; only a document that yields no text at all is an error.
    pub fn extract(
        &self,
        bytes: &[u8],
        progress: &dyn ProgressSink,
    ) -> Result<PdfText, PipelineError> {
        let document = lopdf::Document::load_mem(bytes).map_err(|err| PipelineError::Pdf {
            detail: format!("failed to load PDF: {err}"),
        })?;
        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        let pages_total = page_numbers.len();
        if pages_total == 0 {
            return Err(PipelineError::Pdf {
                detail: "PDF has no pages".to_string(),
            });
        }

        let selected = sample_pages(
            pages_total,
            self.config.sample_threshold_pages,
            self.config.max_sampled_pages,
        );
        let sampled = selected.len() < pages_total;
        if sampled {
            tracing::info!(pages_total, sampled_pages = selected.len(), "sampling large PDF");
        }

        let started = Instant::now();
        let mut text = String::new();
        let mut pages_extracted = 0usize;
        let mut stopped_early = false;
        for (done, &offset) in selected.iter().enumerate() {
            if started.elapsed() > self.config.max_wall_clock {
                tracing::warn!(done, "PDF wall-clock budget hit, keeping partial text");
                stopped_early = true;
                break;
            }
            if text.len() > self.config.max_text_bytes {
                tracing::warn!(done, bytes = text.len(), "PDF text budget hit, keeping partial text");
                stopped_early = true;
                break;
            }

            let page_number = page_numbers[offset];
            match document.extract_text(&[page_number]) {
                Ok(raw) => {
                    let page_text = clean_text(&raw);
                    if !page_text.is_empty() {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(&page_marker(page_number as usize));
                        text.push('\n');
                        text.push_str(&page_text);
                        pages_extracted += 1;
                    }
                }
                Err(err) => {
                    tracing::debug!(page_number, error = %err, "page extraction failed, skipping");
                }
            }
            if done % 10 == 0 {
                progress.report(Stage::Extraction, done + 1, selected.len());
            }
        }
        progress.report(Stage::Extraction, selected.len(), selected.len());

        if text.trim().is_empty() {
            // Some generators keep text in streams lopdf's walker misses;
            // fall back to a whole-document pass.
            return self.extract_fallback(bytes, pages_total);
        }

        Ok(PdfText {
            text,
            pages_total,
            pages_extracted,
            sampled,
            stopped_early,
        })
    }

    fn extract_fallback(&self, bytes: &[u8], pages_total: usize) -> Result<PdfText, PipelineError> {
        match pdf_extract::extract_text_from_mem(bytes) {
            Ok(raw) => {
                let text = clean_text(&raw);
                if text.is_empty() {
                    Err(PipelineError::Pdf {
                        detail: "no extractable text; the PDF may be scanned or image-based"
                            .to_string(),
                    })
                } else {
                    Ok(PdfText {
                        text,
                        pages_total,
                        pages_extracted: pages_total,
                        sampled: false,
                        stopped_early: false,
                    })
                }
            }
            Err(err) => Err(PipelineError::Pdf {
                detail: format!("fallback extraction failed: {err}"),
            }),
        }
    }
}

/// Picks which page offsets (0-based) to extract.
///
/// Small documents take every page. Large ones take a deterministic
/// sample weighted toward the beginning, with blocks from the middle and
/// end, a guaranteed first and last page, and a stride fill across the
/// rest. Deterministic so repeated runs extract identical text.
pub fn sample_pages(total: usize, threshold: usize, cap: usize) -> Vec<usize> {
    if total <= threshold.max(1) || total <= cap {
        return (0..total).collect();
    }
    let cap = cap.max(2);
    let mut picked = std::collections::BTreeSet::new();
    picked.insert(0);
    picked.insert(total - 1);

    // Front-weighted block, then middle and end blocks.
    let front = cap * 3 / 10;
    for offset in 0..front {
        picked.insert(offset);
    }
    let middle_len = cap / 5;
    let middle_start = (total / 2).saturating_sub(middle_len / 2);
    for offset in middle_start..(middle_start + middle_len).min(total) {
        picked.insert(offset);
    }
    let end_len = cap / 5;
    for offset in total.saturating_sub(end_len)..total {
        picked.insert(offset);
    }

    // Fill the remaining budget with an even stride over the whole range.
    let remaining = cap.saturating_sub(picked.len());
    if remaining > 0 {
        let stride = (total / (remaining + 1)).max(1);
        let mut offset = stride;
        while offset < total && picked.len() < cap {
            picked.insert(offset);
            offset += stride;
        }
    }

    picked.into_iter().take(cap).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_documents_take_every_page() {
        assert_eq!(sample_pages(10, 250, 200), (0..10).collect::<Vec<_>>());
        assert_eq!(sample_pages(250, 250, 200).len(), 250);
    }

    #[test]
    fn large_documents_are_sampled_deterministically() {
        let first = sample_pages(500, 250, 200);
        let second = sample_pages(500, 250, 200);
        assert_eq!(first, second);
        assert!(first.len() <= 200);
        assert!(first.contains(&0), "first page always included");
        assert!(first.contains(&499), "last page always included");
        // Sorted and unique by construction.
        assert!(first.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn sample_covers_beginning_middle_and_end() {
        let pages = sample_pages(1000, 250, 200);
        assert!(pages.iter().any(|&p| p < 100));
        assert!(pages.iter().any(|&p| (450..550).contains(&p)));
        assert!(pages.iter().any(|&p| p > 900));
    }
}
