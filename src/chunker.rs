//! Splits extracted text into bounded, overlapping windows.
//!
//! The chunker is a pure function of its input and configuration: the same
//! text always yields the same windows, section identifiers, and ordering,
//! which is what makes the chunking stage safely re-invocable.

use regex::Regex;
use std::sync::OnceLock;

/// Marker the PDF extractor writes before each page's text.
pub fn page_marker(page: usize) -> String {
    format!("[[page {page}]]")
}

/// Marker the video extractor writes before each caption segment.
pub fn time_marker(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("[time {hours:02}:{minutes:02}:{secs:02}]")
}

fn page_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\[\[page (\d+)\]\][ \t]*$").expect("page marker regex"))
}

fn time_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[time (\d{2}:\d{2}:\d{2})\]").expect("time marker regex"))
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(#{1,6})[ \t]+(\S.*)$").expect("heading regex"))
}

/// Window sizing knobs.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Target characters of content per chunk.
    pub window_chars: usize,
    /// Characters of tail shared between consecutive chunks, so a window
    /// boundary never severs a sentence from all of its context.
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            window_chars: 1500,
            overlap_chars: 200,
        }
    }
}

/// One window of content awaiting persistence as a chunk row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    /// Window text.
    pub content: String,
    /// Grouping key: `Page N`, `Time hh:mm:ss`, a heading, or `Part N`.
    /// `None` for content with no structural home.
    pub section_id: Option<String>,
    /// Word-count token estimate.
    pub token_estimate: usize,
}

impl ChunkDraft {
    fn new(content: &str, section_id: Option<String>) -> Self {
        Self {
            token_estimate: estimate_tokens(content),
            content: content.to_string(),
            section_id,
        }
    }
}

fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count().max(1)
}

/// Splits text into ordered chunk drafts.
///
/// Page markers win over timestamp markers, which win over headings; flat
/// text falls back to plain windows labelled `Part N`. Whitespace-only
/// input yields zero drafts, which callers treat as pipeline-fatal.
pub fn chunk_text(text: &str, config: &ChunkerConfig) -> Vec<ChunkDraft> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    if page_marker_re().is_match(text) {
        return chunk_pages(text, config);
    }
    if time_marker_re().is_match(text) {
        return chunk_transcript(text, config);
    }
    if heading_re().find_iter(text).count() >= 2 {
        return chunk_sections(text, config);
    }
    chunk_flat(text, config)
}

fn chunk_pages(text: &str, config: &ChunkerConfig) -> Vec<ChunkDraft> {
    let mut drafts = Vec::new();
    let mut cursor = 0usize;
    let mut current_page: Option<usize> = None;
    let marker_re = page_marker_re();

    let flush = |page: Option<usize>, body: &str, drafts: &mut Vec<ChunkDraft>| {
        if body.trim().is_empty() {
            return;
        }
        let section = page.map(|n| format!("Page {n}"));
        for window in windows(body, config) {
            drafts.push(ChunkDraft::new(window, section.clone()));
        }
    };

    for capture in marker_re.captures_iter(text) {
        let marker = capture.get(0).expect("whole match");
        flush(current_page, &text[cursor..marker.start()], &mut drafts);
        current_page = capture[1].parse().ok();
        cursor = marker.end();
    }
    flush(current_page, &text[cursor..], &mut drafts);
    drafts
}

fn chunk_transcript(text: &str, config: &ChunkerConfig) -> Vec<ChunkDraft> {
    // Segments run from one timestamp marker to the next; each window of
    // accumulated segments is labelled with its first timestamp.
    let marker_re = time_marker_re();
    let mut starts: Vec<(usize, Option<String>)> = marker_re
        .captures_iter(text)
        .map(|cap| {
            let m = cap.get(0).expect("whole match");
            (m.start(), Some(cap[1].to_string()))
        })
        .collect();
    if starts.first().map(|(pos, _)| *pos) != Some(0) {
        starts.insert(0, (0, None));
    }
    starts.push((text.len(), None));

    let mut segments: Vec<(Option<String>, &str)> = Vec::new();
    for pair in starts.windows(2) {
        let (start, ref stamp) = pair[0];
        let (end, _) = pair[1];
        segments.push((stamp.clone(), &text[start..end]));
    }

    let mut drafts = Vec::new();
    let mut window = String::new();
    let mut window_stamp: Option<String> = None;
    for (stamp, segment) in segments {
        if !window.is_empty()
            && window.chars().count() + segment.chars().count() > config.window_chars
        {
            let section = window_stamp.take().map(|s| format!("Time {s}"));
            drafts.push(ChunkDraft::new(window.trim(), section));
            window.clear();
        }
        if window.is_empty() {
            window_stamp = stamp;
        }
        window.push_str(segment);
    }
    if !window.trim().is_empty() {
        let section = window_stamp.map(|s| format!("Time {s}"));
        drafts.push(ChunkDraft::new(window.trim(), section));
    }
    drafts
}

fn chunk_sections(text: &str, config: &ChunkerConfig) -> Vec<ChunkDraft> {
    let mut drafts = Vec::new();
    let mut cursor = 0usize;
    let mut current_heading: Option<String> = None;

    let flush = |heading: &Option<String>, body: &str, drafts: &mut Vec<ChunkDraft>| {
        if body.trim().is_empty() {
            return;
        }
        for window in windows(body, config) {
            drafts.push(ChunkDraft::new(window, heading.clone()));
        }
    };

    for capture in heading_re().captures_iter(text) {
        let marker = capture.get(0).expect("whole match");
        flush(&current_heading, &text[cursor..marker.start()], &mut drafts);
        current_heading = Some(capture[2].trim().to_string());
        cursor = marker.end();
    }
    flush(&current_heading, &text[cursor..], &mut drafts);
    drafts
}

fn chunk_flat(text: &str, config: &ChunkerConfig) -> Vec<ChunkDraft> {
    windows(text, config)
        .into_iter()
        .enumerate()
        .map(|(i, window)| ChunkDraft::new(window, Some(format!("Part {}", i + 1))))
        .collect()
}

/// Cuts `text` into overlapping windows of roughly `window_chars`
/// characters, preferring to end at a paragraph break, then a sentence
/// end, then a word boundary, before cutting mid-word.
fn windows<'a>(text: &'a str, config: &ChunkerConfig) -> Vec<&'a str> {
    let window = config.window_chars.max(2);
    let overlap = config.overlap_chars.min(window / 2);

    // Char-index space; byte offsets for slicing.
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(text.len()))
        .collect();
    let n = offsets.len() - 1;
    if n == 0 {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut start = 0usize;
    loop {
        let mut end = (start + window).min(n);
        if end < n {
            end = find_break(text, &offsets, start, end, window);
        }
        out.push(&text[offsets[start]..offsets[end]]);
        if end >= n {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    out
}

fn find_break(text: &str, offsets: &[usize], start: usize, end: usize, window: usize) -> usize {
    let floor = start + window / 2;
    let slice_at = |a: usize, b: usize| &text[offsets[a]..offsets[b]];

    // Paragraph break anywhere in the back half of the window.
    if let Some(pos) = rfind_chars(slice_at(floor, end), "\n\n") {
        return floor + pos + 2;
    }
    // Sentence end in the last 200 chars.
    let sentence_floor = end.saturating_sub(200).max(floor);
    let tail = slice_at(sentence_floor, end);
    for pattern in [". ", "! ", "? ", "\n"] {
        if let Some(pos) = rfind_chars(tail, pattern) {
            return sentence_floor + pos + pattern.chars().count();
        }
    }
    // Word boundary in the last 40 chars.
    let word_floor = end.saturating_sub(40).max(floor);
    if let Some(pos) = rfind_chars(slice_at(word_floor, end), " ") {
        return word_floor + pos + 1;
    }
    end
}

/// `rfind` measured in characters rather than bytes.
fn rfind_chars(haystack: &str, needle: &str) -> Option<usize> {
    let byte_pos = haystack.rfind(needle)?;
    Some(haystack[..byte_pos].chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_text_windows_with_part_sections() {
        // 4000 uniform chars, window 1500 / overlap 200: strides of 1300.
        let text = "x".repeat(4000);
        let drafts = chunk_text(&text, &ChunkerConfig::default());
        assert_eq!(drafts.len(), 3);
        let sections: Vec<_> = drafts
            .iter()
            .map(|d| d.section_id.clone().unwrap())
            .collect();
        assert_eq!(sections, ["Part 1", "Part 2", "Part 3"]);
    }

    #[test]
    fn chunking_is_idempotent() {
        let text = "Sentence one. Sentence two. ".repeat(200);
        let config = ChunkerConfig::default();
        assert_eq!(chunk_text(&text, &config), chunk_text(&text, &config));
    }

    #[test]
    fn overlap_preserves_coverage() {
        let text: String = (0..900)
            .map(|i| format!("word{i} "))
            .collect::<String>();
        let config = ChunkerConfig {
            window_chars: 500,
            overlap_chars: 80,
        };
        let drafts = chunk_text(text.trim_end(), &config);
        assert!(drafts.len() > 1);

        // Strip each chunk's overlap with what came before and confirm
        // nothing was dropped.
        let mut rebuilt = drafts[0].content.clone();
        for draft in &drafts[1..] {
            let mut appended = false;
            for k in (0..=draft.content.len().min(rebuilt.len())).rev() {
                if rebuilt.ends_with(&draft.content[..k]) {
                    rebuilt.push_str(&draft.content[k..]);
                    appended = true;
                    break;
                }
            }
            assert!(appended);
        }
        assert_eq!(rebuilt, text.trim_end());
    }

    #[test]
    fn page_markers_drive_sections() {
        let text = format!(
            "{}\nAlpha page text.\n{}\nBeta page text.",
            page_marker(1),
            page_marker(2)
        );
        let drafts = chunk_text(&text, &ChunkerConfig::default());
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].section_id.as_deref(), Some("Page 1"));
        assert_eq!(drafts[1].section_id.as_deref(), Some("Page 2"));
        assert!(drafts[0].content.contains("Alpha"));
    }

    #[test]
    fn timestamps_drive_sections() {
        let text = format!(
            "{} welcome to the show {} second part of the talk",
            time_marker(5),
            time_marker(95)
        );
        let config = ChunkerConfig {
            window_chars: 40,
            overlap_chars: 0,
        };
        let drafts = chunk_text(&text, &config);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].section_id.as_deref(), Some("Time 00:00:05"));
        assert_eq!(drafts[1].section_id.as_deref(), Some("Time 00:01:35"));
    }

    #[test]
    fn headings_drive_sections() {
        let text = "intro line\n\n# First\nbody of first section\n\n# Second\nbody of second";
        let drafts = chunk_text(text, &ChunkerConfig::default());
        assert_eq!(drafts.len(), 3);
        assert_eq!(drafts[0].section_id, None);
        assert_eq!(drafts[1].section_id.as_deref(), Some("First"));
        assert_eq!(drafts[2].section_id.as_deref(), Some("Second"));
    }

    #[test]
    fn short_text_yields_one_chunk() {
        let drafts = chunk_text("just a short note", &ChunkerConfig::default());
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].section_id.as_deref(), Some("Part 1"));
    }

    #[test]
    fn whitespace_only_yields_nothing() {
        assert!(chunk_text("   \n\t  ", &ChunkerConfig::default()).is_empty());
        assert!(chunk_text("", &ChunkerConfig::default()).is_empty());
    }

    #[test]
    fn prefers_sentence_boundaries() {
        let sentence = "This is a sentence that ends cleanly. ";
        let text = sentence.repeat(60);
        let config = ChunkerConfig {
            window_chars: 400,
            overlap_chars: 50,
        };
        let drafts = chunk_text(text.trim_end(), &config);
        for draft in &drafts[..drafts.len() - 1] {
            assert!(
                draft.content.trim_end().ends_with('.'),
                "window should end on a sentence: {:?}",
                &draft.content[draft.content.len().saturating_sub(20)..]
            );
        }
    }
}
