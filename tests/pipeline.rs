//! End-to-end pipeline behavior over in-memory stores and scripted
//! service fakes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;

use textmill::store::memory::MemoryStores;
use textmill::{
    Chunk, ChunkStore, ChunkerConfig, Document, DocumentStatus, DocumentStore, EmbedderConfig,
    EmbeddingService, Extractor, ExtractorConfig, LlmProvider, Pipeline, PipelineStores,
    ProviderRequest, SummarizeLevel, Summarizer, SummarizerConfig, SummaryLevel, SummaryStatus,
    SummaryStore,
};

/// Embedding fake: fixed vectors, whole-batch outage on a marker, input
/// lengths recorded for truncation assertions.
struct FakeEmbedding {
    seen_input_chars: Mutex<Vec<usize>>,
    fail_marker: Option<&'static str>,
}

impl FakeEmbedding {
    fn new() -> Self {
        Self {
            seen_input_chars: Mutex::new(Vec::new()),
            fail_marker: None,
        }
    }

    fn failing_on(marker: &'static str) -> Self {
        Self {
            seen_input_chars: Mutex::new(Vec::new()),
            fail_marker: Some(marker),
        }
    }
}

impl EmbeddingService for FakeEmbedding {
    fn embed_batch(&self, inputs: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.seen_input_chars
            .lock()
            .unwrap()
            .extend(inputs.iter().map(|input| input.chars().count()));
        if let Some(marker) = self.fail_marker {
            if inputs.iter().any(|input| input.contains(marker)) {
                anyhow::bail!("simulated embedding outage");
            }
        }
        Ok(inputs.iter().map(|_| vec![0.5_f32; 4]).collect())
    }

    fn model(&self) -> &str {
        "fake-embed"
    }
}

/// Provider fake: answers batch prompts positionally, fails individual
/// calls whose content carries `CHUNK_FAIL`, and fails sections carrying
/// `SECTION_FAIL`.
struct ScriptedProvider {
    calls: Mutex<usize>,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self {
            calls: Mutex::new(0),
        }
    }

    fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl LlmProvider for ScriptedProvider {
    fn complete(&self, request: &ProviderRequest) -> anyhow::Result<String> {
        *self.calls.lock().unwrap() += 1;
        let user = request.user;
        if user.contains("=== CHUNK 1 ===") {
            let marker = Regex::new(r"===\s*CHUNK\s+(\d+)\s*===").unwrap();
            let positions: Vec<(usize, usize, usize)> = marker
                .captures_iter(user)
                .map(|cap| {
                    let whole = cap.get(0).unwrap();
                    (whole.start(), whole.end(), cap[1].parse().unwrap())
                })
                .collect();
            let mut out = String::new();
            for (i, &(_, end, k)) in positions.iter().enumerate() {
                let until = positions
                    .get(i + 1)
                    .map(|&(start, _, _)| start)
                    .unwrap_or(user.len());
                let content = &user[end..until];
                if content.contains("CHUNK_FAIL") {
                    continue;
                }
                out.push_str(&format!("=== CHUNK {k} ===\nSummary of excerpt {k}.\n"));
            }
            return Ok(out);
        }
        if user.starts_with("Summarize the following excerpt") {
            if user.contains("CHUNK_FAIL") {
                anyhow::bail!("simulated chunk summary failure");
            }
            return Ok("An individual chunk summary.".to_string());
        }
        if user.starts_with("Summarize the following document section") {
            if user.contains("SECTION_FAIL") {
                anyhow::bail!("simulated section summary failure");
            }
            return Ok("A section summary.".to_string());
        }
        Ok("A document level summary.".to_string())
    }

    fn model(&self) -> &str {
        "fake-model"
    }
}

fn build_pipeline(
    provider: Arc<ScriptedProvider>,
    embedding: Arc<FakeEmbedding>,
) -> (Arc<MemoryStores>, Pipeline) {
    let stores = Arc::new(MemoryStores::new());
    let summarizer = Summarizer::new(
        provider,
        SummarizerConfig {
            batch_pause: Duration::ZERO,
            ..SummarizerConfig::default()
        },
    );
    let pipeline = Pipeline::new(
        PipelineStores {
            documents: stores.clone(),
            chunks: stores.clone(),
            summaries: stores.clone(),
            blobs: stores.clone(),
        },
        Extractor::new(ExtractorConfig::default()).expect("extractor"),
        embedding,
        summarizer,
        ChunkerConfig::default(),
        EmbedderConfig {
            batch_pause: Duration::ZERO,
            ..EmbedderConfig::default()
        },
    );
    (stores, pipeline)
}

fn register_text_document(stores: &MemoryStores, id: &str, content: &str) {
    let mut document = Document::new(id, "testorg", "text/plain");
    document.storage_path = Some("upload.txt".to_string());
    let bucket = document.bucket();
    stores.insert_document(document).expect("insert document");
    stores
        .put_blob(&bucket, "upload.txt", content.as_bytes().to_vec())
        .expect("put blob");
}

fn insert_chunks(stores: &MemoryStores, document_id: &str, specs: &[(&str, Option<&str>)]) {
    stores
        .insert_document(Document::new(document_id, "testorg", "text/plain"))
        .expect("insert document");
    let rows: Vec<Chunk> = specs
        .iter()
        .enumerate()
        .map(|(index, (content, section))| {
            Chunk::new(
                document_id,
                index,
                content.to_string(),
                1,
                section.map(str::to_string),
            )
        })
        .collect();
    stores.insert_many(rows).expect("insert chunks");
}

#[test]
fn full_pipeline_reaches_completed() {
    let provider = Arc::new(ScriptedProvider::new());
    let embedding = Arc::new(FakeEmbedding::new());
    let (stores, pipeline) = build_pipeline(provider.clone(), embedding);
    register_text_document(&stores, "doc-1", &"x".repeat(4000));

    let response = pipeline.process_document("doc-1");
    assert!(response.success, "pipeline failed: {}", response.message);

    let document = DocumentStore::get(stores.as_ref(), "doc-1").expect("document");
    assert_eq!(document.status, DocumentStatus::Completed);
    assert_eq!(document.metadata["progress_percent"], serde_json::json!(100));

    // 4000 chars at window 1500 / overlap 200 yields three windows.
    let chunks = stores.for_document("doc-1").expect("chunks");
    assert_eq!(chunks.len(), 3);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.index, i, "indices contiguous from zero");
        assert_eq!(chunk.section_id.as_deref(), Some(format!("Part {}", i + 1).as_str()));
        assert!(chunk.embedding.is_some());
        assert_eq!(chunk.summary_status, SummaryStatus::Completed);
        assert_eq!(chunk.section_summary_status, Some(SummaryStatus::Completed));
    }

    let summary = SummaryStore::get(stores.as_ref(), "doc-1", SummaryLevel::Document)
        .expect("summary query")
        .expect("summary row");
    assert_eq!(summary.model, "fake-model");
    assert_eq!(summary.status, SummaryStatus::Completed);
    assert!(!summary.summary.is_empty());
}

#[test]
fn citation_keys_are_unique_per_document() {
    let provider = Arc::new(ScriptedProvider::new());
    let embedding = Arc::new(FakeEmbedding::new());
    let (stores, pipeline) = build_pipeline(provider, embedding);
    register_text_document(&stores, "doc-keys", &"y".repeat(4000));

    assert!(pipeline.extract_document("doc-keys").success);
    assert!(pipeline.chunk_document("doc-keys").success);

    let chunks = stores.for_document("doc-keys").expect("chunks");
    let mut keys: Vec<&str> = chunks.iter().map(|c| c.citation_key.as_str()).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), chunks.len());
}

#[test]
fn finalize_without_summaries_parks_document_as_failed() {
    let provider = Arc::new(ScriptedProvider::new());
    let embedding = Arc::new(FakeEmbedding::new());
    let (stores, pipeline) = build_pipeline(provider, embedding);
    insert_chunks(
        &stores,
        "doc-empty",
        &[("alpha", Some("Page 1")), ("beta", Some("Page 1"))],
    );

    let response = pipeline.summarize("doc-empty", SummarizeLevel::Document);
    assert!(response.success, "no-content finalize must not throw");
    assert_eq!(response.message, "no content to summarize");

    let document = DocumentStore::get(stores.as_ref(), "doc-empty").expect("document");
    assert_eq!(document.status, DocumentStatus::ProcessingFailed);
    let summary = SummaryStore::get(stores.as_ref(), "doc-empty", SummaryLevel::Document)
        .expect("summary query");
    assert!(summary.is_none(), "no summary row may be created");
}

#[test]
fn oversized_chunk_is_truncated_and_still_embedded() {
    let provider = Arc::new(ScriptedProvider::new());
    let embedding = Arc::new(FakeEmbedding::new());
    let (stores, pipeline) = build_pipeline(provider, embedding.clone());
    // Roughly 9000 approximate tokens against the 8192-token window.
    let oversized = "a".repeat(36_000);
    insert_chunks(&stores, "doc-big", &[(oversized.as_str(), None)]);

    let response = pipeline.embed_chunks("doc-big");
    assert!(response.success);

    let chunks = stores.for_document("doc-big").expect("chunks");
    assert!(chunks[0].truncated, "over-limit chunk flagged truncated");
    assert!(chunks[0].embedding.is_some(), "still receives an embedding");
    let seen = embedding.seen_input_chars.lock().unwrap();
    assert_eq!(seen[0], 8192 * 4, "input cut to the safe prefix");
}

#[test]
fn embedding_outage_degrades_to_null_instead_of_failing() {
    let provider = Arc::new(ScriptedProvider::new());
    let embedding = Arc::new(FakeEmbedding::failing_on("EMBED_FAIL"));
    let (stores, pipeline) = build_pipeline(provider, embedding);
    insert_chunks(
        &stores,
        "doc-degraded",
        &[("EMBED_FAIL payload", None), ("healthy payload", None)],
    );

    let response = pipeline.embed_chunks("doc-degraded");
    assert!(response.success, "degraded batch must not fail the stage");

    let chunks = stores.for_document("doc-degraded").expect("chunks");
    for chunk in &chunks {
        assert!(chunk.embedding.is_none());
        assert!(chunk.embed_error.is_some());
    }

    // A later rollup still happens, but the document is marked degraded.
    assert!(pipeline.summarize("doc-degraded", SummarizeLevel::Chunks).success);
    assert!(pipeline.summarize("doc-degraded", SummarizeLevel::Sections).success);
    assert!(pipeline.summarize("doc-degraded", SummarizeLevel::Document).success);
    let document = DocumentStore::get(stores.as_ref(), "doc-degraded").expect("document");
    assert_eq!(document.status, DocumentStatus::CompletedWithErrors);
}

#[test]
fn one_failing_chunk_does_not_block_siblings() {
    let provider = Arc::new(ScriptedProvider::new());
    let embedding = Arc::new(FakeEmbedding::new());
    let (stores, pipeline) = build_pipeline(provider, embedding);
    let specs: Vec<(String, Option<&str>)> = (0..10)
        .map(|i| {
            if i == 4 {
                ("CHUNK_FAIL content".to_string(), None)
            } else {
                (format!("ordinary content {i}"), None)
            }
        })
        .collect();
    let borrowed: Vec<(&str, Option<&str>)> = specs
        .iter()
        .map(|(content, section)| (content.as_str(), *section))
        .collect();
    insert_chunks(&stores, "doc-iso", &borrowed);

    let response = pipeline.summarize("doc-iso", SummarizeLevel::Chunks);
    assert!(response.success);

    let chunks = stores.for_document("doc-iso").expect("chunks");
    for chunk in &chunks {
        if chunk.index == 4 {
            assert_eq!(chunk.summary_status, SummaryStatus::Error);
        } else {
            assert_eq!(chunk.summary_status, SummaryStatus::Completed, "chunk {}", chunk.index);
        }
    }
}

#[test]
fn section_summaries_wait_for_every_sibling_chunk() {
    let provider = Arc::new(ScriptedProvider::new());
    let embedding = Arc::new(FakeEmbedding::new());
    let (stores, pipeline) = build_pipeline(provider, embedding);
    insert_chunks(
        &stores,
        "doc-gate",
        &[
            ("first page intro", Some("Page 1")),
            ("CHUNK_FAIL first page rest", Some("Page 1")),
            ("second page intro", Some("Page 2")),
            ("second page rest", Some("Page 2")),
        ],
    );

    assert!(pipeline.summarize("doc-gate", SummarizeLevel::Chunks).success);
    assert!(pipeline.summarize("doc-gate", SummarizeLevel::Sections).success);

    let chunks = stores.for_document("doc-gate").expect("chunks");
    // Page 1 has a failed sibling: its section summary never starts.
    assert_eq!(chunks[0].section_summary_status, Some(SummaryStatus::Pending));
    assert_eq!(chunks[1].section_summary_status, Some(SummaryStatus::Pending));
    assert!(chunks[0].section_summary.is_none());
    // Page 2 is fully summarized: the whole set flips together.
    assert_eq!(chunks[2].section_summary_status, Some(SummaryStatus::Completed));
    assert_eq!(chunks[3].section_summary_status, Some(SummaryStatus::Completed));
    assert_eq!(chunks[2].section_summary, chunks[3].section_summary);
}

#[test]
fn rerunning_chunk_summaries_skips_completed_work() {
    let provider = Arc::new(ScriptedProvider::new());
    let embedding = Arc::new(FakeEmbedding::new());
    let (stores, pipeline) = build_pipeline(provider.clone(), embedding);
    insert_chunks(
        &stores,
        "doc-rerun",
        &[("first body", None), ("second body", None)],
    );

    assert!(pipeline.summarize("doc-rerun", SummarizeLevel::Chunks).success);
    let calls_after_first = provider.call_count();
    assert!(calls_after_first > 0);

    let response = pipeline.summarize("doc-rerun", SummarizeLevel::Chunks);
    assert!(response.success);
    assert_eq!(
        provider.call_count(),
        calls_after_first,
        "second pass must find nothing pending"
    );
}

#[test]
fn unsupported_media_type_fails_without_throwing() {
    let provider = Arc::new(ScriptedProvider::new());
    let embedding = Arc::new(FakeEmbedding::new());
    let (stores, pipeline) = build_pipeline(provider, embedding);
    let mut document = Document::new("doc-zip", "testorg", "application/zip");
    document.storage_path = Some("archive.zip".to_string());
    stores.insert_document(document).expect("insert");

    let response = pipeline.extract_document("doc-zip");
    assert!(!response.success);
    let error = response.error.expect("structured error");
    assert_eq!(error.code, textmill::ErrorCode::UnsupportedType);
    assert!(!error.suggested_actions.is_empty());

    let document = DocumentStore::get(stores.as_ref(), "doc-zip").expect("document");
    assert_eq!(document.status, DocumentStatus::Error);
    assert_eq!(document.metadata["last_error"]["code"], "unsupported_type");
}

#[test]
fn missing_document_yields_error_response() {
    let provider = Arc::new(ScriptedProvider::new());
    let embedding = Arc::new(FakeEmbedding::new());
    let (_stores, pipeline) = build_pipeline(provider, embedding);

    let response = pipeline.extract_document("ghost");
    assert!(!response.success);
    assert_eq!(response.document_id, "ghost");
    assert!(response.error.is_some());
}

#[test]
fn targeted_chunk_retry_is_status_gated() {
    let provider = Arc::new(ScriptedProvider::new());
    let embedding = Arc::new(FakeEmbedding::new());
    let (stores, pipeline) = build_pipeline(provider, embedding);
    insert_chunks(&stores, "doc-one", &[("retry me", None)]);

    let response = pipeline.summarize_chunk("doc-one", "doc-one:0");
    assert!(response.success);
    let chunks = stores.for_document("doc-one").expect("chunks");
    assert_eq!(chunks[0].summary_status, SummaryStatus::Completed);

    let repeat = pipeline.summarize_chunk("doc-one", "doc-one:0");
    assert!(repeat.success);
    assert!(repeat.message.contains("skipping"));
}
