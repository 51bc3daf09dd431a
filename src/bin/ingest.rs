use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use textmill::extractor::{AudioConfig, VideoConfig};
use textmill::store::memory::MemoryStores;
use textmill::{
    chunk_text, AnthropicProvider, ChunkerConfig, Document, DocumentStore, EmbedderConfig,
    Extractor, ExtractorConfig, HttpEmbeddingClient, LlmProvider, OpenAiProvider, Pipeline,
    PipelineStores, StageResponse, SummarizeLevel, Summarizer, SummarizerConfig, SummaryLevel,
    SummaryStore,
};

#[derive(Parser, Debug)]
#[command(
    name = "textmill-ingest",
    about = "Run the ingestion and summarization pipeline over a file or URL"
)]
struct IngestCli {
    /// Local file to ingest
    #[arg(long, conflicts_with = "url")]
    input: Option<PathBuf>,

    /// URL to ingest (web page or recognized video host)
    #[arg(long)]
    url: Option<String>,

    /// Declared media type; guessed from the file extension when omitted
    #[arg(long)]
    media_type: Option<String>,

    /// Owning organization identifier
    #[arg(long, default_value = "local")]
    org: String,

    /// Stop after chunking; no service credentials needed
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Write the final chunk rows as JSONL
    #[arg(long)]
    chunks_out: Option<PathBuf>,

    /// Window size in characters
    #[arg(long, env = "TEXTMILL_WINDOW_CHARS", default_value_t = 1500)]
    window_chars: usize,

    /// Overlap between consecutive windows in characters
    #[arg(long, env = "TEXTMILL_OVERLAP_CHARS", default_value_t = 200)]
    overlap_chars: usize,

    /// API key for the embedding service
    #[arg(long, env = "TEXTMILL_EMBED_API_KEY")]
    embed_api_key: Option<String>,

    /// Base URL for the OpenAI-compatible embedding API
    #[arg(
        long,
        env = "TEXTMILL_EMBED_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    embed_base_url: String,

    /// Embedding model identifier
    #[arg(
        long,
        env = "TEXTMILL_EMBED_MODEL",
        default_value = "text-embedding-3-small"
    )]
    embed_model: String,

    /// Optional dimension override when supported by the model
    #[arg(long, env = "TEXTMILL_EMBED_DIMENSIONS")]
    embed_dimensions: Option<usize>,

    /// Target LLM provider (openai or anthropic)
    #[arg(long, env = "TEXTMILL_LLM_PROVIDER", default_value = "openai")]
    llm_provider: String,

    /// OpenAI API key for summarization
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: Option<String>,

    /// OpenAI chat model used for summaries
    #[arg(long, env = "TEXTMILL_LLM_MODEL", default_value = "gpt-4o-mini")]
    openai_model: String,

    /// Anthropic API key (required when --llm-provider anthropic)
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    anthropic_api_key: Option<String>,

    /// Anthropic model identifier
    #[arg(
        long,
        env = "TEXTMILL_ANTHROPIC_MODEL",
        default_value = "claude-3-5-haiku-latest"
    )]
    anthropic_model: String,

    /// Speech-to-text API key; enables audio sources
    #[arg(long, env = "TEXTMILL_STT_API_KEY")]
    stt_api_key: Option<String>,

    /// Speech-to-text model identifier
    #[arg(long, env = "TEXTMILL_STT_MODEL", default_value = "whisper-1")]
    stt_model: String,

    /// Transcript-fetch service endpoint; enables video sources
    #[arg(long, env = "TEXTMILL_TRANSCRIPT_ENDPOINT")]
    transcript_endpoint: Option<String>,

    /// Max seconds for each service request
    #[arg(long, env = "TEXTMILL_TIMEOUT_SECS", default_value_t = 60)]
    timeout_secs: u64,

    /// Retries for rate limits and transient service errors
    #[arg(long, env = "TEXTMILL_MAX_RETRIES", default_value_t = 3)]
    max_retries: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = IngestCli::parse();

    let stores = Arc::new(MemoryStores::new());
    let document_id = register_document(&cli, &stores)?;
    let extractor = build_extractor(&cli)?;
    let chunker = ChunkerConfig {
        window_chars: cli.window_chars.max(2),
        overlap_chars: cli.overlap_chars,
    };

    if cli.dry_run {
        return dry_run(&stores, &extractor, &chunker, &document_id);
    }

    let embed_key = cli
        .embed_api_key
        .clone()
        .or_else(|| cli.openai_api_key.clone())
        .context("an embedding API key is required (set TEXTMILL_EMBED_API_KEY)")?;
    let embedding = Arc::new(HttpEmbeddingClient::new(
        embed_key,
        cli.embed_base_url.clone(),
        cli.embed_model.clone(),
        cli.embed_dimensions,
        Duration::from_secs(cli.timeout_secs.max(1)),
        cli.max_retries.max(1),
    )?);
    let provider = build_provider(&cli)?;
    let summarizer = Summarizer::new(provider, SummarizerConfig::default());

    let pipeline = Pipeline::new(
        PipelineStores {
            documents: stores.clone(),
            chunks: stores.clone(),
            summaries: stores.clone(),
            blobs: stores.clone(),
        },
        extractor,
        embedding,
        summarizer,
        chunker,
        EmbedderConfig::default(),
    );

    report("extract", &pipeline.extract_document(&document_id))?;
    report("chunk", &pipeline.chunk_document(&document_id))?;
    report("embed", &pipeline.embed_chunks(&document_id))?;
    report(
        "summarize chunks",
        &pipeline.summarize(&document_id, SummarizeLevel::Chunks),
    )?;
    report(
        "summarize sections",
        &pipeline.summarize(&document_id, SummarizeLevel::Sections),
    )?;
    report(
        "finalize",
        &pipeline.summarize(&document_id, SummarizeLevel::Document),
    )?;

    let document = DocumentStore::get(stores.as_ref(), &document_id)?;
    println!("\nfinal status: {}", document.status.as_str());
    if let Some(summary) =
        SummaryStore::get(stores.as_ref(), &document_id, SummaryLevel::Document)?
    {
        println!("--- Document Summary ({}) ---\n{}", summary.model, summary.summary);
    }
    write_chunks(&cli, &stores, &document_id)?;
    Ok(())
}

fn register_document(cli: &IngestCli, stores: &MemoryStores) -> Result<String> {
    if let Some(url) = &cli.url {
        let media_type = cli.media_type.clone().unwrap_or_else(|| "text/html".into());
        let document_id = format!("doc-{:08x}", checksum(url.as_bytes()));
        let mut document = Document::new(document_id.clone(), cli.org.clone(), media_type);
        document
            .metadata
            .insert("source_url".into(), serde_json::json!(url));
        stores.insert_document(document)?;
        return Ok(document_id);
    }

    let Some(path) = &cli.input else {
        bail!("either --input or --url is required");
    };
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {path:?}"))?;
    let media_type = cli
        .media_type
        .clone()
        .unwrap_or_else(|| guess_media_type(path).to_string());
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let document_id = format!("doc-{:08x}", checksum(&bytes));

    let mut document = Document::new(document_id.clone(), cli.org.clone(), media_type);
    document.storage_path = Some(file_name.clone());
    let bucket = document.bucket();
    stores.insert_document(document)?;
    stores.put_blob(&bucket, &file_name, bytes)?;
    Ok(document_id)
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn guess_media_type(path: &PathBuf) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("md") => "text/markdown",
        _ => "text/plain",
    }
}

fn build_extractor(cli: &IngestCli) -> Result<Extractor> {
    let timeout = Duration::from_secs(cli.timeout_secs.max(1));
    let video = cli.transcript_endpoint.as_ref().map(|endpoint| VideoConfig {
        endpoint: endpoint.clone(),
        timeout,
        fallback_languages: VideoConfig::default_languages(),
    });
    let audio = cli.stt_api_key.as_ref().map(|key| AudioConfig {
        api_key: key.clone(),
        base_url: cli.embed_base_url.clone(),
        model: cli.stt_model.clone(),
        timeout,
    });
    Extractor::new(ExtractorConfig {
        video,
        audio,
        ..ExtractorConfig::default()
    })
}

fn build_provider(cli: &IngestCli) -> Result<Arc<dyn LlmProvider>> {
    let timeout = Duration::from_secs(cli.timeout_secs.max(1));
    match cli.llm_provider.to_lowercase().as_str() {
        "openai" => {
            let key = cli
                .openai_api_key
                .clone()
                .context("OPENAI_API_KEY must be set for the OpenAI provider")?;
            Ok(Arc::new(OpenAiProvider::new(
                key,
                "https://api.openai.com/v1".to_string(),
                cli.openai_model.clone(),
                timeout,
                cli.max_retries.max(1),
            )?))
        }
        "anthropic" => {
            let key = cli
                .anthropic_api_key
                .clone()
                .context("ANTHROPIC_API_KEY must be set for the Anthropic provider")?;
            Ok(Arc::new(AnthropicProvider::new(
                key,
                cli.anthropic_model.clone(),
                timeout,
                cli.max_retries.max(1),
            )?))
        }
        other => bail!("unsupported llm provider '{}'; use openai or anthropic", other),
    }
}

fn report(stage: &str, response: &StageResponse) -> Result<()> {
    if response.success {
        println!("[{stage}] {}", response.message);
        Ok(())
    } else {
        if let Some(error) = &response.error {
            eprintln!("[{stage}] failed: {}", error.message);
            for action in &error.suggested_actions {
                eprintln!("  - {action}");
            }
        }
        bail!("{stage} stage failed: {}", response.message);
    }
}

fn dry_run(
    stores: &Arc<MemoryStores>,
    extractor: &Extractor,
    chunker: &ChunkerConfig,
    document_id: &str,
) -> Result<()> {
    let document = DocumentStore::get(stores.as_ref(), document_id)?;
    let extracted = extractor
        .extract(&document, stores.as_ref(), &textmill::progress::LogSink)
        .map_err(|err| anyhow::anyhow!("extraction failed: {err}"))?;
    println!(
        "extracted {} chars ({} source)",
        extracted.text.chars().count(),
        extracted.kind.as_str()
    );
    let drafts = chunk_text(&extracted.text, chunker);
    println!("would create {} chunks:", drafts.len());
    for (i, draft) in drafts.iter().enumerate() {
        println!(
            "  [{i}] {} ({} tokens): {}...",
            draft.section_id.as_deref().unwrap_or("-"),
            draft.token_estimate,
            draft.content.chars().take(60).collect::<String>()
        );
    }
    Ok(())
}

fn write_chunks(cli: &IngestCli, stores: &Arc<MemoryStores>, document_id: &str) -> Result<()> {
    let Some(path) = &cli.chunks_out else {
        return Ok(());
    };
    let file = File::create(path).with_context(|| format!("failed to create {path:?}"))?;
    let mut writer = BufWriter::new(file);
    let rows = textmill::ChunkStore::for_document(stores.as_ref(), document_id)?;
    for row in rows {
        serde_json::to_writer(&mut writer, &row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    println!("chunk rows written to {path:?}");
    Ok(())
}
