use chrono::Utc;
use clap::{Parser, Subcommand};
use report_rag_core::{
    AskService, Converter, DegradePolicy, DocumentSource, DriveSource, FolderSource, IdAssignment,
    OcrBackend, OpenAiChatClient, PdftoppmRenderer, PipelineConfig, PostgrestStore, RemoteOcr,
    RestEmbedder, Retriever, Synthesizer, TesseractOcr, TokenCounter,
};
use report_rag_core::{write_manifest, IngestionPipeline};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "report-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vector store base URL (PostgREST-compatible)
    #[arg(long, env = "STORE_URL", default_value = "http://localhost:54321")]
    store_url: String,

    /// Vector store API key
    #[arg(long, env = "STORE_API_KEY", hide_env_values = true)]
    store_api_key: String,

    /// Table holding the chunk records
    #[arg(long, default_value = "documents")]
    store_table: String,

    /// Similarity-search RPC function
    #[arg(long, default_value = "match_documents")]
    store_function: String,

    /// Embedding service base URL (OpenAI-compatible)
    #[arg(long, env = "EMBEDDINGS_URL", default_value = "http://localhost:8000")]
    embeddings_url: String,

    /// Embedding model identifier
    #[arg(
        long,
        default_value = "sentence-transformers/paraphrase-multilingual-mpnet-base-v2"
    )]
    embeddings_model: String,

    /// Embedding service API key
    #[arg(long, env = "EMBEDDINGS_API_KEY", hide_env_values = true)]
    embeddings_api_key: Option<String>,

    /// Vector dimension of the store collection
    #[arg(long, default_value = "768")]
    embedding_dimensions: usize,

    /// Completion service base URL (OpenAI-compatible)
    #[arg(long, env = "LLM_URL", default_value = "https://api.groq.com/openai")]
    llm_url: String,

    /// Completion service API key
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// Completion model
    #[arg(long, default_value = "llama-3.3-70b-versatile")]
    llm_model: String,

    /// Remote OCR endpoint; tesseract is used when unset
    #[arg(long, env = "OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// Remote OCR API key
    #[arg(long, env = "OCR_API_KEY", hide_env_values = true)]
    ocr_api_key: Option<String>,

    /// OCR language hints
    #[arg(long, value_delimiter = ',', default_values_t = ["por".to_string(), "eng".to_string()])]
    ocr_languages: Vec<String>,

    /// Path to the tokenizer.json of the embedding model
    #[arg(long, default_value = "tokenizer.json")]
    tokenizer: PathBuf,

    /// Token budget per chunk
    #[arg(long, default_value = "512")]
    max_tokens: usize,

    /// Always append new records instead of upserting by (source, chunk index)
    #[arg(long, default_value_t = false)]
    append_only: bool,

    /// What to do when an embedding call fails: zero-vector, skip, or propagate
    #[arg(long, default_value = "zero-vector", value_parser = parse_policy)]
    on_embed_failure: DegradePolicy,
}

#[derive(Subcommand)]
enum Command {
    /// Convert, chunk, embed, and persist every report from a source.
    Ingest {
        /// Local folder with PDFs, scanned recursively.
        #[arg(long, conflicts_with_all = ["site_host", "site_name", "drive_folder"])]
        folder: Option<PathBuf>,

        /// Drive API site hostname, e.g. contoso.sharepoint.com
        #[arg(long, requires = "site_name")]
        site_host: Option<String>,

        /// Drive API site name
        #[arg(long)]
        site_name: Option<String>,

        /// Drive folder whose year subfolders hold the reports
        #[arg(long)]
        drive_folder: Option<String>,

        /// Bearer token for the drive API
        #[arg(long, env = "DRIVE_TOKEN", hide_env_values = true)]
        drive_token: Option<String>,

        /// Where to write the audit manifest CSV
        #[arg(long, default_value = "files_processed.csv")]
        manifest: PathBuf,
    },
    /// Retrieve the most relevant chunks and synthesize a grounded answer.
    Ask {
        /// Natural-language question
        #[arg(long)]
        query: String,

        /// Number of chunks handed to the model
        #[arg(long, default_value = "3")]
        top_k: usize,

        /// Restrict retrieval to a single source file
        #[arg(long)]
        source: Option<String>,
    },
}

fn parse_policy(raw: &str) -> Result<DegradePolicy, String> {
    match raw {
        "zero-vector" => Ok(DegradePolicy::ZeroVector),
        "skip" => Ok(DegradePolicy::Skip),
        "propagate" => Ok(DegradePolicy::Propagate),
        other => Err(format!("unknown policy: {other}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let store = PostgrestStore::new(
        &cli.store_url,
        &cli.store_table,
        &cli.store_function,
        &cli.store_api_key,
    )
    .map_err(|error| anyhow::anyhow!(error.to_string()))?
    .with_upsert(!cli.append_only);

    let embedder = RestEmbedder::new(
        &cli.embeddings_url,
        &cli.embeddings_model,
        cli.embedding_dimensions,
        cli.embeddings_api_key.clone(),
    );

    match cli.command {
        Command::Ingest {
            folder,
            site_host,
            site_name,
            drive_folder,
            drive_token,
            manifest,
        } => {
            let documents = match (folder, site_host) {
                (Some(folder), _) => FolderSource::new(folder).fetch().await?,
                (None, Some(site_host)) => {
                    let (Some(site_name), Some(drive_folder), Some(token)) =
                        (site_name, drive_folder, drive_token)
                    else {
                        anyhow::bail!(
                            "drive ingestion needs --site-name, --drive-folder, and --drive-token"
                        )
                    };
                    DriveSource::new(site_host, site_name, drive_folder, token)
                        .fetch()
                        .await?
                }
                (None, None) => {
                    anyhow::bail!("pass either --folder or the drive site arguments")
                }
            };

            info!(documents = documents.len(), "fetched source documents");

            let config = PipelineConfig {
                max_tokens: cli.max_tokens,
                id_assignment: if cli.append_only {
                    IdAssignment::AppendAlways
                } else {
                    IdAssignment::DedupBySource
                },
                degrade_policy: cli.on_embed_failure,
                ocr_languages: cli.ocr_languages.clone(),
                ..PipelineConfig::default()
            };

            let engine = match &cli.ocr_endpoint {
                Some(endpoint) => OcrBackend::Remote(RemoteOcr::new(
                    endpoint,
                    cli.ocr_api_key.clone(),
                    config.ocr_languages.clone(),
                )),
                None => OcrBackend::Tesseract(TesseractOcr::new(config.ocr_languages.clone())),
            };

            let tokens = TokenCounter::from_file(&cli.tokenizer)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let pipeline = IngestionPipeline::new(
                Converter::new(engine, PdftoppmRenderer::default()),
                &tokens,
                embedder,
                store,
                config,
            );

            let report = pipeline
                .ingest_all(documents)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            for skipped in &report.skipped {
                warn!(file = %skipped.name, reason = %skipped.reason, "skipped document");
            }

            write_manifest(&manifest, &report.processed)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!(
                "{} file(s) processed, {} skipped, {} row(s) persisted ({} row failure(s)) at {}",
                report.processed.len(),
                report.skipped.len(),
                report.insert.rows_ok,
                report.insert.row_failures.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Ask {
            query,
            top_k,
            source,
        } => {
            let completion =
                OpenAiChatClient::new(&cli.llm_url, cli.llm_api_key.clone(), &cli.llm_model);
            let service = AskService::new(
                Retriever::new(embedder, store),
                Synthesizer::new(completion, PipelineConfig::default().answer),
                top_k,
            );

            let response = match source {
                Some(source) => {
                    let filter = report_rag_core::MetadataFilter {
                        source: Some(source),
                    };
                    service.ask_filtered(&query, &filter).await
                }
                None => service.ask(&query).await,
            };

            if let Some(error) = &response.error {
                println!("error: {error}");
                return Ok(());
            }

            println!("answer: {}", response.answer.unwrap_or_default());
            for hit in response.sources {
                println!(
                    "  [{}#{}] score={:.4}",
                    hit.metadata.source, hit.metadata.chunk_index, hit.similarity
                );
            }
        }
    }

    Ok(())
}
