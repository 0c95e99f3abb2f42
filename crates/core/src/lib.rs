pub mod answer;
pub mod ask;
pub mod chunk;
pub mod convert;
pub mod embed;
pub mod error;
pub mod ingest;
pub mod models;
pub mod persist;
pub mod retrieve;
pub mod source;
pub mod stores;
pub mod traits;

pub use answer::{
    build_answer_prompt, build_context, ChatMessage, CompletionProvider, OpenAiChatClient,
    Synthesizer,
};
pub use ask::{AskResponse, AskService};
pub use chunk::{chunk_document, TokenCount, TokenCounter};
pub use convert::{
    looks_like_only_images, Converter, OcrBackend, OcrEngine, PageRenderer, PdftoppmRenderer,
    RemoteOcr, TesseractOcr,
};
pub use embed::{embed_batch, EmbeddingOutcome, EmbeddingProvider, RestEmbedder};
pub use error::{IngestError, QueryError};
pub use ingest::{write_manifest, IngestionPipeline, IngestionReport, SkippedDocument};
pub use models::{
    AnswerOptions, Chunk, DegradePolicy, IdAssignment, MetadataFilter, NormalizedDocument,
    PageImage, PipelineConfig, RawDocument, Record, RecordMetadata, RetrievalMatch,
};
pub use persist::{persist_records, InsertReport, RowFailure};
pub use retrieve::Retriever;
pub use source::{discover_pdf_files, DocumentSource, DriveSource, FolderSource};
pub use stores::PostgrestStore;
pub use traits::VectorStore;
