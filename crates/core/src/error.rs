use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document conversion failed: {0}")]
    Conversion(String),

    #[error("ocr failed: {0}")]
    Ocr(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("document source error: {0}")]
    Source(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("manifest write failed: {0}")]
    Manifest(#[from] csv::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl IngestError {
    /// Configuration errors abort the whole run; everything else is scoped
    /// to the document that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Config(_))
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Request(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
