use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RawDocument {
    pub name: String,
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl RawDocument {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes,
            media_type: media_type.into(),
        }
    }

    pub fn pdf(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(name, bytes, "application/pdf")
    }

    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        format!("{:x}", hasher.finalize())
    }
}

/// A rasterized page, alive only for the duration of the per-page OCR fallback.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub number: u32,
    pub png: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedDocument {
    pub source: String,
    pub markdown: String,
    pub pages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub source: String,
    pub index: u32,
    pub text: String,
    pub token_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source: String,
    pub chunk_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub content: String,
    pub metadata: RecordMetadata,
    pub embedding: Vec<f32>,
}

impl Record {
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>, assignment: IdAssignment) -> Self {
        let id = match assignment {
            IdAssignment::AppendAlways => Uuid::new_v4(),
            IdAssignment::DedupBySource => {
                let key = format!("{}\u{0}{}", chunk.source, chunk.index);
                Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
            }
        };

        Self {
            id,
            content: chunk.text.clone(),
            metadata: RecordMetadata {
                source: chunk.source.clone(),
                chunk_index: chunk.index,
            },
            embedding,
        }
    }
}

/// How record ids are assigned. Deterministic ids let the store upsert on
/// conflict, so re-ingesting a source does not duplicate its chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdAssignment {
    #[default]
    DedupBySource,
    AppendAlways,
}

/// What to do with a chunk whose embedding call failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradePolicy {
    /// Substitute a zero vector of the collection dimension and keep going.
    #[default]
    ZeroVector,
    /// Drop the chunk from this run.
    Skip,
    /// Abort the document.
    Propagate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalMatch {
    pub content: String,
    pub metadata: RecordMetadata,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_tokens: usize,
    pub embed_batch_size: usize,
    pub insert_batch_size: usize,
    pub top_k: usize,
    pub id_assignment: IdAssignment,
    pub degrade_policy: DegradePolicy,
    pub ocr_languages: Vec<String>,
    pub answer: AnswerOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            embed_batch_size: 128,
            insert_batch_size: 128,
            top_k: 3,
            id_assignment: IdAssignment::default(),
            degrade_policy: DegradePolicy::default(),
            ocr_languages: vec!["por".to_string(), "eng".to_string()],
            answer: AnswerOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnswerOptions {
    pub language: String,
    pub max_chars: usize,
    pub not_found_sentinel: String,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        Self {
            language: "pt-BR".to_string(),
            max_chars: 255,
            not_found_sentinel: "Não encontrei nos documentos".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_reproducible() {
        let first = RawDocument::pdf("a.pdf", b"abc".to_vec());
        let second = RawDocument::pdf("b.pdf", b"abc".to_vec());
        assert_eq!(first.checksum(), second.checksum());
    }

    #[test]
    fn dedup_ids_are_stable_per_source_and_index() {
        let chunk = Chunk {
            source: "report.pdf".to_string(),
            index: 3,
            text: "total".to_string(),
            token_count: 1,
        };

        let first = Record::from_chunk(&chunk, vec![0.0], IdAssignment::DedupBySource);
        let second = Record::from_chunk(&chunk, vec![1.0], IdAssignment::DedupBySource);
        assert_eq!(first.id, second.id);

        let mut other = chunk.clone();
        other.index = 4;
        let third = Record::from_chunk(&other, vec![0.0], IdAssignment::DedupBySource);
        assert_ne!(first.id, third.id);
    }

    #[test]
    fn append_ids_are_unique_per_call() {
        let chunk = Chunk {
            source: "report.pdf".to_string(),
            index: 0,
            text: "total".to_string(),
            token_count: 1,
        };

        let first = Record::from_chunk(&chunk, vec![0.0], IdAssignment::AppendAlways);
        let second = Record::from_chunk(&chunk, vec![0.0], IdAssignment::AppendAlways);
        assert_ne!(first.id, second.id);
    }
}
