use crate::chunk::{chunk_document, TokenCount};
use crate::convert::{Converter, OcrEngine, PageRenderer};
use crate::embed::{embed_batch, EmbeddingOutcome, EmbeddingProvider};
use crate::error::IngestError;
use crate::models::{DegradePolicy, PipelineConfig, RawDocument, Record};
use crate::persist::{persist_records, InsertReport};
use crate::traits::VectorStore;
use chrono::Utc;
use std::path::Path;
use tracing::{info, warn};

#[derive(Default)]
pub struct IngestionReport {
    pub processed: Vec<String>,
    pub skipped: Vec<SkippedDocument>,
    pub insert: InsertReport,
}

pub struct SkippedDocument {
    pub name: String,
    pub reason: String,
}

pub struct IngestionPipeline<'a, E, R, P, S>
where
    E: OcrEngine,
    R: PageRenderer,
    P: EmbeddingProvider,
    S: VectorStore,
{
    converter: Converter<E, R>,
    tokens: &'a dyn TokenCount,
    embedder: P,
    store: S,
    config: PipelineConfig,
}

impl<'a, E, R, P, S> IngestionPipeline<'a, E, R, P, S>
where
    E: OcrEngine,
    R: PageRenderer,
    P: EmbeddingProvider,
    S: VectorStore,
{
    pub fn new(
        converter: Converter<E, R>,
        tokens: &'a dyn TokenCount,
        embedder: P,
        store: S,
        config: PipelineConfig,
    ) -> Self {
        Self {
            converter,
            tokens,
            embedder,
            store,
            config,
        }
    }

    /// Runs every document through convert, chunk, embed, and persist, in
    /// that order. A failing document is skipped and logged; configuration
    /// errors abort the whole run.
    pub async fn ingest_all(&self, documents: Vec<RawDocument>) -> Result<IngestionReport, IngestError> {
        let mut report = IngestionReport::default();

        for document in documents {
            match self.ingest_one(&document).await {
                Ok(insert) => {
                    report.processed.push(document.name.clone());
                    report.insert.merge(insert);
                }
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    warn!(source = %document.name, error = %error, "document skipped");
                    report.skipped.push(SkippedDocument {
                        name: document.name.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    async fn ingest_one(&self, document: &RawDocument) -> Result<InsertReport, IngestError> {
        info!(source = %document.name, checksum = %document.checksum(), "converting");
        let normalized = self.converter.convert(document).await?;

        let chunks = chunk_document(&normalized, self.tokens, self.config.max_tokens)?;
        info!(source = %document.name, chunks = chunks.len(), "chunked");

        let mut records: Vec<Record> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.embed_batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let outcomes = embed_batch(&self.embedder, &texts, self.config.degrade_policy).await?;

            for (chunk, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    EmbeddingOutcome::Embedded(vector) => {
                        records.push(Record::from_chunk(chunk, vector, self.config.id_assignment));
                    }
                    EmbeddingOutcome::Degraded(reason) => match self.config.degrade_policy {
                        DegradePolicy::ZeroVector => {
                            warn!(
                                source = %chunk.source,
                                chunk_index = chunk.index,
                                reason = %reason,
                                "substituting zero vector"
                            );
                            records.push(Record::from_chunk(
                                chunk,
                                vec![0.0; self.embedder.dimensions()],
                                self.config.id_assignment,
                            ));
                        }
                        DegradePolicy::Skip => {
                            warn!(
                                source = %chunk.source,
                                chunk_index = chunk.index,
                                reason = %reason,
                                "dropping chunk"
                            );
                        }
                        DegradePolicy::Propagate => {
                            return Err(IngestError::Embedding(reason));
                        }
                    },
                }
            }
        }

        Ok(persist_records(&self.store, &records, self.config.insert_batch_size).await)
    }
}

/// Audit manifest, one row per processed file. Written once per run and
/// never read back.
pub fn write_manifest(path: &Path, processed: &[String]) -> Result<(), IngestError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["file_name", "date_processed"])?;

    let today = Utc::now().format("%Y-%m-%d").to_string();
    for name in processed {
        writer.write_record([name.as_str(), today.as_str()])?;
    }

    writer.flush()?;
    Ok(())
}
