use crate::error::QueryError;
use crate::models::{MetadataFilter, Record, RetrievalMatch};
use async_trait::async_trait;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Bulk insert. The call either lands the whole batch or fails without
    /// leaving a partial batch behind.
    async fn insert(&self, records: &[Record]) -> Result<(), QueryError>;

    async fn insert_one(&self, record: &Record) -> Result<(), QueryError> {
        self.insert(std::slice::from_ref(record)).await
    }

    /// Nearest-neighbour search. The store owns the distance metric and the
    /// ordering of the returned matches.
    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalMatch>, QueryError>;
}
