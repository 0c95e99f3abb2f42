use crate::embed::EmbeddingProvider;
use crate::error::QueryError;
use crate::models::{MetadataFilter, RetrievalMatch};
use crate::traits::VectorStore;

pub struct Retriever<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    embedder: E,
    store: S,
}

impl<E, S> Retriever<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    pub fn new(embedder: E, store: S) -> Self {
        Self { embedder, store }
    }

    /// Embeds the query and returns the store's matches in store order, at
    /// most `k` of them. An empty result is not an error.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalMatch>, QueryError> {
        if query.trim().is_empty() {
            return Err(QueryError::Request("query is empty".to_string()));
        }
        if k == 0 {
            return Err(QueryError::Request("match count must be at least 1".to_string()));
        }

        let query_vector = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|error| QueryError::Request(format!("query embedding failed: {error}")))?;

        let mut matches = self.store.search(&query_vector, k, filter).await?;
        matches.truncate(k);
        Ok(matches)
    }
}
