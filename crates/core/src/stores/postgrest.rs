use crate::error::QueryError;
use crate::models::{MetadataFilter, Record, RecordMetadata, RetrievalMatch};
use crate::traits::VectorStore;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

/// PostgREST-backed vector store. Bulk inserts go to the table endpoint;
/// similarity search is one RPC function taking the query embedding, a
/// result cap, and an optional metadata filter.
pub struct PostgrestStore {
    client: Client,
    endpoint: Url,
    table: String,
    search_function: String,
    api_key: String,
    upsert: bool,
}

impl PostgrestStore {
    pub fn new(
        endpoint: &str,
        table: impl Into<String>,
        search_function: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, QueryError> {
        Ok(Self {
            client: Client::new(),
            endpoint: Url::parse(endpoint)?,
            table: table.into(),
            search_function: search_function.into(),
            api_key: api_key.into(),
            upsert: true,
        })
    }

    /// Append-only stores must not send the merge-duplicates preference.
    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}rest/v1/{}", self.endpoint, path)
    }
}

#[async_trait]
impl VectorStore for PostgrestStore {
    async fn insert(&self, records: &[Record]) -> Result<(), QueryError> {
        if records.is_empty() {
            return Ok(());
        }

        let prefer = if self.upsert {
            "resolution=merge-duplicates,return=minimal"
        } else {
            "return=minimal"
        };

        let response = self
            .client
            .post(self.rest_url(&self.table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", prefer)
            .json(records)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(QueryError::BackendResponse {
                backend: "postgrest".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalMatch>, QueryError> {
        let mut body = json!({
            "query_embedding": query_embedding,
            "match_count": k,
        });
        if let Some(filter) = filter {
            if let Some(source) = &filter.source {
                body["filter"] = json!({ "source": source });
            }
        }

        let response = self
            .client
            .post(self.rest_url(&format!("rpc/{}", self.search_function)))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(QueryError::BackendResponse {
                backend: "postgrest".to_string(),
                details: response.status().to_string(),
            });
        }

        let rows: Value = response.json().await?;
        let rows = rows.as_array().cloned().unwrap_or_default();

        let mut matches = Vec::with_capacity(rows.len());
        for row in rows {
            let content = row
                .pointer("/content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let source = row
                .pointer("/metadata/source")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let chunk_index = row
                .pointer("/metadata/chunk_index")
                .and_then(Value::as_u64)
                .unwrap_or_default() as u32;
            let similarity = row
                .pointer("/similarity")
                .and_then(Value::as_f64)
                .unwrap_or_default() as f32;

            matches.push(RetrievalMatch {
                content,
                metadata: RecordMetadata {
                    source,
                    chunk_index,
                },
                similarity,
            });
        }

        Ok(matches)
    }
}
