use crate::error::IngestError;
use crate::models::DegradePolicy;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a batch of passage texts. Output has the same length and order
    /// as the input; callers are responsible for batch sizing.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        let texts = [text.to_string()];
        let mut vectors = self.embed(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| IngestError::Embedding("service returned no vector for query".to_string()))
    }

    fn dimensions(&self) -> usize;
}

/// Per-text embedding outcome. A degraded entry records why the model call
/// failed; the caller decides whether to substitute, drop, or abort.
#[derive(Debug, Clone)]
pub enum EmbeddingOutcome {
    Embedded(Vec<f32>),
    Degraded(String),
}

pub async fn embed_batch(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    policy: DegradePolicy,
) -> Result<Vec<EmbeddingOutcome>, IngestError> {
    match provider.embed(texts).await {
        Ok(vectors) => Ok(vectors.into_iter().map(EmbeddingOutcome::Embedded).collect()),
        // A dimension mismatch is a broken configuration, never a degrade.
        Err(error @ IngestError::Config(_)) => Err(error),
        Err(error) => match policy {
            DegradePolicy::Propagate => Err(error),
            DegradePolicy::ZeroVector | DegradePolicy::Skip => {
                warn!(rows = texts.len(), error = %error, "embedding batch degraded");
                let reason = error.to_string();
                Ok(texts
                    .iter()
                    .map(|_| EmbeddingOutcome::Degraded(reason.clone()))
                    .collect())
            }
        },
    }
}

/// Client for an OpenAI-style embeddings endpoint.
pub struct RestEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
}

impl RestEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            dimensions,
            api_key,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for RestEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .client
            .post(format!("{}/v1/embeddings", self.endpoint))
            .json(&json!({
                "model": self.model,
                "input": texts,
            }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(IngestError::Embedding(format!(
                "embedding request returned {}",
                response.status()
            )));
        }

        let payload: Value = response.json().await?;
        let rows = payload
            .pointer("/data")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| IngestError::Embedding("response missing data array".to_string()))?;

        let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(rows.len());
        for (position, row) in rows.iter().enumerate() {
            let index = row
                .pointer("/index")
                .and_then(Value::as_u64)
                .map(|index| index as usize)
                .unwrap_or(position);
            let vector = row
                .pointer("/embedding")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_f64)
                        .map(|value| value as f32)
                        .collect::<Vec<f32>>()
                })
                .ok_or_else(|| IngestError::Embedding("row missing embedding".to_string()))?;

            if vector.len() != self.dimensions {
                return Err(IngestError::Config(format!(
                    "embedding dimension {} does not match configured {}",
                    vector.len(),
                    self.dimensions
                )));
            }

            indexed.push((index, vector));
        }

        if indexed.len() != texts.len() {
            return Err(IngestError::Embedding(format!(
                "embedding count {} does not match input count {}",
                indexed.len(),
                texts.len()
            )));
        }

        indexed.sort_by_key(|(index, _)| *index);
        Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProvider {
        fail: bool,
        dimensions: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
            if self.fail {
                return Err(IngestError::Embedding("model unavailable".to_string()));
            }
            Ok(texts
                .iter()
                .map(|text| {
                    let mut vector = vec![0.0f32; self.dimensions];
                    vector[0] = text.len() as f32;
                    vector
                })
                .collect())
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }
    }

    struct MisconfiguredProvider;

    #[async_trait]
    impl EmbeddingProvider for MisconfiguredProvider {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
            Err(IngestError::Config("dimension mismatch".to_string()))
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    #[tokio::test]
    async fn output_matches_input_length_and_dimension() {
        let provider = FakeProvider {
            fail: false,
            dimensions: 8,
        };
        let texts = vec!["a".to_string(), "bb".to_string(), "ccc".to_string()];

        let vectors = provider.embed(&texts).await.unwrap();

        assert_eq!(vectors.len(), texts.len());
        for vector in &vectors {
            assert_eq!(vector.len(), 8);
        }
    }

    #[tokio::test]
    async fn failures_degrade_under_the_default_policy() {
        let provider = FakeProvider {
            fail: true,
            dimensions: 8,
        };
        let texts = vec!["a".to_string(), "b".to_string()];

        let outcomes = embed_batch(&provider, &texts, DegradePolicy::ZeroVector)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        for outcome in outcomes {
            assert!(matches!(outcome, EmbeddingOutcome::Degraded(_)));
        }
    }

    #[tokio::test]
    async fn propagate_policy_surfaces_the_error() {
        let provider = FakeProvider {
            fail: true,
            dimensions: 8,
        };
        let texts = vec!["a".to_string()];

        let error = embed_batch(&provider, &texts, DegradePolicy::Propagate)
            .await
            .unwrap_err();
        assert!(matches!(error, IngestError::Embedding(_)));
    }

    #[tokio::test]
    async fn config_errors_never_degrade() {
        let texts = vec!["a".to_string()];

        let error = embed_batch(&MisconfiguredProvider, &texts, DegradePolicy::ZeroVector)
            .await
            .unwrap_err();
        assert!(matches!(error, IngestError::Config(_)));
    }

    #[tokio::test]
    async fn embed_query_returns_a_single_vector() {
        let provider = FakeProvider {
            fail: false,
            dimensions: 4,
        };

        let vector = provider.embed_query("how many units").await.unwrap();
        assert_eq!(vector.len(), 4);
    }
}
