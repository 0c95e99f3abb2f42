use crate::answer::{CompletionProvider, Synthesizer};
use crate::embed::EmbeddingProvider;
use crate::error::QueryError;
use crate::models::{MetadataFilter, RetrievalMatch};
use crate::retrieve::Retriever;
use crate::traits::VectorStore;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<RetrievalMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct AskService<E, S, C>
where
    E: EmbeddingProvider,
    S: VectorStore,
    C: CompletionProvider,
{
    retriever: Retriever<E, S>,
    synthesizer: Synthesizer<C>,
    top_k: usize,
}

impl<E, S, C> AskService<E, S, C>
where
    E: EmbeddingProvider,
    S: VectorStore,
    C: CompletionProvider,
{
    pub fn new(retriever: Retriever<E, S>, synthesizer: Synthesizer<C>, top_k: usize) -> Self {
        Self {
            retriever,
            synthesizer,
            top_k,
        }
    }

    /// Every failure folds into the response payload; callers always get a
    /// structured answer back.
    pub async fn ask(&self, query: &str) -> AskResponse {
        match self.ask_inner(query, None).await {
            Ok((answer, sources)) => AskResponse {
                answer: Some(answer),
                sources,
                error: None,
            },
            Err(error) => {
                warn!(error = %error, "ask failed");
                AskResponse {
                    answer: None,
                    sources: Vec::new(),
                    error: Some(error.to_string()),
                }
            }
        }
    }

    pub async fn ask_filtered(&self, query: &str, filter: &MetadataFilter) -> AskResponse {
        match self.ask_inner(query, Some(filter)).await {
            Ok((answer, sources)) => AskResponse {
                answer: Some(answer),
                sources,
                error: None,
            },
            Err(error) => {
                warn!(error = %error, "ask failed");
                AskResponse {
                    answer: None,
                    sources: Vec::new(),
                    error: Some(error.to_string()),
                }
            }
        }
    }

    async fn ask_inner(
        &self,
        query: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<(String, Vec<RetrievalMatch>), QueryError> {
        let matches = self.retriever.retrieve(query, self.top_k, filter).await?;
        self.synthesizer.answer(query, &matches).await
    }
}
