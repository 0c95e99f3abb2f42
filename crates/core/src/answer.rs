use crate::error::QueryError;
use crate::models::{AnswerOptions, RetrievalMatch};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, QueryError>;
}

/// Client for an OpenAI-style chat completions endpoint.
pub struct OpenAiChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiChatClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, QueryError> {
        let mut request = self
            .client
            .post(format!("{}/v1/chat/completions", self.endpoint))
            .json(&json!({
                "model": self.model,
                "messages": messages,
            }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(QueryError::BackendResponse {
                backend: "completions".to_string(),
                details: response.status().to_string(),
            });
        }

        let payload: Value = response.json().await?;
        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| QueryError::BackendResponse {
                backend: "completions".to_string(),
                details: "response carried no message content".to_string(),
            })
    }
}

pub fn build_context(matches: &[RetrievalMatch]) -> String {
    matches
        .iter()
        .enumerate()
        .map(|(position, hit)| {
            format!(
                "Documento {} (fonte: {}): {}",
                position + 1,
                hit.metadata.source,
                hit.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_answer_prompt(query: &str, matches: &[RetrievalMatch], options: &AnswerOptions) -> String {
    format!(
        "Responda em {language}, de forma simples, usando no máximo {max_chars} caracteres, \
         **apenas** com base nos documentos abaixo. Se não encontrar, diga: \"{sentinel}\".\n\n\
         Documentos:\n{context}\n\nPergunta: {query}",
        language = options.language,
        max_chars = options.max_chars,
        sentinel = options.not_found_sentinel,
        context = build_context(matches),
        query = query,
    )
}

pub struct Synthesizer<C>
where
    C: CompletionProvider,
{
    completion: C,
    options: AnswerOptions,
}

impl<C> Synthesizer<C>
where
    C: CompletionProvider,
{
    pub fn new(completion: C, options: AnswerOptions) -> Self {
        Self { completion, options }
    }

    /// One completion call over the assembled context. Returns the raw
    /// generated text plus the matches it was grounded on, so callers can
    /// render citations.
    pub async fn answer(
        &self,
        query: &str,
        matches: &[RetrievalMatch],
    ) -> Result<(String, Vec<RetrievalMatch>), QueryError> {
        let messages = [
            ChatMessage::system("Você é um assistente útil e conciso."),
            ChatMessage::user(build_answer_prompt(query, matches, &self.options)),
        ];

        let answer = self.completion.complete(&messages).await?;
        Ok((answer, matches.to_vec()))
    }
}
