//! Generation, embedding, and reranking clients.
//!
//! Each capability sits behind a trait so the retrieval core and the
//! indexing worker can be exercised with scripted doubles. The production
//! implementations are plain HTTPS clients: Gemini for generation and
//! embeddings, Cohere for reranking. All are process-wide, concurrency-safe,
//! and built once at startup.

pub mod prompts;

use async_trait::async_trait;
use color_eyre::eyre::{Report, eyre};
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RetrievalError, RetrievalResult};
use crate::observability::LOG_TARGET;
use crate::retrieval::RetrievalDecision;
use crate::vector::Snippet;

/// Produces embeddings with a fixed dimension.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embeds a batch of documents in one call, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>>;

    /// Embeds a single query string.
    async fn embed_query(&self, text: &str) -> RetrievalResult<Vec<f32>>;

    /// Dimension every returned vector must have.
    fn dimension(&self) -> usize;
}

/// Generates the hypothetical snippet used for semantic recall.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnippetGenerator: Send + Sync {
    /// Produces a deterministic (temperature 0) hypothetical code snippet
    /// for the query.
    async fn hypothetical_snippet(&self, query: &str) -> RetrievalResult<String>;
}

/// Chooses a retrieval strategy for a query.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RetrievalPlanner: Send + Sync {
    /// Decides which retrieval modes the query needs.
    async fn plan(&self, query: &str) -> RetrievalResult<RetrievalDecision>;
}

/// Reorders candidate snippets by relevance to the query.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Returns the `top_n` most relevant snippets, most relevant first.
    async fn rerank(
        &self,
        query: &str,
        candidates: &[Snippet],
        top_n: usize,
    ) -> RetrievalResult<Vec<Snippet>>;
}

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const COHERE_RERANK_URL: &str = "https://api.cohere.com/v2/rerank";
/// Rerank model used by the production [`Reranker`].
pub const RERANK_MODEL: &str = "rerank-english-v3.0";

/// Strips an optional `models/` prefix so configured names may use either
/// form.
fn model_path(model: &str) -> String {
    let bare = model.strip_prefix("models/").unwrap_or(model);
    format!("models/{bare}")
}

// --- Gemini embeddings -----------------------------------------------------

#[derive(Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct EmbedContent<'a> {
    parts: Vec<EmbedPart<'a>>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    content: EmbedContent<'a>,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

/// Gemini-backed [`EmbeddingClient`].
pub struct GeminiEmbeddings {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
    dimension: usize,
}

impl GeminiEmbeddings {
    /// Creates a client for the given model and dimension.
    #[must_use]
    pub fn new(http: reqwest::Client, api_key: SecretString, model: &str, dimension: usize) -> Self {
        Self {
            http,
            api_key,
            model: model_path(model),
            dimension,
        }
    }

    async fn post<B: Serialize + Sync, R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> RetrievalResult<R> {
        let url = format!(
            "{GEMINI_BASE_URL}/{}:{method}?key={}",
            self.model,
            self.api_key.expose_secret()
        );
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|err| RetrievalError::from(Report::new(err)))?
            .error_for_status()
            .map_err(|err| RetrievalError::from(Report::new(err)))?;
        response
            .json()
            .await
            .map_err(|err| RetrievalError::from(Report::new(err)))
    }
}

#[async_trait]
impl EmbeddingClient for GeminiEmbeddings {
    async fn embed_batch(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedRequest {
                    model: &self.model,
                    content: EmbedContent {
                        parts: vec![EmbedPart { text }],
                    },
                })
                .collect(),
        };
        let response: BatchEmbedResponse = self.post("batchEmbedContents", &request).await?;
        if response.embeddings.len() != texts.len() {
            return Err(RetrievalError::from(eyre!(
                "embedding batch returned {} vectors for {} inputs",
                response.embeddings.len(),
                texts.len()
            )));
        }
        Ok(response
            .embeddings
            .into_iter()
            .map(|embedding| embedding.values)
            .collect())
    }

    async fn embed_query(&self, text: &str) -> RetrievalResult<Vec<f32>> {
        let request = EmbedRequest {
            model: &self.model,
            content: EmbedContent {
                parts: vec![EmbedPart { text }],
            },
        };
        let response: EmbedResponse = self.post("embedContent", &request).await?;
        Ok(response.embedding.values)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// --- Gemini generation -----------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: GenerateContent<'a>,
    contents: Vec<GenerateContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerateContent<'a> {
    parts: Vec<EmbedPart<'a>>,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Gemini-backed generation used for HyDE snippets and planning.
pub struct GeminiGenerator {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl GeminiGenerator {
    /// Creates a client for the given generation model.
    #[must_use]
    pub fn new(http: reqwest::Client, api_key: SecretString, model: &str) -> Self {
        Self {
            http,
            api_key,
            model: model_path(model),
        }
    }

    /// One deterministic generation call with a system instruction.
    async fn generate(&self, system: &str, user: &str) -> RetrievalResult<String> {
        let request = GenerateRequest {
            system_instruction: GenerateContent {
                parts: vec![EmbedPart { text: system }],
            },
            contents: vec![GenerateContent {
                parts: vec![EmbedPart { text: user }],
            }],
            generation_config: GenerationConfig { temperature: 0.0 },
        };
        let url = format!(
            "{GEMINI_BASE_URL}/{}:generateContent?key={}",
            self.model,
            self.api_key.expose_secret()
        );
        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|err| RetrievalError::from(Report::new(err)))?
            .error_for_status()
            .map_err(|err| RetrievalError::from(Report::new(err)))?;
        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|err| RetrievalError::from(Report::new(err)))?;
        let text = payload
            .candidates
            .into_iter()
            .next()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();
        if text.is_empty() {
            return Err(RetrievalError::from(eyre!("generation returned no text")));
        }
        Ok(text)
    }
}

#[async_trait]
impl SnippetGenerator for GeminiGenerator {
    async fn hypothetical_snippet(&self, query: &str) -> RetrievalResult<String> {
        self.generate(prompts::HYDE_PROMPT, &format!("User Query: {query}"))
            .await
    }
}

#[async_trait]
impl RetrievalPlanner for GeminiGenerator {
    async fn plan(&self, query: &str) -> RetrievalResult<RetrievalDecision> {
        let raw = self
            .generate(prompts::PLANNER_PROMPT, &format!("User Query: {query}"))
            .await?;
        let decision = parse_decision(&raw);
        debug!(target: LOG_TARGET, decision = decision.as_str(), "retrieval strategy chosen");
        Ok(decision)
    }
}

/// Maps a planner response onto a decision. Falls back to code-only search
/// when the response matches none of the option names, since code search is
/// the only capability hosted here.
#[must_use]
pub fn parse_decision(raw: &str) -> RetrievalDecision {
    let normalized = raw.trim().to_ascii_lowercase();
    for decision in [
        RetrievalDecision::SearchCodeAndWeb,
        RetrievalDecision::SearchCodeOnly,
        RetrievalDecision::SearchWebOnly,
        RetrievalDecision::NoRetrieval,
    ] {
        if normalized.contains(decision.as_str()) {
            return decision;
        }
    }
    RetrievalDecision::SearchCodeOnly
}

// --- Cohere rerank ---------------------------------------------------------

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<&'a str>,
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    #[serde(default)]
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
}

/// Cohere-backed [`Reranker`].
pub struct CohereReranker {
    http: reqwest::Client,
    api_key: SecretString,
}

impl CohereReranker {
    /// Creates a rerank client.
    #[must_use]
    pub const fn new(http: reqwest::Client, api_key: SecretString) -> Self {
        Self { http, api_key }
    }
}

#[async_trait]
impl Reranker for CohereReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[Snippet],
        top_n: usize,
    ) -> RetrievalResult<Vec<Snippet>> {
        let request = RerankRequest {
            model: RERANK_MODEL,
            query,
            documents: candidates.iter().map(|s| s.text.as_str()).collect(),
            top_n,
        };
        let response = self
            .http
            .post(COHERE_RERANK_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|err| RetrievalError::from(Report::new(err)))?
            .error_for_status()
            .map_err(|err| RetrievalError::from(Report::new(err)))?;
        let payload: RerankResponse = response
            .json()
            .await
            .map_err(|err| RetrievalError::from(Report::new(err)))?;
        Ok(payload
            .results
            .into_iter()
            .filter_map(|result| candidates.get(result.index).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_accept_both_forms() {
        assert_eq!(model_path("text-embedding-004"), "models/text-embedding-004");
        assert_eq!(model_path("models/text-embedding-004"), "models/text-embedding-004");
    }

    #[test]
    fn planner_responses_map_onto_decisions() {
        assert_eq!(parse_decision("search_code_and_web"), RetrievalDecision::SearchCodeAndWeb);
        assert_eq!(parse_decision(" 'search_code_only' "), RetrievalDecision::SearchCodeOnly);
        assert_eq!(parse_decision("SEARCH_WEB_ONLY"), RetrievalDecision::SearchWebOnly);
        assert_eq!(parse_decision("no_retrieval"), RetrievalDecision::NoRetrieval);
        assert_eq!(parse_decision("gibberish"), RetrievalDecision::SearchCodeOnly);
    }
}
