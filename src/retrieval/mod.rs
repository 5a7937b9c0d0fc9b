//! Hybrid code retrieval: hypothetical-document expansion, vector plus
//! keyword search, and reranking.
//!
//! The planner above this core decides which retrieval modes a query needs;
//! only code search is hosted here. Keyword search is a best-effort overlay:
//! when the full-text index is unavailable the call degrades to vector-only
//! results with a single warning, never an error.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{Instrument as _, debug, info_span, warn};

use crate::error::RetrievalResult;
use crate::llm::{EmbeddingClient, Reranker, SnippetGenerator};
use crate::observability::LOG_TARGET;
use crate::vector::{Snippet, VectorIndex};

/// Results fetched from each search mode before reranking.
pub const SEARCH_LIMIT: usize = 10;
/// Snippets kept after reranking.
pub const DEFAULT_TOP_K: usize = 10;

/// Retrieval strategy chosen by the planner for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalDecision {
    /// The query needs both project context and general knowledge.
    SearchCodeAndWeb,
    /// The query is strictly about the codebase.
    SearchCodeOnly,
    /// The query is about general concepts; code search is not needed.
    SearchWebOnly,
    /// The query needs no external context.
    NoRetrieval,
}

impl RetrievalDecision {
    /// Stable wire name of the decision.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SearchCodeAndWeb => "search_code_and_web",
            Self::SearchCodeOnly => "search_code_only",
            Self::SearchWebOnly => "search_web_only",
            Self::NoRetrieval => "no_retrieval",
        }
    }

    /// Whether the decision includes searching the codebase.
    #[must_use]
    pub const fn includes_code_search(self) -> bool {
        matches!(self, Self::SearchCodeAndWeb | Self::SearchCodeOnly)
    }
}

/// The retrieval core: one `retrieve(query, workspace_id)` contract.
pub struct RetrievalCore {
    generator: Arc<dyn SnippetGenerator>,
    embeddings: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    reranker: Arc<dyn Reranker>,
    top_k: usize,
}

impl RetrievalCore {
    /// Creates the core over process-wide clients with the default `top_k`.
    #[must_use]
    pub fn new(
        generator: Arc<dyn SnippetGenerator>,
        embeddings: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        reranker: Arc<dyn Reranker>,
    ) -> Self {
        Self {
            generator,
            embeddings,
            index,
            reranker,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Retrieves the ranked snippets for a query within one workspace.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::RetrievalError`] when hypothetical-snippet
    /// generation, query embedding, vector search, or reranking fails.
    /// Keyword-search failures degrade to vector-only results instead.
    pub async fn retrieve(
        &self,
        query: &str,
        workspace_id: &str,
    ) -> RetrievalResult<Vec<Snippet>> {
        let span = info_span!(target: LOG_TARGET, "retrieve", workspace_id);
        self.retrieve_inner(query, workspace_id).instrument(span).await
    }

    async fn retrieve_inner(
        &self,
        query: &str,
        workspace_id: &str,
    ) -> RetrievalResult<Vec<Snippet>> {
        let hypothetical = self.generator.hypothetical_snippet(query).await?;
        let probe = self.embeddings.embed_query(&hypothetical).await?;
        let vector_hits = self
            .index
            .vector_search(workspace_id, &probe, SEARCH_LIMIT)
            .await
            .map_err(|err| crate::error::RetrievalError::from(color_eyre::Report::new(err)))?;

        let keyword_hits = match self
            .index
            .keyword_search(workspace_id, query, SEARCH_LIMIT)
            .await
        {
            Ok(hits) => hits,
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    workspace_id,
                    error = %err,
                    "keyword search skipped; returning vector results only"
                );
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        let candidates: Vec<Snippet> = vector_hits
            .into_iter()
            .chain(keyword_hits)
            .filter(|snippet| seen.insert(snippet.text.clone()))
            .collect();
        debug!(
            target: LOG_TARGET,
            workspace_id,
            candidates = candidates.len(),
            "hybrid search produced unique snippets"
        );
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        self.reranker.rerank(query, &candidates, self.top_k).await
    }
}

/// Formats ranked snippets the way the job output records them.
#[must_use]
pub fn format_snippets(snippets: &[Snippet]) -> String {
    if snippets.is_empty() {
        return "No relevant code snippets found in the codebase for your query.".to_owned();
    }
    let mut rendered = String::new();
    for (position, snippet) in snippets.iter().enumerate() {
        if position > 0 {
            rendered.push_str("\n\n---\n\n");
        }
        let _ = write!(
            rendered,
            "Snippet {} from '{}':\n```\n{}\n```",
            position + 1,
            snippet.file_path,
            snippet.text
        );
    }
    rendered
}

#[cfg(test)]
mod tests;
