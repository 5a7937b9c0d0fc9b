//! Query handling: plan a retrieval strategy, run code retrieval when the
//! plan calls for it, and record the result through the job state machine.
//!
//! Web search and answer synthesis belong to the agent above this service;
//! the response carries the decision and the ranked snippets so that agent
//! can continue.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument as _, info, info_span, warn};

use crate::handler::TaskDisposition;
use crate::job::store::JobStore;
use crate::job::{FailureType, JobStatus, StatusChange, TerminalOutcome};
use crate::llm::RetrievalPlanner;
use crate::observability::LOG_TARGET;
use crate::retrieval::{RetrievalCore, RetrievalDecision, format_snippets};
use crate::vector::Snippet;

/// Query payload delivered by the queue.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryTaskPayload {
    /// Job this task advances.
    pub job_id: String,
    /// User who asked.
    pub user_id: String,
    /// Workspace to search.
    pub workspace_id: String,
    /// The question.
    pub query: String,
}

/// What the query produced, alongside the queue disposition.
#[derive(Debug, Clone, Serialize)]
pub struct QueryReply {
    /// Strategy the planner chose.
    pub decision: RetrievalDecision,
    /// Ranked snippets; empty when the decision skipped code search.
    pub snippets: Vec<Snippet>,
}

/// Plans and executes one query task.
pub struct QueryService {
    jobs: Arc<dyn JobStore>,
    planner: Arc<dyn RetrievalPlanner>,
    retrieval: RetrievalCore,
}

impl QueryService {
    /// Creates the service over process-wide clients.
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        planner: Arc<dyn RetrievalPlanner>,
        retrieval: RetrievalCore,
    ) -> Self {
        Self {
            jobs,
            planner,
            retrieval,
        }
    }

    /// Handles one query task to a disposition plus (on success) a reply.
    pub async fn handle(&self, payload: QueryTaskPayload) -> (TaskDisposition, Option<QueryReply>) {
        let span = info_span!(
            target: LOG_TARGET,
            "query_task",
            job_id = %payload.job_id,
            workspace_id = %payload.workspace_id,
            user_id = %payload.user_id
        );
        self.handle_inner(payload).instrument(span).await
    }

    async fn handle_inner(&self, payload: QueryTaskPayload) -> (TaskDisposition, Option<QueryReply>) {
        match self.jobs.status(&payload.job_id).await {
            Ok(Some(status)) if status.is_terminal() => {
                return (
                    TaskDisposition::AlreadyTerminal {
                        job_id: payload.job_id,
                    },
                    None,
                );
            }
            Ok(_) => {}
            Err(err) if err.is_unavailable() => {
                return (
                    TaskDisposition::StoreUnavailable {
                        job_id: payload.job_id,
                    },
                    None,
                );
            }
            Err(_) => {
                return (
                    TaskDisposition::StatusWriteFailed {
                        job_id: payload.job_id,
                    },
                    None,
                );
            }
        }
        if let Err(err) = self
            .jobs
            .advance(&payload.job_id, StatusChange::To(JobStatus::Processing))
            .await
        {
            let disposition = if err.is_unavailable() {
                TaskDisposition::StoreUnavailable {
                    job_id: payload.job_id,
                }
            } else {
                TaskDisposition::StatusWriteFailed {
                    job_id: payload.job_id,
                }
            };
            return (disposition, None);
        }

        let (outcome, reply) = self.run_query(&payload).await;
        match self
            .jobs
            .advance(&payload.job_id, StatusChange::Finish(outcome))
            .await
        {
            Ok(()) => (
                TaskDisposition::Processed {
                    job_id: payload.job_id,
                    message: "Query task processed.".to_owned(),
                },
                reply,
            ),
            Err(err) => {
                tracing::error!(
                    target: LOG_TARGET,
                    job_id = %payload.job_id,
                    error = %err,
                    "CRITICAL: failed to save query results"
                );
                (
                    TaskDisposition::TerminalWriteFailed {
                        job_id: payload.job_id,
                        classification: crate::sandbox::Classification::Internal,
                    },
                    None,
                )
            }
        }
    }

    async fn run_query(&self, payload: &QueryTaskPayload) -> (TerminalOutcome, Option<QueryReply>) {
        let decision = match self.planner.plan(&payload.query).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(target: LOG_TARGET, error = %err, "planner failed");
                return (
                    TerminalOutcome::failed(
                        FailureType::WorkerInternalError,
                        String::new(),
                        "Internal worker error: retrieval planning failed.".to_owned(),
                    ),
                    None,
                );
            }
        };
        info!(
            target: LOG_TARGET,
            decision = decision.as_str(),
            "retrieval strategy chosen"
        );

        let snippets = if decision.includes_code_search() {
            match self
                .retrieval
                .retrieve(&payload.query, &payload.workspace_id)
                .await
            {
                Ok(snippets) => snippets,
                Err(err) => {
                    warn!(target: LOG_TARGET, error = %err, "retrieval failed");
                    return (
                        TerminalOutcome::failed(
                            FailureType::WorkerInternalError,
                            String::new(),
                            "Internal worker error: code retrieval failed.".to_owned(),
                        ),
                        None,
                    );
                }
            }
        } else {
            Vec::new()
        };

        let output = format_snippets(&snippets);
        (
            TerminalOutcome::completed(output),
            Some(QueryReply { decision, snippets }),
        )
    }
}

#[cfg(test)]
mod tests;
