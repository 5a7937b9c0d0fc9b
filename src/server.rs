//! Inbound task endpoints.
//!
//! The queue pushes tasks over HTTP; the status code is the acknowledgment
//! signal. 2xx means the task is done (including user errors and timeouts —
//! those are recorded results, not delivery failures); 5xx asks the queue to
//! redeliver; 503 reports a backend unavailable at entry.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::handler::{DirectTaskPayload, TaskDisposition, WorkspaceTaskPayload};
use crate::index::IndexTaskPayload;
use crate::query::{QueryReply, QueryTaskPayload};
use crate::registry::Dependencies;

/// Builds the service router.
pub fn router(deps: Arc<Dependencies>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/execute", post(execute_direct))
        .route("/execute_auth", post(execute_workspace))
        .route("/index", post(index_workspace))
        .route("/query", post(query_workspace))
        .with_state(deps)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "Code execution worker is running" }))
}

async fn execute_direct(
    State(deps): State<Arc<Dependencies>>,
    Json(payload): Json<DirectTaskPayload>,
) -> (StatusCode, Json<Value>) {
    respond(&deps.handler.handle_direct(payload).await)
}

async fn execute_workspace(
    State(deps): State<Arc<Dependencies>>,
    Json(payload): Json<WorkspaceTaskPayload>,
) -> (StatusCode, Json<Value>) {
    respond(&deps.handler.handle_workspace(payload).await)
}

async fn index_workspace(
    State(deps): State<Arc<Dependencies>>,
    Json(payload): Json<IndexTaskPayload>,
) -> (StatusCode, Json<Value>) {
    respond(&deps.indexer.handle(payload).await)
}

async fn query_workspace(
    State(deps): State<Arc<Dependencies>>,
    Json(payload): Json<QueryTaskPayload>,
) -> (StatusCode, Json<Value>) {
    let (disposition, reply) = deps.query.handle(payload).await;
    respond_query(&disposition, reply)
}

/// Maps a disposition onto the queue acknowledgment contract.
pub(crate) fn respond(disposition: &TaskDisposition) -> (StatusCode, Json<Value>) {
    match disposition {
        TaskDisposition::Processed { job_id, message } => (
            StatusCode::OK,
            Json(json!({ "job_id": job_id, "message": message })),
        ),
        TaskDisposition::AlreadyTerminal { job_id } => (
            StatusCode::OK,
            Json(json!({
                "job_id": job_id,
                "message": "Job already terminal; task acknowledged.",
            })),
        ),
        TaskDisposition::TerminalWriteFailed { job_id, .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": format!("Critical error saving results for job {job_id}.") })),
        ),
        TaskDisposition::StatusWriteFailed { job_id } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": format!("Failed to set status for job {job_id}.") })),
        ),
        TaskDisposition::StoreUnavailable { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "detail": "Service temporarily unavailable (metadata store)." })),
        ),
    }
}

fn respond_query(
    disposition: &TaskDisposition,
    reply: Option<QueryReply>,
) -> (StatusCode, Json<Value>) {
    let (status, body) = respond(disposition);
    let Some(reply) = reply else {
        return (status, body);
    };
    let mut merged = body.0;
    if let Value::Object(ref mut fields) = merged {
        fields.insert(
            "decision".to_owned(),
            Value::String(reply.decision.as_str().to_owned()),
        );
        fields.insert(
            "snippets".to_owned(),
            serde_json::to_value(&reply.snippets).unwrap_or(Value::Null),
        );
    }
    (status, Json(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::Classification;
    use crate::vector::Snippet;

    #[test]
    fn processed_tasks_ack_with_200() {
        let (status, body) = respond(&TaskDisposition::Processed {
            job_id: "j1".to_owned(),
            message: "Direct execution task processed.".to_owned(),
        });
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.0.get("job_id").and_then(Value::as_str), Some("j1"));
    }

    #[test]
    fn replayed_tasks_ack_with_200() {
        let (status, _) = respond(&TaskDisposition::AlreadyTerminal {
            job_id: "j1".to_owned(),
        });
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn lost_terminal_writes_ask_for_redelivery() {
        let (status, body) = respond(&TaskDisposition::TerminalWriteFailed {
            job_id: "j1".to_owned(),
            classification: Classification::Ok,
        });
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            body.0
                .get("detail")
                .and_then(Value::as_str)
                .is_some_and(|d| d.contains("j1"))
        );
    }

    #[test]
    fn status_write_failures_ask_for_redelivery() {
        let (status, _) = respond(&TaskDisposition::StatusWriteFailed {
            job_id: "j1".to_owned(),
        });
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn unavailable_backends_report_503() {
        let (status, _) = respond(&TaskDisposition::StoreUnavailable {
            job_id: "j1".to_owned(),
        });
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn query_replies_carry_decision_and_snippets() {
        let disposition = TaskDisposition::Processed {
            job_id: "q1".to_owned(),
            message: "Query task processed.".to_owned(),
        };
        let reply = QueryReply {
            decision: crate::retrieval::RetrievalDecision::SearchCodeOnly,
            snippets: vec![Snippet {
                file_path: "auth.py".to_owned(),
                text: "def login(): ...".to_owned(),
            }],
        };
        let (status, body) = respond_query(&disposition, Some(reply));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body.0.get("decision").and_then(Value::as_str),
            Some("search_code_only")
        );
        assert!(
            body.0
                .get("snippets")
                .and_then(Value::as_array)
                .is_some_and(|s| s.len() == 1)
        );
    }
}
