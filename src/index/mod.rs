//! Workspace indexing for retrieval.
//!
//! Each manifest file is downloaded, decoded, chunked by kind, embedded in
//! one batch, and written to the vector index after the rows for its
//! `(workspace_id, file_path)` pair are deleted, so re-indexing a file can
//! never leave stale chunks behind. The full-text index is (re)ensured once
//! at the end; a failure there degrades keyword search but never fails the
//! job.

pub mod chunk;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument as _, info, info_span, warn};

use crate::handler::TaskDisposition;
use crate::job::store::JobStore;
use crate::job::{FailureType, JobStatus, StatusChange, TerminalOutcome};
use crate::llm::EmbeddingClient;
use crate::observability::LOG_TARGET;
use crate::storage::ObjectStore;
use crate::vector::{IndexRecord, VectorIndex};
use crate::workspace::ManifestEntry;

/// File extensions treated as indexable code.
const CODE_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".ts", ".jsx", ".tsx", ".go", ".java", ".cpp", ".c", ".rs", ".rb", ".php",
];

/// Indexing payload delivered by the queue.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexTaskPayload {
    /// Job this task advances.
    pub job_id: String,
    /// Workspace whose files are being indexed.
    pub workspace_id: String,
    /// Files to (re)index.
    pub files: Vec<ManifestEntry>,
}

/// Result summary recorded as the job output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    /// Files whose chunks were written to the index.
    pub indexed: usize,
    /// Files skipped (non-code extension, undecodable, or empty).
    pub skipped: usize,
    /// Per-file failures that did not abort the run.
    pub errors: Vec<String>,
}

/// Indexes workspace files and reports through the job state machine.
pub struct IndexingWorker {
    jobs: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    index: Arc<dyn VectorIndex>,
    embeddings: Arc<dyn EmbeddingClient>,
    bucket: String,
}

impl IndexingWorker {
    /// Creates a worker over process-wide clients; `bucket` holds the
    /// workspace objects.
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        index: Arc<dyn VectorIndex>,
        embeddings: Arc<dyn EmbeddingClient>,
        bucket: String,
    ) -> Self {
        Self {
            jobs,
            objects,
            index,
            embeddings,
            bucket,
        }
    }

    /// Handles one indexing task to a disposition, recording
    /// `processing → completed|failed` around the run.
    pub async fn handle(&self, payload: IndexTaskPayload) -> TaskDisposition {
        let span = info_span!(
            target: LOG_TARGET,
            "index_task",
            job_id = %payload.job_id,
            workspace_id = %payload.workspace_id
        );
        self.handle_inner(payload).instrument(span).await
    }

    async fn handle_inner(&self, payload: IndexTaskPayload) -> TaskDisposition {
        match self.jobs.status(&payload.job_id).await {
            Ok(Some(status)) if status.is_terminal() => {
                return TaskDisposition::AlreadyTerminal {
                    job_id: payload.job_id,
                };
            }
            Ok(_) => {}
            Err(err) if err.is_unavailable() => {
                return TaskDisposition::StoreUnavailable {
                    job_id: payload.job_id,
                };
            }
            Err(_) => {
                return TaskDisposition::StatusWriteFailed {
                    job_id: payload.job_id,
                };
            }
        }
        if let Err(err) = self
            .jobs
            .advance(&payload.job_id, StatusChange::To(JobStatus::Processing))
            .await
        {
            return if err.is_unavailable() {
                TaskDisposition::StoreUnavailable {
                    job_id: payload.job_id,
                }
            } else {
                TaskDisposition::StatusWriteFailed {
                    job_id: payload.job_id,
                }
            };
        }

        let summary = self
            .index_workspace(&payload.workspace_id, &payload.files)
            .await;
        let outcome = summary_outcome(&summary);
        match self.jobs.advance(&payload.job_id, StatusChange::Finish(outcome)).await {
            Ok(()) => {
                info!(
                    target: LOG_TARGET,
                    job_id = %payload.job_id,
                    indexed = summary.indexed,
                    skipped = summary.skipped,
                    errors = summary.errors.len(),
                    "indexing task processed"
                );
                TaskDisposition::Processed {
                    job_id: payload.job_id,
                    message: format!(
                        "Indexed {} file(s) for workspace {}.",
                        summary.indexed, payload.workspace_id
                    ),
                }
            }
            Err(err) => {
                tracing::error!(
                    target: LOG_TARGET,
                    job_id = %payload.job_id,
                    error = %err,
                    "CRITICAL: failed to save indexing results"
                );
                TaskDisposition::TerminalWriteFailed {
                    job_id: payload.job_id,
                    classification: crate::sandbox::Classification::Internal,
                }
            }
        }
    }

    /// Indexes every file, tolerating per-file failures.
    pub async fn index_workspace(
        &self,
        workspace_id: &str,
        files: &[ManifestEntry],
    ) -> IndexSummary {
        let mut summary = IndexSummary::default();
        for entry in files {
            self.index_file(workspace_id, entry, &mut summary).await;
        }
        // Keyword search degrades gracefully; vector search stays available.
        if let Err(err) = self.index.ensure_fts_index().await {
            warn!(
                target: LOG_TARGET,
                workspace_id,
                error = %err,
                "failed to ensure the full-text index"
            );
        }
        summary
    }

    async fn index_file(
        &self,
        workspace_id: &str,
        entry: &ManifestEntry,
        summary: &mut IndexSummary,
    ) {
        let file_path = entry.file_path.as_str();
        if !is_code_file(file_path) {
            info!(target: LOG_TARGET, file_path, "skipping non-code file");
            summary.skipped += 1;
            return;
        }
        let bytes = match self.objects.get(&self.bucket, &entry.r2_object_key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(target: LOG_TARGET, file_path, error = %err, "could not download file");
                summary
                    .errors
                    .push(format!("{file_path}: download failed"));
                return;
            }
        };
        let Ok(content) = String::from_utf8(bytes) else {
            warn!(target: LOG_TARGET, file_path, "skipping file that is not valid UTF-8");
            summary.skipped += 1;
            return;
        };
        if content.trim().is_empty() {
            summary.skipped += 1;
            return;
        }

        let chunks = chunk::chunk_source(file_path, &content);
        if chunks.is_empty() {
            summary.skipped += 1;
            return;
        }

        // Per-file freshness: old rows go before the new ones land.
        if let Err(err) = self.index.delete_file(workspace_id, file_path).await {
            warn!(target: LOG_TARGET, file_path, error = %err, "failed to delete stale rows");
            summary
                .errors
                .push(format!("{file_path}: stale row deletion failed"));
            return;
        }

        let vectors = match self.embeddings.embed_batch(&chunks).await {
            Ok(vectors) => vectors,
            Err(err) => {
                warn!(target: LOG_TARGET, file_path, error = %err, "embedding failed");
                summary.errors.push(format!("{file_path}: embedding failed"));
                return;
            }
        };
        let expected = self.embeddings.dimension();
        if vectors.len() != chunks.len()
            || vectors.iter().any(|vector| vector.len() != expected)
        {
            warn!(target: LOG_TARGET, file_path, "embedding dimension mismatch");
            summary
                .errors
                .push(format!("{file_path}: embedding dimension mismatch"));
            return;
        }

        let records: Vec<IndexRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(text, vector)| IndexRecord {
                workspace_id: workspace_id.to_owned(),
                file_path: file_path.to_owned(),
                text,
                vector,
            })
            .collect();
        match self.index.insert(records).await {
            Ok(()) => {
                info!(target: LOG_TARGET, file_path, "file indexed");
                summary.indexed += 1;
            }
            Err(err) => {
                warn!(target: LOG_TARGET, file_path, error = %err, "insert failed");
                summary.errors.push(format!("{file_path}: insert failed"));
            }
        }
    }
}

/// Maps a summary onto the job's terminal fields: a run that indexed
/// nothing and collected errors fails, anything else completes with the
/// serialised summary as output.
#[must_use]
pub fn summary_outcome(summary: &IndexSummary) -> TerminalOutcome {
    let output = serde_json::to_string(summary).unwrap_or_default();
    if summary.indexed == 0 && !summary.errors.is_empty() {
        TerminalOutcome::failed(
            FailureType::WorkerInternalError,
            output,
            summary.errors.join("; "),
        )
    } else {
        TerminalOutcome::completed(output)
    }
}

fn is_code_file(file_path: &str) -> bool {
    CODE_EXTENSIONS
        .iter()
        .any(|extension| file_path.ends_with(extension))
}
