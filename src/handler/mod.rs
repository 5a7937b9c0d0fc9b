//! Per-task coordination for the execution pipelines.
//!
//! The handler owns the order of operations for one task: read the current
//! status (a replayed terminal job is acknowledged without re-running),
//! advance the state machine, materialise the workspace when needed, run the
//! sandbox, and commit the terminal result. The outcome is a
//! [`TaskDisposition`] from which the server layer derives the queue
//! acknowledgment: 2xx means do not redeliver, 5xx means redeliver.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument as _, error, info, info_span, warn};

use crate::error::StoreError;
use crate::job::{FailureType, JobStatus, StatusChange, TerminalOutcome};
use crate::job::store::JobStore;
use crate::observability::LOG_TARGET;
use crate::sandbox::{
    Classification, CodeRunner, ExecRequest, ExecSource, ExecutionOutcome, ResourceLimits,
};
use crate::storage::ObjectStore;
use crate::workspace::{ManifestEntry, MaterializeError, Materializer};

/// Direct-execution payload delivered by the queue.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectTaskPayload {
    /// Job this task advances.
    pub job_id: String,
    /// Inline program source.
    pub code: String,
    /// Declared language; anything but `python` is logged and run as Python.
    pub language: String,
    /// Single string piped to the program's standard input.
    #[serde(default)]
    pub input: Option<String>,
}

/// Workspace-execution payload delivered by the queue.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceTaskPayload {
    /// Job this task advances.
    pub job_id: String,
    /// Workspace the files belong to.
    pub workspace_id: String,
    /// Path of the file the interpreter is invoked on.
    pub entrypoint_file: String,
    /// Declared language; anything but `python` is logged and run as Python.
    pub language: String,
    /// Single string piped to the program's standard input.
    #[serde(default)]
    pub input: Option<String>,
    /// Bucket holding the manifest objects.
    pub r2_bucket_name: String,
    /// Ordered manifest of files to materialise.
    pub files: Vec<ManifestEntry>,
}

/// How a task ended, from the queue's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskDisposition {
    /// A terminal classification was committed; acknowledge with 200.
    Processed {
        /// Job the task advanced.
        job_id: String,
        /// Human-readable completion message for the response body.
        message: String,
    },
    /// The job was already terminal; acknowledge with 200 without re-running.
    AlreadyTerminal {
        /// Job the task would have advanced.
        job_id: String,
    },
    /// Execution finished but the terminal write was lost; respond 500 so
    /// the queue redelivers (the replay short-circuits once the store
    /// recovers).
    TerminalWriteFailed {
        /// Job whose result could not be saved.
        job_id: String,
        /// Classification that was computed and must not be overwritten.
        classification: Classification,
    },
    /// A non-terminal status write failed; respond 500 so the queue
    /// redelivers.
    StatusWriteFailed {
        /// Job whose status could not be advanced.
        job_id: String,
    },
    /// The metadata store was unreachable at entry; respond 503.
    StoreUnavailable {
        /// Job the task would have advanced.
        job_id: String,
    },
}

/// Diagnostic recorded when the whole-task deadline fires.
pub const TASK_DEADLINE_MESSAGE: &str = "task deadline exceeded";

/// Per-task coordinator.
pub struct TaskHandler {
    jobs: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    runner: Arc<dyn CodeRunner>,
    direct_timeout: Duration,
    workspace_timeout: Duration,
    task_deadline: Duration,
    limits: ResourceLimits,
}

impl TaskHandler {
    /// Creates a handler over process-wide clients.
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        runner: Arc<dyn CodeRunner>,
        direct_timeout: Duration,
        workspace_timeout: Duration,
        task_deadline: Duration,
    ) -> Self {
        Self {
            jobs,
            objects,
            runner,
            direct_timeout,
            workspace_timeout,
            task_deadline,
            limits: ResourceLimits::default(),
        }
    }

    /// Overrides the sandbox limits installed in each child.
    #[must_use]
    pub const fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Handles one direct-execution task to a disposition.
    pub async fn handle_direct(&self, payload: DirectTaskPayload) -> TaskDisposition {
        let span = info_span!(target: LOG_TARGET, "direct_task", job_id = %payload.job_id);
        self.direct_inner(payload).instrument(span).await
    }

    async fn direct_inner(&self, payload: DirectTaskPayload) -> TaskDisposition {
        info!(
            target: LOG_TARGET,
            job_id = %payload.job_id,
            language = %payload.language,
            input_chars = payload.input.as_deref().map_or(0, str::len),
            "direct execution task received"
        );

        if let Some(disposition) = self.entry_check(&payload.job_id).await {
            return disposition;
        }
        warn_on_foreign_language(&payload.job_id, &payload.language);

        if let Err(err) = self
            .jobs
            .advance(&payload.job_id, StatusChange::To(JobStatus::ProcessingDirect))
            .await
        {
            return status_write_failure(&payload.job_id, &err);
        }

        let request = ExecRequest {
            source: ExecSource::Code {
                source: payload.code.clone(),
            },
            input: payload.input.clone(),
            timeout: self.direct_timeout,
            limits: self.limits,
        };
        let outcome = self.run_with_deadline(self.runner.run(request)).await;

        self.commit_terminal(&payload.job_id, &outcome, "Direct execution task processed.")
            .await
    }

    /// Handles one workspace-execution task to a disposition.
    pub async fn handle_workspace(&self, payload: WorkspaceTaskPayload) -> TaskDisposition {
        let span = info_span!(
            target: LOG_TARGET,
            "workspace_task",
            job_id = %payload.job_id,
            workspace_id = %payload.workspace_id
        );
        self.workspace_inner(payload).instrument(span).await
    }

    async fn workspace_inner(&self, payload: WorkspaceTaskPayload) -> TaskDisposition {
        info!(
            target: LOG_TARGET,
            job_id = %payload.job_id,
            workspace_id = %payload.workspace_id,
            entrypoint = %payload.entrypoint_file,
            files = payload.files.len(),
            "workspace execution task received"
        );

        if let Some(disposition) = self.entry_check(&payload.job_id).await {
            return disposition;
        }
        warn_on_foreign_language(&payload.job_id, &payload.language);

        if let Err(err) = self
            .jobs
            .advance(
                &payload.job_id,
                StatusChange::To(JobStatus::ProcessingAuthWorkspace),
            )
            .await
        {
            return status_write_failure(&payload.job_id, &err);
        }

        let outcome = match self.run_with_deadline(self.workspace_flow(&payload)).await {
            FlowResult::Outcome(outcome) => outcome,
            FlowResult::StoreFailure(err) => {
                return status_write_failure(&payload.job_id, &err);
            }
        };

        self.commit_terminal(
            &payload.job_id,
            &outcome,
            "Auth workspace execution task processed.",
        )
        .await
    }

    /// Reads the job status at entry: terminal jobs are acknowledged without
    /// re-running, which gives at-least-once delivery the effect of
    /// at-most-once execution.
    async fn entry_check(&self, job_id: &str) -> Option<TaskDisposition> {
        match self.jobs.status(job_id).await {
            Ok(Some(status)) if status.is_terminal() => {
                info!(
                    target: LOG_TARGET,
                    job_id,
                    status = status.as_str(),
                    "job already terminal; acknowledging replayed task"
                );
                Some(TaskDisposition::AlreadyTerminal {
                    job_id: job_id.to_owned(),
                })
            }
            Ok(_) => None,
            Err(err) if err.is_unavailable() => {
                error!(target: LOG_TARGET, job_id, error = %err, "metadata store unavailable at entry");
                Some(TaskDisposition::StoreUnavailable {
                    job_id: job_id.to_owned(),
                })
            }
            Err(err) => {
                error!(target: LOG_TARGET, job_id, error = %err, "failed to read job status at entry");
                Some(TaskDisposition::StatusWriteFailed {
                    job_id: job_id.to_owned(),
                })
            }
        }
    }

    /// Applies the whole-task deadline to the execution future; on expiry
    /// the task is recorded as an internal failure and acknowledged so
    /// redelivery storms cannot form.
    async fn run_with_deadline<T, F>(&self, flow: F) -> T
    where
        T: From<ExecutionOutcome>,
        F: Future<Output = T> + Send,
    {
        match tokio::time::timeout(self.task_deadline, flow).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    target: LOG_TARGET,
                    deadline_secs = self.task_deadline.as_secs(),
                    "whole-task deadline exceeded"
                );
                T::from(ExecutionOutcome::internal(TASK_DEADLINE_MESSAGE))
            }
        }
    }

    /// The workspace path after the initial transition: fetch, verify the
    /// entrypoint, run. The scoped workspace is destroyed on every exit
    /// path when it drops at the end of this function.
    async fn workspace_flow(&self, payload: &WorkspaceTaskPayload) -> FlowResult {
        if let Err(err) = self
            .jobs
            .advance(&payload.job_id, StatusChange::To(JobStatus::FetchingFromR2))
            .await
        {
            return FlowResult::StoreFailure(err);
        }

        let materializer = Materializer::new(self.objects.as_ref());
        let workspace = match materializer
            .materialize(&payload.job_id, &payload.r2_bucket_name, &payload.files)
            .await
        {
            Ok(workspace) => workspace,
            Err(err) => return FlowResult::Outcome(materialize_outcome(&payload.job_id, &err)),
        };

        let Some(entrypoint) = workspace.entrypoint(&payload.entrypoint_file) else {
            warn!(
                target: LOG_TARGET,
                job_id = %payload.job_id,
                entrypoint = %payload.entrypoint_file,
                "entrypoint missing from downloaded workspace"
            );
            return FlowResult::Outcome(ExecutionOutcome::internal(format!(
                "Entrypoint '{}' not found in downloaded workspace.",
                payload.entrypoint_file
            )));
        };
        let workdir = match workspace.root_path() {
            Ok(root) => root,
            Err(err) => {
                warn!(target: LOG_TARGET, job_id = %payload.job_id, error = %err, "workspace root unusable");
                return FlowResult::Outcome(ExecutionOutcome::internal(
                    "Internal worker error: workspace directory unusable.",
                ));
            }
        };

        if let Err(err) = self
            .jobs
            .advance(
                &payload.job_id,
                StatusChange::To(JobStatus::RunningAuthWorkspace),
            )
            .await
        {
            return FlowResult::StoreFailure(err);
        }

        let request = ExecRequest {
            source: ExecSource::Script {
                entrypoint,
                workdir,
            },
            input: payload.input.clone(),
            timeout: self.workspace_timeout,
            limits: self.limits,
        };
        FlowResult::Outcome(self.runner.run(request).await)
    }

    /// Commits the terminal status for a computed outcome. A lost terminal
    /// write is a critical condition: it is logged at the highest severity
    /// and surfaced as a 500 without overwriting the classification.
    async fn commit_terminal(
        &self,
        job_id: &str,
        outcome: &ExecutionOutcome,
        message: &str,
    ) -> TaskDisposition {
        let change = StatusChange::Finish(final_outcome(outcome));
        match self.jobs.advance(job_id, change).await {
            Ok(()) => {
                info!(
                    target: LOG_TARGET,
                    job_id,
                    classification = outcome.classification.as_str(),
                    "task processed"
                );
                TaskDisposition::Processed {
                    job_id: job_id.to_owned(),
                    message: message.to_owned(),
                }
            }
            Err(err) => {
                error!(
                    target: LOG_TARGET,
                    job_id,
                    classification = outcome.classification.as_str(),
                    error = %err,
                    "CRITICAL: failed to save final results after execution"
                );
                TaskDisposition::TerminalWriteFailed {
                    job_id: job_id.to_owned(),
                    classification: outcome.classification,
                }
            }
        }
    }
}

/// Inner result of the workspace flow: either a classified outcome or a
/// recoverable store failure that must nack the task.
enum FlowResult {
    Outcome(ExecutionOutcome),
    StoreFailure(StoreError),
}

impl From<ExecutionOutcome> for FlowResult {
    fn from(outcome: ExecutionOutcome) -> Self {
        Self::Outcome(outcome)
    }
}

/// Maps a runner outcome onto the terminal fields of the job document.
#[must_use]
pub fn final_outcome(outcome: &ExecutionOutcome) -> TerminalOutcome {
    // An absent or empty diagnostic still records a non-empty error on the
    // failed document.
    let diagnostic = || match outcome.error.as_deref() {
        Some(text) if !text.is_empty() => text.to_owned(),
        _ => "Unknown error".to_owned(),
    };
    match outcome.classification {
        Classification::Ok => TerminalOutcome::completed(outcome.stdout.clone()),
        Classification::UserError => TerminalOutcome::failed(
            FailureType::UserCodeError,
            outcome.stdout.clone(),
            diagnostic(),
        ),
        Classification::Timeout => {
            TerminalOutcome::failed(FailureType::Timeout, String::new(), diagnostic())
        }
        Classification::Internal => TerminalOutcome::failed(
            FailureType::WorkerInternalError,
            String::new(),
            diagnostic(),
        ),
    }
}

fn materialize_outcome(job_id: &str, err: &MaterializeError) -> ExecutionOutcome {
    warn!(target: LOG_TARGET, job_id, error = %err, "workspace materialisation failed");
    match err {
        MaterializeError::EmptyManifest => ExecutionOutcome::internal(err.to_string()),
        MaterializeError::UnsafePath { .. } => ExecutionOutcome::internal(
            "Internal worker error: workspace manifest contains an unsafe file path.",
        ),
        MaterializeError::Download { key, .. } => ExecutionOutcome::internal(format!(
            "Internal worker error: failed to download workspace object '{key}'.",
        )),
        MaterializeError::Workspace(_) => ExecutionOutcome::internal(
            "Internal worker error: failed to prepare the workspace directory.",
        ),
    }
}

fn status_write_failure(job_id: &str, err: &StoreError) -> TaskDisposition {
    if err.is_unavailable() {
        error!(target: LOG_TARGET, job_id, error = %err, "metadata store unavailable");
        TaskDisposition::StoreUnavailable {
            job_id: job_id.to_owned(),
        }
    } else {
        error!(target: LOG_TARGET, job_id, error = %err, "failed to advance job status");
        TaskDisposition::StatusWriteFailed {
            job_id: job_id.to_owned(),
        }
    }
}

fn warn_on_foreign_language(job_id: &str, language: &str) {
    if !language.eq_ignore_ascii_case("python") {
        warn!(
            target: LOG_TARGET,
            job_id,
            language,
            "language specified; worker executes as Python"
        );
    }
}
