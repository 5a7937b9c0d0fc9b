//! Job status model: the transition DAG, the document schema, and the pure
//! update function every store backend applies inside its transaction.
//!
//! A job is created by the enqueuer in [`JobStatus::Queued`]; the worker is
//! its sole mutator until it reaches a terminal status, after which no field
//! may change. The timestamp policy (set `processing_started_at` once, stamp
//! `completed_at` and `expires_at` with the terminal write) lives here so
//! the in-memory and PostgreSQL stores cannot drift apart.

pub mod store;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::clock;

/// Durable status of a job document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created by the enqueuer; not yet picked up.
    Queued,
    /// Picked up by the indexing or query pipeline.
    Processing,
    /// Picked up by the direct-execution path.
    ProcessingDirect,
    /// Picked up by the workspace-execution path.
    ProcessingAuthWorkspace,
    /// Workspace files are being downloaded from object storage.
    #[serde(rename = "fetching_from_r2")]
    FetchingFromR2,
    /// The workspace entrypoint is executing.
    RunningAuthWorkspace,
    /// Terminal: the program ran to completion.
    Completed,
    /// Terminal: see the document's `failure_type` and `error`.
    Failed,
}

impl JobStatus {
    /// Stable wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::ProcessingDirect => "processing_direct",
            Self::ProcessingAuthWorkspace => "processing_auth_workspace",
            Self::FetchingFromR2 => "fetching_from_r2",
            Self::RunningAuthWorkspace => "running_auth_workspace",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a wire name back into a status.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "processing_direct" => Some(Self::ProcessingDirect),
            "processing_auth_workspace" => Some(Self::ProcessingAuthWorkspace),
            "fetching_from_r2" => Some(Self::FetchingFromR2),
            "running_auth_workspace" => Some(Self::RunningAuthWorkspace),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the status is `completed` or `failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether entering this status stamps `processing_started_at`.
    #[must_use]
    pub const fn starts_processing(self) -> bool {
        matches!(
            self,
            Self::Processing | Self::ProcessingDirect | Self::ProcessingAuthWorkspace
        )
    }

    /// Statuses reachable from this one.
    ///
    /// Redelivered tasks may also re-enter the same non-terminal status; see
    /// [`is_allowed`].
    #[must_use]
    pub const fn allowed_targets(self) -> &'static [Self] {
        match self {
            Self::Queued => &[
                Self::ProcessingDirect,
                Self::ProcessingAuthWorkspace,
                Self::Processing,
            ],
            Self::Processing | Self::ProcessingDirect | Self::RunningAuthWorkspace => {
                &[Self::Completed, Self::Failed]
            }
            Self::ProcessingAuthWorkspace => &[Self::FetchingFromR2, Self::Failed],
            Self::FetchingFromR2 => &[Self::RunningAuthWorkspace, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns whether `from -> to` is a permitted transition.
///
/// The transition table forms a DAG with `completed` and `failed` as the only
/// sinks. A non-terminal status may additionally re-enter itself so that a
/// task redelivered after a crashed worker can resume without violating the
/// table; terminal statuses never transition, not even to themselves.
#[must_use]
pub fn is_allowed(from: JobStatus, to: JobStatus) -> bool {
    if from == to {
        return !from.is_terminal();
    }
    from.allowed_targets().contains(&to)
}

/// Why a job failed; set exactly when `status = failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// The user's program exited non-zero.
    UserCodeError,
    /// The wall-clock deadline elapsed.
    Timeout,
    /// The worker itself failed (spawn, materialisation, storage).
    WorkerInternalError,
}

impl FailureType {
    /// Stable wire name of the failure type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserCodeError => "user_code_error",
            Self::Timeout => "timeout",
            Self::WorkerInternalError => "worker_internal_error",
        }
    }
}

/// Terminal fields committed together with the final status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalOutcome {
    status: JobStatus,
    output: String,
    error: Option<String>,
    failure_type: Option<FailureType>,
}

impl TerminalOutcome {
    /// Terminal fields for a successful run.
    #[must_use]
    pub const fn completed(output: String) -> Self {
        Self {
            status: JobStatus::Completed,
            output,
            error: None,
            failure_type: None,
        }
    }

    /// Terminal fields for a failed run.
    #[must_use]
    pub const fn failed(failure_type: FailureType, output: String, error: String) -> Self {
        Self {
            status: JobStatus::Failed,
            output,
            error: Some(error),
            failure_type: Some(failure_type),
        }
    }

    /// Final status this outcome commits.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        self.status
    }
}

/// One status advancement requested by a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    /// Move to a non-terminal status.
    To(JobStatus),
    /// Commit the terminal status together with its result fields.
    Finish(TerminalOutcome),
}

impl StatusChange {
    /// Status this change targets.
    #[must_use]
    pub const fn target(&self) -> JobStatus {
        match self {
            Self::To(status) => *status,
            Self::Finish(outcome) => outcome.status(),
        }
    }
}

/// The job document as stored, with enqueuer-owned fields preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDocument {
    /// Current status.
    pub status: JobStatus,
    /// Failure kind; present exactly when `status = failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<FailureType>,
    /// Captured stdout; never absent once the job is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Diagnostic text; serialised as an explicit `null` on success.
    #[serde(default)]
    pub error: Option<String>,
    /// Set the first time the job enters a `processing` status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<String>,
    /// Set with the terminal write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Stamped on every update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Retention expiry, `completed_at` plus fifteen days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Fields the enqueuer wrote that the worker does not model
    /// (submitted code, language, user id, …). Updates merge around them.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobDocument {
    /// A fresh document as the enqueuer creates it.
    #[must_use]
    pub fn queued() -> Self {
        Self {
            status: JobStatus::Queued,
            failure_type: None,
            output: None,
            error: None,
            processing_started_at: None,
            completed_at: None,
            updated_at: None,
            expires_at: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// Raised when a status change is not permitted from the current status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition from '{from}' to '{to}'")]
pub struct TransitionError {
    /// Status the document currently holds.
    pub from: JobStatus,
    /// Status the caller attempted to enter.
    pub to: JobStatus,
}

/// Applies one status change to a document, enforcing the transition table
/// and the timestamp policy.
///
/// `now` is the wire-format timestamp stamped into `updated_at` (and, for
/// terminal changes, `completed_at`). Both store backends call this inside
/// their transaction so the validation cannot be bypassed.
///
/// # Errors
///
/// Returns [`TransitionError`] when the document's current status does not
/// permit the requested target, or when a terminal status is requested
/// without its result fields; the document is left untouched.
pub fn apply(doc: &mut JobDocument, change: &StatusChange, now: &str) -> Result<(), TransitionError> {
    let to = change.target();
    // Terminal statuses carry result fields, so they are only reachable via
    // `Finish`.
    let bare_terminal = matches!(change, StatusChange::To(status) if status.is_terminal());
    if bare_terminal || !is_allowed(doc.status, to) {
        return Err(TransitionError {
            from: doc.status,
            to,
        });
    }

    doc.status = to;
    doc.updated_at = Some(now.to_owned());
    if to.starts_processing() && doc.processing_started_at.is_none() {
        doc.processing_started_at = Some(now.to_owned());
    }
    if let StatusChange::Finish(outcome) = change {
        doc.output = Some(outcome.output.clone());
        doc.error = outcome.error.clone();
        doc.failure_type = outcome.failure_type;
        doc.completed_at = Some(now.to_owned());
        doc.expires_at = clock::expiry_after(now);
    }
    Ok(())
}
