//! Shared tracing configuration for observability instrumentation.
//!
//! Centralises the log target used by the crate so subscribers can filter
//! worker events without pulling in unrelated application logs.

/// Target used by worker spans and logs.
pub(crate) const LOG_TARGET: &str = "code_exec::worker";
