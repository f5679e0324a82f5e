//! # Error types used by the task engine.
//!
//! A single [`TaskError`] enum covers both engine-level failures (lookup
//! misses, shutdown races, invariant violations) and task-execution
//! failures (aborts, timeouts, implementation errors). Errors cross shard
//! boundaries and get folded into retired-child snapshots as strings, so
//! one taxonomy keeps every propagation path uniform.
//!
//! [`TaskError`] provides `as_label()` for stable log/metric labels.

use thiserror::Error;

use crate::tasks::TaskId;

/// Errors produced by the task engine and by task executions.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// No shard knows the requested task identifier.
    #[error("task with id {id} not found")]
    NotFound {
        /// The missing task identifier.
        id: TaskId,
    },

    /// No module with the given name is registered on this shard.
    #[error("module '{name}' not found")]
    ModuleNotFound {
        /// The missing module name.
        name: String,
    },

    /// Abort was requested on a task whose implementation declines cancellation.
    #[error("task with id {id} is not abortable")]
    NotAbortable {
        /// The target task identifier.
        id: TaskId,
    },

    /// An operation was invoked in a state where its precondition fails.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// What precondition was violated.
        reason: String,
    },

    /// A deadline expired.
    #[error("deadline exceeded")]
    Timeout,

    /// A cooperative abort was observed.
    #[error("task aborted")]
    Aborted,

    /// The engine, a module, or a shard worker is shutting down.
    #[error("shutting down")]
    Shutdown,

    /// Task execution failed with an implementation-defined error.
    #[error("execution failed: {reason}")]
    Failed {
        /// Human-readable failure description.
        reason: String,
    },

    /// Invariant violation inside the engine. Fatal: state may be inconsistent.
    #[error("internal error: {reason}")]
    Internal {
        /// Which invariant was violated.
        reason: String,
    },
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::NotFound { .. } => "task_not_found",
            TaskError::ModuleNotFound { .. } => "module_not_found",
            TaskError::NotAbortable { .. } => "task_not_abortable",
            TaskError::InvalidState { .. } => "invalid_state",
            TaskError::Timeout => "timeout",
            TaskError::Aborted => "aborted",
            TaskError::Shutdown => "shutting_down",
            TaskError::Failed { .. } => "task_failed",
            TaskError::Internal { .. } => "internal_error",
        }
    }

    /// Creates a generic execution failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        TaskError::Failed {
            reason: reason.into(),
        }
    }

    /// True for kinds that indicate intentional termination rather than a defect.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            TaskError::Aborted | TaskError::Shutdown | TaskError::Timeout
        )
    }
}

/// Records an invariant violation and returns it as the fatal error kind.
///
/// Logged at error severity. The engine does not abort the process;
/// embedders that want fail-fast behavior can match on
/// [`TaskError::Internal`] and escalate.
pub(crate) fn internal_error(reason: impl Into<String>) -> TaskError {
    let reason = reason.into();
    tracing::error!(%reason, "internal invariant violated");
    TaskError::Internal { reason }
}
