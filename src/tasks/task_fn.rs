//! # Task implementation contract and function-backed implementation.
//!
//! [`TaskImpl`] is the capability set a concrete task brings to the
//! engine: a type name, optional cancellation support, optional workload
//! hints for progress aggregation, and the async [`run`](TaskImpl::run)
//! body. The engine provides default behavior for everything else
//! (binary progress, internal-iff-child, no resources to release).
//!
//! [`TaskFn`] wraps a closure into a `TaskImpl` so callers can define
//! one-off tasks without a struct.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use taskshard::{TaskError, TaskFn, TaskImpl};
//!
//! let imp: Arc<dyn TaskImpl> = TaskFn::arc("compaction", |task| async move {
//!     if task.abort_requested() {
//!         return Err(TaskError::Aborted);
//!     }
//!     // do work...
//!     Ok(())
//! });
//! assert_eq!(imp.type_name(), "compaction");
//! ```

use std::borrow::Cow;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::Future;

use crate::error::TaskError;
use crate::tasks::task::Task;
use crate::tasks::Progress;

/// Behavior a concrete task implementation plugs into the engine.
///
/// `run` executes exactly once per task and should observe the task's
/// abort signal at its suspension points, returning promptly once an
/// abort is requested.
#[async_trait]
pub trait TaskImpl: Send + Sync + 'static {
    /// Stable implementation type name (e.g. `"repair"`, `"snapshot"`).
    fn type_name(&self) -> &str;

    /// Whether this implementation accepts cooperative cancellation.
    fn abortable(&self) -> bool {
        false
    }

    /// Whether the task is internal (hidden from user-facing listings and
    /// unregistered immediately after finishing).
    ///
    /// `None` defers to the engine default: internal iff the task has a
    /// parent.
    fn internal(&self) -> Option<bool> {
        None
    }

    /// Total workload hint used to scale aggregated child progress.
    async fn expected_total_workload(&self) -> Option<f64> {
        None
    }

    /// Expected number of children; aggregation falls back to binary
    /// progress while some children are missing and no workload hint
    /// exists.
    fn expected_children_number(&self) -> Option<f64> {
        None
    }

    /// Custom progress override. `None` selects the engine default
    /// (child aggregation or binary progress).
    async fn progress(&self) -> Option<Progress> {
        None
    }

    /// Executes the task. Called exactly once, on the task's home shard.
    async fn run(&self, task: Arc<Task>) -> Result<(), TaskError>;

    /// Called once after the terminal transition; drop caches here.
    fn release_resources(&self) {}
}

type TaskBody = Box<dyn FnOnce(Arc<Task>) -> BoxFuture<'static, Result<(), TaskError>> + Send>;

/// Function-backed task implementation.
///
/// The closure runs once; the engine never restarts a task. A second
/// `run` call (an engine defect) fails with `InvalidState`.
pub struct TaskFn {
    type_name: Cow<'static, str>,
    abortable: bool,
    internal: Option<bool>,
    body: Mutex<Option<TaskBody>>,
}

impl TaskFn {
    /// Creates a function-backed implementation.
    pub fn new<F, Fut>(type_name: impl Into<Cow<'static, str>>, body: F) -> Self
    where
        F: FnOnce(Arc<Task>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            type_name: type_name.into(),
            abortable: false,
            internal: None,
            body: Mutex::new(Some(Box::new(move |task| Box::pin(body(task))))),
        }
    }

    /// Creates the implementation and returns it as a shared handle.
    pub fn arc<F, Fut>(type_name: impl Into<Cow<'static, str>>, body: F) -> Arc<dyn TaskImpl>
    where
        F: FnOnce(Arc<Task>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Arc::new(Self::new(type_name, body))
    }

    /// Marks the task as accepting cooperative cancellation.
    pub fn abortable(mut self, abortable: bool) -> Self {
        self.abortable = abortable;
        self
    }

    /// Overrides the internal flag instead of deriving it from parentage.
    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = Some(internal);
        self
    }

    /// Finalizes the builder into a shared handle.
    pub fn build(self) -> Arc<dyn TaskImpl> {
        Arc::new(self)
    }
}

#[async_trait]
impl TaskImpl for TaskFn {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn abortable(&self) -> bool {
        self.abortable
    }

    fn internal(&self) -> Option<bool> {
        self.internal
    }

    async fn run(&self, task: Arc<Task>) -> Result<(), TaskError> {
        let body = self
            .body
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match body {
            Some(body) => body(task).await,
            None => Err(TaskError::InvalidState {
                reason: format!("task body '{}' already consumed", self.type_name),
            }),
        }
    }
}
