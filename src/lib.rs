//! # taskshard
//!
//! **Taskshard** is a per-shard task lifecycle engine for processes that
//! are internally partitioned into independent execution shards. It
//! tracks long-running, potentially hierarchical administrative
//! operations (repairs, migrations, snapshots, schema changes) and lets
//! a caller on any shard find a task by its globally unique identifier
//! and operate on it.
//!
//! ## Features
//!
//! | Area            | Description                                                        | Key types / functions                          |
//! |-----------------|--------------------------------------------------------------------|------------------------------------------------|
//! | **Tasks**       | Identity, state machine, progress, completion promise.             | [`Task`], [`TaskImpl`], [`TaskFn`], [`Status`] |
//! | **Hierarchy**   | Parent/child linkage across shards, retired-child folding.         | [`Children`], [`ForeignTask`], [`TaskEssentials`] |
//! | **Modules**     | Named task groups with sequence numbers and a shutdown gate.       | [`Module`], [`Gate`]                           |
//! | **Managers**    | Per-shard registry root with TTL-based retention.                  | [`TaskManager`], [`Config`]                    |
//! | **Sharding**    | Worker-per-shard dispatch, lookup and invocation by identifier.    | [`Sharded`], [`invoke_on_task`], [`lookup_task_on_all_shards`] |
//! | **Cancellation**| Reason-carrying abort fan-out with scoped deadlines.               | [`AbortSignal`], [`AbortReason`]               |
//! | **Errors**      | One taxonomy for engine and task failures.                         | [`TaskError`]                                  |
//!
//! ## Model
//!
//! Each shard runs a cooperative single-threaded scheduler owning one
//! [`TaskManager`]; a task, its module, and its manager all live on
//! exactly one shard. Cross-shard interaction happens only by submitting
//! work to the owning shard: there is no shared mutable state, and the
//! identifier-uniqueness invariant replaces cross-shard coherence.
//!
//! Finished tasks linger for a configurable TTL so callers can poll
//! their final status, then unregister themselves. A finished child
//! instead folds a summary into its parent's children collection and
//! unregisters immediately.
//!
//! ```
//! use taskshard::{Config, TaskError, TaskFn, TaskManager, TaskSpec};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), TaskError> {
//!     let tm = TaskManager::new(0, Config::fixed(0));
//!     let module = tm.make_module("maintenance");
//!
//!     let task = module
//!         .make_and_start_task(
//!             TaskFn::arc("compaction", |_task| async move { Ok(()) }),
//!             TaskSpec::new().scope("keyspace").keyspace("ks"),
//!             None,
//!         )
//!         .await?;
//!
//!     task.done().await?;
//!     assert!(task.is_done());
//!     Ok(())
//! }
//! ```

mod abort;
mod config;
mod core;
mod error;
mod shard;
mod tasks;

// ---- Public re-exports ----

pub use crate::abort::{AbortReason, AbortSignal, AbortSubscription, DeadlineGuard};
pub use crate::config::{Config, DEFAULT_TASK_TTL_SECS};
pub use crate::core::{Gate, GateHolder, Module, SerializedAction, TaskManager};
pub use crate::error::TaskError;
pub use crate::shard::{invoke_on_task, lookup_task_on_all_shards, ShardId, Sharded};
pub use crate::tasks::{
    Children, ForeignTask, Progress, Status, Task, TaskEssentials, TaskFn, TaskId, TaskImpl,
    TaskInfo, TaskSpec, TaskState,
};
