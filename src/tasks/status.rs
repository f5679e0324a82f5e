//! # Task state, status snapshots, and retired-task essentials.
//!
//! [`TaskState`] is the four-state lifecycle machine. [`Status`] is the
//! pollable snapshot every task exposes; [`TaskEssentials`] is the
//! serializable summary a finished child leaves behind in its parent's
//! collection. All three derive `serde` so collaborators (HTTP/RPC
//! surfaces) can marshal them without reaching into the engine.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::shard::ShardId;
use crate::tasks::{Progress, TaskId};

/// Lifecycle state of a task.
///
/// Transitions form a monotonic path: `Created → Running → {Done, Failed}`.
/// Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Constructed and registered, not yet started.
    Created,
    /// The implementation's `run` is executing.
    Running,
    /// Finished cleanly.
    Done,
    /// Finished with an error or via abort.
    Failed,
}

impl TaskState {
    /// True in `Done` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Created => "created",
            TaskState::Running => "running",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Pollable status snapshot of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    /// Globally unique identifier.
    pub id: TaskId,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Wall-clock start time; set when the task enters `Running`.
    pub start_time: Option<SystemTime>,
    /// Wall-clock end time; meaningful only in terminal states.
    pub end_time: Option<SystemTime>,
    /// Failure description; non-empty only in `Failed`.
    pub error: String,
    /// Workflow grouping number: shared by a root and all its descendants.
    /// Written here when the task enters `Running` (zero before that);
    /// reserved earlier if a child links while the task is still `Created`.
    pub sequence_number: u64,
    /// Home shard of the task object.
    pub shard: ShardId,
    /// Scope of the operation (e.g. node, keyspace, table).
    pub scope: String,
    /// Keyspace the task operates on, if any.
    pub keyspace: String,
    /// Table the task operates on, if any.
    pub table: String,
    /// Additional entity specific to the task type.
    pub entity: String,
    /// Description of the units `Progress` is counted in.
    pub progress_units: String,
}

impl Status {
    pub(crate) fn new(id: TaskId, shard: ShardId) -> Self {
        Self {
            id,
            state: TaskState::Created,
            start_time: None,
            end_time: None,
            error: String::new(),
            sequence_number: 0,
            shard,
            scope: String::new(),
            keyspace: String::new(),
            table: String::new(),
            entity: String::new(),
            progress_units: String::new(),
        }
    }
}

/// Serializable snapshot of a finished task, sufficient to report it
/// without keeping the live object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEssentials {
    /// Final status snapshot.
    pub status: Status,
    /// Final progress.
    pub progress: Progress,
    /// Parent identifier, if the task was a child.
    pub parent_id: Option<TaskId>,
    /// Implementation type name.
    pub type_name: String,
    /// Whether the implementation accepted cancellation.
    pub abortable: bool,
    /// Failed subtrees, recursively.
    pub failed_children: Vec<TaskEssentials>,
}
