//! # Creation-time task metadata.
//!
//! [`TaskSpec`] bundles the identity and descriptive fields a caller
//! supplies when creating a task: an optional explicit identifier plus
//! the scope/keyspace/table/entity strings and the progress units that
//! land in the task's [`Status`](crate::Status).

use crate::tasks::TaskId;

/// Describes a task instance to create.
///
/// All fields default to empty; a missing `id` means the engine draws a
/// random one.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    /// Explicit identifier; `None` draws a random one.
    pub id: Option<TaskId>,
    /// Scope of the operation (e.g. node, keyspace, table).
    pub scope: String,
    /// Keyspace the task operates on, if any.
    pub keyspace: String,
    /// Table the task operates on, if any.
    pub table: String,
    /// Additional entity specific to the task type.
    pub entity: String,
    /// Description of the units progress is counted in.
    pub progress_units: String,
}

impl TaskSpec {
    /// Creates an empty spec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the task to an explicit identifier.
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the operation scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Sets the keyspace.
    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = keyspace.into();
        self
    }

    /// Sets the table.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Sets the entity.
    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = entity.into();
        self
    }

    /// Sets the progress units description.
    pub fn progress_units(mut self, units: impl Into<String>) -> Self {
        self.progress_units = units.into();
        self
    }
}
