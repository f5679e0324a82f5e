//! # Task identity.
//!
//! [`TaskId`] is a 128-bit, universally unique identifier, stable for the
//! task's entire lifetime and for the retention window after it finishes.
//! [`TaskInfo`] pairs an identifier with the shard the task lives on; it
//! is the routing stub used when linking children to parents.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shard::ShardId;

/// Globally unique 128-bit task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Identifier plus home shard: enough to route an operation to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// The task's globally unique identifier.
    pub id: TaskId,
    /// The shard the task object is pinned to.
    pub shard: ShardId,
}

impl TaskInfo {
    /// Creates a routing stub.
    pub fn new(id: TaskId, shard: ShardId) -> Self {
        Self { id, shard }
    }
}
