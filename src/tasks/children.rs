//! # Child-task aggregation under a reader/writer discipline.
//!
//! A parent task owns a [`Children`] collection: live children as
//! shard-tagged [`ForeignTask`] handles plus retired children as
//! [`TaskEssentials`] snapshots. A given child identifier appears in
//! exactly one of the two, never both.
//!
//! ## Locking
//! The collection is protected by a `tokio::sync::RwLock`. Readers are
//! frequent (progress aggregation, enumeration) and **may suspend** while
//! holding the read guard: cross-shard hops happen under the lock, so an
//! enumeration never interleaves with a concurrent fold. Writers
//! (`add_child`, `mark_as_finished`) are rare and wait readers out.
//! Callbacks running under the read guard must not touch the collection
//! again: the lock is not re-entrant.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use tokio::sync::RwLock;

use crate::error::{internal_error, TaskError};
use crate::shard::ShardId;
use crate::tasks::task::Task;
use crate::tasks::{Progress, TaskEssentials, TaskId};

/// Shard-tagged shared handle to a task pinned to some shard.
///
/// Dropping the handle does not destroy the task; only module
/// unregistration does. Operations against the task are routed to its
/// home shard through [`invoke`](ForeignTask::invoke).
#[derive(Clone)]
pub struct ForeignTask {
    shard: ShardId,
    task: Arc<Task>,
}

impl ForeignTask {
    /// Wraps a task handle, tagging it with the task's home shard.
    pub fn new(task: Arc<Task>) -> Self {
        Self {
            shard: task.shard(),
            task,
        }
    }

    /// The referenced task's identifier.
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// The shard the task object is pinned to.
    pub fn owner_shard(&self) -> ShardId {
        self.shard
    }

    /// Direct access to the shared handle.
    ///
    /// Prefer [`invoke`](ForeignTask::invoke) for operations: it routes to
    /// the owner shard's scheduler.
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// Runs `f(task)` on the task's home shard and returns its result.
    ///
    /// Degenerates to a local call when no shard dispatcher is attached
    /// (single-shard deployments) or when already on the owner shard.
    pub async fn invoke<R, F>(&self, f: F) -> Result<R, TaskError>
    where
        F: FnOnce(Arc<Task>) -> BoxFuture<'static, Result<R, TaskError>> + Send + 'static,
        R: Send + 'static,
    {
        let task = Arc::clone(&self.task);
        let container = task.module().task_manager().container();
        match container {
            Some(sharded) => sharded.submit_to(self.shard, move |_tm| f(task)).await?,
            None => f(task).await,
        }
    }
}

impl std::fmt::Debug for ForeignTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignTask")
            .field("id", &self.id())
            .field("shard", &self.shard)
            .finish()
    }
}

struct ChildrenInner {
    live: HashMap<TaskId, ForeignTask>,
    retired: Vec<TaskEssentials>,
}

/// Reader/writer-protected aggregate of a task's live and retired children.
pub struct Children {
    inner: RwLock<ChildrenInner>,
}

impl Children {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(ChildrenInner {
                live: HashMap::new(),
                retired: Vec::new(),
            }),
        }
    }

    /// Total number of children, live and retired.
    pub async fn size(&self) -> usize {
        let inner = self.inner.read().await;
        inner.live.len() + inner.retired.len()
    }

    /// True when no live children remain.
    pub async fn all_finished(&self) -> bool {
        self.inner.read().await.live.is_empty()
    }

    /// Inserts a live child. A duplicate identifier is an internal error.
    pub(crate) async fn add_child(&self, child: ForeignTask) -> Result<(), TaskError> {
        let mut inner = self.inner.write().await;
        let id = child.id();
        if inner.live.insert(id, child).is_some() {
            return Err(internal_error(format!("child task {id} added twice")));
        }
        Ok(())
    }

    /// Moves a child from `live` to `retired`.
    ///
    /// The child must currently be live; anything else is an internal
    /// error (a double fold or a fold for an unknown child).
    pub(crate) async fn mark_as_finished(
        &self,
        id: TaskId,
        essentials: TaskEssentials,
    ) -> Result<(), TaskError> {
        let mut inner = self.inner.write().await;
        if inner.live.remove(&id).is_none() {
            return Err(internal_error(format!(
                "finished child task {id} is not registered as live"
            )));
        }
        inner.retired.push(essentials);
        Ok(())
    }

    /// Sums progress over live and retired children.
    ///
    /// Live children are polled on their home shards, in parallel, under
    /// the read guard. Live children whose `progress_units` differ from
    /// the requested units are skipped.
    pub async fn get_progress(&self, progress_units: &str) -> Result<Progress, TaskError> {
        let inner = self.inner.read().await;

        let polls = inner.live.values().map(|child| {
            let child = child.clone();
            let units = progress_units.to_string();
            async move {
                child
                    .invoke(move |task| {
                        Box::pin(async move {
                            if task.status().progress_units != units {
                                return Ok(None);
                            }
                            task.get_progress().await.map(Some)
                        })
                    })
                    .await
            }
        });

        let mut progress = Progress::default();
        for polled in join_all(polls).await {
            if let Some(child_progress) = polled? {
                progress += child_progress;
            }
        }
        for child in &inner.retired {
            progress += child.progress;
        }
        Ok(progress)
    }

    /// Visits every child under the read guard: live children first, then
    /// retired snapshots, awaiting each callback in turn.
    ///
    /// Callbacks must not touch this collection again.
    pub async fn for_each<FL, FR>(&self, mut on_live: FL, mut on_retired: FR) -> Result<(), TaskError>
    where
        FL: FnMut(ForeignTask) -> BoxFuture<'static, Result<(), TaskError>>,
        FR: FnMut(TaskEssentials) -> BoxFuture<'static, Result<(), TaskError>>,
    {
        let inner = self.inner.read().await;
        for child in inner.live.values() {
            on_live(child.clone()).await?;
        }
        for child in &inner.retired {
            on_retired(child.clone()).await?;
        }
        Ok(())
    }

    /// Maps every child under the read guard, collecting non-empty results.
    pub async fn map_each<R, ML, MR>(&self, mut map_live: ML, mut map_retired: MR) -> Vec<R>
    where
        ML: FnMut(&ForeignTask) -> Option<R>,
        MR: FnMut(&TaskEssentials) -> Option<R>,
    {
        let inner = self.inner.read().await;
        inner
            .live
            .values()
            .filter_map(|child| map_live(child))
            .chain(inner.retired.iter().filter_map(|child| map_retired(child)))
            .collect()
    }
}
