//! # Cross-shard task lookup and invocation.
//!
//! A task identifier is globally unique but its object lives on exactly
//! one shard. [`invoke_on_task`] fans out over every shard in parallel,
//! runs the supplied callable on the shard that holds the task, and
//! enforces the uniqueness invariant across the collected results:
//! a task found on more than one shard is a fatal internal error, a task
//! found on none is `NotFound`.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};

use crate::error::{internal_error, TaskError};
use crate::shard::sharded::Sharded;
use crate::tasks::children::ForeignTask;
use crate::tasks::task::Task;
use crate::tasks::TaskId;

/// Finds the shard holding `id` and returns a shard-tagged handle to the
/// task.
pub async fn lookup_task_on_all_shards(
    sharded: &Arc<Sharded>,
    id: TaskId,
) -> Result<ForeignTask, TaskError> {
    invoke_on_task(sharded, id, |task| {
        Box::pin(async move { Ok(ForeignTask::new(task)) })
    })
    .await
}

/// Runs `f(task)` on the shard holding `id` and returns its result.
///
/// The fan-out probes all shards in parallel, in no particular order;
/// the uniqueness check inspects every shard's answer before returning.
/// `f` may suspend and may itself hop shards; the owning module's gate
/// keeps the task alive for the call's duration.
pub async fn invoke_on_task<R, F>(
    sharded: &Arc<Sharded>,
    id: TaskId,
    f: F,
) -> Result<R, TaskError>
where
    F: Fn(Arc<Task>) -> BoxFuture<'static, Result<R, TaskError>> + Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    let probes = (0..sharded.shard_count()).map(|shard| {
        let f = f.clone();
        async move {
            sharded
                .submit_to(shard, move |tm| {
                    Box::pin(async move {
                        match tm.find_task(id) {
                            Some(task) => Some(f(task).await),
                            None => None,
                        }
                    })
                })
                .await
        }
    });

    let mut found: Option<Result<R, TaskError>> = None;
    for probe in join_all(probes).await {
        if let Some(result) = probe? {
            if found.is_some() {
                return Err(internal_error(format!(
                    "task id {id} found on more than one shard"
                )));
            }
            found = Some(result);
        }
    }
    match found {
        Some(result) => result,
        None => Err(TaskError::NotFound { id }),
    }
}
