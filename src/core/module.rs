//! # Module: a named group of tasks with a shared abort source and gate.
//!
//! A [`Module`] exclusively owns every task registered to it on its shard
//! and issues the monotonic sequence numbers that group a workflow's
//! descendants. Its abort source chains from the shard manager's, and its
//! [`Gate`] blocks shutdown until every live task has drained.
//!
//! ## Rules
//! - `make_task` registers but does not start; `make_and_start_task` does
//!   both.
//! - Linking a child to its parent happens on the **parent's** shard
//!   before `make_task` returns; a child of an already-aborted parent is
//!   aborted immediately.
//! - `stop()` aborts, closes the gate, waits for the drain, then
//!   unregisters the module. Only started tasks drain: a task left in
//!   `Created` holds the gate forever.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::abort::{AbortReason, AbortSignal, AbortSubscription};
use crate::core::manager::TaskManager;
use crate::core::Gate;
use crate::error::{internal_error, TaskError};
use crate::shard::ShardId;
use crate::tasks::children::ForeignTask;
use crate::tasks::task::Task;
use crate::tasks::task_fn::TaskImpl;
use crate::tasks::{Status, TaskId, TaskInfo, TaskSpec};

/// Named grouping of tasks on one shard.
pub struct Module {
    tm: Arc<TaskManager>,
    name: String,
    tasks: DashMap<TaskId, Arc<Task>>,
    gate: Gate,
    sequence: AtomicU64,
    signal: AbortSignal,
    /// Chains the shard manager's abort into this module's.
    _shutdown_subscription: AbortSubscription,
}

impl Module {
    pub(crate) fn new(tm: Arc<TaskManager>, name: String) -> Arc<Self> {
        let signal = AbortSignal::new();
        let shutdown_subscription = tm.abort_signal().subscribe({
            let signal = signal.clone();
            move |_reason| signal.request_abort(AbortReason::Shutdown)
        });
        Arc::new(Self {
            tm,
            name,
            tasks: DashMap::new(),
            gate: Gate::new(),
            sequence: AtomicU64::new(0),
            signal,
            _shutdown_subscription: shutdown_subscription,
        })
    }

    /// The module's name, unique per shard manager.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning shard manager.
    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.tm
    }

    /// The module's abort source; aborting it aborts every root task.
    pub fn abort_signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// The module's shutdown gate.
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Draws the next sequence number. Monotonic per module per shard;
    /// the first number issued is 1.
    pub fn new_sequence_number(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Snapshot of the tasks currently registered to this module.
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.tasks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of tasks currently registered to this module.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Constructs and registers a task on this shard without starting it.
    ///
    /// With `parent` set, the new task is added to the parent's children
    /// collection on the parent's shard and inherits its sequence number
    /// before this returns. Fails with `NotFound` if the parent has
    /// already retired, and with `Shutdown` once the module is stopping.
    pub async fn make_task(
        self: &Arc<Self>,
        imp: Arc<dyn TaskImpl>,
        spec: TaskSpec,
        parent: Option<TaskInfo>,
    ) -> Result<Arc<Task>, TaskError> {
        let gate_holder = self.gate.hold()?;

        let id = spec.id.unwrap_or_else(TaskId::random);
        let mut status = Status::new(id, self.tm.shard());
        status.scope = spec.scope;
        status.keyspace = spec.keyspace;
        status.table = spec.table;
        status.entity = spec.entity;
        status.progress_units = spec.progress_units;

        let task = Task::new(imp, status, parent, Arc::clone(self), gate_holder);
        self.register_task(Arc::clone(&task))?;

        if let Some(parent) = parent {
            let child_handle = ForeignTask::new(Arc::clone(&task));
            let linked = self
                .tm
                .on_shard(parent.shard, move |tm| {
                    Box::pin(async move {
                        match tm.find_task(parent.id) {
                            Some(parent_task) => {
                                parent_task.add_child(child_handle).await?;
                                // Reserving (rather than reading) the number
                                // makes it final even while the parent is
                                // still Created.
                                Ok((
                                    parent_task.reserve_sequence_number(),
                                    parent_task.abort_requested(),
                                ))
                            }
                            None => Err(TaskError::NotFound { id: parent.id }),
                        }
                    })
                })
                .await
                .and_then(|result| result);

            match linked {
                Ok((sequence_number, parent_aborted)) => {
                    task.inherit_sequence_number(sequence_number);
                    if parent_aborted {
                        Arc::clone(&task)
                            .force_abort(AbortReason::Requested)
                            .await;
                    }
                }
                Err(error) => {
                    self.unregister_task(id);
                    return Err(error);
                }
            }
        }

        Ok(task)
    }

    /// Convenience: [`make_task`](Module::make_task) followed by
    /// [`Task::start`].
    pub async fn make_and_start_task(
        self: &Arc<Self>,
        imp: Arc<dyn TaskImpl>,
        spec: TaskSpec,
        parent: Option<TaskInfo>,
    ) -> Result<Arc<Task>, TaskError> {
        let task = self.make_task(imp, spec, parent).await?;
        task.start()?;
        Ok(task)
    }

    /// Creates a task on the given shard, in this module's counterpart
    /// registered there under the same name, and returns its identifier.
    ///
    /// The identifier is globally valid while the task lives on exactly
    /// one shard.
    pub async fn make_task_on(
        &self,
        shard: ShardId,
        imp: Arc<dyn TaskImpl>,
        spec: TaskSpec,
        parent: Option<TaskInfo>,
    ) -> Result<TaskId, TaskError> {
        let name = self.name.clone();
        self.tm
            .on_shard(shard, move |tm| {
                Box::pin(async move {
                    let module = tm.find_module(&name)?;
                    let task = module.make_task(imp, spec, parent).await?;
                    Ok(task.id())
                })
            })
            .await
            .and_then(|result| result)
    }

    /// Inserts the task into the module's map and the shard's flat index.
    pub(crate) fn register_task(&self, task: Arc<Task>) -> Result<(), TaskError> {
        let id = task.id();
        match self.tasks.entry(id) {
            Entry::Occupied(_) => {
                return Err(internal_error(format!(
                    "duplicate task id {id} in module '{}'",
                    self.name
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&task));
            }
        }
        if let Err(error) = self.tm.register_task(task) {
            self.tasks.remove(&id);
            return Err(error);
        }
        Ok(())
    }

    /// Removes the task from the module's map and the shard's flat index,
    /// releasing the owning reference.
    pub(crate) fn unregister_task(&self, id: TaskId) {
        if self.tasks.remove(&id).is_none() {
            let _ = internal_error(format!(
                "unregistering unknown task {id} from module '{}'",
                self.name
            ));
        }
        self.tm.unregister_task(id);
    }

    /// Stops the module: aborts every live task, waits for the gate to
    /// drain, then unregisters the module from the shard manager.
    pub async fn stop(&self) {
        tracing::info!(module = %self.name, "stopping module");
        self.signal.request_abort(AbortReason::Shutdown);
        self.gate.close().await;
        self.tm.unregister_module(&self.name);
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("tasks", &self.tasks.len())
            .field("gate_holders", &self.gate.holder_count())
            .finish()
    }
}
