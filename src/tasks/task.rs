//! # Task: the live object tracked by the engine.
//!
//! A [`Task`] couples an implementation ([`TaskImpl`]) with the state the
//! engine owns: the status snapshot, the abort signal, the children
//! collection, the completion promise, and the holder that keeps the
//! owning module's shutdown gate open.
//!
//! ## Lifecycle
//! ```text
//! Module::make_task()            Task::start()
//!   │                               │
//!   ├─► register in module map      ├─► assign sequence number + start_time
//!   ├─► register in shard index     ├─► state = Running
//!   └─► link to parent (optional)   ├─► spawn unregister fiber
//!                                   └─► spawn run fiber
//!                                         │
//!                                         ├─► impl.run() returns/fails
//!                                         ├─► terminal status write
//!                                         ├─► fold essentials into parent
//!                                         ├─► resolve done()
//!                                         └─► (after TTL) unregister
//! ```
//!
//! ## Rules
//! - A second `start` is an internal error; terminal states never change.
//! - `done()` resolves strictly after the terminal state is observable
//!   through `status()`.
//! - The fold into the parent completes before the registry entries are
//!   removed, so aggregated progress is never under-counted.
//! - Child and internal tasks unregister immediately after finishing;
//!   root user-facing tasks linger for the configured TTL.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::SystemTime;

use futures::future::{join_all, BoxFuture};
use tokio::sync::watch;

use crate::abort::{AbortReason, AbortSignal, AbortSubscription};
use crate::core::module::Module;
use crate::core::GateHolder;
use crate::error::{internal_error, TaskError};
use crate::shard::ShardId;
use crate::tasks::children::{Children, ForeignTask};
use crate::tasks::task_fn::TaskImpl;
use crate::tasks::{Progress, Status, TaskEssentials, TaskId, TaskInfo, TaskState};

/// A tracked unit of administrative work: identity, state, progress,
/// children, and lifecycle.
///
/// Tasks are created through [`Module::make_task`](crate::Module::make_task)
/// and shared as `Arc<Task>`; the module's maps hold the owning reference
/// until the task unregisters itself.
pub struct Task {
    imp: Arc<dyn TaskImpl>,
    status: Mutex<Status>,
    parent: Option<TaskInfo>,
    children: Children,
    signal: AbortSignal,
    module: Arc<Module>,
    abortable: bool,
    internal: bool,
    /// Reserved workflow number; zero until a child link or `Running`
    /// entry reserves it. Once reserved it never changes.
    sequence: AtomicU64,
    /// Flipped to true after the terminal status write.
    done_tx: watch::Sender<bool>,
    outcome: Mutex<Option<Result<(), TaskError>>>,
    /// Keeps the owning module's shutdown gate open while the task lives.
    _gate_holder: GateHolder,
    /// Root tasks follow the module's abort source; children are aborted
    /// recursively through their parents instead.
    _shutdown_subscription: Option<AbortSubscription>,
}

impl Task {
    pub(crate) fn new(
        imp: Arc<dyn TaskImpl>,
        status: Status,
        parent: Option<TaskInfo>,
        module: Arc<Module>,
        gate_holder: GateHolder,
    ) -> Arc<Self> {
        let signal = AbortSignal::new();
        let abortable = imp.abortable();
        let internal = imp.internal().unwrap_or(parent.is_some());
        let (done_tx, _) = watch::channel(false);

        Arc::new_cyclic(|weak: &Weak<Task>| {
            let shutdown_subscription = if parent.is_none() {
                let weak = weak.clone();
                Some(module.abort_signal().subscribe(move |_reason| {
                    if let Some(task) = weak.upgrade() {
                        tokio::spawn(task.force_abort(AbortReason::Shutdown));
                    }
                }))
            } else {
                None
            };

            Self {
                imp,
                status: Mutex::new(status),
                parent,
                children: Children::new(),
                signal,
                module,
                abortable,
                internal,
                sequence: AtomicU64::new(0),
                done_tx,
                outcome: Mutex::new(None),
                _gate_holder: gate_holder,
                _shutdown_subscription: shutdown_subscription,
            }
        })
    }

    /// The task's globally unique identifier.
    pub fn id(&self) -> TaskId {
        self.lock_status().id
    }

    /// The implementation type name.
    pub fn type_name(&self) -> String {
        self.imp.type_name().to_string()
    }

    /// The shard the task object is pinned to.
    pub fn shard(&self) -> ShardId {
        self.lock_status().shard
    }

    /// A snapshot of the task's status.
    pub fn status(&self) -> Status {
        self.lock_status().clone()
    }

    /// The workflow sequence number; zero until the task enters `Running`.
    pub fn sequence_number(&self) -> u64 {
        self.lock_status().sequence_number
    }

    /// The parent task's identifier, if any.
    pub fn parent_id(&self) -> Option<TaskId> {
        self.parent.map(|info| info.id)
    }

    /// The parent task's routing stub, if any.
    pub fn parent_info(&self) -> Option<TaskInfo> {
        self.parent
    }

    /// The module that owns this task.
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    /// The task's children collection.
    pub fn children(&self) -> &Children {
        &self.children
    }

    /// The task's abort source. Implementations observe it in `run`.
    pub fn abort_signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Whether the implementation accepts cooperative cancellation.
    pub fn is_abortable(&self) -> bool {
        self.abortable
    }

    /// Whether the task is internal (child tasks by default).
    pub fn is_internal(&self) -> bool {
        self.internal
    }

    /// True once an abort has been requested.
    pub fn abort_requested(&self) -> bool {
        self.signal.is_aborted()
    }

    /// True in any terminal state.
    pub fn is_complete(&self) -> bool {
        self.lock_status().state.is_terminal()
    }

    /// True specifically in `Done`.
    pub fn is_done(&self) -> bool {
        self.lock_status().state == TaskState::Done
    }

    /// Starts the task: assigns the sequence number and start time, moves
    /// to `Running`, and drives the implementation's `run` to completion
    /// in the background.
    ///
    /// Must be called on the task's home shard. A second start is an
    /// internal error.
    pub fn start(self: &Arc<Self>) -> Result<(), TaskError> {
        {
            let mut status = self.lock_status();
            if status.state != TaskState::Created {
                return Err(internal_error(format!(
                    "task {} in module '{}' was started twice",
                    status.id,
                    self.module.name()
                )));
            }
            status.sequence_number = self.reserve_sequence_number();
            status.start_time = Some(SystemTime::now());
            status.state = TaskState::Running;
        }

        self.spawn_unregister_fiber();

        // The run fiber owns the only long-lived strong reference besides
        // the registry maps; it drops at finish so the TTL fiber's
        // unregistration can release the task.
        let task = Arc::clone(self);
        tokio::spawn(async move {
            let result = match task.signal.check() {
                Ok(()) => match task.imp.run(Arc::clone(&task)).await {
                    // An abort racing a clean finish still fails the task.
                    Ok(()) => task.signal.check(),
                    Err(error) => Err(error),
                },
                Err(error) => Err(error),
            };
            task.finish(result).await;
        });
        Ok(())
    }

    /// Requests a cooperative abort.
    ///
    /// Fails with `NotAbortable` if the implementation declines
    /// cancellation. Idempotent; live children are aborted recursively on
    /// their home shards.
    pub async fn abort(self: &Arc<Self>) -> Result<(), TaskError> {
        if !self.abortable {
            return Err(TaskError::NotAbortable { id: self.id() });
        }
        Arc::clone(self).force_abort(AbortReason::Requested).await;
        Ok(())
    }

    /// Aborts without consulting the abortable flag. Used for module
    /// shutdown and recursive child aborts.
    pub(crate) fn force_abort(self: Arc<Self>, reason: AbortReason) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if self.signal.is_aborted() {
                return;
            }
            self.signal.request_abort(reason);

            let children: Vec<ForeignTask> = self
                .children
                .map_each(|child| Some(child.clone()), |_| None)
                .await;
            let aborts = children.into_iter().map(|child| async move {
                let outcome = child
                    .invoke(move |task| {
                        Box::pin(async move {
                            task.force_abort(reason).await;
                            Ok(())
                        })
                    })
                    .await;
                if let Err(error) = outcome {
                    tracing::warn!(child = %child.id(), %error, "aborting child task failed");
                }
            });
            join_all(aborts).await;
        })
    }

    /// Resolves when the task reaches a terminal state, yielding the
    /// failure for `Failed` tasks. Supports any number of waiters.
    pub async fn done(&self) -> Result<(), TaskError> {
        let mut rx = self.done_tx.subscribe();
        if rx.wait_for(|terminal| *terminal).await.is_err() {
            return Err(internal_error(format!(
                "completion channel of task {} closed before the terminal transition",
                self.id()
            )));
        }
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(Ok(()))
    }

    /// Computes the task's progress.
    ///
    /// The implementation may override; otherwise children's summed
    /// progress is used when the expected-children or expected-workload
    /// hints make it meaningful, with binary progress as the fallback.
    pub fn get_progress(self: &Arc<Self>) -> BoxFuture<'static, Result<Progress, TaskError>> {
        let task = Arc::clone(self);
        Box::pin(async move { task.progress_inner().await })
    }

    async fn progress_inner(self: Arc<Self>) -> Result<Progress, TaskError> {
        if let Some(progress) = self.imp.progress().await {
            return Ok(progress);
        }

        let children_count = self.children.size().await;
        if children_count == 0 {
            return Ok(self.binary_progress());
        }

        // While some children are still unregistered, aggregation without
        // a workload hint would under-report; fall back to binary.
        let mut expected_workload = None;
        if self.imp.expected_children_number().unwrap_or(0.0) != children_count as f64 {
            expected_workload = self.imp.expected_total_workload().await;
            if expected_workload.is_none() {
                return Ok(self.binary_progress());
            }
        }

        let units = self.lock_status().progress_units.clone();
        let mut progress = self.children.get_progress(&units).await?;
        if let Some(total) = expected_workload {
            progress.total = total;
        }
        Ok(progress)
    }

    fn binary_progress(&self) -> Progress {
        Progress {
            completed: if self.is_complete() { 1.0 } else { 0.0 },
            total: 1.0,
        }
    }

    /// Recursively collects failed subtrees from the retired children.
    pub async fn get_failed_children(&self) -> Vec<TaskEssentials> {
        self.children
            .map_each(
                |_| None,
                |child| {
                    if child.status.state == TaskState::Failed || !child.failed_children.is_empty()
                    {
                        Some(child.clone())
                    } else {
                        None
                    }
                },
            )
            .await
    }

    /// Registers a live child handle.
    pub(crate) async fn add_child(&self, child: ForeignTask) -> Result<(), TaskError> {
        self.children.add_child(child).await
    }

    /// Returns the workflow number shared with this task's descendants,
    /// reserving it from the module counter on first use.
    ///
    /// Linking a child reserves the parent's number even while the parent
    /// is still `Created`, so a subtree built ahead of starting anything
    /// shares one number regardless of start order. `start()` writes the
    /// reserved number into the status.
    pub(crate) fn reserve_sequence_number(&self) -> u64 {
        let current = self.sequence.load(Ordering::Acquire);
        if current != 0 {
            return current;
        }
        let fresh = self.module.new_sequence_number();
        match self
            .sequence
            .compare_exchange(0, fresh, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => fresh,
            // A concurrent reservation won; the fresh draw leaves a gap in
            // the module counter, which stays monotonic.
            Err(reserved) => reserved,
        }
    }

    /// Records the workflow number inherited from the parent at link time.
    pub(crate) fn inherit_sequence_number(&self, sequence_number: u64) {
        self.sequence.store(sequence_number, Ordering::Release);
    }

    /// Builds the retired-task snapshot folded into the parent.
    pub(crate) async fn essentials(self: &Arc<Self>) -> TaskEssentials {
        let progress = match self.get_progress().await {
            Ok(progress) => progress,
            Err(_) => self.binary_progress(),
        };
        TaskEssentials {
            status: self.status(),
            progress,
            parent_id: self.parent_id(),
            type_name: self.type_name(),
            abortable: self.abortable,
            failed_children: self.get_failed_children().await,
        }
    }

    /// Terminal transition: records the outcome, folds into the parent,
    /// then resolves `done()`.
    async fn finish(self: &Arc<Self>, result: Result<(), TaskError>) {
        {
            let mut status = self.lock_status();
            if status.state.is_terminal() {
                // Double finish: the run fiber is the only caller, so this
                // indicates an engine defect.
                let _ = internal_error(format!("task {} finished twice", status.id));
                return;
            }
            status.end_time = Some(SystemTime::now());
            match &result {
                Ok(()) => status.state = TaskState::Done,
                Err(error) => {
                    status.state = TaskState::Failed;
                    status.error = error.to_string();
                }
            }
        }

        self.maybe_fold_into_parent().await;

        *self
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(result);
        self.done_tx.send_replace(true);
        self.imp.release_resources();
    }

    /// Hands the finished task's essentials to the parent's children
    /// collection on the parent's shard.
    ///
    /// A missing parent (already retired) is fine: the fold becomes a
    /// no-op. A failed fold leaves the subtree unfolded and is logged.
    async fn maybe_fold_into_parent(self: &Arc<Self>) {
        let Some(parent) = self.parent else {
            return;
        };
        if !self.children.all_finished().await {
            return;
        }

        let id = self.id();
        let essentials = self.essentials().await;
        let folded = self
            .module
            .task_manager()
            .on_shard(parent.shard, move |tm| {
                Box::pin(async move {
                    match tm.find_task(parent.id) {
                        Some(parent_task) => {
                            parent_task.children().mark_as_finished(id, essentials).await
                        }
                        None => Ok(()),
                    }
                })
            })
            .await
            .and_then(|result| result);

        if let Err(error) = folded {
            tracing::warn!(task = %id, %error, "folding into parent failed; subtree left unfolded");
        }
    }

    /// Waits for the terminal transition, then unregisters the task:
    /// after the TTL for lingering (root, user-facing) tasks, immediately
    /// for children and internal tasks.
    ///
    /// The fiber deliberately holds no strong reference to the task, so
    /// unregistration actually releases it.
    fn spawn_unregister_fiber(&self) {
        let mut done_rx = self.done_tx.subscribe();
        let module = Arc::clone(&self.module);
        let id = self.id();
        let linger = self.parent.is_none() && !self.internal;

        tokio::spawn(async move {
            if done_rx.wait_for(|terminal| *terminal).await.is_err() {
                return;
            }
            if linger {
                let ttl = module.task_manager().get_task_ttl();
                let module_signal = module.abort_signal().clone();
                tokio::select! {
                    _ = tokio::time::sleep(ttl) => {}
                    _ = module_signal.aborted() => {}
                }
            }
            module.unregister_task(id);
        });
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("Task")
            .field("id", &status.id)
            .field("type", &self.imp.type_name())
            .field("state", &status.state)
            .field("shard", &status.shard)
            .field("module", &self.module.name())
            .finish()
    }
}
