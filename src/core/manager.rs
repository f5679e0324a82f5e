//! # TaskManager: the per-shard root of the task registry.
//!
//! One [`TaskManager`] lives on each shard. It owns the shard's modules,
//! the flat all-tasks index spanning them, the shard abort source, and
//! the cached task TTL.
//!
//! ## TTL refresh
//! ```text
//! config watch ──► ttl observer fiber ──► SerializedAction ──► AtomicU32
//! ```
//! Concurrent configuration changes never spawn parallel refreshes: the
//! serialized action runs one at a time and collapses a burst of pending
//! updates into a single follow-up run.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};

use crate::abort::{AbortReason, AbortSignal};
use crate::config::Config;
use crate::core::module::Module;
use crate::core::serialized::SerializedAction;
use crate::error::{internal_error, TaskError};
use crate::shard::{ShardId, Sharded};
use crate::tasks::task::Task;
use crate::tasks::TaskId;

/// Per-shard task registry root.
///
/// Standalone managers (no [`Sharded`] dispatcher attached) degenerate
/// every cross-shard operation to a local call, which is exactly the
/// single-shard deployment.
pub struct TaskManager {
    shard: ShardId,
    cfg: Config,
    all_tasks: DashMap<TaskId, Arc<Task>>,
    modules: DashMap<String, Arc<Module>>,
    task_ttl: Arc<AtomicU32>,
    ttl_action: Arc<SerializedAction>,
    signal: AbortSignal,
    container: OnceLock<Weak<Sharded>>,
    me: Weak<TaskManager>,
}

impl TaskManager {
    /// Creates the manager for one shard.
    pub fn new(shard: ShardId, cfg: Config) -> Arc<Self> {
        let task_ttl = Arc::new(AtomicU32::new(cfg.task_ttl_secs()));
        let ttl_action = SerializedAction::new({
            let ttl_rx = cfg.task_ttl.clone();
            let task_ttl = Arc::clone(&task_ttl);
            move || {
                let ttl_rx = ttl_rx.clone();
                let task_ttl = Arc::clone(&task_ttl);
                async move {
                    task_ttl.store(*ttl_rx.borrow(), Ordering::Release);
                }
            }
        });

        Arc::new_cyclic(|me| Self {
            shard,
            cfg,
            all_tasks: DashMap::new(),
            modules: DashMap::new(),
            task_ttl,
            ttl_action,
            signal: AbortSignal::new(),
            container: OnceLock::new(),
            me: me.clone(),
        })
    }

    /// The shard this manager is pinned to.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// The shard abort source; aborting it cascades into every module.
    pub fn abort_signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Current retention window for finished tasks.
    pub fn get_task_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.task_ttl.load(Ordering::Acquire)))
    }

    /// Spawns the fiber that follows configuration TTL updates.
    ///
    /// Each observed change is funneled through the serialized action;
    /// must be called within a tokio runtime. Shard workers call this on
    /// startup.
    pub fn start_ttl_observer(self: &Arc<Self>) {
        let mut ttl_rx = self.cfg.task_ttl.clone();
        let action = Arc::clone(&self.ttl_action);
        tokio::spawn(async move {
            while ttl_rx.changed().await.is_ok() {
                action.trigger().await;
            }
        });
    }

    /// Creates and registers a module. An existing module under the same
    /// name is replaced.
    pub fn make_module(self: &Arc<Self>, name: impl Into<String>) -> Arc<Module> {
        let name = name.into();
        let module = Module::new(Arc::clone(self), name.clone());
        self.register_module(name, Arc::clone(&module));
        module
    }

    /// Registers a module under the given name, replacing any previous one.
    pub fn register_module(&self, name: String, module: Arc<Module>) {
        tracing::info!(shard = self.shard, module = %name, "registered module");
        self.modules.insert(name, module);
    }

    /// Looks up a module by name.
    pub fn find_module(&self, name: &str) -> Result<Arc<Module>, TaskError> {
        self.modules
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TaskError::ModuleNotFound {
                name: name.to_string(),
            })
    }

    /// Removes a module from the index.
    pub fn unregister_module(&self, name: &str) {
        if self.modules.remove(name).is_some() {
            tracing::info!(shard = self.shard, module = %name, "unregistered module");
        }
    }

    /// Snapshot of the modules registered on this shard.
    pub fn get_modules(&self) -> Vec<Arc<Module>> {
        self.modules
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Snapshot of the flat all-tasks index on this shard.
    pub fn get_all_tasks(&self) -> Vec<Arc<Task>> {
        self.all_tasks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Probes the flat index for a task.
    pub fn find_task(&self, id: TaskId) -> Option<Arc<Task>> {
        self.all_tasks.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Inserts into the flat index. A duplicate identifier on the same
    /// shard is an internal error.
    pub(crate) fn register_task(&self, task: Arc<Task>) -> Result<(), TaskError> {
        let id = task.id();
        match self.all_tasks.entry(id) {
            Entry::Occupied(_) => Err(internal_error(format!(
                "duplicate task id {id} in the shard {} index",
                self.shard
            ))),
            Entry::Vacant(slot) => {
                slot.insert(task);
                Ok(())
            }
        }
    }

    /// Removes from the flat index.
    pub(crate) fn unregister_task(&self, id: TaskId) {
        self.all_tasks.remove(&id);
    }

    /// Attaches the shard dispatcher this manager belongs to.
    pub(crate) fn attach(&self, container: Weak<Sharded>) {
        let _ = self.container.set(container);
    }

    /// The shard dispatcher, if this manager runs inside one.
    pub fn container(&self) -> Option<Arc<Sharded>> {
        self.container.get().and_then(Weak::upgrade)
    }

    /// Runs `f` against the manager of the given shard.
    ///
    /// Routed through the dispatcher when attached; a standalone manager
    /// accepts only its own shard and runs `f` inline.
    pub(crate) async fn on_shard<R, F>(&self, shard: ShardId, f: F) -> Result<R, TaskError>
    where
        F: FnOnce(Arc<TaskManager>) -> BoxFuture<'static, R> + Send + 'static,
        R: Send + 'static,
    {
        match self.container() {
            Some(sharded) => sharded.submit_to(shard, f).await,
            None => {
                if shard != self.shard {
                    return Err(internal_error(format!(
                        "no shard dispatcher attached; cannot reach shard {shard} from shard {}",
                        self.shard
                    )));
                }
                match self.me.upgrade() {
                    Some(me) => Ok(f(me).await),
                    None => Err(TaskError::Shutdown),
                }
            }
        }
    }

    /// Stops every module, in arbitrary order, and waits for all of them.
    pub async fn stop(&self) {
        tracing::info!(shard = self.shard, "stopping task manager");
        self.signal.request_abort(AbortReason::Shutdown);
        let modules = self.get_modules();
        join_all(modules.iter().map(|module| module.stop())).await;
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("shard", &self.shard)
            .field("modules", &self.modules.len())
            .field("tasks", &self.all_tasks.len())
            .finish()
    }
}
