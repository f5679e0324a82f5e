//! # Shard workers and the cross-shard submission primitive.
//!
//! A [`Sharded`] owns one worker per shard: a dedicated OS thread running
//! a single-threaded tokio runtime with its own [`TaskManager`]. Work
//! crosses shards only by submission: [`submit_to`](Sharded::submit_to)
//! ships a closure to the target worker, where it is spawned onto that
//! shard's scheduler, and hands the result back through a oneshot.
//!
//! ## Rules
//! - Jobs are spawned in submission order on the target scheduler.
//! - Submitting to the current shard runs the closure inline; the
//!   single-shard degenerate case stays on one scheduler either way.
//! - After [`stop`](Sharded::stop), submissions fail with `Shutdown`.

use std::cell::Cell;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::core::manager::TaskManager;
use crate::error::{internal_error, TaskError};

/// Index of a shard within the process.
pub type ShardId = u32;

thread_local! {
    static CURRENT_SHARD: Cell<Option<ShardId>> = const { Cell::new(None) };
}

type ShardJob = Box<dyn FnOnce(Arc<TaskManager>) + Send>;

struct Worker {
    tx: Mutex<Option<mpsc::UnboundedSender<ShardJob>>>,
    tm: Arc<TaskManager>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

/// A fixed set of shard workers, each owning one [`TaskManager`].
pub struct Sharded {
    workers: Vec<Worker>,
}

impl Sharded {
    /// Spawns `shard_count` workers (at least one), each with its own
    /// manager configured from `cfg`.
    pub fn new(shard_count: u32, cfg: Config) -> Arc<Self> {
        let shard_count = shard_count.max(1);
        let mut workers = Vec::with_capacity(shard_count as usize);

        for shard in 0..shard_count {
            let (tx, mut rx) = mpsc::unbounded_channel::<ShardJob>();
            let tm = TaskManager::new(shard, cfg.clone());

            let worker_tm = Arc::clone(&tm);
            let thread = std::thread::Builder::new()
                .name(format!("shard-{shard}"))
                .spawn(move || {
                    CURRENT_SHARD.with(|current| current.set(Some(shard)));
                    let runtime = match tokio::runtime::Builder::new_current_thread()
                        .enable_time()
                        .build()
                    {
                        Ok(runtime) => runtime,
                        Err(error) => {
                            tracing::error!(shard, %error, "failed to build shard runtime");
                            return;
                        }
                    };
                    runtime.block_on(async move {
                        worker_tm.start_ttl_observer();
                        while let Some(job) = rx.recv().await {
                            job(Arc::clone(&worker_tm));
                        }
                    });
                });

            let thread = match thread {
                Ok(handle) => Some(handle),
                Err(error) => {
                    tracing::error!(shard, %error, "failed to spawn shard worker thread");
                    None
                }
            };

            workers.push(Worker {
                tx: Mutex::new(Some(tx)),
                tm,
                thread: Mutex::new(thread),
            });
        }

        let sharded = Arc::new(Self { workers });
        for worker in &sharded.workers {
            worker.tm.attach(Arc::downgrade(&sharded));
        }
        sharded
    }

    /// Number of shards in this set.
    pub fn shard_count(&self) -> u32 {
        self.workers.len() as u32
    }

    /// The shard the calling thread belongs to, if it is a shard worker.
    pub fn current_shard() -> Option<ShardId> {
        CURRENT_SHARD.with(Cell::get)
    }

    /// The manager pinned to the given shard.
    pub fn local(&self, shard: ShardId) -> Option<&Arc<TaskManager>> {
        self.workers.get(shard as usize).map(|worker| &worker.tm)
    }

    /// Ships `f` to the given shard, runs it against that shard's manager,
    /// and returns its result on the calling shard.
    ///
    /// Inline when already on the target shard; otherwise the job enters
    /// the target scheduler in submission order.
    pub async fn submit_to<R, F>(&self, shard: ShardId, f: F) -> Result<R, TaskError>
    where
        F: FnOnce(Arc<TaskManager>) -> BoxFuture<'static, R> + Send + 'static,
        R: Send + 'static,
    {
        let worker = self
            .workers
            .get(shard as usize)
            .ok_or_else(|| internal_error(format!("no such shard {shard}")))?;

        if Self::current_shard() == Some(shard) {
            return Ok(f(Arc::clone(&worker.tm)).await);
        }

        let (result_tx, result_rx) = oneshot::channel();
        let job: ShardJob = Box::new(move |tm| {
            tokio::spawn(async move {
                let _ = result_tx.send(f(tm).await);
            });
        });

        let sender = worker
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sender {
            Some(sender) => sender.send(job).map_err(|_| TaskError::Shutdown)?,
            None => return Err(TaskError::Shutdown),
        }
        result_rx.await.map_err(|_| TaskError::Shutdown)
    }

    /// Stops every shard's manager, then shuts the workers down and joins
    /// their threads.
    ///
    /// Managers stop concurrently: draining a shard can require abort
    /// recursion from a parent task living on another, still-running
    /// shard.
    pub async fn stop(&self) {
        let stops = (0..self.shard_count())
            .map(|shard| self.submit_to(shard, |tm| Box::pin(async move { tm.stop().await })));
        let _ = futures::future::join_all(stops).await;

        for worker in &self.workers {
            worker
                .tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }

        let handles: Vec<_> = self
            .workers
            .iter()
            .filter_map(|worker| {
                worker
                    .thread
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
            })
            .collect();
        if !handles.is_empty() {
            let _ = tokio::task::spawn_blocking(move || {
                for handle in handles {
                    let _ = handle.join();
                }
            })
            .await;
        }
    }
}

impl std::fmt::Debug for Sharded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sharded")
            .field("shard_count", &self.shard_count())
            .finish()
    }
}
