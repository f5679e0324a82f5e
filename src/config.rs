//! # Engine configuration.
//!
//! [`Config`] carries the retention window for finished tasks as a
//! live-updatable value: a [`watch`] receiver whose sender side stays with
//! the embedding configuration system. Every [`TaskManager`] observes the
//! channel and refreshes its cached TTL through a serialized action, so a
//! burst of updates collapses into at most one in-flight refresh plus one
//! follow-up.
//!
//! # Example
//! ```
//! use taskshard::Config;
//!
//! // Fixed TTL, no live updates.
//! let cfg = Config::fixed(60);
//! assert_eq!(cfg.task_ttl_secs(), 60);
//!
//! // Live-updatable TTL; keep the sender to push new values.
//! let (ttl, cfg) = Config::updatable(30);
//! ttl.send_replace(120);
//! assert_eq!(cfg.task_ttl_secs(), 120);
//! ```
//!
//! [`TaskManager`]: crate::TaskManager

use tokio::sync::watch;

/// Default retention window for finished tasks, in seconds.
pub const DEFAULT_TASK_TTL_SECS: u32 = 30;

/// Per-shard engine configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Seconds a finished task stays registered before unregistering itself.
    ///
    /// Live-updatable: the engine observes changes on this channel.
    pub task_ttl: watch::Receiver<u32>,
}

impl Config {
    /// Creates a configuration with a fixed TTL.
    ///
    /// The sender side is dropped, so the value never changes.
    pub fn fixed(task_ttl_secs: u32) -> Self {
        let (_tx, rx) = watch::channel(task_ttl_secs);
        Self { task_ttl: rx }
    }

    /// Creates a configuration whose TTL can be updated at runtime.
    ///
    /// Returns the sender half; pushing a value through it propagates to
    /// every observing [`TaskManager`](crate::TaskManager).
    pub fn updatable(task_ttl_secs: u32) -> (watch::Sender<u32>, Self) {
        let (tx, rx) = watch::channel(task_ttl_secs);
        (tx, Self { task_ttl: rx })
    }

    /// Returns the currently configured TTL in seconds.
    pub fn task_ttl_secs(&self) -> u32 {
        *self.task_ttl.borrow()
    }
}

impl Default for Config {
    /// Provides a default configuration with `task_ttl = 30s`, fixed.
    fn default() -> Self {
        Self::fixed(DEFAULT_TASK_TTL_SECS)
    }
}
