//! # Serialized, coalescing execution of an async action.
//!
//! [`SerializedAction`] wraps an async closure so that at most one
//! invocation runs at a time. Triggers arriving while a run is in flight
//! collapse into a single follow-up run; every `trigger` call resolves
//! only after a run that started at-or-after it has completed.
//!
//! Used by the manager's TTL refresh path: a burst of configuration
//! updates executes the refresh at most twice (once in flight, one
//! coalesced follow-up).

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::watch;

type Action = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct ActionState {
    running: bool,
    dirty: bool,
}

/// Serializes and coalesces invocations of one async action.
pub struct SerializedAction {
    action: Action,
    state: Mutex<ActionState>,
    /// Count of completed runs; waiters park on this.
    completed: watch::Sender<u64>,
}

impl SerializedAction {
    /// Wraps `action` for serialized triggering.
    pub fn new<F, Fut>(action: F) -> Arc<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (completed, _) = watch::channel(0);
        Arc::new(Self {
            action: Box::new(move || Box::pin(action())),
            state: Mutex::new(ActionState {
                running: false,
                dirty: false,
            }),
            completed,
        })
    }

    /// Runs the action, or joins the pending coalesced run.
    ///
    /// Resolves once a run that began at-or-after this call has finished.
    pub async fn trigger(&self) {
        let wait_target = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.running {
                state.dirty = true;
                // The in-flight run completes as N+1; the follow-up that
                // observes our trigger completes as N+2.
                Some(*self.completed.borrow() + 2)
            } else {
                state.running = true;
                None
            }
        };

        match wait_target {
            Some(target) => {
                let mut rx = self.completed.subscribe();
                let _ = rx.wait_for(|count| *count >= target).await;
            }
            None => self.run_loop().await,
        }
    }

    async fn run_loop(&self) {
        loop {
            (self.action)().await;
            let again = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                self.completed.send_modify(|count| *count += 1);
                if state.dirty {
                    state.dirty = false;
                    true
                } else {
                    state.running = false;
                    false
                }
            };
            if !again {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn burst_of_triggers_runs_at_most_twice() {
        let runs = Arc::new(AtomicU32::new(0));
        let action = SerializedAction::new({
            let runs = Arc::clone(&runs);
            move || {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                }
            }
        });

        let mut waiters = Vec::new();
        for _ in 0..10 {
            let action = Arc::clone(&action);
            waiters.push(tokio::spawn(async move { action.trigger().await }));
        }
        for waiter in waiters {
            waiter.await.unwrap();
        }

        let total = runs.load(Ordering::SeqCst);
        assert!(total >= 1 && total <= 2, "ran {total} times");
    }

    #[tokio::test]
    async fn sequential_triggers_each_run() {
        let runs = Arc::new(AtomicU32::new(0));
        let action = SerializedAction::new({
            let runs = Arc::clone(&runs);
            move || {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        action.trigger().await;
        action.trigger().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
