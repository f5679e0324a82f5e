//! # Fan-out cancellation with optional deadlines.
//!
//! [`AbortSignal`] is the cancellation primitive every task, module, and
//! shard manager carries. It extends the plain cancellation-token model
//! with a recorded [`AbortReason`] and exactly-once handler subscriptions.
//!
//! ## Rules
//! - `request_abort` is idempotent: the **first reason wins**, later calls
//!   are silently dropped.
//! - A handler registered with [`subscribe`](AbortSignal::subscribe) fires
//!   **exactly once**, on the first abort, or immediately if the signal
//!   is already aborted. Dropping the [`AbortSubscription`] before the
//!   abort detaches the handler.
//! - [`expire_at`](AbortSignal::expire_at) schedules an abort with
//!   [`AbortReason::DeadlineExceeded`]; dropping the returned
//!   [`DeadlineGuard`] cancels the timer.
//!
//! # Example
//! ```
//! use taskshard::{AbortReason, AbortSignal};
//!
//! let signal = AbortSignal::new();
//! let _sub = signal.subscribe(|reason: &AbortReason| {
//!     assert_eq!(*reason, AbortReason::Requested);
//! });
//! signal.request_abort(AbortReason::Requested);
//! signal.request_abort(AbortReason::Shutdown); // no-op: first reason wins
//! assert!(signal.is_aborted());
//! assert_eq!(signal.reason(), Some(AbortReason::Requested));
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

type AbortHandler = Box<dyn FnOnce(&AbortReason) + Send>;

/// Why an abort was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Explicit cancellation by a caller.
    Requested,
    /// A scoped deadline expired.
    DeadlineExceeded,
    /// The owning module or shard is shutting down.
    Shutdown,
}

impl AbortReason {
    /// Maps the reason to the error kind observed by waiters.
    pub fn to_error(self) -> TaskError {
        match self {
            AbortReason::DeadlineExceeded => TaskError::Timeout,
            AbortReason::Requested | AbortReason::Shutdown => TaskError::Aborted,
        }
    }
}

struct SignalState {
    reason: Option<AbortReason>,
    handlers: HashMap<u64, AbortHandler>,
    next_id: u64,
}

struct SignalInner {
    state: Mutex<SignalState>,
    /// Wakeup half: cancelled once, on the first abort.
    token: CancellationToken,
}

/// Cancellation source with reason tracking and handler fan-out.
///
/// Cloning is cheap and shares the underlying state.
#[derive(Clone)]
pub struct AbortSignal {
    inner: Arc<SignalInner>,
}

impl AbortSignal {
    /// Creates a fresh, un-aborted signal.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                state: Mutex::new(SignalState {
                    reason: None,
                    handlers: HashMap::new(),
                    next_id: 0,
                }),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Requests an abort. Idempotent; the first reason wins.
    ///
    /// All registered handlers fire synchronously, each exactly once.
    pub fn request_abort(&self, reason: AbortReason) {
        let handlers = {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if state.reason.is_some() {
                return;
            }
            state.reason = Some(reason);
            std::mem::take(&mut state.handlers)
        };
        // Cancel before firing: handlers may re-check `is_aborted`.
        self.inner.token.cancel();
        for (_, handler) in handlers {
            handler(&reason);
        }
    }

    /// Returns true once an abort has been requested.
    pub fn is_aborted(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Returns the recorded abort reason, if any.
    pub fn reason(&self) -> Option<AbortReason> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reason
    }

    /// Completes when an abort is requested. Never completes otherwise.
    pub async fn aborted(&self) {
        self.inner.token.cancelled().await;
    }

    /// Returns `Err` with the reason's error kind if an abort was requested.
    pub fn check(&self) -> Result<(), TaskError> {
        match self.reason() {
            None => Ok(()),
            Some(reason) => Err(reason.to_error()),
        }
    }

    /// Registers a handler fired exactly once, on the first abort.
    ///
    /// If the signal is already aborted the handler fires immediately on
    /// the calling thread. Dropping the returned subscription before the
    /// abort detaches the handler.
    pub fn subscribe<F>(&self, handler: F) -> AbortSubscription
    where
        F: FnOnce(&AbortReason) + Send + 'static,
    {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(reason) = state.reason {
            drop(state);
            handler(&reason);
            return AbortSubscription {
                inner: Weak::new(),
                id: 0,
            };
        }
        let id = state.next_id;
        state.next_id += 1;
        state.handlers.insert(id, Box::new(handler));
        AbortSubscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Schedules `request_abort(DeadlineExceeded)` at the given instant.
    ///
    /// The timer is scoped: dropping the returned guard cancels it.
    /// Must be called within a tokio runtime.
    pub fn expire_at(&self, deadline: Instant) -> DeadlineGuard {
        let signal = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            signal.request_abort(AbortReason::DeadlineExceeded);
        });
        DeadlineGuard { handle }
    }

    /// Convenience wrapper: deadline relative to now.
    pub fn expire_after(&self, timeout: Duration) -> DeadlineGuard {
        self.expire_at(Instant::now() + timeout)
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Scoped handler registration; dropping it detaches the handler.
pub struct AbortSubscription {
    inner: Weak<SignalInner>,
    id: u64,
}

impl Drop for AbortSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .handlers
                .remove(&self.id);
        }
    }
}

/// Scoped deadline timer; dropping it cancels the pending abort.
pub struct DeadlineGuard {
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
