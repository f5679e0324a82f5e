//! # Shutdown gate: a structured-concurrency barrier.
//!
//! Every live task holds a [`GateHolder`] on its module's [`Gate`].
//! Module shutdown closes the gate and waits for the holder count to
//! drain to zero; once closed, new holds are refused.
//!
//! ## Rules
//! - [`Gate::hold`] fails with [`TaskError::Shutdown`] after `close` began.
//! - Holders are cloneable; each clone counts separately.
//! - [`Gate::close`] completes only when the count reaches zero.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::TaskError;

struct GateInner {
    holders: AtomicU64,
    closed: AtomicBool,
    drained: Notify,
}

/// Counter of in-flight holders that blocks shutdown until drained.
pub struct Gate {
    inner: Arc<GateInner>,
}

impl Gate {
    /// Creates an open gate with no holders.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GateInner {
                holders: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                drained: Notify::new(),
            }),
        }
    }

    /// Acquires a holder, keeping the gate open.
    ///
    /// Fails once the gate has started closing.
    pub fn hold(&self) -> Result<GateHolder, TaskError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TaskError::Shutdown);
        }
        self.inner.holders.fetch_add(1, Ordering::AcqRel);
        // Re-check: close may have raced between the load and the add.
        if self.inner.closed.load(Ordering::Acquire) {
            drop(GateHolder {
                inner: Arc::clone(&self.inner),
            });
            return Err(TaskError::Shutdown);
        }
        Ok(GateHolder {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Returns the current holder count.
    pub fn holder_count(&self) -> u64 {
        self.inner.holders.load(Ordering::Acquire)
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Closes the gate and waits for every holder to drop.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        loop {
            let drained = self.inner.drained.notified();
            if self.inner.holders.load(Ordering::Acquire) == 0 {
                return;
            }
            drained.await;
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a [`Gate`] open while alive. Dropping the last holder lets a
/// pending `close` complete.
pub struct GateHolder {
    inner: Arc<GateInner>,
}

impl Clone for GateHolder {
    fn clone(&self) -> Self {
        self.inner.holders.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for GateHolder {
    fn drop(&mut self) {
        if self.inner.holders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn close_waits_for_holders() {
        let gate = Gate::new();
        let holder = gate.hold().unwrap();
        let second = holder.clone();
        assert_eq!(gate.holder_count(), 2);

        drop(holder);
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(second);
        });
        gate.close().await;
        assert_eq!(gate.holder_count(), 0);
        release.await.unwrap();
    }

    #[tokio::test]
    async fn closed_gate_refuses_holds() {
        let gate = Gate::new();
        gate.close().await;
        assert!(matches!(gate.hold(), Err(TaskError::Shutdown)));
    }

    #[tokio::test]
    async fn close_with_no_holders_is_immediate() {
        let gate = Gate::new();
        gate.close().await;
        assert!(gate.is_closed());
    }
}
