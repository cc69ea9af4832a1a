//! Cooperative cancellation primitives.
//!
//! A [`CapabilitySlot`] hands out monotonically increasing [`Capability`]
//! values. Only the most recently issued capability is current: async work
//! captures the capability it was started under and checks it with
//! [`CapabilitySlot::is_current`] before touching shared state. Issuing a new
//! capability, or calling [`CapabilitySlot::revoke`], turns every earlier one
//! into a no-op.
//!
//! [`DebounceTimer`] is the timer counterpart: re-arming it cancels the
//! previous deadline, and dropping it cancels whatever is pending.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Proof that a piece of async work was started under a given generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capability(u64);

/// Issues capabilities; only the latest one is current.
#[derive(Debug, Default)]
pub struct CapabilitySlot {
    current: AtomicU64,
}

impl CapabilitySlot {
    /// Creates a slot with no capability issued yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: AtomicU64::new(0),
        }
    }

    /// Issues a fresh capability, invalidating all previously issued ones.
    pub fn issue(&self) -> Capability {
        Capability(self.current.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Whether `capability` is still the latest one issued by this slot.
    #[must_use]
    pub fn is_current(&self, capability: Capability) -> bool {
        self.current.load(Ordering::Acquire) == capability.0
    }

    /// Invalidates every capability issued so far.
    pub fn revoke(&self) {
        self.current.fetch_add(1, Ordering::AcqRel);
    }
}

/// A cancellable, re-armable one-shot timer.
///
/// Each call to [`schedule`](Self::schedule) aborts the previously scheduled
/// callback, so the callback only runs after `delay` of quiescence.
#[derive(Debug, Default)]
pub struct DebounceTimer {
    pending: Option<JoinHandle<()>>,
}

impl DebounceTimer {
    /// Creates an idle timer.
    #[must_use]
    pub const fn new() -> Self {
        Self { pending: None }
    }

    /// Runs `callback` after `delay`, replacing any pending callback.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&mut self, delay: Duration, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback.await;
        }));
    }

    /// Cancels the pending callback, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    /// Whether a callback is scheduled and has not run yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
