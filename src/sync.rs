//! Locking primitives
//!
//! Two kinds of locks are used across the crate:
//! - `spin::Mutex` / `spin::RwLock` for short critical sections (tables,
//!   counters, flags)
//! - [`SleepLock`] for sections that block while held, such as a device
//!   occupying its controller for a simulated transfer
//!
//! A poisoned `SleepLock` is recovered rather than propagated; the data it
//! guards is always left consistent before any operation that can panic.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, WaitTimeoutResult};
use std::time::Duration;

// ============================================================================
// Sleep Lock
// ============================================================================

/// A mutex whose waiters sleep instead of spinning
#[derive(Debug, Default)]
pub struct SleepLock<T> {
    inner: Mutex<T>,
}

impl<T> SleepLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquire the lock, sleeping until available
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume the lock and return the guarded value
    pub fn into_inner(self) -> T {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Event (condition variable paired with a SleepLock)
// ============================================================================

/// Wait/notify channel for a [`SleepLock`]
#[derive(Debug, Default)]
pub struct Event {
    cond: Condvar,
}

impl Event {
    pub const fn new() -> Self {
        Self {
            cond: Condvar::new(),
        }
    }

    /// Sleep on `guard` until notified or `timeout` elapses
    pub fn wait_timeout<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> (MutexGuard<'a, T>, WaitTimeoutResult) {
        self.cond
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake one sleeper
    pub fn notify_one(&self) {
        self.cond.notify_one();
    }

    /// Wake every sleeper
    pub fn notify_all(&self) {
        self.cond.notify_all();
    }
}
