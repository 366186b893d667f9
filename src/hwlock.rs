// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Engine arbitration.
//!
//! The ring registers are a single shared resource, possibly also driven by a
//! remote processor. [`HwLock`] pairs an in-process mutex with an optional
//! hardware spinlock; the returned guard holds both and releases them in
//! reverse order when dropped.

use crate::error::{McpError, McpResult};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

/// Default back-off between lock attempts.
pub const DEFAULT_HWLOCK_RETRY: Duration = Duration::from_micros(100);

/// Cross-processor mutual exclusion primitive.
pub trait HwSpinlock: Send + Sync {
    /// Try to take the lock once. Returns true on success.
    fn try_lock(&self) -> bool;

    /// Release a lock taken with `try_lock`.
    fn unlock(&self);
}

/// Wake-up request for a caller blocked on the engine lock.
///
/// Each [`raise`](Self::raise) aborts at most one pending wait; a wait that
/// observes it returns [`McpError::LockAcquisitionInterrupted`].
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Consume a pending interrupt.
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// State `T` guarded by the engine mutex and, optionally, a hw spinlock.
pub struct HwLock<T> {
    state: Mutex<T>,
    hwlock: Option<Arc<dyn HwSpinlock>>,
    retry: Duration,
}

impl<T> HwLock<T> {
    pub fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            hwlock: None,
            retry: DEFAULT_HWLOCK_RETRY,
        }
    }

    pub fn set_hwspinlock(&mut self, lock: Arc<dyn HwSpinlock>) {
        self.hwlock = Some(lock);
    }

    pub fn set_retry(&mut self, retry: Duration) {
        self.retry = retry;
    }

    pub fn has_hwspinlock(&self) -> bool {
        self.hwlock.is_some()
    }

    /// Block until both locks are held.
    ///
    /// Both waits poll every `retry` and give up when `interrupt` is raised;
    /// an interrupted hardware spinlock wait releases the mutex before
    /// returning.
    pub fn acquire(&self, interrupt: &Interrupt) -> McpResult<HwLockGuard<'_, T>> {
        if interrupt.take() {
            return Err(McpError::LockAcquisitionInterrupted);
        }

        let state = loop {
            match self.state.try_lock() {
                Ok(state) => break state,
                // A panic while holding the lock cannot leave the hardware in
                // a state the next submission does not re-program from scratch.
                Err(TryLockError::Poisoned(e)) => break e.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    if interrupt.take() {
                        return Err(McpError::LockAcquisitionInterrupted);
                    }
                    std::thread::sleep(self.retry);
                }
            }
        };

        let Some(hw) = self.hwlock.as_deref() else {
            return Ok(HwLockGuard { state, hwlock: None });
        };

        loop {
            if hw.try_lock() {
                return Ok(HwLockGuard {
                    state,
                    hwlock: Some(hw),
                });
            }
            if interrupt.take() {
                drop(state);
                return Err(McpError::LockAcquisitionInterrupted);
            }
            std::thread::sleep(self.retry);
        }
    }
}

/// Proof that the engine is exclusively held.
pub struct HwLockGuard<'a, T> {
    state: MutexGuard<'a, T>,
    hwlock: Option<&'a dyn HwSpinlock>,
}

impl<T> Deref for HwLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.state
    }
}

impl<T> DerefMut for HwLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.state
    }
}

impl<T> Drop for HwLockGuard<'_, T> {
    fn drop(&mut self) {
        // The mutex guard field drops after this, so the hw lock goes first.
        if let Some(hw) = self.hwlock {
            hw.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Spinlock that is held by a "remote" owner until released by the test.
    #[derive(Default)]
    struct RemoteLock {
        held: AtomicBool,
        attempts: AtomicUsize,
        unlocks: AtomicUsize,
    }

    impl HwSpinlock for RemoteLock {
        fn try_lock(&self) -> bool {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            !self.held.swap(true, Ordering::SeqCst)
        }
        fn unlock(&self) {
            self.unlocks.fetch_add(1, Ordering::SeqCst);
            self.held.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_guard_releases_both_locks() {
        let hw = Arc::new(RemoteLock::default());
        let mut lock = HwLock::new(0u32);
        lock.set_hwspinlock(hw.clone());

        {
            let mut g = lock.acquire(&Interrupt::new()).unwrap();
            *g += 1;
            assert!(hw.held.load(Ordering::SeqCst));
        }
        assert!(!hw.held.load(Ordering::SeqCst));
        assert_eq!(hw.unlocks.load(Ordering::SeqCst), 1);
        assert_eq!(*lock.acquire(&Interrupt::new()).unwrap(), 1);
    }

    #[test]
    fn test_interrupt_while_remote_holds_hwlock() {
        let hw = Arc::new(RemoteLock::default());
        hw.held.store(true, Ordering::SeqCst);

        let mut lock = HwLock::new(());
        lock.set_hwspinlock(hw.clone());
        lock.set_retry(Duration::from_micros(10));
        let lock = Arc::new(lock);

        let irq = Interrupt::new();
        let waiter = {
            let lock = Arc::clone(&lock);
            let irq = irq.clone();
            std::thread::spawn(move || lock.acquire(&irq).map(|_| ()))
        };

        while hw.attempts.load(Ordering::SeqCst) < 3 {
            std::thread::yield_now();
        }
        irq.raise();
        let res = waiter.join().unwrap();
        assert!(matches!(res, Err(McpError::LockAcquisitionInterrupted)));

        // The mutex must not be leaked by the interrupted waiter
        assert!(lock.state.try_lock().is_ok());
        assert_eq!(hw.unlocks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pending_interrupt_is_consumed_once() {
        let lock = HwLock::new(());
        let irq = Interrupt::new();
        irq.raise();
        assert!(lock.acquire(&irq).is_err());
        assert!(!irq.is_raised());
        assert!(lock.acquire(&irq).is_ok());
    }
}
