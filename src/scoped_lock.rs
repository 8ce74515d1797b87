// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// RAII guard over a synchronization block's mutex. Wait and notify live on
// the guard so that "wait without holding the lock" cannot be written.

use std::fmt;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::condition::LockedConditionVariable;
use crate::error::Result;

/// Holds the block's mutex until dropped, on every exit path including unwind.
///
/// `!Send`: a pthread mutex must be unlocked by the thread that locked it.
pub struct ScopedLock<'a> {
    cv: &'a LockedConditionVariable,
    _not_send: PhantomData<*const ()>,
}

impl fmt::Debug for ScopedLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedLock")
            .field("segment", &self.cv.segment().name())
            .field("block", &self.cv.name())
            .finish()
    }
}

impl<'a> ScopedLock<'a> {
    /// Wrap a mutex the caller has just acquired.
    pub(crate) fn new(cv: &'a LockedConditionVariable) -> Self {
        Self {
            cv,
            _not_send: PhantomData,
        }
    }

    /// Atomically release the mutex, block until notified, re-acquire.
    ///
    /// Spurious wakeups happen: re-check your predicate, or use
    /// [`wait_while`](Self::wait_while).
    pub fn wait(&mut self) -> Result<()> {
        trace!(block = self.cv.name(), "wait");
        self.cv.block().wait(None, self.cv.name())?;
        Ok(())
    }

    /// [`wait`](Self::wait) with a bound. Returns `false` if it timed out.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<bool> {
        trace!(block = self.cv.name(), ?timeout, "wait_timeout");
        self.cv.block().wait(Some(timeout), self.cv.name())
    }

    /// Wait while `pred()` holds and the block has not been terminated.
    /// The predicate is evaluated under the lock before and after every wait.
    ///
    /// Returns `true` if the wait ended because of [`terminate`](Self::terminate).
    pub fn wait_while<F>(&mut self, mut pred: F) -> Result<bool>
    where
        F: FnMut() -> bool,
    {
        while !self.is_terminated() && pred() {
            self.wait()?;
        }
        Ok(self.is_terminated())
    }

    /// [`wait_while`](Self::wait_while) bounded by `timeout` overall.
    /// `Ok(None)` on timeout, otherwise `Ok(Some(terminated))`. A timeout too
    /// large to represent waits without a bound.
    pub fn wait_while_timeout<F>(&mut self, timeout: Duration, mut pred: F) -> Result<Option<bool>>
    where
        F: FnMut() -> bool,
    {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait_while(pred).map(Some);
        };
        while !self.is_terminated() && pred() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() || !self.wait_timeout(left)? {
                if self.is_terminated() || !pred() {
                    break;
                }
                return Ok(None);
            }
        }
        Ok(Some(self.is_terminated()))
    }

    /// Wake at most one waiter. No-op if nobody waits.
    pub fn notify_one(&self) -> Result<()> {
        self.cv.notify_one()
    }

    /// Wake every waiter. No-op if nobody waits.
    pub fn notify_all(&self) -> Result<()> {
        self.cv.notify_all()
    }

    /// Mark the block terminated and wake every waiter.
    pub fn terminate(&self) -> Result<()> {
        self.cv.block().set_terminated();
        trace!(block = self.cv.name(), "terminate");
        self.cv.notify_all()
    }

    pub fn is_terminated(&self) -> bool {
        self.cv.is_terminated()
    }
}

impl Drop for ScopedLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.cv.block().unlock(self.cv.name()) {
            warn!(block = self.cv.name(), error = %e, "unlock failed");
        }
    }
}
