// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Spin lock that lives inside a segment header (guards the directory) and
// the adaptive backoff shared by every polling loop in the crate.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Adaptive backoff.
///
/// - k < 4:  busy spin (do nothing)
/// - k < 16: CPU pause hint
/// - k < 32: thread yield
/// - k >= 32: sleep 1ms
#[inline]
pub(crate) fn adaptive_yield(k: &mut u32) {
    if *k < 4 {
        // busy spin
    } else if *k < 16 {
        std::hint::spin_loop();
    } else if *k < 32 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_millis(1));
        return;
    }
    *k += 1;
}

/// Run `attempt` until it yields `Some`, backing off between tries.
///
/// Returns `None` once `timeout` has elapsed; `timeout = None`, or one too
/// large to represent as a deadline, never gives up.
pub(crate) fn poll_until<T, F>(timeout: Option<Duration>, mut attempt: F) -> Option<T>
where
    F: FnMut() -> Option<T>,
{
    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
    let mut k = 0u32;
    loop {
        if let Some(v) = attempt() {
            return Some(v);
        }
        if let Some(d) = deadline {
            if Instant::now() >= d {
                return None;
            }
        }
        adaptive_yield(&mut k);
    }
}

/// A spin lock with adaptive backoff.
///
/// `#[repr(C)]` over a single `AtomicU32` so it can be placed in shared
/// memory and used by several processes. Zeroed memory is an unlocked lock.
/// A process that dies while holding it leaves it locked.
#[repr(C)]
pub struct SpinLock {
    lc: AtomicU32,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            lc: AtomicU32::new(0),
        }
    }

    pub fn lock(&self) -> SpinGuard<'_> {
        let mut k = 0u32;
        while self.lc.swap(1, Ordering::Acquire) != 0 {
            adaptive_yield(&mut k);
        }
        SpinGuard { lock: self }
    }

    fn unlock(&self) {
        self.lc.store(0, Ordering::Release);
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the spin lock on drop.
pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
