// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Synchronization block: one process-shared pthread mutex and condition
// variable living in a segment directory entry, plus a ready marker and a
// termination flag.

use std::cell::UnsafeCell;
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::{Result, SyncError};
use crate::platform::posix;
use crate::segment::{EntryKind, Segment};

/// Value of `ready` once both pthread objects are initialised.
const READY: u32 = 0x5244_5921;

/// Value of `ready` when initialisation failed. The entry cannot be freed,
/// so the name stays unusable until the segment is removed.
const FAILED: u32 = 0x4641_494c;

#[repr(C, align(64))]
pub(crate) struct SyncBlock {
    ready: AtomicU32,
    terminated: AtomicU32,
    mutex: UnsafeCell<libc::pthread_mutex_t>,
    cond: UnsafeCell<libc::pthread_cond_t>,
}

impl SyncBlock {
    /// Allocate `name` in `segment` and initialise it. Rejects a name that
    /// already exists so a live block is never re-initialised.
    ///
    /// If the pthread objects fail to initialise, the entry is marked failed
    /// and [`SyncBlock::bind`] reports it instead of `NotInitialized`.
    pub(crate) fn init(segment: &Segment, name: &str) -> Result<NonNull<SyncBlock>> {
        let raw = segment.allocate(
            name,
            EntryKind::SyncBlock,
            std::mem::size_of::<SyncBlock>(),
            std::mem::align_of::<SyncBlock>(),
        )?;
        let block = raw.cast::<SyncBlock>();
        let b = unsafe { block.as_ref() };

        // Safety: freshly allocated entry; nobody can use it before `ready`.
        let init = unsafe { posix::mutex_init(b.mutex.get()).and_then(|_| posix::cond_init(b.cond.get())) };
        if let Err(e) = init {
            error!(segment = segment.name(), block = name, error = %e, "synchronization block init failed");
            b.ready.store(FAILED, Ordering::Release);
            return Err(SyncError::Io(e));
        }
        b.ready.store(READY, Ordering::Release);

        debug!(segment = segment.name(), block = name, "initialised synchronization block");
        Ok(block)
    }

    /// Bind an existing block. `NotFound` if absent, `NotInitialized` if its
    /// creator has not finished [`SyncBlock::init`], `Io` if that init failed.
    pub(crate) fn bind(segment: &Segment, name: &str) -> Result<NonNull<SyncBlock>> {
        let block = segment
            .lookup_sized(
                name,
                EntryKind::SyncBlock,
                std::mem::size_of::<SyncBlock>(),
                std::mem::align_of::<SyncBlock>(),
            )?
            .cast::<SyncBlock>();
        match unsafe { block.as_ref() }.ready.load(Ordering::Acquire) {
            READY => {}
            FAILED => {
                return Err(SyncError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    format!(
                        "synchronization block {name:?} in segment {} failed to initialise",
                        segment.name()
                    ),
                )))
            }
            _ => {
                return Err(SyncError::NotInitialized(format!(
                    "synchronization block {name:?} in segment {}",
                    segment.name()
                )))
            }
        }
        debug!(segment = segment.name(), block = name, "bound synchronization block");
        Ok(block)
    }

    pub(crate) fn lock(&self, what: &str) -> Result<()> {
        let r = unsafe { posix::mutex_lock(self.mutex.get()) };
        self.acquired(r.map(|_| true), what).map(|_| ())
    }

    pub(crate) fn try_lock(&self, what: &str) -> Result<bool> {
        let r = unsafe { posix::mutex_try_lock(self.mutex.get()) };
        self.acquired(r, what)
    }

    pub(crate) fn lock_timeout(&self, timeout: Duration, what: &str) -> Result<bool> {
        let r = unsafe { posix::mutex_lock_timeout(self.mutex.get(), timeout) };
        self.acquired(r, what)
    }

    /// Translate a lock attempt. On `EOWNERDEAD` the caller now owns a mutex
    /// whose previous holder died; it is released without being marked
    /// consistent, which leaves it permanently unrecoverable.
    fn acquired(&self, r: io::Result<bool>, what: &str) -> Result<bool> {
        match r {
            Ok(got) => Ok(got),
            Err(e) => {
                let err = SyncError::from_errno(e.raw_os_error().unwrap_or(0), what);
                if is_owner_dead(&e) {
                    warn!(block = what, "lock owner died; block is no longer usable");
                    let _ = unsafe { posix::mutex_unlock(self.mutex.get()) };
                }
                Err(err)
            }
        }
    }

    pub(crate) fn unlock(&self, what: &str) -> Result<()> {
        unsafe { posix::mutex_unlock(self.mutex.get()) }
            .map_err(|e| SyncError::from_errno(e.raw_os_error().unwrap_or(0), what))
    }

    /// The caller must hold the mutex. `Ok(false)` on timeout.
    ///
    /// On `EOWNERDEAD` the mutex is held again when this returns the error;
    /// the caller's guard releases it.
    pub(crate) fn wait(&self, timeout: Option<Duration>, what: &str) -> Result<bool> {
        unsafe { posix::cond_wait(self.cond.get(), self.mutex.get(), timeout) }.map_err(|e| {
            if is_owner_dead(&e) {
                warn!(block = what, "lock owner died during wait; block is no longer usable");
            }
            SyncError::from_errno(e.raw_os_error().unwrap_or(0), what)
        })
    }

    pub(crate) fn notify_one(&self) -> Result<()> {
        unsafe { posix::cond_signal(self.cond.get()) }.map_err(SyncError::Io)
    }

    pub(crate) fn notify_all(&self) -> Result<()> {
        unsafe { posix::cond_broadcast(self.cond.get()) }.map_err(SyncError::Io)
    }

    pub(crate) fn set_terminated(&self) {
        self.terminated.store(1, Ordering::Release);
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire) != 0
    }
}

#[cfg(not(target_os = "macos"))]
fn is_owner_dead(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EOWNERDEAD)
}

#[cfg(target_os = "macos")]
fn is_owner_dead(_e: &io::Error) -> bool {
    false
}
