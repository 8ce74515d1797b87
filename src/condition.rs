// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Locked condition variable shared between processes: a named
// synchronization block inside a named segment.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::config;
use crate::error::{Result, SyncError};
use crate::registry::{Intent, SegmentRegistry};
use crate::scoped_lock::ScopedLock;
use crate::segment::Segment;
use crate::spin_lock::poll_until;
use crate::sync_block::SyncBlock;

/// A mutex + condition variable pair usable across processes.
///
/// The creator initialises the block once; attachers bind to it. Locking is
/// scoped through [`ScopedLock`], which also carries `wait`. Waiters are
/// woken in no particular order: fairness is whatever the OS provides.
///
/// If a process dies while holding the lock, every later lock or wait on
/// the block fails with [`SyncError::OwnerDead`] (on platforms with robust
/// mutexes; elsewhere the block stays locked). The block is not recovered.
pub struct LockedConditionVariable {
    segment: Arc<Segment>,
    block: NonNull<SyncBlock>,
    name: String,
    is_creator: bool,
}

// Safety: the block lives in a mapping kept alive by `segment`, and every
// access to it goes through atomics or process-shared pthread objects.
unsafe impl Send for LockedConditionVariable {}
unsafe impl Sync for LockedConditionVariable {}

impl fmt::Debug for LockedConditionVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedConditionVariable")
            .field("segment", &self.segment.name())
            .field("name", &self.name)
            .field("is_creator", &self.is_creator)
            .finish()
    }
}

impl LockedConditionVariable {
    /// Create (`is_creator = true`) or bind (`false`) the block `cv_name` in
    /// segment `segment_name`, resolved through the process registry.
    ///
    /// The creator creates the segment if needed, sized from
    /// [`config::global`]. An attacher gets `NotFound` if the segment or
    /// block is absent and `NotInitialized` if the block is not ready yet.
    ///
    /// If the creator's pthread initialisation fails, `cv_name` stays taken
    /// in that segment: attachers get an `Io` error (not `NotInitialized`)
    /// and the segment must be removed before the name can be reused.
    pub fn new(segment_name: &str, cv_name: &str, is_creator: bool) -> Result<Self> {
        let intent = if is_creator {
            Intent::CreateOrOpen(config::global().segment_size)
        } else {
            Intent::Open
        };
        let segment = SegmentRegistry::global().resolve(segment_name, intent)?;
        Self::with_segment(segment, cv_name, is_creator)
    }

    /// `new(segment_name, cv_name, true)`.
    pub fn create(segment_name: &str, cv_name: &str) -> Result<Self> {
        Self::new(segment_name, cv_name, true)
    }

    /// `new(segment_name, cv_name, false)`.
    pub fn attach(segment_name: &str, cv_name: &str) -> Result<Self> {
        Self::new(segment_name, cv_name, false)
    }

    /// Bind to a segment handle the caller already holds.
    ///
    /// Within one process, all users of a block must share one mapping of
    /// its segment; prefer [`new`](Self::new), which goes through the registry.
    pub fn with_segment(segment: Arc<Segment>, cv_name: &str, is_creator: bool) -> Result<Self> {
        let block = if is_creator {
            SyncBlock::init(&segment, cv_name)?
        } else {
            SyncBlock::bind(&segment, cv_name)?
        };
        Ok(Self {
            segment,
            block,
            name: cv_name.to_string(),
            is_creator,
        })
    }

    /// Attach, retrying while the segment or block does not exist or is not
    /// initialised yet. `timeout = None` retries forever.
    pub fn attach_timeout(
        segment_name: &str,
        cv_name: &str,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        debug!(segment = segment_name, block = cv_name, ?timeout, "attaching");
        let found = poll_until(timeout, || match Self::attach(segment_name, cv_name) {
            Err(e) if e.is_not_ready() => None,
            other => Some(other),
        });
        found.unwrap_or_else(|| {
            Err(SyncError::TimedOut(format!(
                "synchronization block {cv_name:?} in segment {segment_name}"
            )))
        })
    }

    /// Acquire the block's mutex for the lifetime of the returned guard.
    ///
    /// Not reentrant: locking again from the thread that holds it fails with
    /// `UsageError` instead of deadlocking.
    pub fn lock_scope(&self) -> Result<ScopedLock<'_>> {
        self.block().lock(&self.name)?;
        Ok(ScopedLock::new(self))
    }

    /// Acquire without blocking; `Ok(None)` if the mutex is held elsewhere.
    pub fn try_lock_scope(&self) -> Result<Option<ScopedLock<'_>>> {
        if self.block().try_lock(&self.name)? {
            Ok(Some(ScopedLock::new(self)))
        } else {
            Ok(None)
        }
    }

    /// Acquire within `timeout`; `Ok(None)` if it expired.
    pub fn lock_scope_timeout(&self, timeout: Duration) -> Result<Option<ScopedLock<'_>>> {
        if self.block().lock_timeout(timeout, &self.name)? {
            Ok(Some(ScopedLock::new(self)))
        } else {
            Ok(None)
        }
    }

    /// Wake at most one waiter; a no-op when nobody waits.
    ///
    /// Does not require the lock, though notifying under
    /// [`lock_scope`](Self::lock_scope) is what keeps predicate updates and
    /// wakeups ordered.
    pub fn notify_one(&self) -> Result<()> {
        trace!(block = %self.name, "notify_one");
        self.block().notify_one()
    }

    /// Wake every waiter; a no-op when nobody waits.
    pub fn notify_all(&self) -> Result<()> {
        trace!(block = %self.name, "notify_all");
        self.block().notify_all()
    }

    /// Mark the block terminated and wake every waiter, under the lock.
    ///
    /// Replaces the "clear the running flag, then remember to notify once
    /// more" sequence: waiters in [`ScopedLock::wait_while`] observe the flag
    /// and return.
    pub fn terminate(&self) -> Result<()> {
        let guard = self.lock_scope()?;
        guard.terminate()
    }

    pub fn is_terminated(&self) -> bool {
        self.block().is_terminated()
    }

    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_creator(&self) -> bool {
        self.is_creator
    }

    pub(crate) fn block(&self) -> &SyncBlock {
        // Safety: points into `self.segment`'s mapping, which outlives self.
        unsafe { self.block.as_ref() }
    }
}
