// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Process-local segment cache.
//
// All threads within the same process that use the same synchronization
// block MUST go through the same mmap. macOS's pthread implementation
// stores internal pointers relative to the virtual address used for
// pthread_mutex_init, so a second mmap of the same physical page at a
// different address causes EINVAL on pthread_mutex_lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, SyncError};
use crate::segment::Segment;
use crate::spin_lock::poll_until;

/// How [`SegmentRegistry::resolve`] maps a segment that is not cached yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Attach; fail if the segment does not exist.
    Open,
    /// Create with this many usable bytes; fail if it exists.
    Create(usize),
    /// Create if missing, attach if it already exists.
    CreateOrOpen(usize),
}

/// Maps segment names to the handle this process already holds.
///
/// Not synchronised across processes; each process has its own.
#[derive(Default)]
pub struct SegmentRegistry {
    map: Mutex<HashMap<String, Arc<Segment>>>,
}

impl SegmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static SegmentRegistry {
        static REGISTRY: OnceLock<SegmentRegistry> = OnceLock::new();
        REGISTRY.get_or_init(SegmentRegistry::new)
    }

    /// Cache key for `name`. `"n"` and `"/n"` name the same OS object and
    /// must share one mapping.
    fn key(name: &str) -> &str {
        name.strip_prefix('/').unwrap_or(name)
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<String, Arc<Segment>>> {
        // A panic while holding the map cannot leave it half-updated.
        self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the cached handle for `name`, mapping one per `intent` if
    /// there is none. Cached handles whose segment has been destroyed are
    /// evicted and resolved afresh.
    pub fn resolve(&self, name: &str, intent: Intent) -> Result<Arc<Segment>> {
        let key = Self::key(name);
        let mut map = self.lock_map();
        if let Some(seg) = map.get(key) {
            if !seg.is_destroyed() {
                if let Intent::Create(_) = intent {
                    return Err(SyncError::AlreadyExists(format!("segment {name}")));
                }
                return Ok(Arc::clone(seg));
            }
            debug!(segment = name, "evicting destroyed segment from registry");
            map.remove(key);
        }

        let seg = match intent {
            Intent::Open => Segment::open(name)?,
            Intent::Create(size) => Segment::create(name, size)?,
            Intent::CreateOrOpen(size) => match Segment::create(name, size) {
                Err(SyncError::AlreadyExists(_)) => Segment::open(name)?,
                other => other?,
            },
        };
        let seg = Arc::new(seg);
        map.insert(key.to_string(), Arc::clone(&seg));
        Ok(seg)
    }

    /// Drop this process's cached handle. The mapping goes away once every
    /// other `Arc` to it is gone. Returns whether an entry was cached.
    pub fn release(&self, name: &str) -> bool {
        self.lock_map().remove(Self::key(name)).is_some()
    }

    /// Destroy a segment this process created, and evict it.
    pub fn destroy(&self, name: &str) -> Result<()> {
        let key = Self::key(name);
        let mut map = self.lock_map();
        let seg = map.get(key).ok_or_else(|| {
            SyncError::NotFound(format!("segment {name} is not resolved in this process"))
        })?;
        seg.destroy()?;
        map.remove(key);
        Ok(())
    }

    /// Resolve `name` with [`Intent::Open`], retrying while it does not exist
    /// or is not initialised. `timeout = None` waits forever.
    pub fn wait_for_segment(&self, name: &str, timeout: Option<Duration>) -> Result<Arc<Segment>> {
        debug!(segment = name, ?timeout, "waiting for segment");
        let found = poll_until(timeout, || match self.resolve(name, Intent::Open) {
            Err(e) if e.is_not_ready() => None,
            other => Some(other),
        });
        found.unwrap_or_else(|| Err(SyncError::TimedOut(format!("segment {name}"))))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock_map().contains_key(Self::key(name))
    }

    pub fn len(&self) -> usize {
        self.lock_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_map().is_empty()
    }

    /// Drop every cached handle.
    pub fn clear(&self) {
        self.lock_map().clear();
    }
}
