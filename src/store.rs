// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named value store: typed 8-byte atomic cells in a segment, addressed by key.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Result, SyncError};
use crate::registry::{Intent, SegmentRegistry};
use crate::segment::{EntryKind, Segment};

const CELL_SIZE: usize = std::mem::size_of::<AtomicU64>();

/// Typed cells (bool, i64, f64) stored in a segment.
///
/// Each read or write is one atomic operation on one cell. Nothing ties two
/// cells together: state spanning several keys must be read and written
/// under the same [`LockedConditionVariable`](crate::LockedConditionVariable)
/// lock by every participant.
///
/// Reading a key that was never written returns the type's default
/// (`false`, `0`, `0.0`) and does not create the cell. Writing creates it.
/// Using a key with a different type than it was created with fails with
/// [`SyncError::KindMismatch`].
#[derive(Debug, Clone)]
pub struct NamedValueStore {
    segment: Arc<Segment>,
}

impl NamedValueStore {
    pub fn new(segment: Arc<Segment>) -> Self {
        Self { segment }
    }

    /// Store over an existing segment, resolved through the process registry.
    pub fn open(segment_name: &str) -> Result<Self> {
        let segment = SegmentRegistry::global().resolve(segment_name, Intent::Open)?;
        Ok(Self::new(segment))
    }

    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    fn cell(&self, key: &str, kind: EntryKind) -> Result<Option<&AtomicU64>> {
        match self.segment.lookup_sized(key, kind, CELL_SIZE, CELL_SIZE) {
            // Safety: the entry was checked to be CELL_SIZE bytes, 8-aligned,
            // inside the mapping held alive by `self.segment`.
            Ok(p) => Ok(Some(unsafe { &*(p.as_ptr() as *const AtomicU64) })),
            Err(SyncError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn cell_or_create(&self, key: &str, kind: EntryKind) -> Result<&AtomicU64> {
        let p = self.segment.lookup_or_allocate(key, kind, CELL_SIZE, CELL_SIZE)?;
        // Safety: as in `cell`.
        Ok(unsafe { &*(p.as_ptr() as *const AtomicU64) })
    }

    /// Whether any cell (of any type) exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        [EntryKind::Bool, EntryKind::I64, EntryKind::F64]
            .into_iter()
            .any(|kind| matches!(self.cell(key, kind), Ok(Some(_))))
    }

    pub fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.cell_or_create(key, EntryKind::Bool)?
            .store(value as u64, Ordering::Release);
        Ok(())
    }

    pub fn try_get_bool(&self, key: &str) -> Result<Option<bool>> {
        Ok(self
            .cell(key, EntryKind::Bool)?
            .map(|c| c.load(Ordering::Acquire) != 0))
    }

    /// `false` if the key was never set.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        Ok(self.try_get_bool(key)?.unwrap_or(false))
    }

    pub fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.cell_or_create(key, EntryKind::I64)?
            .store(value as u64, Ordering::Release);
        Ok(())
    }

    pub fn try_get_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self
            .cell(key, EntryKind::I64)?
            .map(|c| c.load(Ordering::Acquire) as i64))
    }

    /// `0` if the key was never set.
    pub fn get_i64(&self, key: &str) -> Result<i64> {
        Ok(self.try_get_i64(key)?.unwrap_or(0))
    }

    /// Atomically add `delta` (wrapping) and return the previous value.
    pub fn fetch_add_i64(&self, key: &str, delta: i64) -> Result<i64> {
        let prev = self
            .cell_or_create(key, EntryKind::I64)?
            .fetch_add(delta as u64, Ordering::AcqRel);
        Ok(prev as i64)
    }

    pub fn set_f64(&self, key: &str, value: f64) -> Result<()> {
        self.cell_or_create(key, EntryKind::F64)?
            .store(value.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn try_get_f64(&self, key: &str) -> Result<Option<f64>> {
        Ok(self
            .cell(key, EntryKind::F64)?
            .map(|c| f64::from_bits(c.load(Ordering::Acquire))))
    }

    /// `0.0` if the key was never set.
    pub fn get_f64(&self, key: &str) -> Result<f64> {
        Ok(self.try_get_f64(key)?.unwrap_or(0.0))
    }
}

/// Write a boolean cell in `segment_name` (which must already exist).
pub fn set_bool(segment_name: &str, key: &str, value: bool) -> Result<()> {
    NamedValueStore::open(segment_name)?.set_bool(key, value)
}

/// Read a boolean cell in `segment_name`; `false` if never set.
pub fn get_bool(segment_name: &str, key: &str) -> Result<bool> {
    NamedValueStore::open(segment_name)?.get_bool(key)
}

pub fn set_i64(segment_name: &str, key: &str, value: i64) -> Result<()> {
    NamedValueStore::open(segment_name)?.set_i64(key, value)
}

pub fn get_i64(segment_name: &str, key: &str) -> Result<i64> {
    NamedValueStore::open(segment_name)?.get_i64(key)
}

pub fn set_f64(segment_name: &str, key: &str, value: f64) -> Result<()> {
    NamedValueStore::open(segment_name)?.set_f64(key, value)
}

pub fn get_f64(segment_name: &str, key: &str) -> Result<f64> {
    NamedValueStore::open(segment_name)?.get_f64(key)
}
