// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named shared memory segment with a self-describing header and a small
// directory of named allocations (synchronization blocks, value cells).

use std::fmt;
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use tracing::debug;

use crate::error::{Result, SyncError};
use crate::platform::{posix, PlatformShm};
use crate::shm_name;
use crate::spin_lock::SpinLock;

const MAGIC: u64 = u64::from_le_bytes(*b"SHMSYNC1");
const LAYOUT_VERSION: u32 = 1;

/// Number of named allocations a segment can hold.
pub const MAX_ENTRIES: usize = 64;

/// Longest directory key (synchronization block name or value key), in bytes.
pub const MAX_KEY_LEN: usize = 48;

const ENTRY_VACANT: u32 = 0;
const ENTRY_LIVE: u32 = 1;

/// What a directory entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EntryKind {
    SyncBlock = 1,
    Bool = 2,
    I64 = 3,
    F64 = 4,
}

impl EntryKind {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::SyncBlock),
            2 => Some(Self::Bool),
            3 => Some(Self::I64),
            4 => Some(Self::F64),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::SyncBlock => "synchronization block",
            Self::Bool => "bool",
            Self::I64 => "i64",
            Self::F64 => "f64",
        }
    }
}

#[repr(C)]
struct DirEntry {
    state: AtomicU32,
    kind: AtomicU32,
    key_len: AtomicU32,
    _pad: u32,
    offset: AtomicU64,
    len: AtomicU64,
    key: [AtomicU8; MAX_KEY_LEN],
}

impl DirEntry {
    fn key_eq(&self, key: &[u8]) -> bool {
        let len = self.key_len.load(Ordering::Relaxed) as usize;
        len == key.len()
            && key
                .iter()
                .zip(&self.key)
                .all(|(b, slot)| slot.load(Ordering::Relaxed) == *b)
    }
}

/// Header at offset 0 of every segment. Zeroed memory is "not initialized".
#[repr(C)]
struct Header {
    magic: AtomicU64,
    layout_version: AtomicU32,
    creator_pid: AtomicU32,
    data_size: AtomicU64,
    destroyed: AtomicU32,
    attached: AtomicU32,
    dir_lock: SpinLock,
    _pad: u32,
    next_offset: AtomicU64,
    entries: [DirEntry; MAX_ENTRIES],
}

const fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) / align * align
}

/// `round_up` for caller-supplied values; `None` on overflow.
fn checked_round_up(n: usize, align: usize) -> Option<usize> {
    n.checked_add(align - 1).map(|v| v / align * align)
}

/// Offset of the data region (allocations) from the start of the mapping.
pub const DATA_OFFSET: usize = round_up(std::mem::size_of::<Header>(), 64);

/// Snapshot of a segment's occupancy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub name: String,
    /// Usable bytes in the data region.
    pub size: usize,
    pub used: usize,
    pub free: usize,
    /// Live directory entries.
    pub entries: usize,
    /// Mappings currently open across all processes.
    pub attached: u32,
    pub creator_pid: u32,
    pub destroyed: bool,
}

impl fmt::Display for SegmentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "segment {}: size {} used {} free {} entries {} attached {} creator {}{}",
            self.name,
            self.size,
            self.used,
            self.free,
            self.entries,
            self.attached,
            self.creator_pid,
            if self.destroyed { " (destroyed)" } else { "" }
        )
    }
}

/// A named block of memory shared between processes.
///
/// Exactly one handle, the creator's, holds destruction rights. Dropping
/// any handle (or calling [`Segment::close`]) unmaps this process's view and
/// leaves the OS object alone.
pub struct Segment {
    shm: PlatformShm,
    name: String,
    is_creator: bool,
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("name", &self.name)
            .field("posix_name", &self.shm.name())
            .field("size", &self.size())
            .field("is_creator", &self.is_creator)
            .finish()
    }
}

impl Segment {
    /// Create a new segment with `size` usable bytes.
    ///
    /// The OS object is larger than `size`: it also holds the header.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        shm_name::validate(name)?;
        if size == 0 {
            return Err(SyncError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "segment size is 0",
            )));
        }
        let (data_size, total) = checked_round_up(size, 8)
            .and_then(|d| Some((d, d.checked_add(DATA_OFFSET)?)))
            .filter(|&(_, total)| libc::off_t::try_from(total).is_ok())
            .ok_or_else(|| {
                SyncError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("segment size {size} is too large"),
                ))
            })?;
        let shm = PlatformShm::create(name, total).map_err(|e| SyncError::from_shm_io(e, name))?;

        let seg = Self {
            shm,
            name: name.to_string(),
            is_creator: true,
        };
        let h = seg.header();
        h.layout_version.store(LAYOUT_VERSION, Ordering::Relaxed);
        h.creator_pid.store(posix::current_pid(), Ordering::Relaxed);
        h.data_size.store(data_size as u64, Ordering::Relaxed);
        h.attached.store(1, Ordering::Relaxed);
        h.magic.store(MAGIC, Ordering::Release);

        debug!(segment = name, size = data_size, "created segment");
        Ok(seg)
    }

    /// Attach to an existing segment.
    ///
    /// `NotFound` if no object has this name, `NotInitialized` if the
    /// creator has not published the header yet.
    pub fn open(name: &str) -> Result<Self> {
        shm_name::validate(name)?;
        let shm = PlatformShm::open(name, DATA_OFFSET).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                SyncError::NotInitialized(format!("segment {name}"))
            } else {
                SyncError::from_shm_io(e, name)
            }
        })?;

        let h = header_of(&shm);
        match h.magic.load(Ordering::Acquire) {
            0 => return Err(SyncError::NotInitialized(format!("segment {name}"))),
            MAGIC => {}
            other => {
                return Err(SyncError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{name} is not a shm_sync segment (magic {other:#x})"),
                )))
            }
        }
        let version = h.layout_version.load(Ordering::Relaxed);
        if version != LAYOUT_VERSION {
            return Err(SyncError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{name} has layout version {version}, expected {LAYOUT_VERSION}"),
            )));
        }
        let data_size = h.data_size.load(Ordering::Relaxed);
        let fits = usize::try_from(data_size)
            .ok()
            .and_then(|d| d.checked_add(DATA_OFFSET))
            .is_some_and(|total| total <= shm.mapped_size());
        if !fits {
            return Err(SyncError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{name} claims {data_size} data bytes but maps {}",
                    shm.mapped_size()
                ),
            )));
        }
        if h.destroyed.load(Ordering::Acquire) != 0 {
            return Err(SyncError::NotFound(format!("segment {name}")));
        }
        h.attached.fetch_add(1, Ordering::AcqRel);

        let seg = Self {
            shm,
            name: name.to_string(),
            is_creator: false,
        };
        debug!(segment = name, size = seg.size(), "opened segment");
        Ok(seg)
    }

    /// Unmap this process's view. Equivalent to dropping the handle.
    pub fn close(self) {
        drop(self);
    }

    /// Unlink the name so no process can open it again. Creator only.
    ///
    /// Views already mapped (in any process) stay usable until closed.
    pub fn destroy(&self) -> Result<()> {
        if !self.is_creator {
            return Err(SyncError::UsageError(format!(
                "segment {}: only the creator may destroy it",
                self.name
            )));
        }
        if self.header().destroyed.swap(1, Ordering::AcqRel) != 0 {
            return Err(SyncError::StaleHandle(self.name.clone()));
        }
        match self.shm.unlink() {
            Ok(()) => {}
            // Already removed by name; nothing left to unlink.
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => {}
            Err(e) => return Err(SyncError::Io(e)),
        }
        debug!(segment = %self.name, "destroyed segment");
        Ok(())
    }

    /// Unlink a segment by name without holding a handle, e.g. one left
    /// behind by a creator that crashed. Returns whether a name was removed.
    pub fn remove(name: &str) -> Result<bool> {
        shm_name::validate(name)?;
        match PlatformShm::unlink_by_name(name) {
            Ok(()) => {
                debug!(segment = name, "removed segment by name");
                Ok(true)
            }
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(false),
            Err(e) => Err(SyncError::Io(e)),
        }
    }

    /// Whether an initialized segment is reachable under `name` right now.
    pub fn exists(name: &str) -> bool {
        Segment::open(name).is_ok()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_creator(&self) -> bool {
        self.is_creator
    }

    /// Usable bytes in the data region.
    pub fn size(&self) -> usize {
        self.header().data_size.load(Ordering::Relaxed) as usize
    }

    /// Whether the creator has destroyed this segment.
    pub fn is_destroyed(&self) -> bool {
        self.header().destroyed.load(Ordering::Acquire) != 0
    }

    /// `StaleHandle` once the segment has been destroyed.
    pub fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(SyncError::StaleHandle(self.name.clone()));
        }
        Ok(())
    }

    pub fn info(&self) -> SegmentInfo {
        let h = self.header();
        let size = self.size();
        let used = (h.next_offset.load(Ordering::Acquire) as usize).min(size);
        let entries = h
            .entries
            .iter()
            .filter(|e| e.state.load(Ordering::Acquire) == ENTRY_LIVE)
            .count();
        SegmentInfo {
            name: self.name.clone(),
            size,
            used,
            free: size - used,
            entries,
            attached: h.attached.load(Ordering::Acquire),
            creator_pid: h.creator_pid.load(Ordering::Relaxed),
            destroyed: self.is_destroyed(),
        }
    }

    /// Reserve `len` bytes aligned to `align` under a new directory `key`.
    ///
    /// The returned memory is zeroed: it is carved from a freshly truncated
    /// object and entries are never freed.
    pub fn allocate(
        &self,
        key: &str,
        kind: EntryKind,
        len: usize,
        align: usize,
    ) -> Result<NonNull<u8>> {
        validate_key(key)?;
        if !align.is_power_of_two() {
            return Err(SyncError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("alignment {align} is not a power of two"),
            )));
        }
        self.ensure_live()?;

        let h = self.header();
        let _guard = h.dir_lock.lock();

        if let Some(entry) = self.find(key) {
            let found = EntryKind::from_raw(entry.kind.load(Ordering::Relaxed));
            return Err(SyncError::AlreadyExists(format!(
                "{} {key:?} in segment {}",
                found.map(EntryKind::label).unwrap_or("entry"),
                self.name
            )));
        }

        let slot = h
            .entries
            .iter()
            .find(|e| e.state.load(Ordering::Relaxed) == ENTRY_VACANT)
            .ok_or(SyncError::DirectoryFull(MAX_ENTRIES))?;

        let size = self.size();
        let next = h.next_offset.load(Ordering::Relaxed) as usize;
        let offset = checked_round_up(next, align).unwrap_or(usize::MAX);
        match offset.checked_add(len) {
            Some(end) if end <= size => {}
            _ => {
                return Err(SyncError::OutOfSpace {
                    requested: len,
                    available: size.saturating_sub(offset),
                })
            }
        }

        slot.kind.store(kind as u32, Ordering::Relaxed);
        slot.key_len.store(key.len() as u32, Ordering::Relaxed);
        for (dst, b) in slot.key.iter().zip(key.as_bytes()) {
            dst.store(*b, Ordering::Relaxed);
        }
        slot.offset.store(offset as u64, Ordering::Relaxed);
        slot.len.store(len as u64, Ordering::Relaxed);
        h.next_offset.store((offset + len) as u64, Ordering::Release);
        slot.state.store(ENTRY_LIVE, Ordering::Release);

        debug!(segment = %self.name, key, kind = kind.label(), offset, len, "allocated entry");
        Ok(self.data_ptr(offset))
    }

    /// Find the allocation named `key`, which must be of `kind`.
    pub fn lookup(&self, key: &str, kind: EntryKind) -> Result<NonNull<u8>> {
        self.lookup_entry(key, kind).map(|(p, _)| p)
    }

    /// [`lookup`](Self::lookup), also requiring the entry to hold at least
    /// `len` bytes aligned to `align`. Typed views over an entry go through
    /// this, since `allocate` accepts any layout for any kind.
    pub fn lookup_sized(
        &self,
        key: &str,
        kind: EntryKind,
        len: usize,
        align: usize,
    ) -> Result<NonNull<u8>> {
        let (p, entry_len) = self.lookup_entry(key, kind)?;
        if entry_len < len || align == 0 || p.as_ptr() as usize % align != 0 {
            return Err(SyncError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} {key:?} in segment {} is {entry_len} bytes at {:p}, expected {len} aligned to {align}",
                    kind.label(),
                    self.name,
                    p.as_ptr()
                ),
            )));
        }
        Ok(p)
    }

    fn lookup_entry(&self, key: &str, kind: EntryKind) -> Result<(NonNull<u8>, usize)> {
        validate_key(key)?;
        let entry = self.find(key).ok_or_else(|| {
            SyncError::NotFound(format!("{} {key:?} in segment {}", kind.label(), self.name))
        })?;
        let raw = entry.kind.load(Ordering::Relaxed);
        if raw != kind as u32 {
            return Err(SyncError::KindMismatch {
                key: key.to_string(),
                expected: kind.label(),
                found: EntryKind::from_raw(raw).map(EntryKind::label).unwrap_or("unknown"),
            });
        }
        let offset = entry.offset.load(Ordering::Relaxed) as usize;
        let len = entry.len.load(Ordering::Relaxed) as usize;
        Ok((self.data_ptr(offset), len))
    }

    /// [`lookup_sized`](Self::lookup_sized), allocating on first use.
    pub fn lookup_or_allocate(
        &self,
        key: &str,
        kind: EntryKind,
        len: usize,
        align: usize,
    ) -> Result<NonNull<u8>> {
        match self.lookup_sized(key, kind, len, align) {
            Err(SyncError::NotFound(_)) => match self.allocate(key, kind, len, align) {
                // Lost the race to another allocator; take theirs.
                Err(SyncError::AlreadyExists(_)) => self.lookup_sized(key, kind, len, align),
                other => other,
            },
            other => other,
        }
    }

    fn find(&self, key: &str) -> Option<&DirEntry> {
        self.header()
            .entries
            .iter()
            .filter(|e| e.state.load(Ordering::Acquire) == ENTRY_LIVE)
            .find(|e| e.key_eq(key.as_bytes()))
    }

    fn header(&self) -> &Header {
        header_of(&self.shm)
    }

    fn data_ptr(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(DATA_OFFSET + offset <= self.shm.mapped_size());
        // Safety: offset was bounds-checked against data_size at allocation.
        unsafe { NonNull::new_unchecked(self.shm.as_mut_ptr().add(DATA_OFFSET + offset)) }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        self.header().attached.fetch_sub(1, Ordering::AcqRel);
        debug!(segment = %self.name, "closed segment");
    }
}

fn header_of(shm: &PlatformShm) -> &Header {
    // Safety: every mapping is at least DATA_OFFSET bytes (checked at
    // create/open), page aligned, and Header is all atomics.
    unsafe { &*(shm.as_mut_ptr() as *const Header) }
}

/// Directory keys: 1..=MAX_KEY_LEN bytes, no NUL.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(SyncError::InvalidName(format!(
            "key {key:?} must be 1..={MAX_KEY_LEN} bytes"
        )));
    }
    if key.contains('\0') {
        return Err(SyncError::InvalidName(format!("key {key:?} contains NUL")));
    }
    Ok(())
}
