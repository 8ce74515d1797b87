// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error type shared by every layer of the crate.

use std::io;

use thiserror::Error;

/// Errors surfaced by segments, synchronization blocks, the registry and the
/// value store.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A segment, synchronization block or directory key already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The named segment or synchronization block does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The object exists but its creator has not finished initializing it.
    #[error("not initialized yet: {0}")]
    NotInitialized(String),

    /// Lock discipline was violated (re-entrant lock, wait or unlock
    /// without ownership) or a non-creator tried to destroy a segment.
    #[error("usage error: {0}")]
    UsageError(String),

    /// The segment behind this handle has been destroyed by its creator.
    #[error("stale handle: segment {0} has been destroyed")]
    StaleHandle(String),

    /// A process died while holding the block's mutex. The block is no longer usable.
    #[error("lock owner died while holding {0}")]
    OwnerDead(String),

    /// A bounded wait expired.
    #[error("timed out waiting for {0}")]
    TimedOut(String),

    /// A key exists with a different kind than the one requested.
    #[error("key {key:?} holds a {found}, not a {expected}")]
    KindMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Segment name or directory key is unusable.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Not enough room left in the segment's data region.
    #[error("segment out of space: requested {requested} bytes, {available} available")]
    OutOfSpace { requested: usize, available: usize },

    /// Every directory slot of the segment is in use.
    #[error("segment directory full ({0} entries)")]
    DirectoryFull(usize),

    /// Any other OS failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Map a raw `errno` from a pthread call on the object `what` into the
    /// crate taxonomy.
    pub(crate) fn from_errno(eno: i32, what: &str) -> Self {
        match eno {
            libc::EDEADLK => {
                SyncError::UsageError(format!("{what}: already locked by this thread"))
            }
            libc::EPERM => SyncError::UsageError(format!("{what}: lock not held by caller")),
            #[cfg(not(target_os = "macos"))]
            libc::EOWNERDEAD | libc::ENOTRECOVERABLE => SyncError::OwnerDead(what.to_string()),
            _ => SyncError::Io(io::Error::from_raw_os_error(eno)),
        }
    }

    /// Map an `io::Error` from `shm_open` and friends for segment `name`.
    pub(crate) fn from_shm_io(err: io::Error, name: &str) -> Self {
        match err.raw_os_error() {
            Some(libc::ENOENT) => SyncError::NotFound(format!("segment {name}")),
            Some(libc::EEXIST) => SyncError::AlreadyExists(format!("segment {name}")),
            _ => SyncError::Io(err),
        }
    }

    /// Whether the error means "try again later" for the bounded polling helpers.
    pub(crate) fn is_not_ready(&self) -> bool {
        matches!(self, SyncError::NotFound(_) | SyncError::NotInitialized(_))
    }
}
