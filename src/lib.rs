// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Condition variable for independent processes, built on named POSIX shared
// memory: segments, process-shared mutex + condition variable blocks, a
// process-local segment registry and a small typed value store.

#[cfg(not(unix))]
compile_error!("shm_sync requires POSIX shared memory and pthreads (unix only)");

pub mod config;
pub mod shm_name;

mod error;
pub use error::{Result, SyncError};

mod platform;
mod spin_lock;

mod segment;
pub use segment::{EntryKind, Segment, SegmentInfo, DATA_OFFSET, MAX_ENTRIES, MAX_KEY_LEN};

mod registry;
pub use registry::{Intent, SegmentRegistry};

mod sync_block;

mod condition;
pub use condition::LockedConditionVariable;

mod scoped_lock;
pub use scoped_lock::ScopedLock;

pub mod store;
pub use store::NamedValueStore;
