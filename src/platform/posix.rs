// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX primitives: shm_open/mmap segments and process-shared pthread
// mutex / condition variable operations on memory inside those segments.

use std::ffi::CString;
use std::io;
use std::ptr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::shm_name;

// ---------------------------------------------------------------------------
// Robust mutex symbols: not exposed by `libc` crate on all platforms.
// macOS has no robust mutexes.
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "macos"))]
extern "C" {
    fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
}

#[cfg(not(target_os = "macos"))]
const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

// ---------------------------------------------------------------------------
// PlatformShm: POSIX shared memory object + mapping
// ---------------------------------------------------------------------------

const PERMS: libc::mode_t = 0o666;

pub struct PlatformShm {
    mem: *mut u8,
    size: usize,
    name: String, // POSIX name (with leading '/')
}

// Safety: the mapping is process-shared by construction; all access to its
// contents goes through atomics or pthread objects.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

fn c_name(posix_name: &str) -> io::Result<CString> {
    CString::new(posix_name.as_bytes()).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

impl PlatformShm {
    /// Create a new object of `size` bytes. Fails with `EEXIST` if the name
    /// is taken. The fresh mapping is zero-filled.
    pub fn create(name: &str, size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }
        let posix_name = shm_name::make_shm_name(name);
        let c = c_name(&posix_name)?;

        let fd = unsafe {
            libc::shm_open(
                c.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                PERMS as libc::c_uint,
            )
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        // The umask may have stripped bits from the create mode.
        unsafe { libc::fchmod(fd, PERMS) };

        let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if ret != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c.as_ptr());
            }
            return Err(err);
        }

        match Self::map(fd, size, posix_name) {
            Ok(shm) => Ok(shm),
            Err(e) => {
                unsafe { libc::shm_unlink(c.as_ptr()) };
                Err(e)
            }
        }
    }

    /// Open an existing object and map all of it.
    ///
    /// Fails with `ENOENT` if absent, and with `ErrorKind::UnexpectedEof` if
    /// the object is still smaller than `min_size` (its creator has not
    /// sized it yet).
    pub fn open(name: &str, min_size: usize) -> io::Result<Self> {
        let posix_name = shm_name::make_shm_name(name);
        let c = c_name(&posix_name)?;

        let fd = unsafe { libc::shm_open(c.as_ptr(), libc::O_RDWR, PERMS as libc::c_uint) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        let size = st.st_size as usize;
        if size < min_size.max(1) {
            unsafe { libc::close(fd) };
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{posix_name} is {size} bytes, expected at least {min_size}"),
            ));
        }

        Self::map(fd, size, posix_name)
    }

    fn map(fd: i32, size: usize, posix_name: String) -> io::Result<Self> {
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };

        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            mem: mem as *mut u8,
            size,
            name: posix_name,
        })
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub fn mapped_size(&self) -> usize {
        self.size
    }

    /// POSIX name (with leading '/').
    pub fn name(&self) -> &str {
        &self.name
    }

    /// shm_unlink this object's name. The mapping stays valid.
    pub fn unlink(&self) -> io::Result<()> {
        unlink_posix(&self.name)
    }

    /// shm_unlink by caller-level name.
    pub fn unlink_by_name(name: &str) -> io::Result<()> {
        unlink_posix(&shm_name::make_shm_name(name))
    }
}

fn unlink_posix(posix_name: &str) -> io::Result<()> {
    let c = c_name(posix_name)?;
    if unsafe { libc::shm_unlink(c.as_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        // Unmap only. The name outlives this process until destroy()/remove().
        if !self.mem.is_null() {
            unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        }
    }
}

// ---------------------------------------------------------------------------
// Process-shared pthread mutex / condition variable
// ---------------------------------------------------------------------------

fn check(eno: libc::c_int) -> io::Result<()> {
    if eno != 0 {
        return Err(io::Error::from_raw_os_error(eno));
    }
    Ok(())
}

/// Initialise a `pthread_mutex_t` at `mtx` as process-shared and
/// error-checking, and robust where the platform has it.
///
/// # Safety
/// `mtx` must point to writable, suitably aligned memory for a
/// `pthread_mutex_t` that no thread is using.
pub unsafe fn mutex_init(mtx: *mut libc::pthread_mutex_t) -> io::Result<()> {
    ptr::write_bytes(mtx, 0, 1);

    let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
    check(libc::pthread_mutexattr_init(&mut attr))?;

    let mut eno = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
    if eno == 0 {
        eno = libc::pthread_mutexattr_settype(&mut attr, libc::PTHREAD_MUTEX_ERRORCHECK);
    }
    #[cfg(not(target_os = "macos"))]
    {
        if eno == 0 {
            eno = pthread_mutexattr_setrobust(&mut attr, PTHREAD_MUTEX_ROBUST);
        }
    }
    if eno == 0 {
        eno = libc::pthread_mutex_init(mtx, &attr);
    }
    libc::pthread_mutexattr_destroy(&mut attr);
    check(eno)
}

/// Initialise a `pthread_cond_t` at `cond` as process-shared.
///
/// # Safety
/// `cond` must point to writable, suitably aligned memory for a
/// `pthread_cond_t` that no thread is using.
pub unsafe fn cond_init(cond: *mut libc::pthread_cond_t) -> io::Result<()> {
    ptr::write_bytes(cond, 0, 1);

    let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
    check(libc::pthread_condattr_init(&mut attr))?;

    let mut eno = libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
    if eno == 0 {
        eno = libc::pthread_cond_init(cond, &attr);
    }
    libc::pthread_condattr_destroy(&mut attr);
    check(eno)
}

/// Blocking lock. `EOWNERDEAD` and `EDEADLK` are returned as errors.
///
/// # Safety
/// `mtx` must point to a mutex initialised by [`mutex_init`].
pub unsafe fn mutex_lock(mtx: *mut libc::pthread_mutex_t) -> io::Result<()> {
    check(libc::pthread_mutex_lock(mtx))
}

/// Non-blocking lock. `Ok(false)` if another thread or process holds it.
///
/// # Safety
/// `mtx` must point to a mutex initialised by [`mutex_init`].
pub unsafe fn mutex_try_lock(mtx: *mut libc::pthread_mutex_t) -> io::Result<bool> {
    match libc::pthread_mutex_trylock(mtx) {
        0 => Ok(true),
        libc::EBUSY => Ok(false),
        eno => Err(io::Error::from_raw_os_error(eno)),
    }
}

/// Lock with a timeout. `Ok(false)` on timeout.
///
/// # Safety
/// `mtx` must point to a mutex initialised by [`mutex_init`].
pub unsafe fn mutex_lock_timeout(
    mtx: *mut libc::pthread_mutex_t,
    timeout: Duration,
) -> io::Result<bool> {
    #[cfg(target_os = "macos")]
    {
        // macOS lacks pthread_mutex_timedlock; emulate via try_lock polling.
        let found = crate::spin_lock::poll_until(Some(timeout), || match mutex_try_lock(mtx) {
            Ok(false) => None,
            other => Some(other),
        });
        match found {
            Some(r) => r,
            None => Ok(false),
        }
    }
    #[cfg(not(target_os = "macos"))]
    {
        extern "C" {
            fn pthread_mutex_timedlock(
                mutex: *mut libc::pthread_mutex_t,
                abstime: *const libc::timespec,
            ) -> libc::c_int;
        }
        let Some(ts) = deadline_after(timeout) else {
            mutex_lock(mtx)?;
            return Ok(true);
        };
        loop {
            match pthread_mutex_timedlock(mtx, &ts) {
                0 => return Ok(true),
                libc::ETIMEDOUT => return Ok(false),
                libc::EINTR => continue,
                eno => return Err(io::Error::from_raw_os_error(eno)),
            }
        }
    }
}

/// # Safety
/// `mtx` must point to a mutex initialised by [`mutex_init`].
pub unsafe fn mutex_unlock(mtx: *mut libc::pthread_mutex_t) -> io::Result<()> {
    check(libc::pthread_mutex_unlock(mtx))
}

/// Wait on `cond`; the caller must hold `mtx`. With a timeout, returns
/// `Ok(false)` when it expires, otherwise `Ok(true)`.
///
/// # Safety
/// Both pointers must reference objects initialised by [`mutex_init`] /
/// [`cond_init`].
pub unsafe fn cond_wait(
    cond: *mut libc::pthread_cond_t,
    mtx: *mut libc::pthread_mutex_t,
    timeout: Option<Duration>,
) -> io::Result<bool> {
    match timeout.and_then(deadline_after) {
        None => {
            check(libc::pthread_cond_wait(cond, mtx))?;
            Ok(true)
        }
        Some(ts) => {
            match libc::pthread_cond_timedwait(cond, mtx, &ts) {
                0 => Ok(true),
                libc::ETIMEDOUT => Ok(false),
                eno => Err(io::Error::from_raw_os_error(eno)),
            }
        }
    }
}

/// # Safety
/// `cond` must point to a condition variable initialised by [`cond_init`].
pub unsafe fn cond_signal(cond: *mut libc::pthread_cond_t) -> io::Result<()> {
    check(libc::pthread_cond_signal(cond))
}

/// # Safety
/// `cond` must point to a condition variable initialised by [`cond_init`].
pub unsafe fn cond_broadcast(cond: *mut libc::pthread_cond_t) -> io::Result<()> {
    check(libc::pthread_cond_broadcast(cond))
}

/// Absolute CLOCK_REALTIME deadline `timeout` from now, or `None` if it does
/// not fit a `timespec` (callers then wait without a bound).
fn deadline_after(timeout: Duration) -> Option<libc::timespec> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let deadline = now.checked_add(timeout)?;
    Some(libc::timespec {
        tv_sec: libc::time_t::try_from(deadline.as_secs()).ok()?,
        tv_nsec: deadline.subsec_nanos() as libc::c_long,
    })
}

/// Current process id.
pub fn current_pid() -> u32 {
    unsafe { libc::getpid() as u32 }
}
