// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Segment name handling: validation of caller-supplied names and the mapping
// to POSIX shm object names.

use crate::error::{Result, SyncError};

/// FNV-1a 64-bit hash.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Maximum length for POSIX shm names. 0 disables shortening.
///
/// On macOS `PSHMNAMLEN` is 31. On Linux the limit is typically 255.
#[cfg(target_os = "macos")]
pub const SHM_NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
pub const SHM_NAME_MAX: usize = 0;

/// Reject names that cannot become a single POSIX shm object name.
/// A single leading '/' is accepted and ignored.
pub fn validate(name: &str) -> Result<()> {
    let body = name.strip_prefix('/').unwrap_or(name);
    if body.is_empty() {
        return Err(SyncError::InvalidName("segment name is empty".into()));
    }
    if body.contains('/') {
        return Err(SyncError::InvalidName(format!(
            "segment name {name:?} contains '/'"
        )));
    }
    if body.contains('\0') {
        return Err(SyncError::InvalidName(format!(
            "segment name {name:?} contains NUL"
        )));
    }
    Ok(())
}

/// Produce the POSIX object name (with leading '/').
///
/// When `SHM_NAME_MAX > 0`, names whose POSIX form exceeds it become
/// `/<prefix>_<16-hex-FNV-1a-hash>` so distinct long names stay distinct.
pub fn make_shm_name(name: &str) -> String {
    let result = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };

    if SHM_NAME_MAX == 0 || result.len() <= SHM_NAME_MAX {
        return result;
    }
    shorten(&result, SHM_NAME_MAX)
}

fn shorten(posix_name: &str, max: usize) -> String {
    // 1 (underscore) + 16 (hex hash)
    const HASH_SUFFIX_LEN: usize = 1 + 16;
    let prefix_len = max.saturating_sub(HASH_SUFFIX_LEN + 1);

    let hash = fnv1a_64(posix_name.as_bytes());
    let mut shortened = String::with_capacity(max);
    shortened.push('/');

    // Cut on a char boundary so the prefix stays valid UTF-8.
    let body = &posix_name[1..];
    let mut take = prefix_len.min(body.len());
    while !body.is_char_boundary(take) {
        take -= 1;
    }
    shortened.push_str(&body[..take]);
    shortened.push('_');
    shortened.push_str(&format!("{hash:016x}"));
    shortened
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_known_value() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
    }

    #[test]
    fn make_shm_name_prepends_slash() {
        let name = make_shm_name("foo");
        assert!(name.starts_with('/'));
        assert!(name.contains("foo"));
    }

    #[test]
    fn make_shm_name_keeps_existing_slash() {
        let name = make_shm_name("/bar");
        assert_eq!(&name[..4], "/bar");
    }

    #[test]
    fn shorten_fits_limit_and_differs() {
        let a = shorten("/a_rather_long_segment_name_number_one", 31);
        let b = shorten("/a_rather_long_segment_name_number_two", 31);
        assert_eq!(a.len(), 31);
        assert!(a.starts_with("/a_rather_long_"));
        assert_ne!(a, b);
    }

    #[test]
    fn validate_rejects_bad_names() {
        assert!(validate("").is_err());
        assert!(validate("/").is_err());
        assert!(validate("a/b").is_err());
        assert!(validate("nul\0").is_err());
        assert!(validate("ok_name").is_ok());
        assert!(validate("/ok_name").is_ok());
    }
}
