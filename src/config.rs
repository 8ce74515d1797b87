// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Process-wide defaults: segment size used by create-or-open resolutions
// and the bound applied to attach polling.

use std::sync::{OnceLock, RwLock};
use std::time::Duration;

/// Default usable size of a segment created implicitly (64 KiB).
pub const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024;

/// Default bound for `attach_timeout` style helpers.
pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment variable overriding [`SyncConfig::segment_size`].
pub const ENV_SEGMENT_SIZE: &str = "SHM_SYNC_SEGMENT_SIZE";

/// Environment variable overriding [`SyncConfig::attach_timeout`] (milliseconds).
pub const ENV_ATTACH_TIMEOUT_MS: &str = "SHM_SYNC_ATTACH_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Usable bytes requested when a segment is created without an explicit size.
    pub segment_size: usize,
    /// Bound used by the demo binaries and by callers that want the default.
    pub attach_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            attach_timeout: DEFAULT_ATTACH_TIMEOUT,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `SHM_SYNC_SEGMENT_SIZE` / `SHM_SYNC_ATTACH_TIMEOUT_MS`.
    /// Unparsable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(raw) = lookup(ENV_SEGMENT_SIZE) {
            match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => cfg.segment_size = size,
                _ => tracing::warn!(var = ENV_SEGMENT_SIZE, value = %raw, "ignoring invalid value"),
            }
        }
        if let Some(raw) = lookup(ENV_ATTACH_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => cfg.attach_timeout = Duration::from_millis(ms),
                Err(_) => {
                    tracing::warn!(var = ENV_ATTACH_TIMEOUT_MS, value = %raw, "ignoring invalid value")
                }
            }
        }
        cfg
    }

    pub fn with_segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    pub fn with_attach_timeout(mut self, timeout: Duration) -> Self {
        self.attach_timeout = timeout;
        self
    }
}

fn global_cell() -> &'static RwLock<SyncConfig> {
    static CONFIG: OnceLock<RwLock<SyncConfig>> = OnceLock::new();
    CONFIG.get_or_init(|| RwLock::new(SyncConfig::from_env()))
}

/// Snapshot of the process-wide configuration.
pub fn global() -> SyncConfig {
    match global_cell().read() {
        Ok(cfg) => cfg.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Replace the process-wide configuration.
pub fn set_global(cfg: SyncConfig) {
    match global_cell().write() {
        Ok(mut slot) => *slot = cfg,
        Err(poisoned) => *poisoned.into_inner() = cfg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.segment_size, DEFAULT_SEGMENT_SIZE);
        assert_eq!(cfg.attach_timeout, DEFAULT_ATTACH_TIMEOUT);
    }

    #[test]
    fn lookup_overrides() {
        let cfg = SyncConfig::from_lookup(|key| match key {
            ENV_SEGMENT_SIZE => Some("4096".into()),
            ENV_ATTACH_TIMEOUT_MS => Some("250".into()),
            _ => None,
        });
        assert_eq!(cfg.segment_size, 4096);
        assert_eq!(cfg.attach_timeout, Duration::from_millis(250));
    }

    #[test]
    fn lookup_ignores_garbage() {
        let cfg = SyncConfig::from_lookup(|key| match key {
            ENV_SEGMENT_SIZE => Some("0".into()),
            ENV_ATTACH_TIMEOUT_MS => Some("soon".into()),
            _ => None,
        });
        assert_eq!(cfg, SyncConfig::default());
    }
}
