// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Attacher side of the ping/pong hand-off.
//
// Usage:
//   demo_pong [segment] [block] [iterations]
//
// Attaches to the block created by demo_ping (waiting up to
// SHM_SYNC_ATTACH_TIMEOUT_MS for it), kicks off the exchange, answers
// `iterations` pings (default 1000) and terminates the block.

use std::process::ExitCode;
use std::sync::Arc;

use shm_sync::{config, LockedConditionVariable, NamedValueStore, SyncError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const TURN: &str = "turn";
const RUNNING: &str = "running";

fn run(segment_name: &str, block_name: &str, iterations: u64) -> shm_sync::Result<u64> {
    let timeout = config::global().attach_timeout;
    let cv = LockedConditionVariable::attach_timeout(segment_name, block_name, Some(timeout))?;
    let store = NamedValueStore::new(Arc::clone(cv.segment()));
    info!(segment = segment_name, block = block_name, iterations, "attached");

    let mut guard = cv.lock_scope()?;
    if iterations == 0 {
        store.set_bool(RUNNING, false)?;
        guard.terminate()?;
        return Ok(0);
    }

    // Ping may not be waiting yet; the turn cell carries the kick-off.
    store.set_i64(TURN, 1)?;
    guard.notify_one()?;

    for i in 1..=iterations {
        while store.get_i64(TURN)? % 2 == 1 {
            if guard.is_terminated() {
                return Err(SyncError::UsageError(
                    "block terminated by another participant".into(),
                ));
            }
            guard.wait()?;
        }
        println!("pong {i}");
        if i == iterations {
            store.set_bool(RUNNING, false)?;
            guard.terminate()?;
        } else {
            store.fetch_add_i64(TURN, 1)?;
            guard.notify_one()?;
        }
    }
    Ok(iterations)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let segment = args.get(1).map(String::as_str).unwrap_or("seg");
    let block = args.get(2).map(String::as_str).unwrap_or("cv");
    let iterations = match args.get(3).map(|s| s.parse::<u64>()) {
        None => 1000,
        Some(Ok(n)) => n,
        Some(Err(_)) => {
            eprintln!("usage: demo_pong [segment] [block] [iterations]");
            return ExitCode::FAILURE;
        }
    };

    match run(segment, block, iterations) {
        Ok(n) => {
            info!(pongs = n, "done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "demo_pong failed");
            eprintln!("demo_pong: {e}");
            ExitCode::FAILURE
        }
    }
}
