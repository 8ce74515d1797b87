// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Creator side of the ping/pong hand-off.
//
// Usage:
//   demo_ping [segment] [block]
//
// Creates the segment and synchronization block, then answers every pong
// with a ping until the attacher terminates the block. Start demo_pong with
// the same names in another terminal. Logs go to stderr (RUST_LOG).
//
// Turn protocol, all under the block's lock: the i64 cell "turn" is odd
// when it is ping's turn and even when it is pong's. Pong starts the
// exchange by setting it to 1 and ends it with terminate().

use std::process::ExitCode;
use std::sync::Arc;

use shm_sync::{config, Intent, LockedConditionVariable, NamedValueStore, Segment, SegmentRegistry};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const TURN: &str = "turn";
const RUNNING: &str = "running";

fn run(segment_name: &str, block_name: &str) -> shm_sync::Result<u64> {
    let registry = SegmentRegistry::global();
    if Segment::remove(segment_name)? {
        info!(segment = segment_name, "removed leftover segment");
    }
    let segment = registry.resolve(segment_name, Intent::Create(config::global().segment_size))?;

    let store = NamedValueStore::new(Arc::clone(&segment));
    store.set_i64(TURN, 0)?;
    store.set_bool(RUNNING, true)?;

    let cv = LockedConditionVariable::with_segment(Arc::clone(&segment), block_name, true)?;
    info!(segment = segment_name, block = block_name, "waiting for pong");

    let mut pings = 0u64;
    let mut guard = cv.lock_scope()?;
    'exchange: loop {
        loop {
            if guard.is_terminated() {
                break 'exchange;
            }
            if store.get_i64(TURN)? % 2 == 1 {
                break;
            }
            guard.wait()?;
        }
        pings += 1;
        println!("ping {pings}");
        store.fetch_add_i64(TURN, 1)?;
        guard.notify_one()?;
    }
    drop(guard);

    info!(pings, running = store.get_bool(RUNNING)?, "pong terminated the exchange");
    drop(cv);
    registry.destroy(segment_name)?;
    Ok(pings)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let segment = args.get(1).map(String::as_str).unwrap_or("seg");
    let block = args.get(2).map(String::as_str).unwrap_or("cv");

    match run(segment, block) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "demo_ping failed");
            eprintln!("demo_ping: {e}");
            ExitCode::FAILURE
        }
    }
}
