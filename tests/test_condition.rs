// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// LockedConditionVariable: creation and attach, scoped locking, wait /
// notify / terminate, exercised across threads sharing one mapping.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use shm_sync::{LockedConditionVariable, NamedValueStore, SegmentRegistry, SyncError};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_cv_{n}_{}", std::process::id())
}

fn cleanup(segment: &str) {
    let _ = SegmentRegistry::global().destroy(segment);
    let _ = shm_sync::Segment::remove(segment);
}

#[test]
fn create_and_attach() {
    let seg = unique_name("create_attach");
    cleanup(&seg);

    let creator = LockedConditionVariable::new(&seg, "cv", true).expect("create");
    assert!(creator.is_creator());
    assert_eq!(creator.name(), "cv");

    let attacher = LockedConditionVariable::new(&seg, "cv", false).expect("attach");
    assert!(!attacher.is_creator());
    assert!(Arc::ptr_eq(creator.segment(), attacher.segment()));

    cleanup(&seg);
}

#[test]
fn attach_without_segment_is_not_found() {
    let seg = unique_name("attach_missing_seg");
    cleanup(&seg);

    let err = LockedConditionVariable::attach(&seg, "cv").unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)), "got {err:?}");
}

#[test]
fn attach_without_block_is_not_found() {
    let seg = unique_name("attach_missing_block");
    cleanup(&seg);

    let _creator = LockedConditionVariable::create(&seg, "cv").expect("create");
    let err = LockedConditionVariable::attach(&seg, "other").unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)), "got {err:?}");

    cleanup(&seg);
}

#[test]
fn second_initialisation_is_rejected() {
    let seg = unique_name("double_init");
    cleanup(&seg);

    let _first = LockedConditionVariable::create(&seg, "cv").expect("create");
    let err = LockedConditionVariable::create(&seg, "cv").unwrap_err();
    assert!(matches!(err, SyncError::AlreadyExists(_)), "got {err:?}");

    cleanup(&seg);
}

#[test]
fn attach_timeout_waits_for_creator() {
    let seg = unique_name("attach_timeout");
    cleanup(&seg);

    let seg2 = seg.clone();
    let creator = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        LockedConditionVariable::create(&seg2, "cv").expect("create")
    });

    let attacher =
        LockedConditionVariable::attach_timeout(&seg, "cv", Some(Duration::from_secs(5)))
            .expect("attach_timeout");
    let creator = creator.join().unwrap();
    assert!(Arc::ptr_eq(creator.segment(), attacher.segment()));

    cleanup(&seg);
}

#[test]
fn attach_timeout_expires() {
    let seg = unique_name("attach_expire");
    cleanup(&seg);

    let start = Instant::now();
    let err = LockedConditionVariable::attach_timeout(&seg, "cv", Some(Duration::from_millis(50)))
        .unwrap_err();
    assert!(matches!(err, SyncError::TimedOut(_)), "got {err:?}");
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn notify_without_waiters_is_noop() {
    let seg = unique_name("noop_notify");
    cleanup(&seg);

    let cv = LockedConditionVariable::create(&seg, "cv").expect("create");
    cv.notify_one().expect("notify_one");
    cv.notify_all().expect("notify_all");
    {
        let guard = cv.lock_scope().expect("lock");
        guard.notify_one().expect("notify_one locked");
        guard.notify_all().expect("notify_all locked");
    }

    cleanup(&seg);
}

#[test]
fn reentrant_lock_is_usage_error() {
    let seg = unique_name("reentrant");
    cleanup(&seg);

    let cv = LockedConditionVariable::create(&seg, "cv").expect("create");
    let guard = cv.lock_scope().expect("lock");
    let err = cv.lock_scope().unwrap_err();
    assert!(matches!(err, SyncError::UsageError(_)), "got {err:?}");
    drop(guard);

    // Released on drop: locking again works.
    drop(cv.lock_scope().expect("relock"));

    cleanup(&seg);
}

#[test]
fn lock_released_on_panic() {
    let seg = unique_name("unwind");
    cleanup(&seg);

    let cv = Arc::new(LockedConditionVariable::create(&seg, "cv").expect("create"));
    let cv2 = Arc::clone(&cv);
    let r = thread::spawn(move || {
        let _guard = cv2.lock_scope().expect("lock");
        panic!("unwinding with the lock held");
    })
    .join();
    assert!(r.is_err());

    let guard = cv
        .lock_scope_timeout(Duration::from_secs(1))
        .expect("lock_scope_timeout");
    assert!(guard.is_some());

    cleanup(&seg);
}

#[test]
fn try_lock_and_timeout_when_contended() {
    let seg = unique_name("contended");
    cleanup(&seg);

    let cv = Arc::new(LockedConditionVariable::create(&seg, "cv").expect("create"));
    let locked = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));

    let (cv2, l2, r2) = (Arc::clone(&cv), Arc::clone(&locked), Arc::clone(&release));
    let holder = thread::spawn(move || {
        let _guard = cv2.lock_scope().expect("lock");
        l2.store(true, Ordering::SeqCst);
        while !r2.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
    });

    while !locked.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(cv.try_lock_scope().expect("try_lock").is_none());

    let start = Instant::now();
    let got = cv
        .lock_scope_timeout(Duration::from_millis(50))
        .expect("lock_scope_timeout");
    assert!(got.is_none());
    assert!(start.elapsed() >= Duration::from_millis(40));

    release.store(true, Ordering::SeqCst);
    holder.join().unwrap();
    assert!(cv.try_lock_scope().expect("try_lock").is_some());

    cleanup(&seg);
}

#[test]
fn wait_notify() {
    let seg = unique_name("wait_notify");
    cleanup(&seg);

    let cv = Arc::new(LockedConditionVariable::create(&seg, "cv").expect("create"));
    let store = NamedValueStore::new(Arc::clone(cv.segment()));
    let notified = Arc::new(AtomicBool::new(false));

    let (cv2, store2, n2) = (Arc::clone(&cv), store.clone(), Arc::clone(&notified));
    let waiter = thread::spawn(move || {
        let mut guard = cv2.lock_scope().expect("lock");
        guard
            .wait_while(|| !store2.get_bool("ready").expect("get"))
            .expect("wait_while");
        n2.store(true, Ordering::SeqCst);
    });

    thread::sleep(Duration::from_millis(50));
    {
        let guard = cv.lock_scope().expect("lock main");
        store.set_bool("ready", true).expect("set");
        guard.notify_one().expect("notify");
    }

    waiter.join().unwrap();
    assert!(notified.load(Ordering::SeqCst));

    cleanup(&seg);
}

#[test]
fn notify_all_wakes_every_waiter() {
    let seg = unique_name("broadcast");
    cleanup(&seg);

    let cv = Arc::new(LockedConditionVariable::create(&seg, "cv").expect("create"));
    let store = NamedValueStore::new(Arc::clone(cv.segment()));
    let woken = Arc::new(AtomicI32::new(0));
    let num_waiters = 5;

    let handles: Vec<_> = (0..num_waiters)
        .map(|_| {
            let (cv, store, woken) = (Arc::clone(&cv), store.clone(), Arc::clone(&woken));
            thread::spawn(move || {
                let mut guard = cv.lock_scope().expect("lock waiter");
                guard
                    .wait_while(|| !store.get_bool("go").expect("get"))
                    .expect("wait_while");
                woken.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(100));
    {
        let guard = cv.lock_scope().expect("lock broadcaster");
        store.set_bool("go", true).expect("set");
        guard.notify_all().expect("notify_all");
    }

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(woken.load(Ordering::Relaxed), num_waiters);

    cleanup(&seg);
}

#[test]
fn timed_wait_expires() {
    let seg = unique_name("timed_wait");
    cleanup(&seg);

    let cv = LockedConditionVariable::create(&seg, "cv").expect("create");
    let start = Instant::now();
    let signalled = {
        let mut guard = cv.lock_scope().expect("lock");
        guard.wait_timeout(Duration::from_millis(100)).expect("wait")
    };
    let elapsed = start.elapsed();

    assert!(!signalled, "should time out");
    assert!(
        elapsed.as_millis() >= 80,
        "should have waited ~100ms, got {}ms",
        elapsed.as_millis()
    );

    let outcome = {
        let mut guard = cv.lock_scope().expect("lock");
        guard
            .wait_while_timeout(Duration::from_millis(30), || true)
            .expect("wait_while_timeout")
    };
    assert_eq!(outcome, None);

    cleanup(&seg);
}

#[test]
fn terminate_wakes_all_waiters() {
    let seg = unique_name("terminate");
    cleanup(&seg);

    let cv = Arc::new(LockedConditionVariable::create(&seg, "cv").expect("create"));
    let attacher = Arc::new(LockedConditionVariable::attach(&seg, "cv").expect("attach"));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let cv = Arc::clone(&attacher);
            thread::spawn(move || {
                let mut guard = cv.lock_scope().expect("lock");
                // Waits on a predicate that never changes; only terminate ends it.
                guard.wait_while(|| true).expect("wait_while")
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    assert!(!cv.is_terminated());
    cv.terminate().expect("terminate");
    assert!(cv.is_terminated());
    assert!(attacher.is_terminated());

    for h in handles {
        assert!(h.join().unwrap(), "waiter should report termination");
    }

    cleanup(&seg);
}

#[test]
fn alternating_handoff_between_threads() {
    const ROUNDS: i64 = 200;
    let seg = unique_name("handoff");
    cleanup(&seg);

    let creator = Arc::new(LockedConditionVariable::create(&seg, "cv").expect("create"));
    let store = NamedValueStore::new(Arc::clone(creator.segment()));
    store.set_i64("turn", 0).expect("init turn");

    let (cv, st) = (Arc::clone(&creator), store.clone());
    let ping = thread::spawn(move || {
        let mut pings = 0;
        let mut guard = cv.lock_scope().expect("lock");
        loop {
            let terminated = guard
                .wait_while(|| st.get_i64("turn").expect("get") % 2 == 0)
                .expect("wait_while");
            if terminated {
                return pings;
            }
            pings += 1;
            st.fetch_add_i64("turn", 1).expect("advance");
            guard.notify_one().expect("notify");
        }
    });

    let attacher = LockedConditionVariable::attach(&seg, "cv").expect("attach");
    let mut pongs = 0;
    {
        let mut guard = attacher.lock_scope().expect("lock");
        store.set_i64("turn", 1).expect("kick off");
        guard.notify_one().expect("notify");
        for round in 1..=ROUNDS {
            guard
                .wait_while(|| store.get_i64("turn").expect("get") % 2 == 1)
                .expect("wait_while");
            pongs += 1;
            if round == ROUNDS {
                guard.terminate().expect("terminate");
            } else {
                store.fetch_add_i64("turn", 1).expect("advance");
                guard.notify_one().expect("notify");
            }
        }
    }

    assert_eq!(ping.join().unwrap(), ROUNDS);
    assert_eq!(pongs, ROUNDS);

    cleanup(&seg);
}

#[test]
fn unbounded_timeouts_wait_instead_of_overflowing() {
    let seg = unique_name("max_timeout");
    cleanup(&seg);

    let cv = Arc::new(LockedConditionVariable::create(&seg, "cv").expect("create"));
    let store = NamedValueStore::new(Arc::clone(cv.segment()));

    let guard = cv.lock_scope_timeout(Duration::MAX).expect("lock_scope_timeout");
    assert!(guard.is_some());
    drop(guard);

    let attacher = LockedConditionVariable::attach_timeout(&seg, "cv", Some(Duration::MAX))
        .expect("attach_timeout");
    assert!(Arc::ptr_eq(cv.segment(), attacher.segment()));

    let (cv2, store2) = (Arc::clone(&cv), store.clone());
    let waiter = thread::spawn(move || {
        let mut guard = cv2.lock_scope().expect("lock");
        let first = guard
            .wait_while_timeout(Duration::MAX, || !store2.get_bool("go").expect("get"))
            .expect("wait_while_timeout");
        let second = guard.wait_timeout(Duration::MAX).expect("wait_timeout");
        (first, second)
    });

    thread::sleep(Duration::from_millis(50));
    {
        let guard = cv.lock_scope().expect("lock main");
        store.set_bool("go", true).expect("set");
        guard.notify_all().expect("notify");
    }
    // The second wait needs its own wakeup; keep notifying until it returns.
    while !waiter.is_finished() {
        cv.notify_all().expect("notify");
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(waiter.join().unwrap(), (Some(false), true));

    cleanup(&seg);
}

#[cfg(target_os = "linux")]
#[test]
fn lock_holder_death_is_owner_dead() {
    let seg = unique_name("owner_dead");
    cleanup(&seg);

    let cv = LockedConditionVariable::create(&seg, "cv").expect("create");
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");
    if pid == 0 {
        // Child: take the lock and exit without releasing it.
        let code = match cv.lock_scope() {
            Ok(guard) => {
                std::mem::forget(guard);
                0
            }
            Err(_) => 1,
        };
        unsafe { libc::_exit(code) };
    }

    let mut status = 0;
    assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
    assert!(libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0);

    let err = cv.lock_scope().unwrap_err();
    assert!(matches!(err, SyncError::OwnerDead(_)), "got {err:?}");
    // The block is not recovered: later lockers fail the same way.
    let err = cv.lock_scope().unwrap_err();
    assert!(matches!(err, SyncError::OwnerDead(_)), "got {err:?}");
    let err = cv.try_lock_scope().unwrap_err();
    assert!(matches!(err, SyncError::OwnerDead(_)), "got {err:?}");

    cleanup(&seg);
}
