// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! End-to-end tests of priority donation: single donations, chains
//! through nested locks, the depth bound, and the interaction with
//! set_priority.

use kernel::process;
use kernel::sync::{Lock, Semaphore};
use kernel::thread;
use std::sync::{Arc, Mutex};

/// Uncontended acquire/release is priority-neutral.
///
#[test]
fn acquire_release_leaves_priority_unchanged() {
    kernel::run(&[], || {
        let lock = Lock::new();
        let before = thread::get_priority();

        lock.acquire();
        assert!(lock.held_by_current());
        assert_eq!(thread::get_priority(), before);

        lock.release();
        assert!(!lock.held_by_current());
        assert_eq!(thread::get_priority(), before);
    });
}

/// The two-lock donation chain: High blocks on L1 held by
/// Mid, which blocks on L2 held by Low. Low runs at 40
/// while the chain stands; Mid keeps 40 after dropping L2
/// (High still donates through L1) and falls back to 30
/// once it releases L1 and High gets in.
///
#[test]
fn donation_flows_through_a_chain_of_locks() {
    kernel::run(&[], || {
        let l1 = Arc::new(Lock::new());
        let l2 = Arc::new(Lock::new());
        let low_ready = Arc::new(Semaphore::new(0));
        let mid_ready = Arc::new(Semaphore::new(0));
        let done = Arc::new(Semaphore::new(0));
        let log: Arc<Mutex<Vec<(&str, i32)>>> = Arc::new(Mutex::new(Vec::new()));

        let (l2_low, ready, recorder) = (l2.clone(), low_ready.clone(), log.clone());
        let low = thread::create("low", 10, move || {
            l2_low.acquire();
            ready.up();
            // We only get the CPU back once the chain has
            // raised us past the threads between 10 and 40.
            recorder.lock().unwrap().push(("low holding l2", thread::get_priority()));
            l2_low.release();
            recorder.lock().unwrap().push(("low after release", thread::get_priority()));
        })
        .expect("out of memory");
        low_ready.down();

        let (l1_mid, l2_mid, ready, recorder) = (l1.clone(), l2.clone(), mid_ready.clone(), log.clone());
        let mid = thread::create("mid", 30, move || {
            l1_mid.acquire();
            ready.up();
            l2_mid.acquire();
            recorder.lock().unwrap().push(("mid got l2", thread::get_priority()));
            l2_mid.release();
            recorder.lock().unwrap().push(("mid dropped l2", thread::get_priority()));
            l1_mid.release();
            recorder.lock().unwrap().push(("mid dropped l1", thread::get_priority()));
        })
        .expect("out of memory");
        mid_ready.down();

        let (l1_high, finished, recorder) = (l1.clone(), done.clone(), log.clone());
        let high = thread::create("high", 40, move || {
            l1_high.acquire();
            recorder.lock().unwrap().push(("high got l1", thread::get_priority()));
            l1_high.release();
            finished.up();
        })
        .expect("out of memory");

        done.down();
        for id in [low, mid, high] {
            process::wait(id);
        }

        let log = log.lock().unwrap();
        let entry = |name| log.iter().find(|(n, _)| *n == name).map(|(_, p)| *p);

        assert_eq!(entry("low holding l2"), Some(40));
        assert_eq!(entry("low after release"), Some(10));
        assert_eq!(entry("mid got l2"), Some(40));
        assert_eq!(entry("mid dropped l2"), Some(40));
        assert_eq!(entry("mid dropped l1"), Some(30));
        assert_eq!(entry("high got l1"), Some(40));
    });
}

/// Donation chains are walked at most eight levels deep:
/// with nine holders in a row, the ninth is left alone.
///
#[test]
fn donation_chain_truncates_at_depth_eight() {
    const HOLDERS: usize = 9;

    kernel::run(&[], || {
        let locks: Vec<Arc<Lock>> = (0..HOLDERS).map(|_| Arc::new(Lock::new())).collect();
        let release = Arc::new(Semaphore::new(0));

        // holder 0 takes lock 0 and parks; holder i takes
        // lock i and then blocks acquiring lock i-1, so
        // lock 8's holder heads an eight-deep chain.
        let mut holders = Vec::new();
        for i in 0..HOLDERS {
            let own = locks[i].clone();
            let blocked_on = if i > 0 { Some(locks[i - 1].clone()) } else { None };
            let parked = release.clone();
            let id = thread::create("holder", 10, move || match blocked_on {
                None => {
                    own.acquire();
                    parked.down();
                    own.release();
                }
                Some(next) => {
                    own.acquire();
                    next.acquire();
                    next.release();
                    own.release();
                }
            })
            .expect("out of memory");
            holders.push(id);
        }

        // Drop below the holders so each runs up to its
        // blocking point, in creation order.
        thread::set_priority(thread::PRI_MIN);
        thread::set_priority(thread::PRI_DEFAULT);

        // A donor at 50 on the deepest lock reaches eight
        // holders; the ninth keeps its own priority.
        let deepest = locks[HOLDERS - 1].clone();
        let donor = thread::create("donor", 50, move || {
            deepest.acquire();
            deepest.release();
        })
        .expect("out of memory");

        for (i, id) in holders.iter().enumerate() {
            let holder = thread::by_id(*id).expect("holder disappeared");
            if i == 0 {
                assert_eq!(holder.priority(), 10, "ninth holder must not be donated to");
            } else {
                assert_eq!(holder.priority(), 50, "holder {} should be raised", i);
            }
        }

        // Unwind: holder 0 releases, and the chain drains.
        release.up();
        for id in holders {
            process::wait(id);
        }
        process::wait(donor);
    });
}

/// While a donation is live, set_priority moves the base
/// at once but the effective priority keeps the highest
/// donor until the lock is released.
///
#[test]
fn set_priority_defers_to_live_donors() {
    kernel::run(&[], || {
        let lock = Arc::new(Lock::new());
        let parked = Arc::new(Semaphore::new(0));
        let done = Arc::new(Semaphore::new(0));

        let (own, park, finished) = (lock.clone(), parked.clone(), done.clone());
        let holder = thread::create("holder", 10, move || {
            own.acquire();
            park.down();

            // A 45-donor is live from here on.
            assert_eq!(thread::get_priority(), 45);

            thread::set_priority(20);
            assert_eq!(thread::get_priority(), 45);

            thread::set_priority(50);
            assert_eq!(thread::get_priority(), 50);

            thread::set_priority(15);
            assert_eq!(thread::get_priority(), 45);

            own.release();
            assert_eq!(thread::get_priority(), 15);
            finished.up();
        })
        .expect("out of memory");

        // Let the holder take the lock.
        thread::set_priority(thread::PRI_MIN);
        thread::set_priority(thread::PRI_DEFAULT);

        let contender = lock.clone();
        let donor = thread::create("donor", 45, move || {
            contender.acquire();
            contender.release();
        })
        .expect("out of memory");

        parked.up();
        done.down();

        process::wait(holder);
        process::wait(donor);
    });
}
