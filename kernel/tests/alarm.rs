// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! End-to-end tests of the sleep queue, the wakeup thread, and the
//! idle thread's role in letting time pass when nothing is runnable.

use kernel::process;
use kernel::thread;
use kernel::time;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// With no other thread runnable, the idle thread's
/// halt-and-wait keeps virtual time moving until the
/// sleeper's deadline arrives.
///
#[test]
fn sleep_wakes_at_the_deadline() {
    kernel::run(&[], || {
        let before = time::ticks();
        time::sleep(50);

        assert!(time::ticks() >= before + 50);

        // Every one of those ticks interrupted the idle
        // thread.
        assert!(thread::tick_counts().idle >= 50);
    });
}

/// Sleepers wake in deadline order, at their deadlines,
/// regardless of the order they went to sleep in.
///
#[test]
fn sleepers_wake_in_deadline_order() {
    kernel::run(&[], || {
        let start = time::ticks();
        let wakeups = Arc::new(Mutex::new(Vec::new()));

        let mut sleepers = Vec::new();
        for (tag, duration) in [("thirty", 30u64), ("ten", 10), ("twenty", 20)] {
            let recorder = wakeups.clone();
            let id = thread::create(tag, 40, move || {
                time::sleep(duration);
                recorder.lock().unwrap().push((tag, time::ticks()));
            })
            .expect("out of memory");
            sleepers.push(id);
        }

        time::sleep(60);
        for id in sleepers {
            process::wait(id);
        }

        let wakeups = wakeups.lock().unwrap();
        assert_eq!(
            *wakeups,
            [
                ("ten", start + 10),
                ("twenty", start + 20),
                ("thirty", start + 30),
            ]
        );
    });
}

/// With every thread asleep, the load average decays
/// toward zero.
///
#[test]
fn load_average_converges_to_zero_when_idle() {
    kernel::run(&["-o", "mlfqs"], || {
        let stop = Arc::new(AtomicBool::new(false));

        // First drive the load average up with two
        // CPU-bound threads (this one included).
        let running = stop.clone();
        let spinner = thread::create("spinner", thread::PRI_DEFAULT, move || {
            while !running.load(Ordering::Relaxed) {
                time::ticker::interrupt();
            }
        })
        .expect("out of memory");

        for _ in 0..1200 {
            time::ticker::interrupt();
        }
        let loaded = thread::get_load_avg();
        assert!(loaded >= 20, "load average failed to rise: {}", loaded);
        assert!(loaded <= 120, "load average rose too far: {}", loaded);

        stop.store(true, Ordering::Relaxed);
        process::wait(spinner);

        // Then go quiet and let it decay.
        time::sleep(18_000);
        let decayed = thread::get_load_avg();
        assert!(decayed < loaded);
        assert!(decayed <= 10, "load average failed to decay: {}", decayed);
    });
}
