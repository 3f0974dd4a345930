// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! End-to-end tests of the round-robin scheduler: creation,
//! preemption, ordering within a priority, and thread destruction.

use kernel::process;
use kernel::thread;
use kernel::time;
use std::sync::{Arc, Mutex};

/// Creating a thread with priority strictly above the
/// caller's preempts the caller immediately.
///
#[test]
fn higher_priority_creature_runs_first() {
    kernel::run(&[], || {
        let order = Arc::new(Mutex::new(Vec::new()));

        let recorder = order.clone();
        let id = thread::create("worker", 40, move || {
            recorder.lock().unwrap().push("worker");
        })
        .expect("out of memory");

        order.lock().unwrap().push("main");

        assert_eq!(process::wait(id), Some(thread::EXIT_FAILURE));
        assert_eq!(*order.lock().unwrap(), ["worker", "main"]);
    });
}

/// Creating threads with equal or lower priority does not
/// preempt the creator.
///
#[test]
fn equal_or_lower_priority_does_not_preempt() {
    kernel::run(&[], || {
        let order = Arc::new(Mutex::new(Vec::new()));

        let recorder = order.clone();
        let equal = thread::create("equal", thread::PRI_DEFAULT, move || {
            recorder.lock().unwrap().push("equal");
        })
        .expect("out of memory");

        let recorder = order.clone();
        let lower = thread::create("lower", 10, move || {
            recorder.lock().unwrap().push("lower");
        })
        .expect("out of memory");

        order.lock().unwrap().push("main");

        process::wait(equal);
        process::wait(lower);

        assert_eq!(*order.lock().unwrap(), ["main", "equal", "lower"]);
    });
}

/// Within one priority, scheduling is FIFO: creation
/// order is run order, and a yielding thread goes behind
/// its equals.
///
#[test]
fn fifo_within_a_priority() {
    kernel::run(&[], || {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut workers = Vec::new();

        for i in 0..4 {
            let recorder = order.clone();
            let id = thread::create("peer", thread::PRI_DEFAULT, move || {
                recorder.lock().unwrap().push(i);
            })
            .expect("out of memory");
            workers.push(id);
        }

        for _ in 0..4 {
            thread::yield_now();
        }

        for id in workers {
            process::wait(id);
        }

        assert_eq!(*order.lock().unwrap(), [0, 1, 2, 3]);
    });
}

/// Preemption is enforced at TIME_SLICE ticks: two
/// CPU-bound peers alternate in exact slices.
///
#[test]
fn round_robin_slices_alternate() {
    const TICKS_EACH: usize = 12;

    kernel::run(&[], || {
        let schedule = Arc::new(Mutex::new(Vec::new()));

        // Park ourselves above the spinners while creating
        // them, then drop below to set them both running.
        thread::set_priority(50);

        let mut spinners = Vec::new();
        for tag in ["a", "b"] {
            let recorder = schedule.clone();
            let id = thread::create(tag, 40, move || {
                for _ in 0..TICKS_EACH {
                    recorder.lock().unwrap().push(tag);
                    time::ticker::interrupt();
                }
            })
            .expect("out of memory");
            spinners.push(id);
        }

        thread::set_priority(thread::PRI_MIN);
        for id in spinners {
            process::wait(id);
        }
        thread::set_priority(thread::PRI_DEFAULT);

        let schedule = schedule.lock().unwrap();
        let expected: Vec<&str> = ["a", "b", "a", "b", "a", "b"]
            .iter()
            .flat_map(|tag| std::iter::repeat(*tag).take(time::TIME_SLICE as usize))
            .collect();
        assert_eq!(*schedule, expected);
    });
}

/// set_priority clamps its argument and takes effect
/// immediately when no donations are active.
///
#[test]
fn set_priority_clamps() {
    kernel::run(&[], || {
        thread::set_priority(1000);
        assert_eq!(thread::get_priority(), thread::PRI_MAX);

        thread::set_priority(-1000);
        assert_eq!(thread::get_priority(), thread::PRI_MIN);

        thread::set_priority(thread::PRI_DEFAULT);
        assert_eq!(thread::get_priority(), thread::PRI_DEFAULT);
    });
}

/// A thread whose body returns is destroyed cleanly: its
/// page is returned by the very next schedule and its id
/// no longer resolves.
///
#[test]
fn exit_frees_the_page_at_the_next_schedule() {
    kernel::run(&[], || {
        let pages_before = kernel::memory::pages_in_use();

        let id = thread::create("ephemeral", 40, || {
            process::exit(7);
        })
        .expect("out of memory");

        // The worker outran us and is already gone, page
        // and all; only the exit record remains.
        assert_eq!(kernel::memory::pages_in_use(), pages_before);
        assert!(thread::by_id(id).is_none());

        assert_eq!(process::wait(id), Some(7));

        // A status can be collected only once.
        assert_eq!(process::wait(id), None);
    });
}

/// Booting brings up the service threads alongside the
/// initial thread.
///
#[test]
fn boot_creates_the_service_threads() {
    kernel::run(&[], || {
        let names = kernel::interrupts::without_interrupts(|| {
            let mut names = Vec::new();
            thread::foreach(|t| names.push(t.name().to_string()));
            names
        });

        assert!(names.contains(&"main".to_string()));
        assert!(names.contains(&"idle".to_string()));
        assert!(names.contains(&"wakeup".to_string()));
        assert!(!names.contains(&"mlfqs".to_string()));
    });
}
