// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The Lantern kernel threading core.
//!
//! Lantern is a small teaching operating system; this crate is its
//! hard center: kernel threads with their lifecycle and context
//! switch, two interchangeable CPU schedulers (strict priorities
//! with donation, or the multi-level feedback queue), the
//! interrupt-driven timekeeping that powers preemption, and the
//! synchronisation primitives the rest of the kernel is written
//! against.
//!
//! The kernel runs hosted, as a deterministic uniprocessor
//! simulation: interrupts are a flag rather than a pin, and the
//! timer driver delivers a tick wherever
//! [`time::ticker::interrupt`] is called. Everything above that
//! line -- scheduling, donation, the MLFQS, blocking -- behaves
//! exactly as it would on the metal.
//!
//! ## Booting
//!
//! [`run`] boots the kernel, runs `main` as the initial thread, and
//! shuts the kernel down when `main` returns:
//!
//! ```
//! kernel::run(&[], || {
//!     let id = kernel::thread::create("worker", 40, || {
//!         // Outranks the initial thread, so runs at once.
//!     })
//!     .expect("out of memory");
//!
//!     assert!(kernel::process::wait(id).is_some());
//! });
//! ```
//!
//! The boot arguments mirror the kernel command line; `-o mlfqs`
//! selects the feedback-queue scheduler in place of the default
//! round-robin.

pub mod interrupts;
pub mod memory;
pub mod multitasking;
pub mod time;

pub use crate::multitasking::thread;
pub use crate::multitasking::{process, sync};

/// Serialises kernel runs within one host process: the
/// kernel's state is global, so only one boot may be live
/// at a time. Tests in one binary run concurrently and
/// queue up here.
///
static RUN_LOCK: spin::Mutex<()> = spin::Mutex::new(());

/// Returns the run lock, for unit tests that poke at
/// global kernel state without a full boot.
///
pub(crate) fn run_lock() -> &'static spin::Mutex<()> {
    &RUN_LOCK
}

/// The boot-time configuration, parsed from the kernel
/// command line.
///
struct BootOptions {
    /// Use the multi-level feedback queue scheduler
    /// instead of priority round-robin.
    mlfqs: bool,
}

/// Parses the kernel command line.
///
fn parse_options(args: &[&str]) -> BootOptions {
    let mut options = BootOptions { mlfqs: false };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "-o" => match iter.next() {
                Some(&"mlfqs") => options.mlfqs = true,
                other => panic!("unknown scheduler option {:?}", other),
            },
            other => panic!("unknown boot argument {:?}", other),
        }
    }

    options
}

/// Boots the kernel, runs `main` as the body of the
/// initial thread, and shuts the kernel down once `main`
/// returns.
///
/// `main` is responsible for waiting out any threads it
/// wants to finish; whatever still exists when it returns
/// is destroyed, wherever it was.
///
pub fn run<F>(args: &[&str], main: F)
where
    F: FnOnce(),
{
    let _guard = RUN_LOCK.lock();
    let options = parse_options(args);

    interrupts::init();
    time::init();
    thread::init(options.mlfqs);

    log::debug!(
        "kernel booted with the {} scheduler",
        if options.mlfqs { "mlfqs" } else { "round-robin" }
    );

    thread::start();

    main();

    thread::print_stats();
    thread::shutdown();
}
