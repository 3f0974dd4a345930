// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Handles the kernel's internal monotonic ticker and stands in for
//! the timer driver.
//!
//! On real hardware a programmable timer raises an interrupt
//! [`TIMER_FREQ`] times a second. Hosted, an interrupt is delivered
//! wherever [`interrupt`] is called: the call masks interrupts,
//! enters interrupt context, advances the ticker, runs the
//! threading core's tick handler, and then services any yield the
//! handler requested -- exactly the sequence an interrupt stub
//! performs on the way out of a real interrupt.
//!
//! Virtual time therefore advances only when some thread lets it: a
//! CPU-bound thread burns a tick of virtual CPU per [`interrupt`]
//! call, and the idle thread halts, which delivers the next tick
//! atomically. Kernel code with interrupts disabled never calls
//! [`interrupt`], which is what makes masking a valid critical
//! section.

use crate::interrupts;
use crate::multitasking::thread;
use core::sync::atomic::{AtomicU64, Ordering};

/// The number of timer interrupts per second of virtual
/// time. Also the cadence of the MLFQS load-average and
/// recent-cpu recomputations.
///
pub const TIMER_FREQ: u64 = 100;

// The system ticker, which is a monotonic counter.
//
static TICKER: AtomicU64 = AtomicU64::new(0);

/// Resets the ticker to boot time.
///
pub(crate) fn init() {
    TICKER.store(0, Ordering::Relaxed);
}

/// Returns the number of timer interrupts delivered since
/// the kernel booted.
///
pub fn ticks() -> u64 {
    TICKER.load(Ordering::Relaxed)
}

/// Delivers one timer interrupt at this instruction
/// boundary.
///
/// # Panics
///
/// Panics if interrupts are masked: hardware would hold
/// the interrupt pending, and a caller relying on that is
/// almost certainly inside a critical section it thinks
/// is atomic.
///
pub fn interrupt() {
    interrupts::enter_handler();

    let now = TICKER.fetch_add(1, Ordering::Relaxed) + 1;
    thread::tick(now);

    let yield_requested = interrupts::leave_handler();
    interrupts::enable();

    // Time to pre-empt the interrupted thread.
    if yield_requested {
        thread::yield_now();
    }
}
