// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the sleep queue and the wakeup thread.
//!
//! [`sleep`] blocks the caller until a deadline tick. The tick
//! handler only compares the current tick against the earliest
//! deadline (one atomic read); when a sleeper comes due it unblocks
//! the dedicated *wakeup thread*, which runs at [`PRI_MAX`] and does
//! the actual list-walking and unblocking in thread context. Like
//! the MLFQS housekeeper, the wakeup thread keeps O(n) work out of
//! the interrupt handler; it is likewise excluded from the load
//! average, since it only ever runs for a few instructions at a
//! time.
//!
//! [`PRI_MAX`]: crate::multitasking::thread::PRI_MAX

use crate::interrupts;
use crate::interrupts::IntrCell;
use crate::multitasking::cpu_local;
use crate::multitasking::thread::{self, State, Thread};
use crate::time::ticker;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use intrusive_list::{Link, List};

/// The threads blocked in [`sleep`], ordered by ascending
/// wakeup tick.
///
static SLEEPERS: IntrCell<List> = IntrCell::new(List::new());

/// The earliest wakeup tick of any sleeper, or `u64::MAX`
/// when no thread sleeps. This is all the tick handler
/// reads.
///
static EARLIEST_WAKE: AtomicU64 = AtomicU64::new(u64::MAX);

/// The wakeup thread, once it has recorded itself.
///
static WAKER: AtomicPtr<Thread> = AtomicPtr::new(ptr::null_mut());

/// Resets the sleep queue to its boot state.
///
pub(crate) fn init() {
    interrupts::without_interrupts(|| SLEEPERS.with(|list| *list = List::new()));
    EARLIEST_WAKE.store(u64::MAX, Ordering::Relaxed);
    WAKER.store(ptr::null_mut(), Ordering::Relaxed);
}

/// Returns the wakeup thread, which may be null early in
/// boot.
///
pub(crate) fn waker() -> *mut Thread {
    WAKER.load(Ordering::Relaxed)
}

/// Orders sleep-queue links by ascending wakeup tick, so
/// threads due at the same tick wake in sleep order.
///
fn wakes_earlier(a: *const Link, b: *const Link) -> bool {
    unsafe {
        (*thread::from_elem(a as *mut Link)).wake_at.get()
            < (*thread::from_elem(b as *mut Link)).wake_at.get()
    }
}

/// Blocks the current thread for at least `duration`
/// timer ticks.
///
/// A zero duration returns immediately.
///
pub fn sleep(duration: u64) {
    assert!(!interrupts::in_interrupt(), "sleeping in interrupt context");

    if duration == 0 {
        return;
    }

    let cur = thread::current();
    let wake_at = ticker::ticks() + duration;

    let old = interrupts::disable();
    cur.wake_at.set(wake_at);
    SLEEPERS.with(|list| unsafe { list.insert_ordered(cur.elem.get(), wakes_earlier) });
    if wake_at < EARLIEST_WAKE.load(Ordering::Relaxed) {
        EARLIEST_WAKE.store(wake_at, Ordering::Relaxed);
    }
    thread::block();
    interrupts::set_level(old);
}

/// The tick handler's part: if a sleeper has come due and
/// the wakeup thread is asleep, get it out of bed and ask
/// for a yield so it runs the moment the interrupt
/// returns.
///
pub(crate) fn on_tick(now: u64) {
    if now < EARLIEST_WAKE.load(Ordering::Relaxed) {
        return;
    }

    let waker = WAKER.load(Ordering::Relaxed);
    if !waker.is_null() && unsafe { (*waker).state() } == State::Blocked {
        thread::unblock(unsafe { &*waker });
        interrupts::yield_on_return();
    }
}

/// The wakeup thread's body: sleep until the tick handler
/// reports a due sleeper, wake everything that is due,
/// repeat.
///
pub(crate) fn waker_loop() {
    WAKER.store(cpu_local::current_thread(), Ordering::Relaxed);

    loop {
        let old = interrupts::disable();
        thread::block();
        interrupts::set_level(old);

        wake_due();
    }
}

/// Unblocks every sleeper whose deadline has passed and
/// recomputes the earliest remaining deadline.
///
fn wake_due() {
    interrupts::without_interrupts(|| {
        SLEEPERS.with(|list| {
            let now = ticker::ticks();

            while let Some(front) = list.front() {
                let sleeper = unsafe { &*thread::from_elem(front.as_ptr()) };
                if sleeper.wake_at.get() > now {
                    break;
                }

                unsafe { list.remove(front.as_ptr()) };
                thread::unblock(sleeper);
            }

            let earliest = list
                .front()
                .map(|link| unsafe { (*thread::from_elem(link.as_ptr())).wake_at.get() })
                .unwrap_or(u64::MAX);
            EARLIEST_WAKE.store(earliest, Ordering::Relaxed);
        });
    });
}
