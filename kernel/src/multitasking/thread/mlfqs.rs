// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the multi-level feedback queue statistics engine.
//!
//! The MLFQS computes every thread's priority from how much CPU it
//! has been using ([`Thread::recent_cpu`]) and how generous it has
//! asked the scheduler to be to others (its niceness). The
//! recomputations walk every thread, so they do not belong in the
//! tick handler; instead the tick handler sets a dirty flag and
//! unblocks the dedicated *housekeeping thread*, which runs at
//! [`PRI_MAX`] and does the walking in thread context.
//!
//! Three service threads are excluded from the statistics: the idle
//! thread, the housekeeping thread itself, and the timer wakeup
//! thread. Counting threads that only run when nothing else wants
//! the CPU (or that exist to tend the statistics) would make every
//! load average read high by a constant.

use crate::interrupts;
use crate::multitasking::cpu_local;
use crate::multitasking::thread::{self, scheduler, State, Thread, PRI_MAX, PRI_MIN};
use crate::time;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use crossbeam::atomic::AtomicCell;
use fixedpoint::Fixed;

/// The exponentially-weighted moving average of the
/// number of threads that were ready or running over the
/// last minute.
///
static LOAD_AVG: AtomicCell<Fixed> = AtomicCell::new(Fixed::ZERO);

/// Set by the tick handler once a second; tells the
/// housekeeping thread to recompute the load average and
/// every thread's recent CPU estimate.
///
static RECENT_CPU_DIRTY: AtomicBool = AtomicBool::new(false);

/// Set by the tick handler at the end of each time slice;
/// tells the housekeeping thread to recompute every
/// thread's priority.
///
static PRIORITY_DIRTY: AtomicBool = AtomicBool::new(false);

/// The housekeeping thread, once it has recorded itself.
///
static HOUSEKEEPER: AtomicPtr<Thread> = AtomicPtr::new(ptr::null_mut());

/// Resets the engine to its boot state.
///
pub(crate) fn init() {
    LOAD_AVG.store(Fixed::ZERO);
    RECENT_CPU_DIRTY.store(false, Ordering::Relaxed);
    PRIORITY_DIRTY.store(false, Ordering::Relaxed);
    HOUSEKEEPER.store(ptr::null_mut(), Ordering::Relaxed);
}

/// Returns the current load average.
///
pub(crate) fn load_avg() -> Fixed {
    LOAD_AVG.load()
}

/// Marks the load average and recent CPU estimates stale.
///
pub(crate) fn mark_recent_cpu_dirty() {
    RECENT_CPU_DIRTY.store(true, Ordering::Relaxed);
}

/// Marks the computed priorities stale.
///
pub(crate) fn mark_priority_dirty() {
    PRIORITY_DIRTY.store(true, Ordering::Relaxed);
}

/// Unblocks the housekeeping thread if there is stale
/// state for it to recompute, requesting a yield so that
/// it runs as soon as the interrupt returns. Called from
/// the tick handler.
///
pub(crate) fn kick_housekeeper() {
    let housekeeper = HOUSEKEEPER.load(Ordering::Relaxed);
    if housekeeper.is_null() {
        return;
    }

    let dirty = RECENT_CPU_DIRTY.load(Ordering::Relaxed) || PRIORITY_DIRTY.load(Ordering::Relaxed);
    if dirty && unsafe { (*housekeeper).state() } == State::Blocked {
        thread::unblock(unsafe { &*housekeeper });
        interrupts::yield_on_return();
    }
}

/// The housekeeping thread's body: block until the tick
/// handler reports stale statistics, recompute them, and
/// go back to sleep.
///
pub(crate) fn housekeeper_loop() {
    HOUSEKEEPER.store(cpu_local::current_thread(), Ordering::Relaxed);

    loop {
        let old = interrupts::disable();
        thread::block();
        interrupts::set_level(old);

        if RECENT_CPU_DIRTY.load(Ordering::Relaxed) {
            update_load_avg();
            update_recent_cpu();
        }

        if PRIORITY_DIRTY.load(Ordering::Relaxed) {
            update_priorities();
        }
    }
}

/// Returns whether the thread is excluded from the MLFQS
/// statistics.
///
fn is_excluded(thread: &Thread) -> bool {
    let thread = thread as *const Thread as *mut Thread;
    ptr::eq(thread, cpu_local::idle_thread())
        || ptr::eq(thread, HOUSEKEEPER.load(Ordering::Relaxed))
        || ptr::eq(thread, time::timers::waker())
}

/// Counts the threads that are ready or running, leaving
/// out the excluded service threads.
///
fn ready_thread_count() -> i32 {
    interrupts::without_interrupts(|| {
        let mut count = 0;
        thread::foreach(|t| {
            if !is_excluded(t) && (t.state() == State::Ready || t.state() == State::Running) {
                count += 1;
            }
        });
        count
    })
}

/// Recomputes the load average:
/// `load_avg = (59/60)*load_avg + (1/60)*ready`.
///
fn update_load_avg() {
    let ready = ready_thread_count();
    let load = (LOAD_AVG.load() * 59 + ready) / 60;
    LOAD_AVG.store(load);

    log::trace!("load_avg now {} with {} ready threads", load, ready);
}

/// Recomputes every thread's recent CPU estimate:
/// `recent_cpu = (2*load_avg)/(2*load_avg + 1) * recent_cpu + nice`.
///
fn update_recent_cpu() {
    RECENT_CPU_DIRTY.store(false, Ordering::Relaxed);

    let twice_load = LOAD_AVG.load() * 2;
    let coefficient = twice_load / (twice_load + 1);

    interrupts::without_interrupts(|| {
        thread::foreach(|t| {
            if !is_excluded(t) {
                t.recent_cpu
                    .store(coefficient * t.recent_cpu.load() + t.nice());
            }
        });
    });
}

/// Computes the priority the MLFQS assigns for a given
/// recent CPU estimate and niceness:
/// `PRI_MAX - recent_cpu/4 - 2*nice`, rounded toward zero
/// and clamped to the priority range.
///
pub(crate) fn compute_priority(recent_cpu: Fixed, nice: i32) -> i32 {
    let raw = (Fixed::from_int(PRI_MAX) - recent_cpu / 4 - 2 * nice).truncate();
    raw.clamp(PRI_MIN, PRI_MAX)
}

/// Recomputes one thread's priority and, if the thread is
/// ready, moves it to the back of the bucket for its new
/// priority.
///
pub(crate) fn update_priority(thread: &Thread) {
    if is_excluded(thread) {
        return;
    }

    let old_priority = thread.priority();
    let new_priority = compute_priority(thread.recent_cpu.load(), thread.nice());

    // Computed priorities replace assigned ones entirely,
    // so the base moves with the effective priority.
    thread.priority.store(new_priority);
    thread.base_priority.store(new_priority);

    if thread.state() == State::Ready {
        interrupts::without_interrupts(|| scheduler::move_to_bucket(thread, old_priority));
    }
}

/// Recomputes every thread's priority.
///
fn update_priorities() {
    PRIORITY_DIRTY.store(false, Ordering::Relaxed);

    // Bucket moves only touch the MLFQS queues, never the
    // all-threads list being walked.
    interrupts::without_interrupts(|| thread::foreach(update_priority));
}

#[cfg(test)]
mod tests {
    use super::compute_priority;
    use crate::multitasking::thread::{PRI_MAX, PRI_MIN};
    use fixedpoint::Fixed;

    #[test]
    fn fresh_thread_gets_top_priority() {
        assert_eq!(compute_priority(Fixed::ZERO, 0), PRI_MAX);
    }

    #[test]
    fn saturated_recent_cpu_gets_bottom_priority() {
        assert_eq!(compute_priority(Fixed::from_int(4 * PRI_MAX), 0), PRI_MIN);
        assert_eq!(compute_priority(Fixed::from_int(100_000), 0), PRI_MIN);
    }

    #[test]
    fn niceness_shifts_priority_two_per_step() {
        assert_eq!(compute_priority(Fixed::ZERO, 5), PRI_MAX - 10);
        assert_eq!(compute_priority(Fixed::ZERO, 20), PRI_MAX - 40);
        assert_eq!(compute_priority(Fixed::ZERO, -20), PRI_MAX);
    }

    #[test]
    fn rounding_is_toward_zero() {
        // recent_cpu = 1 gives 63 - 0.25: rounding to
        // nearest would keep 63, truncation gives 62.
        assert_eq!(compute_priority(Fixed::from_int(1), 0), PRI_MAX - 1);
        assert_eq!(compute_priority(Fixed::from_int(3), 0), PRI_MAX - 1);
        assert_eq!(compute_priority(Fixed::from_int(4), 0), PRI_MAX - 1);
    }
}
