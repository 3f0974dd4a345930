// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the scheduler core: the ready structures, the choice of
//! the next thread to run, and the dispatch itself.
//!
//! Two interchangeable schedulers share this machinery. The default
//! keeps a single ready list in weakly-descending priority order, so
//! popping the front yields round-robin within each priority. Under
//! the MLFQS there are sixty-four FIFO buckets, one per priority, and
//! the next thread comes from the highest non-empty bucket; threads
//! move between buckets when the housekeeping thread recomputes their
//! priorities.
//!
//! If nothing is runnable, the idle thread runs. It re-blocks every
//! time it is scheduled, waiting for the next timer interrupt with
//! interrupts atomically re-enabled so no wakeup can be lost.

use crate::interrupts;
use crate::interrupts::IntrCell;
use crate::memory;
use crate::multitasking::cpu_local;
use crate::multitasking::process;
use crate::multitasking::sync::Semaphore;
use crate::multitasking::thread::{self, State, Thread, PRI_MAX, PRI_MIN};
use crate::time::slice::TimeSlice;
use core::ptr;
use core::ptr::NonNull;
use intrusive_list::{Link, List};
use std::sync::Arc;

/// The ready list used by the round-robin scheduler, kept
/// in weakly-descending priority order by insertion.
///
static READY_LIST: IntrCell<List> = IntrCell::new(List::new());

/// The MLFQS ready buckets, one FIFO per priority,
/// allocated at boot when the MLFQS is selected.
///
static MLFQS_QUEUES: IntrCell<Vec<List>> = IntrCell::new(Vec::new());

/// Ticks consumed by the running thread since it was last
/// dispatched. Reset in the post-switch tail.
///
static SLICE: TimeSlice = TimeSlice::new();

/// Resets the ready structures for the chosen scheduler.
/// Must be called with interrupts disabled.
///
pub(crate) fn init(use_mlfqs: bool) {
    READY_LIST.with(|list| *list = List::new());
    MLFQS_QUEUES.with(|queues| {
        queues.clear();
        if use_mlfqs {
            for _ in PRI_MIN..=PRI_MAX {
                queues.push(List::new());
            }
        }
    });
    SLICE.reset();
}

/// Orders run-queue links by strictly-descending thread
/// priority, so ordered insertion leaves a thread behind
/// its equals and scheduling within a priority is FIFO.
///
fn priority_greater(a: *const Link, b: *const Link) -> bool {
    unsafe {
        (*thread::from_elem(a as *mut Link)).priority()
            > (*thread::from_elem(b as *mut Link)).priority()
    }
}

/// Puts a thread on the ready structure appropriate to
/// the scheduler in use. Must be called with interrupts
/// disabled.
///
pub(crate) fn enqueue(thread: &Thread) {
    assert!(!interrupts::are_enabled());

    if thread::mlfqs_enabled() {
        MLFQS_QUEUES.with(|queues| unsafe {
            queues[thread.priority() as usize].push_back(thread.mlfqselem.get());
        });
    } else {
        READY_LIST.with(|list| unsafe {
            list.insert_ordered(thread.elem.get(), priority_greater);
        });
    }
}

/// Restores a ready thread's position in the ordered
/// ready list after its priority changed under it (a
/// donation). Round-robin scheduler only.
///
pub(crate) fn reposition(thread: &Thread) {
    assert!(!interrupts::are_enabled());
    assert!(!thread::mlfqs_enabled());
    assert_eq!(thread.state(), State::Ready);

    READY_LIST.with(|list| unsafe {
        list.remove(thread.elem.get());
        list.insert_ordered(thread.elem.get(), priority_greater);
    });
}

/// Moves a ready thread from the bucket for its old
/// priority to the back of the bucket for its current
/// one. MLFQS only; called by the housekeeping thread
/// with interrupts disabled.
///
pub(crate) fn move_to_bucket(thread: &Thread, old_priority: i32) {
    assert!(!interrupts::are_enabled());

    MLFQS_QUEUES.with(|queues| unsafe {
        queues[old_priority as usize].remove(thread.mlfqselem.get());
        queues[thread.priority() as usize].push_back(thread.mlfqselem.get());
    });
}

/// Returns the priority of the best-placed ready thread,
/// or None if no thread is ready. Must be called with
/// interrupts disabled.
///
pub(crate) fn highest_ready_priority() -> Option<i32> {
    if thread::mlfqs_enabled() {
        MLFQS_QUEUES.with(|queues| {
            (PRI_MIN..=PRI_MAX)
                .rev()
                .find(|pri| !queues[*pri as usize].is_empty())
        })
    } else {
        READY_LIST.with(|list| {
            list.front()
                .map(|link| unsafe { (*thread::from_elem(link.as_ptr())).priority() })
        })
    }
}

/// Chooses and removes the next thread to be scheduled,
/// falling back to the idle thread when nothing is ready.
///
fn next_thread_to_run() -> *mut Thread {
    let next = if thread::mlfqs_enabled() {
        MLFQS_QUEUES.with(|queues| {
            for pri in (PRI_MIN..=PRI_MAX).rev() {
                if let Some(link) = unsafe { queues[pri as usize].pop_front() } {
                    return Some(unsafe { thread::from_mlfqselem(link.as_ptr()) });
                }
            }
            None
        })
    } else {
        READY_LIST.with(|list| {
            unsafe { list.pop_front() }.map(|link| unsafe { thread::from_elem(link.as_ptr()) })
        })
    };

    next.unwrap_or_else(|| {
        let idle = cpu_local::idle_thread();
        assert!(!idle.is_null(), "nothing to run and no idle thread");
        idle
    })
}

/// Records one tick against the running thread's time
/// slice, returning true once the slice is used up.
///
pub(crate) fn slice_expired() -> bool {
    SLICE.tick()
}

/// Schedules a new thread. At entry, interrupts must be
/// off and the running thread must already have been
/// moved out of [`State::Running`]. Finds the next thread
/// to run, switches to it (which may take a long time to
/// return, if the current thread was moved to a queue),
/// and completes the switch with [`thread_schedule_tail`].
///
pub(crate) fn schedule() {
    assert!(!interrupts::are_enabled());

    let cur = cpu_local::current_thread();
    let next = next_thread_to_run();
    unsafe {
        assert_ne!((*cur).state(), State::Running);
        assert!((*next).is_thread());
    }

    let prev = if !ptr::eq(cur, next) {
        log::trace!(
            "switching from {:?} to {:?}",
            unsafe { &*cur },
            unsafe { &*next }
        );
        cpu_local::set_current_thread(next);
        unsafe { switch_threads_wrapper(cur, next) }
    } else {
        ptr::null_mut()
    };

    thread_schedule_tail(prev);
}

/// Performs the raw switch. Split out so the unsafe block
/// around the assembly call stays small.
///
unsafe fn switch_threads_wrapper(prev: *mut Thread, next: *mut Thread) -> *mut Thread {
    super::switch::switch_threads(prev, next)
}

/// Completes a thread switch: marks the new thread
/// running, starts its time slice, activates its address
/// space, and destroys the previous thread if it is dying.
///
/// Called by [`schedule`] as its final action, and by
/// `switch_entry` the first time a thread is dispatched --
/// which is why it is exported with an unmangled symbol.
/// Interrupts remain disabled throughout.
///
/// The destruction must happen here, after the switch, so
/// that a dying thread never frees the page its own stack
/// lives in. The initial thread's control block is not
/// page-backed by the scheduler's rules (its stack is the
/// boot stack) and is freed at shutdown instead.
///
#[no_mangle]
extern "sysv64" fn thread_schedule_tail(prev: *mut Thread) {
    assert!(!interrupts::are_enabled());

    let cur = cpu_local::current_thread();
    unsafe {
        (*cur).status.store(State::Running);
        process::activate(&*cur);
    }

    SLICE.reset();

    if !prev.is_null() {
        let dying = unsafe { (*prev).state() == State::Dying };
        if dying && !ptr::eq(prev, thread::initial_thread()) {
            assert!(!ptr::eq(prev, cur));
            unsafe { memory::free_page(NonNull::new_unchecked(prev as *mut u8)) };
        }
    }
}

/// The idle thread's body. Records itself, reports in,
/// and then sleeps through every scheduling it gets.
///
pub(crate) fn idle_loop(started: Arc<Semaphore>) {
    cpu_local::set_idle_thread(cpu_local::current_thread());
    started.up();

    loop {
        // Let someone else run.
        interrupts::disable();
        thread::block();

        // Re-enable interrupts and wait for the next one,
        // atomically, so a tick cannot slip in between and
        // be slept through.
        interrupts::enable_and_halt();
    }
}
