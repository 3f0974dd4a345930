// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the synchronisation primitives the kernel builds on
//! threads: semaphores, locks with priority donation, and condition
//! variables.
//!
//! All three keep their waiters on intrusive lists and pick who to
//! wake by scanning for the highest-priority waiter *at wake time*,
//! not at enqueue time: a waiter's priority can change while it
//! sleeps, through donation, and a stale ordering would hand the CPU
//! to the wrong thread.
//!
//! ## Priority donation
//!
//! A lock holder runs with the highest priority of any thread blocked
//! waiting for one of its locks, transitively: if H holds a lock M
//! wants, and M holds a lock L wants, then L's priority flows through
//! M to H. The walk is bounded at [`DONATION_DEPTH_MAX`] levels;
//! deeper chains simply stop donating. Donation only exists under the
//! round-robin scheduler -- the MLFQS computes priorities and ignores
//! assigned ones.

use crate::interrupts;
use crate::multitasking::thread::{self, State, Thread};
use core::cell::{Cell, UnsafeCell};
use core::ptr;
use intrusive_list::{container_of, Link, List};

/// How many levels of nested locks a single donation can
/// pass through. Chains deeper than this stop donating;
/// this is documented behavior, not an error.
///
pub const DONATION_DEPTH_MAX: usize = 8;

/// Orders wait-queue links by the waiting thread's
/// current priority.
///
fn priority_less(a: *const Link, b: *const Link) -> bool {
    unsafe {
        (*thread::from_elem(a as *mut Link)).priority()
            < (*thread::from_elem(b as *mut Link)).priority()
    }
}

/// A counting semaphore.
///
/// [`down`](Semaphore::down) waits for the value to
/// become positive and decrements it;
/// [`up`](Semaphore::up) increments the value and wakes
/// the highest-priority waiter.
///
pub struct Semaphore {
    value: Cell<u32>,
    waiters: UnsafeCell<List>,
}

// Waiter-list accesses are serialised by interrupt
// masking, and the value only changes inside the same
// masked sections.
//
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Returns a semaphore with the given initial value.
    ///
    pub const fn new(value: u32) -> Semaphore {
        Semaphore {
            value: Cell::new(value),
            waiters: UnsafeCell::new(List::new()),
        }
    }

    /// Waits for the value to become positive, then
    /// decrements it.
    ///
    /// May sleep, so must not be called in interrupt
    /// context. May be called with interrupts disabled;
    /// the caller's interrupt level is restored on
    /// return.
    ///
    pub fn down(&self) {
        assert!(!interrupts::in_interrupt(), "down() in interrupt context");

        let cur = thread::current();
        let old = interrupts::disable();
        while self.value.get() == 0 {
            unsafe { (*self.waiters.get()).push_back(cur.elem.get()) };
            thread::block();
        }
        self.value.set(self.value.get() - 1);
        interrupts::set_level(old);
    }

    /// Increments the value and wakes the waiter with the
    /// highest priority, re-evaluated now rather than at
    /// enqueue time.
    ///
    /// If the woken thread outranks the caller, the
    /// caller yields: immediately in thread context, or
    /// on interrupt return from an interrupt handler.
    ///
    pub fn up(&self) {
        let old = interrupts::disable();
        let mut woken_priority = None;
        unsafe {
            let waiters = &mut *self.waiters.get();
            if let Some(link) = waiters.max_by(priority_less) {
                waiters.remove(link.as_ptr());
                let waiter = &*thread::from_elem(link.as_ptr());
                woken_priority = Some(waiter.priority());
                thread::unblock(waiter);
            }
        }
        self.value.set(self.value.get() + 1);
        interrupts::set_level(old);

        if let Some(priority) = woken_priority {
            if priority > thread::current().priority() {
                if interrupts::in_interrupt() {
                    interrupts::yield_on_return();
                } else {
                    thread::yield_now();
                }
            }
        }
    }
}

/// A lock: a binary, non-recursive mutual exclusion
/// primitive with priority donation.
///
/// A lock differs from a semaphore initialised to one in
/// that it has an owner: only the thread holding the lock
/// may release it, and threads blocked on it donate their
/// priority to the holder.
///
pub struct Lock {
    holder: Cell<*mut Thread>,
    semaphore: Semaphore,
}

// The holder cell is only read or written under interrupt
// masking (or by the holding thread itself).
//
unsafe impl Send for Lock {}
unsafe impl Sync for Lock {}

impl Lock {
    /// Returns a new, unheld lock.
    ///
    pub const fn new() -> Lock {
        Lock {
            holder: Cell::new(ptr::null_mut()),
            semaphore: Semaphore::new(1),
        }
    }

    /// Acquires the lock, sleeping until it is available.
    ///
    /// While sleeping, the caller donates its priority
    /// along the chain of holders so that the thread it
    /// is waiting for cannot be starved by middling
    /// priorities.
    ///
    /// # Panics
    ///
    /// Panics in interrupt context, and if the caller
    /// already holds this lock.
    ///
    pub fn acquire(&self) {
        assert!(!interrupts::in_interrupt(), "acquire() in interrupt context");
        assert!(!self.held_by_current(), "lock is not recursive");

        let cur = thread::current();

        let old = interrupts::disable();
        if !self.holder.get().is_null() && !thread::mlfqs_enabled() {
            cur.waiting_on.set(self as *const Lock);
            self.donate(cur);
        }
        interrupts::set_level(old);

        self.semaphore.down();

        let old = interrupts::disable();
        cur.waiting_on.set(ptr::null());
        self.holder.set(cur as *const Thread as *mut Thread);
        interrupts::set_level(old);
    }

    /// Walks the chain of holders starting at this lock's,
    /// raising each to the donor's priority, up to
    /// [`DONATION_DEPTH_MAX`] levels deep. Records the
    /// donor on the direct holder's donor list if the
    /// donation actually raised its priority.
    ///
    /// Interrupts must be disabled.
    ///
    fn donate(&self, donor: &Thread) {
        let mut raised_holder = false;
        let mut target = self.holder.get();
        let mut depth = 0;

        while depth < DONATION_DEPTH_MAX && !target.is_null() {
            let beneficiary = unsafe { &*target };
            if beneficiary.priority() < donor.priority() {
                log::trace!(
                    "thread {} donates priority {} to thread {}",
                    donor.id(),
                    donor.priority(),
                    beneficiary.id()
                );
                beneficiary.priority.store(donor.priority());

                // A ready beneficiary is sitting in the
                // ordered run queue at its old priority.
                if beneficiary.state() == State::Ready {
                    thread::scheduler::reposition(beneficiary);
                }

                if depth == 0 {
                    raised_holder = true;
                }
            }

            let next_lock = beneficiary.waiting_on.get();
            if next_lock.is_null() {
                break;
            }
            target = unsafe { (*next_lock).holder.get() };
            depth += 1;
        }

        if raised_holder {
            let holder = unsafe { &*self.holder.get() };
            unsafe { (*holder.donors.get()).push_back(donor.donorelem.get()) };
            holder.donated_for.set(self as *const Lock);
        }
    }

    /// Releases the lock, shedding any donations that
    /// were tied to it and waking the highest-priority
    /// waiter.
    ///
    /// # Panics
    ///
    /// Panics if the caller does not hold the lock.
    ///
    pub fn release(&self) {
        assert!(self.held_by_current(), "releasing a lock not held");

        let cur = thread::current();

        let old = interrupts::disable();
        if !thread::mlfqs_enabled() {
            unsafe {
                // Donors that were waiting for this lock
                // no longer prop us up.
                let donors = cur.donors.get();
                for link in (*donors).iter() {
                    let donor = &*thread::from_donorelem(link.as_ptr());
                    if donor.waiting_on.get() == self as *const Lock {
                        (*donors).remove(link.as_ptr());
                    }
                }

                // What is left decides our priority.
                let mut effective = cur.base_priority();
                for link in (*donors).iter() {
                    let donor = &*thread::from_donorelem(link.as_ptr());
                    effective = effective.max(donor.priority());
                }
                cur.priority.store(effective);

                if (*donors).is_empty() && ptr::eq(cur.donated_for.get(), self as *const Lock) {
                    cur.donated_for.set(ptr::null());
                }
            }
        }
        self.holder.set(ptr::null_mut());
        interrupts::set_level(old);

        self.semaphore.up();
    }

    /// Returns whether the current thread holds this
    /// lock.
    ///
    pub fn held_by_current(&self) -> bool {
        ptr::eq(
            self.holder.get(),
            thread::current() as *const Thread as *mut Thread,
        )
    }
}

impl Default for Lock {
    fn default() -> Lock {
        Lock::new()
    }
}

/// One waiter's parking spot on a condition variable: a
/// one-shot semaphore living on the waiting thread's own
/// stack, plus the link that queues it.
///
#[repr(C)]
struct Waiter {
    semaphore: Semaphore,
    thread: *const Thread,
    elem: UnsafeCell<Link>,
}

/// Orders condition-variable waiters by the waiting
/// thread's current priority.
///
fn waiter_priority_less(a: *const Link, b: *const Link) -> bool {
    unsafe {
        let a = &*container_of!(a as *mut Link, Waiter, elem);
        let b = &*container_of!(b as *mut Link, Waiter, elem);
        (*a.thread).priority() < (*b.thread).priority()
    }
}

/// A condition variable, always used together with a
/// [`Lock`] protecting the condition itself.
///
pub struct Condvar {
    waiters: UnsafeCell<List>,
}

// Waiter-list accesses are serialised by interrupt
// masking; the waiters themselves live on blocked
// threads' stacks and outlive their membership.
//
unsafe impl Send for Condvar {}
unsafe impl Sync for Condvar {}

impl Condvar {
    /// Returns a new condition variable.
    ///
    pub const fn new() -> Condvar {
        Condvar {
            waiters: UnsafeCell::new(List::new()),
        }
    }

    /// Atomically releases `lock` and waits for a
    /// [`signal`](Condvar::signal), then reacquires
    /// `lock` before returning.
    ///
    /// The monitor is Mesa-style: the signalled condition
    /// may no longer hold by the time `wait` returns, so
    /// callers re-check it in a loop.
    ///
    /// # Panics
    ///
    /// Panics in interrupt context, and if the caller
    /// does not hold `lock`.
    ///
    pub fn wait(&self, lock: &Lock) {
        assert!(!interrupts::in_interrupt(), "wait() in interrupt context");
        assert!(lock.held_by_current(), "wait() without the lock");

        let waiter = Waiter {
            semaphore: Semaphore::new(0),
            thread: thread::current(),
            elem: UnsafeCell::new(Link::new()),
        };

        let old = interrupts::disable();
        unsafe { (*self.waiters.get()).push_back(waiter.elem.get()) };
        interrupts::set_level(old);

        lock.release();
        waiter.semaphore.down();
        lock.acquire();
    }

    /// Wakes the highest-priority thread waiting on the
    /// condition, if any.
    ///
    /// # Panics
    ///
    /// Panics if the caller does not hold `lock`.
    ///
    pub fn signal(&self, lock: &Lock) {
        assert!(!interrupts::in_interrupt(), "signal() in interrupt context");
        assert!(lock.held_by_current(), "signal() without the lock");

        let woken = interrupts::without_interrupts(|| {
            let waiters = unsafe { &mut *self.waiters.get() };
            unsafe { waiters.max_by(waiter_priority_less) }.map(|link| unsafe {
                waiters.remove(link.as_ptr());
                container_of!(link.as_ptr(), Waiter, elem)
            })
        });

        // The waiter lives on the waiting thread's stack
        // and stays there until its semaphore is upped;
        // it must not be touched again afterwards.
        if let Some(waiter) = woken {
            unsafe { (*waiter).semaphore.up() };
        }
    }

    /// Wakes every thread waiting on the condition.
    ///
    /// # Panics
    ///
    /// Panics if the caller does not hold `lock`.
    ///
    pub fn broadcast(&self, lock: &Lock) {
        assert!(lock.held_by_current(), "broadcast() without the lock");

        loop {
            let empty =
                interrupts::without_interrupts(|| unsafe { (*self.waiters.get()).is_empty() });
            if empty {
                return;
            }
            self.signal(lock);
        }
    }
}

impl Default for Condvar {
    fn default() -> Condvar {
        Condvar::new()
    }
}
