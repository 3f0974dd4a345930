// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the simulated interrupt controller.
//!
//! The kernel runs as a hosted uniprocessor simulation, so there is no
//! interrupt hardware; what the rest of the kernel sees is the same
//! discipline real hardware would impose. Interrupts are a CPU flag
//! that can be [`enable`]d and [`disable`]d, an interrupt is only ever
//! delivered while the flag is set, and delivery masks the flag until
//! the handler returns. The only interrupt source is the timer, whose
//! driver lives in [`crate::time::ticker`].
//!
//! Handlers run in *interrupt context*, where blocking is forbidden.
//! A handler that wants the interrupted thread to give up the CPU
//! calls [`yield_on_return`], and the driver performs the yield after
//! the handler has returned and interrupts have been restored.
//!
//! Nearly all kernel state that is shared between threads is protected
//! by disabling interrupts rather than by a lock, which is sound on a
//! single CPU. [`IntrCell`] wraps such state and asserts the
//! discipline at each access.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// Whether interrupts are currently deliverable.
///
static ENABLED: AtomicBool = AtomicBool::new(false);

/// Whether the CPU is currently executing an interrupt
/// handler.
///
static IN_HANDLER: AtomicBool = AtomicBool::new(false);

/// Whether the current interrupt handler has requested
/// that the interrupted thread yield once the handler
/// returns.
///
static YIELD_ON_RETURN: AtomicBool = AtomicBool::new(false);

/// The state of the CPU's interrupt flag, as returned by
/// [`disable`] and restored by [`set_level`].
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    /// Interrupts are deliverable.
    On,

    /// Interrupts are masked.
    Off,
}

/// Resets the controller to its boot state: interrupts
/// masked, no handler running, no yield pending.
///
pub(crate) fn init() {
    ENABLED.store(false, Ordering::Relaxed);
    IN_HANDLER.store(false, Ordering::Relaxed);
    YIELD_ON_RETURN.store(false, Ordering::Relaxed);
}

/// Returns whether interrupts are deliverable.
///
pub fn are_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Returns the current interrupt level.
///
pub fn level() -> Level {
    if are_enabled() {
        Level::On
    } else {
        Level::Off
    }
}

/// Enables interrupts, returning the previous level.
///
/// # Panics
///
/// `enable` panics if called from interrupt context,
/// where interrupts must stay masked.
///
pub fn enable() -> Level {
    assert!(!in_interrupt(), "interrupts enabled in interrupt context");
    set_level(Level::On)
}

/// Disables interrupts, returning the previous level.
///
pub fn disable() -> Level {
    set_level(Level::Off)
}

/// Sets the interrupt level, returning the previous
/// level.
///
pub fn set_level(new: Level) -> Level {
    let old = level();
    ENABLED.store(new == Level::On, Ordering::Relaxed);
    old
}

/// Runs `f` with interrupts disabled, restoring the
/// previous level afterwards.
///
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let old = disable();
    let ret = f();
    set_level(old);
    ret
}

/// Returns whether the CPU is executing an interrupt
/// handler.
///
pub fn in_interrupt() -> bool {
    IN_HANDLER.load(Ordering::Relaxed)
}

/// Marks the start of interrupt delivery: interrupts must
/// have been deliverable, and are masked until the
/// matching [`leave_handler`].
///
pub(crate) fn enter_handler() {
    assert!(are_enabled(), "interrupt delivered while masked");
    assert!(!in_interrupt(), "nested interrupt delivery");
    disable();
    IN_HANDLER.store(true, Ordering::Relaxed);
}

/// Marks the end of interrupt delivery and returns
/// whether the handler requested a yield. The driver
/// restores the interrupt level and performs the yield.
///
pub(crate) fn leave_handler() -> bool {
    IN_HANDLER.store(false, Ordering::Relaxed);
    YIELD_ON_RETURN.swap(false, Ordering::Relaxed)
}

/// Requests that the interrupted thread yield the CPU as
/// soon as the current interrupt handler returns.
///
/// # Panics
///
/// `yield_on_return` panics outside interrupt context;
/// ordinary code can simply yield.
///
pub fn yield_on_return() {
    assert!(in_interrupt(), "yield_on_return outside interrupt context");
    YIELD_ON_RETURN.store(true, Ordering::Relaxed);
}

/// Atomically enables interrupts and waits for the next
/// one, which on this machine is always the timer.
///
/// This is the idle thread's `sti; hlt` idiom: no tick
/// can slip in between re-enabling interrupts and going
/// to sleep, so the CPU never dozes through a wakeup.
///
pub fn enable_and_halt() {
    enable();
    crate::time::ticker::interrupt();
}

/// A value protected by the interrupt flag rather than by
/// a lock.
///
/// The scheduler's shared structures (run queues, the
/// all-threads list, donor lists, wait queues) are only
/// ever touched with interrupts disabled, which on a
/// single CPU makes the access exclusive. `IntrCell`
/// asserts that discipline at each access instead of
/// trusting every call site.
///
pub struct IntrCell<T> {
    value: UnsafeCell<T>,
}

// An IntrCell is shared between threads, but interrupt
// masking serialises every access on this uniprocessor.
//
unsafe impl<T> Sync for IntrCell<T> {}

impl<T> IntrCell<T> {
    /// Returns a new cell wrapping the given value.
    ///
    pub const fn new(value: T) -> IntrCell<T> {
        IntrCell {
            value: UnsafeCell::new(value),
        }
    }

    /// Runs `f` with mutable access to the value.
    ///
    /// # Panics
    ///
    /// `with` panics if interrupts are enabled.
    ///
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        assert!(
            !are_enabled(),
            "interrupt-protected state accessed with interrupts enabled"
        );
        f(unsafe { &mut *self.value.get() })
    }
}
