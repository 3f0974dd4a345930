// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Tracks the data that belongs to the CPU rather than to any one
//! thread: the currently executing thread and the idle thread.
//!
//! The running thread is found through a slot that the scheduler
//! refreshes immediately before each context switch, rather than by
//! rounding the stack pointer down to its page. The control block
//! still sits at the base of the thread's page, so the magic sentinel
//! checked by [`thread::current`](crate::multitasking::thread::current)
//! keeps its stack-overflow detection either way.

use crate::multitasking::thread::Thread;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

/// The currently executing thread.
///
static CURRENT_THREAD: AtomicPtr<Thread> = AtomicPtr::new(ptr::null_mut());

/// The idle thread, which is returned by the scheduler
/// as a special case when no thread is runnable and is
/// never kept on a run queue.
///
static IDLE_THREAD: AtomicPtr<Thread> = AtomicPtr::new(ptr::null_mut());

/// Clears both slots to their boot state.
///
pub(crate) fn init() {
    CURRENT_THREAD.store(ptr::null_mut(), Ordering::Relaxed);
    IDLE_THREAD.store(ptr::null_mut(), Ordering::Relaxed);
}

/// Returns the currently executing thread without any
/// validity checks.
///
/// Most code should call [`thread::current`](crate::multitasking::thread::current),
/// which checks the magic sentinel and the thread's
/// state. The raw pointer is for the scheduler itself,
/// which reads the slot at moments when the new thread
/// has not yet been marked running.
///
pub(crate) fn current_thread() -> *mut Thread {
    CURRENT_THREAD.load(Ordering::Relaxed)
}

/// Updates the current-thread slot. Called by the
/// scheduler immediately before switching stacks.
///
pub(crate) fn set_current_thread(thread: *mut Thread) {
    CURRENT_THREAD.store(thread, Ordering::Relaxed);
}

/// Returns the idle thread, which may be null early in
/// boot before the idle thread has recorded itself.
///
pub(crate) fn idle_thread() -> *mut Thread {
    IDLE_THREAD.load(Ordering::Relaxed)
}

/// Records the idle thread. Called once by the idle
/// thread itself, the first time it is scheduled.
///
pub(crate) fn set_idle_thread(thread: *mut Thread) {
    IDLE_THREAD.store(thread, Ordering::Relaxed);
}
