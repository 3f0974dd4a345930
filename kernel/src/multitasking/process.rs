// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the process attachments the system-call layer hangs
//! off each thread.
//!
//! The threading core treats these as opaque: a parent back-
//! reference, a list of child records, an exit status, and a
//! per-thread semaphore the parent waits on. [`wait`] is what a
//! `wait` system call handler calls to collect a child's exit
//! status; [`exit`] is what an `exit` handler calls to report one.
//!
//! A child record outlives its thread: the record is owned by the
//! parent and freed either when the parent collects the status or
//! when the parent itself exits. That is what lets [`wait`] return a
//! status for a child that exited long ago without keeping the whole
//! control block around.

use crate::interrupts;
use crate::multitasking::thread::{self, Thread, ThreadId};
use core::cell::Cell;
use core::ptr;
use intrusive_list::{container_of, Link};

/// A parent's record of one child thread.
///
#[repr(C)]
struct Child {
    id: ThreadId,
    exit_status: Cell<i32>,
    exited: Cell<bool>,
    elem: Link,
}

/// Recovers a child record from its list link.
///
unsafe fn child_from_elem(link: *mut Link) -> *mut Child {
    container_of!(link, Child, elem)
}

/// Returns whether `thread` still points at a live
/// thread, by pointer identity against the all-threads
/// list. Never dereferences `thread`.
///
fn is_live(thread: *mut Thread) -> bool {
    interrupts::without_interrupts(|| {
        let mut live = false;
        thread::foreach(|t| {
            if ptr::eq(t, thread) {
                live = true;
            }
        });
        live
    })
}

/// Records a newly created child with its parent.
///
pub(crate) fn register_child(parent: &Thread, id: ThreadId) {
    let child = Box::into_raw(Box::new(Child {
        id,
        exit_status: Cell::new(thread::EXIT_FAILURE),
        exited: Cell::new(false),
        elem: Link::new(),
    }));

    interrupts::without_interrupts(|| unsafe {
        (*parent.children.get()).push_back(ptr::addr_of_mut!((*child).elem));
    });
}

/// Reports the current thread's exit status and exits.
///
pub fn exit(status: i32) -> ! {
    thread::current().exit_status.store(status);
    thread::exit()
}

/// The hook [`thread::exit`] runs before removing the
/// dying thread from the all-threads list: records the
/// exit status with the parent, wakes the parent if it
/// is waiting for exactly this child, and frees the
/// dying thread's own child records.
///
pub(crate) fn exit_hook(cur: &Thread) {
    interrupts::without_interrupts(|| {
        // The parent may itself have exited; its record
        // of us died with it.
        let parent = cur.parent;
        if !parent.is_null() && is_live(parent) {
            let parent = unsafe { &*parent };
            unsafe {
                for link in (*parent.children.get()).iter() {
                    let child = child_from_elem(link.as_ptr());
                    if (*child).id == cur.id() {
                        (*child).exit_status.set(cur.exit_status.load());
                        (*child).exited.set(true);
                    }
                }
            }

            if parent.waiting_for_child.get() == cur.id().as_u64() {
                parent.child_wait.up();
            }
        }

        free_children(cur);
    });
}

/// Waits for the given child of the current thread to
/// exit and returns its exit status.
///
/// Returns None if the thread has no such child -- it
/// never existed, belongs to another parent, or has
/// already been waited for. Each child's status can be
/// collected exactly once.
///
pub fn wait(id: ThreadId) -> Option<i32> {
    let cur = thread::current();

    loop {
        let old = interrupts::disable();

        let mut found: Option<*mut Child> = None;
        unsafe {
            for link in (*cur.children.get()).iter() {
                let child = child_from_elem(link.as_ptr());
                if (*child).id == id {
                    found = Some(child);
                    break;
                }
            }
        }

        let child = match found {
            None => {
                interrupts::set_level(old);
                return None;
            }
            Some(child) => child,
        };

        unsafe {
            if (*child).exited.get() {
                (*cur.children.get()).remove(ptr::addr_of_mut!((*child).elem));
                cur.waiting_for_child.set(0);
                interrupts::set_level(old);

                let status = (*child).exit_status.get();
                drop(Box::from_raw(child));
                return Some(status);
            }
        }

        // Not exited yet: note what we are waiting for
        // and sleep until the child's exit hook wakes us.
        cur.waiting_for_child.set(id.as_u64());
        interrupts::set_level(old);
        cur.child_wait.down();
    }
}

/// Activates a thread's address space. Called by the
/// post-switch tail on every switch-in.
///
pub(crate) fn activate(thread: &Thread) {
    // Kernel threads run in the kernel address space;
    // only a user process carries a page directory to
    // install here.
    if !thread.pagedir.get().is_null() {
        log::trace!("activating address space of thread {}", thread.id());
    }
}

/// Frees every child record the thread still owns. Must
/// be called with interrupts disabled.
///
pub(crate) fn free_children(thread: &Thread) {
    assert!(!interrupts::are_enabled());

    unsafe {
        while let Some(link) = (*thread.children.get()).pop_front() {
            drop(Box::from_raw(child_from_elem(link.as_ptr())));
        }
    }
}
