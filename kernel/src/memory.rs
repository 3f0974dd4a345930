// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the kernel page allocator.
//!
//! The threading core needs exactly one allocation shape: a page-sized,
//! page-aligned, zeroed block that holds a thread's control block at
//! its base and the thread's kernel stack growing down from its top.
//! Hosted, a "page" is a 64 KiB aligned allocation; a bare 4 KiB frame
//! cannot hold the stack frames the host standard library builds.
//!
//! The allocator keeps a count of pages in use, which the tests use to
//! prove that a dying thread's page really is returned by the next
//! scheduled thread.

use core::ptr::NonNull;
use std::alloc::{alloc_zeroed, dealloc, Layout};

/// The size in bytes of a kernel page, and therefore of
/// each thread's control block plus stack.
///
pub const PAGE_SIZE: usize = 0x10000;

/// The number of pages currently allocated and not yet
/// freed.
///
/// This is touched with interrupts enabled (page
/// allocation happens outside interrupt-critical
/// sections), so it takes a lock rather than relying on
/// interrupt masking.
///
static PAGES_IN_USE: spin::Mutex<u64> = spin::Mutex::new(0);

/// Returns the layout of a kernel page.
///
fn page_layout() -> Layout {
    Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).expect("bad kernel page layout")
}

/// Allocates a zeroed kernel page, returning None if the
/// system is out of memory.
///
pub fn alloc_page() -> Option<NonNull<u8>> {
    let page = NonNull::new(unsafe { alloc_zeroed(page_layout()) })?;
    *PAGES_IN_USE.lock() += 1;
    Some(page)
}

/// Frees a kernel page.
///
/// # Safety
///
/// The page must have come from [`alloc_page`] and must
/// not be referenced again: in particular, it must not be
/// the page holding the caller's own stack.
///
pub unsafe fn free_page(page: NonNull<u8>) {
    dealloc(page.as_ptr(), page_layout());
    *PAGES_IN_USE.lock() -= 1;
}

/// Returns the number of kernel pages currently in use.
///
pub fn pages_in_use() -> u64 {
    *PAGES_IN_USE.lock()
}
