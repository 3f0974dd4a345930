// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! slice includes the functionality to manage the time slice that
//! determines how many consecutive ticks a thread may run before it
//! is preempted.

use core::sync::atomic::{AtomicU32, Ordering};

/// The number of timer ticks each thread runs before
/// preemption.
///
pub const TIME_SLICE: u32 = 4;

/// TimeSlice counts the ticks the running thread has
/// consumed since it was last dispatched.
///
/// The counter belongs to the CPU, not to any thread: the
/// post-switch tail resets it whenever a new thread is
/// dispatched.
///
pub struct TimeSlice(AtomicU32);

impl TimeSlice {
    /// Returns a fresh, zeroed slice counter.
    ///
    pub const fn new() -> TimeSlice {
        TimeSlice(AtomicU32::new(0))
    }

    /// Records one consumed tick, returning true once the
    /// running thread has used up its slice.
    ///
    pub fn tick(&self) -> bool {
        self.0.fetch_add(1, Ordering::Relaxed) + 1 >= TIME_SLICE
    }

    /// Restarts the slice for a newly dispatched thread.
    ///
    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::{TimeSlice, TIME_SLICE};

    #[test]
    fn expires_after_time_slice_ticks() {
        let slice = TimeSlice::new();
        for _ in 0..TIME_SLICE - 1 {
            assert_eq!(slice.tick(), false);
        }
        assert_eq!(slice.tick(), true);

        // An overrun slice stays expired until reset.
        assert_eq!(slice.tick(), true);

        slice.reset();
        assert_eq!(slice.tick(), false);
    }
}
