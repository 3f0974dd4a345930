// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Handles timekeeping: the monotonic ticker driven by the (simulated)
//! timer interrupt, the time slice that bounds how long a thread runs
//! unpreempted, and the sleep queue with its dedicated wakeup thread.

pub mod slice;
pub mod ticker;
pub mod timers;

pub use self::slice::TIME_SLICE;
pub use self::ticker::{ticks, TIMER_FREQ};
pub use self::timers::sleep;

/// Initialise the time functionality.
///
pub(crate) fn init() {
    ticker::init();
    timers::init();
}
