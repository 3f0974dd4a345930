// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements signed fixed-point arithmetic in the 17.14 format.
//!
//! The scheduler's load average and per-thread recent CPU estimates
//! are fractional quantities, but the kernel performs no floating-point
//! arithmetic. Instead, both are kept as [`Fixed`] values: a signed
//! 32-bit word with 17 integer bits, 14 fraction bits, and a sign bit.
//!
//! Multiplication and division of two fixed-point values widen to
//! 64 bits internally, so intermediates like `load_avg * 59` cannot
//! overflow for any load average the scheduler can produce.

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::panic)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(deprecated_in_future)]
#![deny(keyword_idents)]
#![forbid(unsafe_code)]
#![deny(unused_crate_dependencies)]

use core::fmt;
use core::ops::{Add, AddAssign, Div, Mul, Sub, SubAssign};

/// The number of fraction bits in a [`Fixed`].
///
pub const FRACTION_BITS: u32 = 14;

/// The fixed-point representation of one, used as
/// the conversion factor between integers and
/// fixed-point values.
///
const ONE: i32 = 1 << FRACTION_BITS;

/// A signed fixed-point number in the 17.14 format.
///
/// `Fixed` supports addition and subtraction with other `Fixed`
/// values and with plain integers (which are shifted into fixed-point
/// form first), along with multiplication and division by either.
///
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct Fixed(i32);

impl Fixed {
    /// ZERO is the fixed-point representation of zero.
    ///
    pub const ZERO: Fixed = Fixed(0);

    /// Returns the fixed-point representation of the
    /// given integer.
    ///
    /// The integer must fit in 17 bits, or the value
    /// will wrap.
    ///
    #[must_use]
    pub const fn from_int(n: i32) -> Self {
        Fixed(n.wrapping_mul(ONE))
    }

    /// Returns the nearest integer no further from zero
    /// than the fixed-point value.
    ///
    #[must_use]
    pub const fn truncate(self) -> i32 {
        self.0 / ONE
    }

    /// Returns the integer nearest to the fixed-point
    /// value, rounding halfway cases away from zero.
    ///
    #[must_use]
    pub const fn round(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + ONE / 2) / ONE
        } else {
            (self.0 - ONE / 2) / ONE
        }
    }
}

impl fmt::Display for Fixed {
    /// Formats the fixed-point value with two decimal
    /// places, which is all the precision the scheduler
    /// statistics report.
    ///
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let hundredths = (*self * 100).round();
        let sign = if hundredths < 0 { "-" } else { "" };
        write!(
            f,
            "{}{}.{:02}",
            sign,
            (hundredths / 100).abs(),
            (hundredths % 100).abs()
        )
    }
}

impl Add<Fixed> for Fixed {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Fixed) -> Self::Output {
        Fixed(self.0 + rhs.0)
    }
}

impl Add<i32> for Fixed {
    type Output = Self;

    #[inline]
    fn add(self, rhs: i32) -> Self::Output {
        Fixed(self.0 + rhs * ONE)
    }
}

impl AddAssign<Fixed> for Fixed {
    #[inline]
    fn add_assign(&mut self, rhs: Fixed) {
        *self = *self + rhs;
    }
}

impl Sub<Fixed> for Fixed {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Fixed) -> Self::Output {
        Fixed(self.0 - rhs.0)
    }
}

impl Sub<i32> for Fixed {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: i32) -> Self::Output {
        Fixed(self.0 - rhs * ONE)
    }
}

impl SubAssign<Fixed> for Fixed {
    #[inline]
    fn sub_assign(&mut self, rhs: Fixed) {
        *self = *self - rhs;
    }
}

impl Mul<Fixed> for Fixed {
    type Output = Self;

    /// Multiplies two fixed-point values, widening the
    /// intermediate product to 64 bits.
    ///
    #[inline]
    fn mul(self, rhs: Fixed) -> Self::Output {
        Fixed(((self.0 as i64 * rhs.0 as i64) / ONE as i64) as i32)
    }
}

impl Mul<i32> for Fixed {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: i32) -> Self::Output {
        Fixed(self.0 * rhs)
    }
}

impl Div<Fixed> for Fixed {
    type Output = Self;

    /// Divides two fixed-point values, widening the
    /// scaled dividend to 64 bits.
    ///
    #[inline]
    fn div(self, rhs: Fixed) -> Self::Output {
        Fixed(((self.0 as i64 * ONE as i64) / rhs.0 as i64) as i32)
    }
}

impl Div<i32> for Fixed {
    type Output = Self;

    #[inline]
    fn div(self, rhs: i32) -> Self::Output {
        Fixed(self.0 / rhs)
    }
}
