//! Sampling units with type safety.
//!
//! DAQ timestamps are integer tick counts of the 62.5 MHz timing system;
//! sample periods are expressed in nanoseconds.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// Duration of one timing-system tick.
pub const TICK: Nanoseconds = Nanoseconds(16.0);

/// Time duration in nanoseconds.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nanoseconds(pub f64);

impl Nanoseconds {
    pub const ZERO: Self = Self(0.0);

    #[inline]
    pub fn from_us(us: f64) -> Self {
        Self(us * 1e3)
    }

    /// Duration spanned by a number of timing-system ticks.
    #[inline]
    pub fn from_ticks(ticks: u64) -> Self {
        Self(ticks as f64 * TICK.0)
    }

    #[inline]
    pub fn as_us(&self) -> f64 {
        self.0 * 1e-3
    }

    /// Sampling frequency in MHz for a sample period.
    #[inline]
    pub fn sampling_frequency_mhz(&self) -> f64 {
        1e3 / self.0
    }
}

impl Add for Nanoseconds {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Nanoseconds {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Mul<f64> for Nanoseconds {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self(self.0 * rhs)
    }
}
