//! Signed time spans with an infinite sentinel

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// A span of time in microseconds
///
/// [`TimeSpan::INFINITE`] marks a span that never ends. Arithmetic saturates
/// and keeps infinite spans infinite.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeSpan {
    micros: i64,
}

impl TimeSpan {
    pub const ZERO: TimeSpan = TimeSpan { micros: 0 };
    pub const INFINITE: TimeSpan = TimeSpan { micros: i64::MAX };

    pub const fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self {
            micros: millis.saturating_mul(1000),
        }
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self {
            micros: secs.saturating_mul(1_000_000),
        }
    }

    pub fn from_secs_f32(secs: f32) -> Self {
        Self::from_secs_f64(f64::from(secs))
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() {
            return Self::INFINITE;
        }
        Self {
            micros: (secs * 1_000_000.0).round() as i64,
        }
    }

    pub const fn as_micros(self) -> i64 {
        self.micros
    }

    pub const fn as_millis(self) -> i64 {
        self.micros / 1000
    }

    pub fn as_secs_f32(self) -> f32 {
        self.as_secs_f64() as f32
    }

    pub fn as_secs_f64(self) -> f64 {
        if self.is_infinite() {
            f64::INFINITY
        } else {
            self.micros as f64 / 1_000_000.0
        }
    }

    pub const fn is_infinite(self) -> bool {
        self.micros == i64::MAX
    }

    pub const fn is_finite(self) -> bool {
        !self.is_infinite()
    }

    /// Multiply by a factor, saturating to infinite
    pub fn scale(self, factor: f64) -> Self {
        if self.is_infinite() || !factor.is_finite() {
            return Self::INFINITE;
        }
        let scaled = self.micros as f64 * factor;
        if scaled >= i64::MAX as f64 {
            Self::INFINITE
        } else {
            Self {
                micros: scaled.round() as i64,
            }
        }
    }
}

impl Add for TimeSpan {
    type Output = TimeSpan;

    fn add(self, rhs: TimeSpan) -> TimeSpan {
        if self.is_infinite() || rhs.is_infinite() {
            return TimeSpan::INFINITE;
        }
        TimeSpan {
            micros: self.micros.saturating_add(rhs.micros),
        }
    }
}

impl Sub for TimeSpan {
    type Output = TimeSpan;

    fn sub(self, rhs: TimeSpan) -> TimeSpan {
        if self.is_infinite() {
            return TimeSpan::INFINITE;
        }
        TimeSpan {
            micros: self.micros.saturating_sub(rhs.micros),
        }
    }
}

impl From<Duration> for TimeSpan {
    fn from(duration: Duration) -> Self {
        TimeSpan {
            micros: i64::try_from(duration.as_micros()).unwrap_or(i64::MAX),
        }
    }
}

impl fmt::Debug for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "TimeSpan(inf)")
        } else {
            write!(f, "TimeSpan({}us)", self.micros)
        }
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "inf")
        } else {
            write!(f, "{}ms", self.micros as f64 / 1000.0)
        }
    }
}
