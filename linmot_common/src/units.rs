//! Physical unit newtypes used on the LinUDP wire.
//!
//! All values are stored in the drive's native integer resolution so that
//! encoding is lossless. `Debug` renders the value in the largest unit whose
//! magnitude is at least one (e.g. `1.5mm`, `2.5A`).

use core::fmt;
use core::ops;

use serde::{Deserialize, Serialize};

macro_rules! impl_std_ops {
    ($type:ty) => {
        impl ops::Neg for $type {
            type Output = Self;

            fn neg(self) -> Self {
                Self(-self.0)
            }
        }

        impl ops::Add for $type {
            type Output = Self;

            fn add(self, rhs: Self) -> Self {
                Self(self.0.saturating_add(rhs.0))
            }
        }

        impl ops::Sub for $type {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self {
                Self(self.0.saturating_sub(rhs.0))
            }
        }
    };
}

// ─── Position ───────────────────────────────────────────────────────

/// Position in units of 0.1 µm.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position(pub i32);

impl Position {
    pub const fn from_millimeters(mm: i32) -> Self {
        Self(mm * 10_000)
    }

    pub fn from_millimeters_f64(mm: f64) -> Self {
        Self((mm * 10_000.0) as i32)
    }

    pub fn as_millimeters(&self) -> f64 {
        f64::from(self.0) / 10_000.0
    }

    /// Absolute distance between two positions.
    pub fn distance(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0).saturating_abs())
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meters = f64::from(self.0) * 1e-7;
        fmt_scaled(f, meters, &[("m", 1.0), ("mm", 1e-3), ("μm", 1e-6)])
    }
}

impl_std_ops!(Position);

// ─── Velocity ───────────────────────────────────────────────────────

/// Velocity in units of 1 µm/s.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Velocity(pub i32);

impl Velocity {
    pub const fn from_millimeters_per_second(mm_per_s: i32) -> Self {
        Self(mm_per_s * 1_000)
    }

    pub const fn from_meters_per_second(m_per_s: i32) -> Self {
        Self(m_per_s * 1_000_000)
    }

    pub fn from_meters_per_second_f64(m_per_s: f64) -> Self {
        Self((m_per_s * 1_000_000.0) as i32)
    }
}

impl fmt::Debug for Velocity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mps = f64::from(self.0) * 1e-6;
        fmt_scaled(f, mps, &[("m/s", 1.0), ("mm/s", 1e-3), ("μm/s", 1e-6)])
    }
}

impl_std_ops!(Velocity);

// ─── Acceleration ───────────────────────────────────────────────────

/// Acceleration in units of 10 µm/s².
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Acceleration(pub i32);

impl Acceleration {
    pub const fn from_meters_per_second_squared(m_per_s2: i32) -> Self {
        Self(m_per_s2 * 100_000)
    }

    pub fn from_meters_per_second_squared_f64(m_per_s2: f64) -> Self {
        Self((m_per_s2 * 100_000.0) as i32)
    }

    pub const fn from_millimeters_per_second_squared(mm_per_s2: i32) -> Self {
        Self(mm_per_s2 * 100)
    }
}

impl fmt::Debug for Acceleration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mps2 = f64::from(self.0) * 1e-5;
        fmt_scaled(f, mps2, &[("m/s²", 1.0), ("mm/s²", 1e-3), ("μm/s²", 1e-6)])
    }
}

impl_std_ops!(Acceleration);

// ─── Current ────────────────────────────────────────────────────────

/// Motor current in units of 1 mA.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Current(pub i16);

impl fmt::Debug for Current {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_scaled(f, f64::from(self.0), &[("A", 1000.0), ("mA", 1.0)])
    }
}

impl_std_ops!(Current);

/// Write `value` in the first unit whose scaled magnitude is >= 1
/// (falling back to the last unit), with at most three decimals.
fn fmt_scaled(f: &mut fmt::Formatter<'_>, value: f64, units: &[(&str, f64)]) -> fmt::Result {
    let abs = value.abs();

    let (mut name, mut scale) = match units.last() {
        Some(&(name, scale)) => (name, scale),
        None => return write!(f, "{value}"),
    };
    for &(u, s) in units {
        if abs / s >= 1.0 {
            name = u;
            scale = s;
            break;
        }
    }

    let s = format!("{:.3}", value / scale);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    write!(f, "{s}{name}")
}
