//! Millimeter coordinates.
//!
//! A `Coordinate` is usually the location of a resource relative to its
//! parent; absolute coordinates are in deck space.

use std::fmt;
use std::ops::{Add, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Round to 4 decimal places (100 nm) to keep floating point noise out of
/// serialized layouts and comparisons.
fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// A point in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: round4(x),
            y: round4(y),
            z: round4(z),
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// The coordinate as a column vector, for matrix application.
    pub fn vector(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl Default for Coordinate {
    fn default() -> Self {
        Self::zero()
    }
}

impl Add for Coordinate {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Sub for Coordinate {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Neg for Coordinate {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:07.3}, {:07.3}, {:07.3})", self.x, self.y, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_rounds_to_tenth_of_micron() {
        let c = Coordinate::new(1.000049, 2.00005, -3.12345);
        assert_eq!(c.x, 1.0);
        assert_eq!(c.y, 2.0001);
        assert_eq!(c.z, -3.1234);
    }

    #[test]
    fn arithmetic() {
        let a = Coordinate::new(1.0, 2.0, 3.0);
        let b = Coordinate::new(0.5, -1.0, 2.0);
        assert_eq!(a + b, Coordinate::new(1.5, 1.0, 5.0));
        assert_eq!(a - b, Coordinate::new(0.5, 3.0, 1.0));
        assert_eq!(-a, Coordinate::new(-1.0, -2.0, -3.0));
    }

    #[test]
    fn serde_round_trip() {
        let c = Coordinate::new(140.9, 98.53, 49.57);
        let json = serde_json::to_string(&c).unwrap();
        let back: Coordinate = serde_json::from_str(&json).unwrap();
        assert!((back.x - c.x).abs() < 1e-4);
        assert!((back.y - c.y).abs() < 1e-4);
        assert!((back.z - c.z).abs() < 1e-4);
    }
}
