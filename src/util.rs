//! Miscellaneous utility structs and functions.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// A closed interval on the number line.
///
/// Lane ranges use `Interval<u32>` with lane 1 being the leftmost lane.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval<T> {
    pub min: T,
    pub max: T,
}

impl<T> Interval<T> {
    /// Creates a new interval.
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

impl<T: std::cmp::PartialOrd> Interval<T> {
    /// Returns true if the two closed intervals share at least one value.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.max >= other.min && other.max >= self.min
    }
}

impl Interval<u32> {
    /// The number of lanes spanned by this range.
    pub fn count(&self) -> u32 {
        self.max + 1 - self.min
    }

    /// Number of lanes that separate this range from `other`; zero if they overlap.
    pub fn distance_to(&self, other: &Self) -> u32 {
        if self.overlaps(other) {
            0
        } else if self.max < other.min {
            other.min - self.max
        } else {
            self.min - other.max
        }
    }
}

impl<T: Debug> Debug for Interval<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interval({:?}, {:?})", &self.min, &self.max)
    }
}
