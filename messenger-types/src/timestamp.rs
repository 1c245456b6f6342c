//! Hybrid Logical Clock timestamps.
//!
//! The same type stamps local edits and carries the remote-assigned version
//! of a change, so the two can be compared directly during a merge.
//! Combines physical time with a logical counter to ensure:
//! - Monotonicity (a clock never goes backwards)
//! - Causality (a local edit made after merging a remote version is newer
//!   than that version, even with a skewed wall clock)

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A Hybrid Logical Clock timestamp.
///
/// Ordered by `wall_time`, then `logical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Physical time component (milliseconds since Unix epoch).
    wall_time: u64,
    /// Logical counter for ordering events at the same wall time.
    logical: u32,
}

fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl Timestamp {
    /// The smallest timestamp; older than anything a clock produces.
    pub const ZERO: Self = Self::new(0, 0);

    /// Creates a new timestamp at the current time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            wall_time: wall_clock_millis(),
            logical: 0,
        }
    }

    /// Creates a timestamp from components.
    #[must_use]
    pub const fn new(wall_time: u64, logical: u32) -> Self {
        Self { wall_time, logical }
    }

    /// Creates a timestamp at the given millisecond with no logical part.
    #[must_use]
    pub const fn from_millis(wall_time: u64) -> Self {
        Self::new(wall_time, 0)
    }

    /// Returns the wall time component.
    #[must_use]
    pub const fn wall_time(&self) -> u64 {
        self.wall_time
    }

    /// Returns the logical counter.
    #[must_use]
    pub const fn logical(&self) -> u32 {
        self.logical
    }

    /// Generates the next local timestamp, strictly greater than `self`.
    #[must_use]
    pub fn tick(&self) -> Self {
        let now = wall_clock_millis();
        if now > self.wall_time {
            Self::from_millis(now)
        } else {
            Self {
                wall_time: self.wall_time,
                logical: self.logical.saturating_add(1),
            }
        }
    }

    /// Advances this clock past a received timestamp.
    ///
    /// The result is greater than both `self` and `other`.
    #[must_use]
    pub fn receive(&self, other: &Self) -> Self {
        let now = wall_clock_millis();
        let max_wall = now.max(self.wall_time).max(other.wall_time);

        let logical = if max_wall == self.wall_time && max_wall == other.wall_time {
            self.logical.max(other.logical).saturating_add(1)
        } else if max_wall == self.wall_time {
            self.logical.saturating_add(1)
        } else if max_wall == other.wall_time {
            other.logical.saturating_add(1)
        } else {
            0
        };

        Self {
            wall_time: max_wall,
            logical,
        }
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.wall_time.cmp(&other.wall_time) {
            Ordering::Equal => self.logical.cmp(&other.logical),
            other => other,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.wall_time, self.logical)
    }
}
