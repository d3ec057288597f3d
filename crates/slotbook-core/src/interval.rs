//! Half-open time interval math.
//!
//! All scheduling decisions are built on `[start, end)` intervals: start
//! inclusive, end exclusive. Two intervals that merely touch (one's end
//! equals the other's start) do not overlap.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A half-open interval `[start, end)` with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeInterval {
    /// Create an interval, rejecting `end <= start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        if end <= start {
            return Err(ValidationError::InvalidTimeRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration().num_minutes()
    }

    /// Half-open overlap test. Adjacent intervals do not overlap.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Length of the overlapping region, zero when disjoint.
    pub fn overlap_duration(&self, other: &TimeInterval) -> Duration {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if end > start {
            end - start
        } else {
            Duration::zero()
        }
    }

    /// Whether `other` lies fully within this interval.
    pub fn contains(&self, other: &TimeInterval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn contains_instant(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Idle time between two disjoint intervals. `None` when they overlap
    /// or touch.
    pub fn gap_between(&self, other: &TimeInterval) -> Option<Duration> {
        if self.overlaps(other) {
            return None;
        }
        let gap = if self.end <= other.start {
            other.start - self.end
        } else {
            self.start - other.end
        };
        if gap > Duration::zero() {
            Some(gap)
        } else {
            None
        }
    }
}
