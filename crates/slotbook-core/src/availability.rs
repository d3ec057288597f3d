//! Business-hours and blocked-time availability checking.
//!
//! An `AvailabilityRule` is an immutable per-check snapshot: one optional
//! business-hours window per weekday, plus ad-hoc blocked intervals
//! (vacations, holidays). Checks are pure queries over the snapshot and the
//! caller-supplied set of existing appointments.

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::appointment::Appointment;
use crate::interval::TimeInterval;

/// A time-of-day window within a single day, `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDayRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeOfDayRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        if end <= start {
            return None;
        }
        Some(Self { start, end })
    }
}

/// An explicit unavailable range overriding business hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedInterval {
    pub interval: TimeInterval,
    pub reason: Option<String>,
}

/// Per-owner availability policy snapshot.
///
/// `hours` is indexed by `Weekday::num_days_from_monday()`; a `None` entry
/// means the owner takes no bookings that day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvailabilityRule {
    hours: [Option<TimeOfDayRange>; 7],
    blocked: Vec<BlockedInterval>,
}

impl AvailabilityRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hours(mut self, weekday: chrono::Weekday, range: TimeOfDayRange) -> Self {
        self.hours[weekday.num_days_from_monday() as usize] = Some(range);
        self
    }

    /// Same window on Monday through Friday.
    pub fn with_weekday_hours(mut self, range: TimeOfDayRange) -> Self {
        for slot in self.hours.iter_mut().take(5) {
            *slot = Some(range);
        }
        self
    }

    pub fn with_blocked(mut self, interval: TimeInterval, reason: Option<String>) -> Self {
        self.blocked.push(BlockedInterval { interval, reason });
        self
    }

    pub fn blocked(&self) -> &[BlockedInterval] {
        &self.blocked
    }

    /// The concrete business-hours window for a calendar day, or `None`
    /// when no hours are defined for that weekday.
    pub fn window_for(&self, day: NaiveDate) -> Option<TimeInterval> {
        let range = self.hours[day.weekday().num_days_from_monday() as usize]?;
        let start = day.and_time(range.start).and_utc();
        let end = day.and_time(range.end).and_utc();
        TimeInterval::new(start, end).ok()
    }
}

/// Why a candidate slot is not bookable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    OutsideBusinessHours,
    SlotOccupied,
    BlockedTime,
}

/// Outcome of an availability check. All conflicting appointments and
/// blocked ranges are collected, not just the first, so callers can build
/// diagnostics and alternative suggestions from one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub available: bool,
    pub reason: Option<UnavailableReason>,
    pub conflicting: Vec<Appointment>,
    pub blocked: Vec<BlockedInterval>,
}

impl AvailabilityResult {
    fn unavailable(reason: UnavailableReason) -> Self {
        Self {
            available: false,
            reason: Some(reason),
            conflicting: Vec::new(),
            blocked: Vec::new(),
        }
    }
}

/// Check whether `candidate` is bookable for the owner scope represented by
/// `existing`.
///
/// Short-circuits on a business-hours violation; otherwise collects every
/// overlapping non-cancelled appointment and blocked range. Pure query,
/// safe to call repeatedly.
pub fn check_availability(
    candidate: &TimeInterval,
    rule: &AvailabilityRule,
    existing: &[Appointment],
) -> AvailabilityResult {
    let window = match rule.window_for(candidate.start().date_naive()) {
        Some(window) => window,
        None => return AvailabilityResult::unavailable(UnavailableReason::OutsideBusinessHours),
    };
    if !window.contains(candidate) {
        return AvailabilityResult::unavailable(UnavailableReason::OutsideBusinessHours);
    }

    let conflicting: Vec<Appointment> = existing
        .iter()
        .filter(|a| a.counts_for_conflicts() && a.interval.overlaps(candidate))
        .cloned()
        .collect();

    let blocked: Vec<BlockedInterval> = rule
        .blocked()
        .iter()
        .filter(|b| b.interval.overlaps(candidate))
        .cloned()
        .collect();

    let reason = if !conflicting.is_empty() {
        Some(UnavailableReason::SlotOccupied)
    } else if !blocked.is_empty() {
        Some(UnavailableReason::BlockedTime)
    } else {
        None
    };

    AvailabilityResult {
        available: reason.is_none(),
        reason,
        conflicting,
        blocked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appointment::AppointmentStatus;
    use chrono::{TimeZone, Utc};

    fn nine_to_five() -> AvailabilityRule {
        AvailabilityRule::new().with_weekday_hours(
            TimeOfDayRange::new(
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            )
            .unwrap(),
        )
    }

    // 2030-01-07 is a Monday
    fn iv(h1: u32, m1: u32, h2: u32, m2: u32) -> TimeInterval {
        TimeInterval::new(
            Utc.with_ymd_and_hms(2030, 1, 7, h1, m1, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 7, h2, m2, 0).unwrap(),
        )
        .unwrap()
    }

    fn confirmed(owner: &str, interval: TimeInterval) -> Appointment {
        let mut appt = Appointment::new(owner, interval);
        appt.transition_to(AppointmentStatus::Confirmed).unwrap();
        appt
    }

    #[test]
    fn slot_within_hours_is_available() {
        let result = check_availability(&iv(10, 0, 10, 30), &nine_to_five(), &[]);
        assert!(result.available);
        assert!(result.reason.is_none());
    }

    #[test]
    fn slot_crossing_window_end_is_rejected() {
        let result = check_availability(&iv(16, 45, 17, 15), &nine_to_five(), &[]);
        assert!(!result.available);
        assert_eq!(result.reason, Some(UnavailableReason::OutsideBusinessHours));
    }

    #[test]
    fn no_hours_defined_for_day() {
        // Saturday 2030-01-12 has no window under weekday-only hours
        let saturday = TimeInterval::new(
            Utc.with_ymd_and_hms(2030, 1, 12, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 12, 11, 0, 0).unwrap(),
        )
        .unwrap();
        let result = check_availability(&saturday, &nine_to_five(), &[]);
        assert!(!result.available);
        assert_eq!(result.reason, Some(UnavailableReason::OutsideBusinessHours));
    }

    #[test]
    fn collects_all_overlapping_appointments() {
        let existing = vec![
            confirmed("alice", iv(10, 0, 11, 0)),
            confirmed("alice", iv(10, 45, 11, 30)),
            confirmed("alice", iv(14, 0, 15, 0)),
        ];
        let result = check_availability(&iv(10, 30, 11, 15), &nine_to_five(), &existing);
        assert!(!result.available);
        assert_eq!(result.reason, Some(UnavailableReason::SlotOccupied));
        assert_eq!(result.conflicting.len(), 2);
    }

    #[test]
    fn cancelled_appointments_are_ignored() {
        let mut cancelled = confirmed("alice", iv(10, 0, 11, 0));
        cancelled
            .transition_to(AppointmentStatus::Cancelled)
            .unwrap();
        let result = check_availability(&iv(10, 0, 11, 0), &nine_to_five(), &[cancelled]);
        assert!(result.available);
    }

    #[test]
    fn blocked_time_is_reported() {
        let rule = nine_to_five().with_blocked(iv(13, 0, 14, 0), Some("dentist".into()));
        let result = check_availability(&iv(13, 30, 14, 0), &rule, &[]);
        assert!(!result.available);
        assert_eq!(result.reason, Some(UnavailableReason::BlockedTime));
        assert_eq!(result.blocked.len(), 1);
    }

    #[test]
    fn adjacent_booking_does_not_conflict() {
        let existing = vec![confirmed("alice", iv(10, 0, 11, 0))];
        let result = check_availability(&iv(11, 0, 11, 30), &nine_to_five(), &existing);
        assert!(result.available);
    }
}
