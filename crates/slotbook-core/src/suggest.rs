//! Slot enumeration and multi-criteria ranking.
//!
//! Candidate slots are generated by walking each day's business-hours
//! window at a fixed granularity, filtered through the availability
//! checker, and scored additively from a base of 100. The ranked list is
//! what callers present as "suggested alternatives".

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::appointment::{Appointment, ParticipantId};
use crate::availability::{check_availability, AvailabilityRule};
use crate::interval::TimeInterval;

/// Default enumeration step.
pub const DEFAULT_GRANULARITY_MINUTES: i64 = 15;

const BASE_SCORE: f64 = 100.0;
const PREFERRED_RANGE_BONUS: f64 = 20.0;
const OUTSIDE_PREFERENCE_PENALTY: f64 = 10.0;
const PARTICIPANT_BONUS: f64 = 15.0;
const BUFFER_BONUS_PER_SIDE: f64 = 5.0;
const URGENCY_EARLY_BONUS: f64 = 15.0;
const URGENCY_LATE_PENALTY: f64 = 5.0;

/// Inclusive range of calendar days to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn single_day(day: NaiveDate) -> Self {
        Self { from: day, to: day }
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        let to = self.to;
        self.from.iter_days().take_while(move |d| *d <= to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[default]
    Normal,
    High,
}

/// Caller preferences consumed by ranking.
#[derive(Debug, Clone, Default)]
pub struct SlotRequirements {
    /// Preferred time ranges; slots inside any of them score higher, slots
    /// outside all of them score lower.
    pub preferred_ranges: Vec<TimeInterval>,
    /// Busy intervals per participant, as supplied by the caller. The
    /// engine does not consult external calendars itself.
    pub participant_busy: HashMap<ParticipantId, Vec<TimeInterval>>,
    pub urgency: Urgency,
}

/// A candidate slot with its ranking score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSlot {
    pub interval: TimeInterval,
    pub score: f64,
}

/// Enumerate every available slot of `duration` in the date range.
///
/// Each day's business-hours window is walked in `granularity` steps; a
/// slot is emitted when its end does not exceed the window end and the
/// availability check passes against `existing`.
pub fn suggest_slots(
    rule: &AvailabilityRule,
    existing: &[Appointment],
    range: &DateRange,
    duration: Duration,
    granularity: Duration,
) -> Vec<TimeInterval> {
    let mut slots = Vec::new();
    if duration <= Duration::zero() || granularity <= Duration::zero() {
        return slots;
    }

    for day in range.days() {
        let window = match rule.window_for(day) {
            Some(window) => window,
            None => continue,
        };

        let mut start = window.start();
        while start + duration <= window.end() {
            // Window bounds guarantee a valid interval here
            if let Ok(slot) = TimeInterval::new(start, start + duration) {
                if check_availability(&slot, rule, existing).available {
                    slots.push(slot);
                }
            }
            start += granularity;
        }
    }

    slots
}

/// Score and order candidate slots: highest score first, ties broken by
/// earliest start. The sort is stable.
pub fn rank_suggestions(
    slots: Vec<TimeInterval>,
    existing: &[Appointment],
    requirements: &SlotRequirements,
) -> Vec<ScoredSlot> {
    if slots.is_empty() {
        return Vec::new();
    }

    // Midpoint of the candidate span, used for the urgency bias
    let (Some(earliest), Some(latest)) = (
        slots.iter().map(|s| s.start()).min(),
        slots.iter().map(|s| s.start()).max(),
    ) else {
        return Vec::new();
    };
    let midpoint = earliest + (latest - earliest) / 2;

    let mut scored: Vec<ScoredSlot> = slots
        .into_iter()
        .map(|slot| {
            let mut score = BASE_SCORE;

            if !requirements.preferred_ranges.is_empty() {
                if requirements
                    .preferred_ranges
                    .iter()
                    .any(|r| r.contains(&slot))
                {
                    score += PREFERRED_RANGE_BONUS;
                } else {
                    score -= OUTSIDE_PREFERENCE_PENALTY;
                }
            }

            if !requirements.participant_busy.is_empty() {
                let total = requirements.participant_busy.len() as f64;
                let free = requirements
                    .participant_busy
                    .values()
                    .filter(|busy| !busy.iter().any(|b| b.overlaps(&slot)))
                    .count() as f64;
                score += PARTICIPANT_BONUS * free / total;
            }

            score += buffer_bonus(&slot, existing);

            if requirements.urgency == Urgency::High {
                if slot.start() <= midpoint {
                    score += URGENCY_EARLY_BONUS;
                } else {
                    score -= URGENCY_LATE_PENALTY;
                }
            }

            ScoredSlot {
                interval: slot,
                score: score.max(0.0),
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.interval.start().cmp(&b.interval.start()))
    });
    scored
}

/// Bonus for slots that leave idle time next to existing bookings. A side
/// earns its bonus when the nearest booking on that side is absent or at
/// least one granularity step away.
fn buffer_bonus(slot: &TimeInterval, existing: &[Appointment]) -> f64 {
    let buffer = Duration::minutes(DEFAULT_GRANULARITY_MINUTES);
    let mut bonus = 0.0;

    let before = existing
        .iter()
        .filter(|a| a.counts_for_conflicts() && a.interval.end() <= slot.start())
        .map(|a| slot.start() - a.interval.end())
        .min();
    if before.map_or(true, |gap| gap >= buffer) {
        bonus += BUFFER_BONUS_PER_SIDE;
    }

    let after = existing
        .iter()
        .filter(|a| a.counts_for_conflicts() && a.interval.start() >= slot.end())
        .map(|a| a.interval.start() - slot.end())
        .min();
    if after.map_or(true, |gap| gap >= buffer) {
        bonus += BUFFER_BONUS_PER_SIDE;
    }

    bonus
}
