//! Conflict resolution strategies.
//!
//! Each detected conflict maps to candidate strategies: reschedule to the
//! next free slot of equal duration, substitute an equivalent free
//! resource, or drop the conflicting optional participants. A resolution
//! succeeds only when one feasible strategy clears every conflict at once;
//! otherwise the individually-feasible candidates are handed back to the
//! caller.
//!
//! Scoring: strategies that preserve the requested time outrank moving it;
//! among reschedules, temporal proximity to the original start wins; among
//! participant removals, fewer removals win.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::appointment::{Appointment, ParticipantId, ResourceId};
use crate::availability::AvailabilityRule;
use crate::conflict::{detect_conflicts, Conflict, ConflictKind};
use crate::interval::TimeInterval;
use crate::suggest::{suggest_slots, DateRange, DEFAULT_GRANULARITY_MINUTES};

const SUBSTITUTE_SCORE: f64 = 95.0;
const RESCHEDULE_BASE_SCORE: f64 = 90.0;
const REMOVAL_BASE_SCORE: f64 = 85.0;
const REMOVAL_PENALTY_PER_PARTICIPANT: f64 = 5.0;
/// How far past the requested day the reschedule search looks.
const RESCHEDULE_HORIZON_DAYS: u64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Reschedule,
    SubstituteResource,
    RemoveParticipants,
}

/// A resource swap proposed by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub conflicted: ResourceId,
    pub replacement: ResourceId,
}

/// One candidate way out of a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionStrategy {
    pub kind: StrategyKind,
    pub feasible: bool,
    pub resulting_interval: Option<TimeInterval>,
    pub substitution: Option<Substitution>,
    pub removed_participants: Vec<ParticipantId>,
    pub score: f64,
}

impl ResolutionStrategy {
    /// Mutate a not-yet-committed candidate according to this strategy.
    /// Committed appointments must go through the reschedule path instead.
    pub fn apply_to(&self, appointment: &mut Appointment) {
        match self.kind {
            StrategyKind::Reschedule => {
                if let Some(interval) = self.resulting_interval {
                    appointment.interval = interval;
                }
            }
            StrategyKind::SubstituteResource => {
                if let Some(sub) = &self.substitution {
                    appointment.resources.remove(&sub.conflicted);
                    appointment.resources.insert(sub.replacement.clone());
                }
            }
            StrategyKind::RemoveParticipants => {
                appointment
                    .participants
                    .retain(|p| !self.removed_participants.contains(&p.id));
            }
        }
    }
}

/// Audit record of an applied resolution, embedded in the appointment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub strategy: ResolutionStrategy,
    pub conflicts: Vec<Conflict>,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    pub resolved: bool,
    pub applied: Option<ResolutionStrategy>,
    /// Individually-feasible strategies left for caller choice when no
    /// single one clears everything (or the non-winning ones otherwise).
    pub alternatives: Vec<ResolutionStrategy>,
}

/// Sets of interchangeable resources, injected by the caller. An empty
/// pool makes resource substitution infeasible.
#[derive(Debug, Clone, Default)]
pub struct ResourcePool {
    groups: Vec<BTreeSet<ResourceId>>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ResourceId>,
    {
        self.groups
            .push(resources.into_iter().map(Into::into).collect());
        self
    }

    /// Resources interchangeable with `resource`, excluding itself.
    pub fn substitutes_for(&self, resource: &str) -> Vec<ResourceId> {
        self.groups
            .iter()
            .filter(|g| g.contains(resource))
            .flat_map(|g| g.iter())
            .filter(|r| r.as_str() != resource)
            .cloned()
            .collect()
    }
}

/// Map conflicts to strategies and pick the best global winner.
///
/// The winner must be feasible and must clear **all** conflicts when
/// applied; partial resolution is not success.
pub fn resolve(
    candidate: &Appointment,
    conflicts: &[Conflict],
    existing: &[Appointment],
    rule: &AvailabilityRule,
    pool: &ResourcePool,
) -> ResolutionOutcome {
    if conflicts.is_empty() {
        return ResolutionOutcome {
            resolved: true,
            applied: None,
            alternatives: Vec::new(),
        };
    }

    let mut candidates = Vec::new();

    if conflicts
        .iter()
        .any(|c| c.kind == ConflictKind::TimeOverlap)
    {
        candidates.push(reschedule_strategy(candidate, existing, rule));
    }

    for conflict in conflicts {
        if let ConflictKind::Resource { resource } = &conflict.kind {
            candidates.push(substitution_strategy(candidate, existing, pool, resource));
        }
    }

    let conflicting_participants: Vec<ParticipantId> = conflicts
        .iter()
        .filter_map(|c| match &c.kind {
            ConflictKind::Participant { participant } => Some(participant.clone()),
            _ => None,
        })
        .collect();
    if !conflicting_participants.is_empty() {
        candidates.push(removal_strategy(candidate, &conflicting_participants));
    }

    let feasible: Vec<ResolutionStrategy> =
        candidates.into_iter().filter(|s| s.feasible).collect();

    let winner = feasible
        .iter()
        .filter(|s| clears_all(s, candidate, existing))
        .max_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned();

    match winner {
        Some(applied) => {
            let alternatives = feasible.into_iter().filter(|s| *s != applied).collect();
            ResolutionOutcome {
                resolved: true,
                applied: Some(applied),
                alternatives,
            }
        }
        None => ResolutionOutcome {
            resolved: false,
            applied: None,
            alternatives: feasible,
        },
    }
}

/// A strategy clears everything when the simulated post-apply candidate
/// detects no conflicts at all.
fn clears_all(
    strategy: &ResolutionStrategy,
    candidate: &Appointment,
    existing: &[Appointment],
) -> bool {
    let mut simulated = candidate.clone();
    strategy.apply_to(&mut simulated);
    detect_conflicts(&simulated, existing).is_empty()
}

/// Propose the next free slot of equal duration at or after the requested
/// start, searching the owner's calendar over a bounded horizon.
fn reschedule_strategy(
    candidate: &Appointment,
    existing: &[Appointment],
    rule: &AvailabilityRule,
) -> ResolutionStrategy {
    let duration = candidate.interval.duration();
    let start_day = candidate.interval.start().date_naive();
    let range = DateRange::new(
        start_day,
        start_day + chrono::Days::new(RESCHEDULE_HORIZON_DAYS),
    );

    let owner_scope: Vec<Appointment> = existing
        .iter()
        .filter(|a| a.owner == candidate.owner && a.id != candidate.id)
        .cloned()
        .collect();

    let proposal = suggest_slots(
        rule,
        &owner_scope,
        &range,
        duration,
        Duration::minutes(DEFAULT_GRANULARITY_MINUTES),
    )
    .into_iter()
    .filter(|slot| slot.start() >= candidate.interval.start())
    .find(|slot| {
        let mut moved = candidate.clone();
        moved.interval = *slot;
        detect_conflicts(&moved, existing).is_empty()
    });

    match proposal {
        Some(slot) => {
            let offset = (slot.start() - candidate.interval.start()).num_minutes();
            ResolutionStrategy {
                kind: StrategyKind::Reschedule,
                feasible: true,
                resulting_interval: Some(slot),
                substitution: None,
                removed_participants: Vec::new(),
                score: (RESCHEDULE_BASE_SCORE
                    - offset as f64 / DEFAULT_GRANULARITY_MINUTES as f64)
                    .max(0.0),
            }
        }
        None => ResolutionStrategy {
            kind: StrategyKind::Reschedule,
            feasible: false,
            resulting_interval: None,
            substitution: None,
            removed_participants: Vec::new(),
            score: 0.0,
        },
    }
}

/// Propose swapping a conflicted resource for an equivalent one that is
/// free during the candidate interval.
fn substitution_strategy(
    candidate: &Appointment,
    existing: &[Appointment],
    pool: &ResourcePool,
    conflicted: &str,
) -> ResolutionStrategy {
    let replacement = pool.substitutes_for(conflicted).into_iter().find(|r| {
        !candidate.resources.contains(r)
            && !existing.iter().any(|a| {
                a.id != candidate.id
                    && a.counts_for_conflicts()
                    && a.resources.contains(r)
                    && a.interval.overlaps(&candidate.interval)
            })
    });

    match replacement {
        Some(replacement) => ResolutionStrategy {
            kind: StrategyKind::SubstituteResource,
            feasible: true,
            resulting_interval: None,
            substitution: Some(Substitution {
                conflicted: conflicted.to_string(),
                replacement,
            }),
            removed_participants: Vec::new(),
            score: SUBSTITUTE_SCORE,
        },
        None => ResolutionStrategy {
            kind: StrategyKind::SubstituteResource,
            feasible: false,
            resulting_interval: None,
            substitution: Some(Substitution {
                conflicted: conflicted.to_string(),
                replacement: String::new(),
            }),
            removed_participants: Vec::new(),
            score: 0.0,
        },
    }
}

/// Propose dropping the conflicting participants; feasible only when none
/// of them are required.
fn removal_strategy(
    candidate: &Appointment,
    conflicting: &[ParticipantId],
) -> ResolutionStrategy {
    let mut removed: Vec<ParticipantId> = conflicting.to_vec();
    removed.sort();
    removed.dedup();

    let feasible = removed.iter().all(|id| {
        candidate
            .participants
            .iter()
            .find(|p| &p.id == id)
            .is_some_and(|p| !p.required)
    });

    let score = if feasible {
        (REMOVAL_BASE_SCORE - REMOVAL_PENALTY_PER_PARTICIPANT * removed.len() as f64).max(0.0)
    } else {
        0.0
    };

    ResolutionStrategy {
        kind: StrategyKind::RemoveParticipants,
        feasible,
        resulting_interval: None,
        substitution: None,
        removed_participants: removed,
        score,
    }
}
