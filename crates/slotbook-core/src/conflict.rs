//! Conflict detection against existing appointments.
//!
//! Three independent scans -- time, resource, participant -- run
//! unconditionally; a single candidate can produce conflicts of several
//! kinds at once. Results are concatenated, never deduplicated.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::appointment::{Appointment, ParticipantId, ResourceId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictKind {
    /// Same-owner appointments with overlapping intervals.
    TimeOverlap,
    /// A shared resource double-booked across owners. One conflict is
    /// emitted per shared resource.
    Resource { resource: ResourceId },
    /// A participant attending two overlapping appointments.
    Participant { participant: ParticipantId },
}

/// A detected conflict. Ephemeral: computed on demand and only persisted
/// when embedded in a resolution record for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    /// The existing appointment this conflict is against.
    pub against: Uuid,
    pub overlap_minutes: i64,
}

/// Enumerate every conflict between `candidate` and the given appointments.
/// Cancelled appointments and the candidate itself are skipped.
pub fn detect_conflicts(candidate: &Appointment, existing: &[Appointment]) -> Vec<Conflict> {
    let others: Vec<&Appointment> = existing
        .iter()
        .filter(|a| a.id != candidate.id && a.counts_for_conflicts())
        .collect();

    let mut conflicts = Vec::new();

    // Time overlap within the owner scope
    for other in &others {
        if other.owner == candidate.owner && other.interval.overlaps(&candidate.interval) {
            conflicts.push(Conflict {
                kind: ConflictKind::TimeOverlap,
                against: other.id,
                overlap_minutes: other
                    .interval
                    .overlap_duration(&candidate.interval)
                    .num_minutes(),
            });
        }
    }

    // Resource contention across all owners
    if !candidate.resources.is_empty() {
        for other in &others {
            if !other.interval.overlaps(&candidate.interval) {
                continue;
            }
            let overlap = other
                .interval
                .overlap_duration(&candidate.interval)
                .num_minutes();
            for resource in candidate.resources.intersection(&other.resources) {
                conflicts.push(Conflict {
                    kind: ConflictKind::Resource {
                        resource: resource.clone(),
                    },
                    against: other.id,
                    overlap_minutes: overlap,
                });
            }
        }
    }

    // Participant double-booking, symmetric to the resource scan
    if !candidate.participants.is_empty() {
        for other in &others {
            if !other.interval.overlaps(&candidate.interval) {
                continue;
            }
            let overlap = other
                .interval
                .overlap_duration(&candidate.interval)
                .num_minutes();
            for participant in &candidate.participants {
                if other.participants.iter().any(|p| p.id == participant.id) {
                    conflicts.push(Conflict {
                        kind: ConflictKind::Participant {
                            participant: participant.id.clone(),
                        },
                        against: other.id,
                        overlap_minutes: overlap,
                    });
                }
            }
        }
    }

    conflicts
}
