//! Appointment domain model and status lifecycle.
//!
//! Status is a closed state machine: `Pending -> Confirmed`,
//! `Confirmed -> Cancelled | Completed`, and `Confirmed -> Confirmed` on
//! reschedule. Every mutation bumps `version`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::interval::TimeInterval;
use crate::reminder::ReminderSpec;
use crate::resolver::ResolutionRecord;

pub type OwnerId = String;
pub type ResourceId = String;
pub type ParticipantId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    /// Allowed next statuses. `Confirmed -> Confirmed` is the reschedule
    /// transition; `Cancelled` and `Completed` are terminal.
    pub fn valid_transitions(&self) -> &'static [AppointmentStatus] {
        match self {
            AppointmentStatus::Pending => {
                &[AppointmentStatus::Confirmed, AppointmentStatus::Cancelled]
            }
            AppointmentStatus::Confirmed => &[
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::Completed,
            ],
            AppointmentStatus::Cancelled | AppointmentStatus::Completed => &[],
        }
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

/// A meeting participant. Required participants may never be removed by
/// conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub required: bool,
}

impl Participant {
    pub fn required(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            required: true,
        }
    }

    pub fn optional(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            required: false,
        }
    }
}

/// A booked (or in-flight) appointment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub owner: OwnerId,
    pub interval: TimeInterval,
    pub status: AppointmentStatus,
    pub resources: BTreeSet<ResourceId>,
    pub participants: Vec<Participant>,
    /// Reminder specs used to (re)compute fire times whenever the
    /// appointment is confirmed or rescheduled.
    pub reminders: Vec<ReminderSpec>,
    /// Monotonic, incremented on every mutation.
    pub version: u32,
    pub resolution: Option<ResolutionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Create a new appointment in `Pending` status.
    pub fn new(owner: impl Into<OwnerId>, interval: TimeInterval) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            interval,
            status: AppointmentStatus::Pending,
            resources: BTreeSet::new(),
            participants: Vec::new(),
            reminders: Vec::new(),
            version: 1,
            resolution: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ResourceId>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_participants(mut self, participants: Vec<Participant>) -> Self {
        self.participants = participants;
        self
    }

    pub fn with_reminders(mut self, reminders: Vec<ReminderSpec>) -> Self {
        self.reminders = reminders;
        self
    }

    /// Apply a status transition, bumping `version` on success. Rejects
    /// anything outside the lifecycle table.
    pub fn transition_to(&mut self, next: AppointmentStatus) -> Result<(), ValidationError> {
        if !self.status.can_transition_to(next) {
            return Err(ValidationError::InvalidStatusTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Cancelled appointments are excluded from every overlap and conflict
    /// check.
    pub fn counts_for_conflicts(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}
