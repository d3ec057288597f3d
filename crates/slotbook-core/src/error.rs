//! Core error types for slotbook-core.
//!
//! Validation and availability/conflict failures are returned synchronously
//! to the caller before any state mutation. Collaborator failures after a
//! commit never surface here -- they are carried as warnings on a successful
//! booking outcome instead.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::appointment::AppointmentStatus;
use crate::availability::AvailabilityResult;
use crate::conflict::Conflict;
use crate::resolver::ResolutionStrategy;
use crate::suggest::ScoredSlot;

/// Top-level error type for the scheduling engine.
#[derive(Error, Debug)]
pub enum SchedulingError {
    /// Malformed input, rejected before any state mutation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The requested slot is not bookable and no resolution path applies.
    /// Carries the full availability diagnosis plus ranked alternatives so
    /// the caller can re-request.
    #[error("requested slot is unavailable")]
    Unavailable {
        result: AvailabilityResult,
        alternatives: Vec<ScoredSlot>,
    },

    /// Conflicts were detected but no single strategy clears all of them.
    /// `strategies` holds the individually-feasible candidates for caller
    /// choice; `alternatives` holds ranked free slots.
    #[error("no single strategy resolves all detected conflicts")]
    UnresolvableConflict {
        conflicts: Vec<Conflict>,
        strategies: Vec<ResolutionStrategy>,
        alternatives: Vec<ScoredSlot>,
    },

    /// Durable store failure. Never raised after a successful commit.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// End must be strictly after start
    #[error("invalid time range: end ({end}) must be after start ({start})")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Booking requests may not start in the past
    #[error("appointment starts in the past ({start})")]
    PastDated { start: DateTime<Utc> },

    /// Duration outside the configured bounds
    #[error("duration of {minutes} minutes is outside allowed bounds [{min}, {max}]")]
    DurationOutOfBounds { minutes: i64, min: i64, max: i64 },

    /// Candidates spanning more than one calendar day are rejected rather
    /// than evaluated against multiple day rules
    #[error("interval spans multiple calendar days ({start} to {end})")]
    MultiDaySpan {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Status transition not in the lifecycle table
    #[error("invalid status transition: {from:?} -> {to:?}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
}

/// Durable-store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No appointment with the given id
    #[error("appointment {0} not found")]
    NotFound(Uuid),

    /// Backend-specific failure
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Failure reported by an external collaborator (calendar sync,
/// notification dispatch). Best-effort by contract, so these are wrapped
/// into warnings rather than propagated.
#[derive(Error, Debug, Clone)]
#[error("collaborator '{service}' failed: {message}")]
pub struct CollaboratorError {
    pub service: String,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for SchedulingError
pub type Result<T, E = SchedulingError> = std::result::Result<T, E>;
