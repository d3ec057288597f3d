//! # Slotbook Core Library
//!
//! Appointment scheduling and conflict-resolution engine. This library
//! decides whether a proposed time slot is bookable, detects and resolves
//! conflicts against existing commitments, generates ranked alternative
//! slots, and drives time-relative reminders. It is a library invoked by a
//! thin host (HTTP handler, queue consumer); persistence, calendar
//! providers and notification transports stay behind injected traits.
//!
//! ## Key Components
//!
//! - [`TimeInterval`]: half-open interval math everything else builds on
//! - [`BookingEngine`]: the serialized `check -> detect -> resolve ->
//!   commit` pipeline
//! - [`ReminderScheduler`]: time-ordered reminder queue with a periodic
//!   dispatch driver
//! - [`AppointmentStore`] / [`CalendarSync`] / [`NotificationDispatcher`]:
//!   the collaborator seams

pub mod appointment;
pub mod availability;
pub mod collaborators;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod interval;
pub mod reminder;
pub mod resolver;
pub mod store;
pub mod suggest;

pub use appointment::{Appointment, AppointmentStatus, Participant};
pub use availability::{
    check_availability, AvailabilityResult, AvailabilityRule, BlockedInterval, TimeOfDayRange,
    UnavailableReason,
};
pub use collaborators::{
    CalendarSync, Channel, CollaboratorWarning, NotificationDispatcher, NullCalendarSync,
    NullDispatcher,
};
pub use conflict::{detect_conflicts, Conflict, ConflictKind};
pub use engine::{
    BookingContext, BookingEngine, BookingOutcome, BookingRequest, CancelOutcome, ValidationRules,
};
pub use error::{CollaboratorError, Result, SchedulingError, StoreError, ValidationError};
pub use interval::TimeInterval;
pub use reminder::{ReminderScheduler, ReminderSpec, ReminderStatus, ScheduledReminder};
pub use resolver::{
    resolve, ResolutionOutcome, ResolutionRecord, ResolutionStrategy, ResourcePool, StrategyKind,
};
pub use store::{AppointmentStore, InMemoryStore};
pub use suggest::{
    rank_suggestions, suggest_slots, DateRange, ScoredSlot, SlotRequirements, Urgency,
};
