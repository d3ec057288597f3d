//! Booking pipeline: availability check, conflict detection and
//! resolution, serialized commit, post-commit side effects.
//!
//! `check -> detect -> resolve -> commit` executes as one atomic unit per
//! owner: a per-owner async mutex closes the check-then-act race between
//! concurrent requests for overlapping slots. Suggestion queries run
//! unsynchronized against a store snapshot; booking always re-validates
//! under the lock.
//!
//! Collaborator calls (calendar sync, reminder arming) happen after the
//! commit, under a timeout; their failures are downgraded to warnings on
//! the successful outcome and never roll the booking back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration as StdDuration;

use chrono::{Days, Duration, NaiveDate, NaiveTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::appointment::{Appointment, AppointmentStatus, OwnerId, Participant, ResourceId};
use crate::availability::{check_availability, AvailabilityRule, UnavailableReason};
use crate::collaborators::{CalendarSync, CollaboratorWarning, NotificationDispatcher};
use crate::conflict::detect_conflicts;
use crate::error::{Result, SchedulingError, StoreError, ValidationError};
use crate::interval::TimeInterval;
use crate::reminder::{ReminderScheduler, ReminderSpec, ScheduledReminder};
use crate::resolver::{resolve, ResolutionRecord, ResourcePool};
use crate::store::AppointmentStore;
use crate::suggest::{
    rank_suggestions, suggest_slots, DateRange, ScoredSlot, SlotRequirements,
    DEFAULT_GRANULARITY_MINUTES,
};

const DEFAULT_COLLABORATOR_TIMEOUT: StdDuration = StdDuration::from_secs(5);
/// Store horizon queried around a booking, wide enough to cover the
/// resolver's reschedule search.
const BOOKING_HORIZON_DAYS: u64 = 8;

/// Duration bounds and past-dating policy applied to every request.
#[derive(Debug, Clone, Copy)]
pub struct ValidationRules {
    pub min_duration_minutes: i64,
    pub max_duration_minutes: i64,
    pub reject_past: bool,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            min_duration_minutes: 5,
            max_duration_minutes: 8 * 60,
            reject_past: true,
        }
    }
}

/// A booking request before it becomes an appointment.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub owner: OwnerId,
    pub interval: TimeInterval,
    pub resources: Vec<ResourceId>,
    pub participants: Vec<Participant>,
    pub reminders: Vec<ReminderSpec>,
}

impl BookingRequest {
    pub fn new(owner: impl Into<OwnerId>, interval: TimeInterval) -> Self {
        Self {
            owner: owner.into(),
            interval,
            resources: Vec::new(),
            participants: Vec::new(),
            reminders: Vec::new(),
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
}

/// Policy snapshot consumed by one booking operation: the owner's
/// availability rule and the pool of interchangeable resources.
#[derive(Debug, Clone, Default)]
pub struct BookingContext {
    pub rule: AvailabilityRule,
    pub resource_pool: ResourcePool,
}

/// A successful booking, possibly degraded by collaborator warnings.
#[derive(Debug, Clone)]
pub struct BookingOutcome {
    pub appointment: Appointment,
    pub reminders: Vec<ScheduledReminder>,
    pub warnings: Vec<CollaboratorWarning>,
}

/// A successful cancellation.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub appointment: Appointment,
    pub cancelled_reminders: usize,
    pub warnings: Vec<CollaboratorWarning>,
}

/// The scheduling engine. Holds no appointment state of its own beyond
/// short-lived per-owner locks; everything durable lives in the store.
pub struct BookingEngine {
    store: Arc<dyn AppointmentStore>,
    calendar: Arc<dyn CalendarSync>,
    reminders: Arc<ReminderScheduler>,
    rules: ValidationRules,
    collaborator_timeout: StdDuration,
    locks: StdMutex<HashMap<OwnerId, Arc<Mutex<()>>>>,
}

impl BookingEngine {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        calendar: Arc<dyn CalendarSync>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let reminders = Arc::new(ReminderScheduler::new(dispatcher, Arc::clone(&store)));
        Self {
            store,
            calendar,
            reminders,
            rules: ValidationRules::default(),
            collaborator_timeout: DEFAULT_COLLABORATOR_TIMEOUT,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_collaborator_timeout(mut self, timeout: StdDuration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }

    /// The reminder scheduler, for hosts that drive `fire_due` or spawn
    /// the periodic driver.
    pub fn reminder_scheduler(&self) -> &Arc<ReminderScheduler> {
        &self.reminders
    }

    /// Book a new appointment.
    ///
    /// On an occupied slot the resolver is consulted; business-hours and
    /// blocked-time failures go straight to ranked alternatives.
    pub async fn book(
        &self,
        request: BookingRequest,
        ctx: &BookingContext,
    ) -> Result<BookingOutcome> {
        self.validate(&request.interval)?;

        let lock = self.owner_lock(&request.owner);
        let _guard = lock.lock().await;

        let all_active = self
            .store
            .list_active(None, &booking_horizon(&request.interval)?)
            .await?;
        let owner_active: Vec<Appointment> = all_active
            .iter()
            .filter(|a| a.owner == request.owner)
            .cloned()
            .collect();

        let mut candidate = Appointment::new(request.owner.clone(), request.interval)
            .with_resources(request.resources.clone())
            .with_participants(request.participants.clone())
            .with_reminders(request.reminders.clone());

        let availability = check_availability(&request.interval, &ctx.rule, &owner_active);
        if !availability.available {
            // Business-hours and blocked-time failures are hard policy
            // failures with no resolution path; occupancy falls through to
            // the resolver.
            let hard = availability.reason == Some(UnavailableReason::OutsideBusinessHours)
                || !availability.blocked.is_empty();
            if hard {
                debug!(owner = %request.owner, reason = ?availability.reason, "slot unavailable");
                let alternatives =
                    self.alternatives(&ctx.rule, &owner_active, &request.interval);
                return Err(SchedulingError::Unavailable {
                    result: availability,
                    alternatives,
                });
            }
        }

        let conflicts = detect_conflicts(&candidate, &all_active);
        if !conflicts.is_empty() {
            let outcome = resolve(
                &candidate,
                &conflicts,
                &all_active,
                &ctx.rule,
                &ctx.resource_pool,
            );
            match outcome.applied {
                Some(strategy) => {
                    strategy.apply_to(&mut candidate);
                    // Re-validate the mutated candidate under the lock
                    if !detect_conflicts(&candidate, &all_active).is_empty() {
                        return Err(SchedulingError::UnresolvableConflict {
                            conflicts,
                            strategies: outcome.alternatives,
                            alternatives: self.alternatives(
                                &ctx.rule,
                                &owner_active,
                                &request.interval,
                            ),
                        });
                    }
                    info!(
                        owner = %candidate.owner,
                        strategy = ?strategy.kind,
                        "conflicts resolved"
                    );
                    candidate.resolution = Some(ResolutionRecord {
                        strategy,
                        conflicts,
                        resolved_at: Utc::now(),
                    });
                }
                None => {
                    let alternatives =
                        self.alternatives(&ctx.rule, &owner_active, &request.interval);
                    return Err(SchedulingError::UnresolvableConflict {
                        conflicts,
                        strategies: outcome.alternatives,
                        alternatives,
                    });
                }
            }
        }

        candidate.transition_to(AppointmentStatus::Confirmed)?;
        self.store.save(&candidate).await?;
        info!(
            appointment_id = %candidate.id,
            owner = %candidate.owner,
            start = %candidate.interval.start(),
            "appointment confirmed"
        );

        let mut warnings = Vec::new();
        let reminders = self.reminders.schedule(&candidate).await;
        self.push_calendar(&candidate, &mut warnings).await;

        Ok(BookingOutcome {
            appointment: candidate,
            reminders,
            warnings,
        })
    }

    /// Move a confirmed appointment to a new interval, re-running the full
    /// availability and conflict pipeline. On any failure the stored
    /// appointment -- interval, version, reminders -- is left untouched.
    pub async fn reschedule(
        &self,
        id: Uuid,
        new_interval: TimeInterval,
        ctx: &BookingContext,
    ) -> Result<BookingOutcome> {
        self.validate(&new_interval)?;

        // The lock key is the owner, so a preliminary load is unavoidable.
        // The authoritative snapshot and status check happen on a re-load
        // under the lock; this one only names the contention domain.
        let owner = self
            .store
            .load(id)
            .await?
            .ok_or(StoreError::NotFound(id))?
            .owner;
        let lock = self.owner_lock(&owner);
        let _guard = lock.lock().await;

        let current = self
            .store
            .load(id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        if current.status != AppointmentStatus::Confirmed {
            return Err(ValidationError::InvalidStatusTransition {
                from: current.status,
                to: AppointmentStatus::Confirmed,
            }
            .into());
        }

        let all_active: Vec<Appointment> = self
            .store
            .list_active(None, &booking_horizon(&new_interval)?)
            .await?
            .into_iter()
            .filter(|a| a.id != id)
            .collect();
        let owner_active: Vec<Appointment> = all_active
            .iter()
            .filter(|a| a.owner == current.owner)
            .cloned()
            .collect();

        // All mutation happens on a working copy; the stored appointment
        // is replaced only after the pipeline succeeds.
        let mut moved = current.clone();
        moved.interval = new_interval;

        let availability = check_availability(&new_interval, &ctx.rule, &owner_active);
        if !availability.available {
            debug!(appointment_id = %id, reason = ?availability.reason, "reschedule rejected");
            let alternatives = self.alternatives(&ctx.rule, &owner_active, &new_interval);
            return Err(SchedulingError::Unavailable {
                result: availability,
                alternatives,
            });
        }
        let conflicts = detect_conflicts(&moved, &all_active);
        if !conflicts.is_empty() {
            let alternatives = self.alternatives(&ctx.rule, &owner_active, &new_interval);
            return Err(SchedulingError::UnresolvableConflict {
                conflicts,
                strategies: Vec::new(),
                alternatives,
            });
        }

        moved.transition_to(AppointmentStatus::Confirmed)?;
        self.store.save(&moved).await?;
        info!(
            appointment_id = %id,
            new_start = %new_interval.start(),
            version = moved.version,
            "appointment rescheduled"
        );

        // Old reminders are invalidated before new fire times are armed
        self.reminders.cancel_all(id).await;
        let reminders = self.reminders.schedule(&moved).await;

        let mut warnings = Vec::new();
        self.push_calendar(&moved, &mut warnings).await;

        Ok(BookingOutcome {
            appointment: moved,
            reminders,
            warnings,
        })
    }

    /// Cancel a pending or confirmed appointment. Cancellation is terminal
    /// and removes the appointment from all future overlap checks.
    pub async fn cancel(&self, id: Uuid) -> Result<CancelOutcome> {
        let owner = self
            .store
            .load(id)
            .await?
            .ok_or(StoreError::NotFound(id))?
            .owner;
        let lock = self.owner_lock(&owner);
        let _guard = lock.lock().await;

        // Re-loaded under the lock so a concurrent transition is observed
        let mut cancelled = self
            .store
            .load(id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        cancelled.transition_to(AppointmentStatus::Cancelled)?;
        self.store.save(&cancelled).await?;

        let cancelled_reminders = self.reminders.cancel_all(id).await;
        let mut warnings = Vec::new();
        self.push_calendar(&cancelled, &mut warnings).await;
        info!(appointment_id = %id, "appointment cancelled");

        Ok(CancelOutcome {
            appointment: cancelled,
            cancelled_reminders,
            warnings,
        })
    }

    /// Ranked free slots for an owner over a date range. Read-only; runs
    /// against a store snapshot without taking the owner lock.
    pub async fn suggest(
        &self,
        owner: &str,
        range: DateRange,
        duration: Duration,
        requirements: &SlotRequirements,
        rule: &AvailabilityRule,
    ) -> Result<Vec<ScoredSlot>> {
        let horizon = TimeInterval::new(
            day_start(range.from),
            day_start(range.to.checked_add_days(Days::new(1)).unwrap_or(range.to)),
        )?;
        let existing = self.store.list_active(Some(owner), &horizon).await?;
        let slots = suggest_slots(
            rule,
            &existing,
            &range,
            duration,
            Duration::minutes(DEFAULT_GRANULARITY_MINUTES),
        );
        Ok(rank_suggestions(slots, &existing, requirements))
    }

    fn validate(&self, interval: &TimeInterval) -> Result<(), ValidationError> {
        if self.rules.reject_past && interval.start() < Utc::now() {
            return Err(ValidationError::PastDated {
                start: interval.start(),
            });
        }
        let minutes = interval.duration_minutes();
        if minutes < self.rules.min_duration_minutes || minutes > self.rules.max_duration_minutes
        {
            return Err(ValidationError::DurationOutOfBounds {
                minutes,
                min: self.rules.min_duration_minutes,
                max: self.rules.max_duration_minutes,
            });
        }
        if interval.start().date_naive() != interval.end().date_naive() {
            return Err(ValidationError::MultiDaySpan {
                start: interval.start(),
                end: interval.end(),
            });
        }
        Ok(())
    }

    fn owner_lock(&self, owner: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Strong count 1 means the map holds the only reference, so no
        // operation is in flight for that owner. Pruning here keeps the map
        // bounded by concurrent operations, not by owners ever seen.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            locks
                .entry(owner.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn alternatives(
        &self,
        rule: &AvailabilityRule,
        owner_active: &[Appointment],
        requested: &TimeInterval,
    ) -> Vec<ScoredSlot> {
        let day = requested.start().date_naive();
        let range = DateRange::new(day, day + Days::new(1));
        let slots = suggest_slots(
            rule,
            owner_active,
            &range,
            requested.duration(),
            Duration::minutes(DEFAULT_GRANULARITY_MINUTES),
        );
        rank_suggestions(slots, owner_active, &SlotRequirements::default())
    }

    async fn push_calendar(
        &self,
        appointment: &Appointment,
        warnings: &mut Vec<CollaboratorWarning>,
    ) {
        match tokio::time::timeout(
            self.collaborator_timeout,
            self.calendar.push(appointment),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(appointment_id = %appointment.id, error = %err, "calendar sync failed");
                warnings.push(err.into());
            }
            Err(_) => {
                warn!(appointment_id = %appointment.id, "calendar sync timed out");
                warnings.push(CollaboratorWarning {
                    service: "calendar-sync".to_string(),
                    message: "push timed out".to_string(),
                });
            }
        }
    }
}

fn day_start(day: NaiveDate) -> chrono::DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

/// Store query window wide enough for availability, conflict detection and
/// the resolver's reschedule search.
fn booking_horizon(interval: &TimeInterval) -> Result<TimeInterval, ValidationError> {
    let day = interval.start().date_naive();
    let end = day
        .checked_add_days(Days::new(BOOKING_HORIZON_DAYS))
        .unwrap_or(day);
    TimeInterval::new(day_start(day), day_start(end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::TimeOfDayRange;
    use crate::collaborators::{NullCalendarSync, NullDispatcher};
    use crate::store::InMemoryStore;
    use chrono::TimeZone;

    fn nine_to_five() -> BookingContext {
        BookingContext {
            rule: AvailabilityRule::new().with_weekday_hours(
                TimeOfDayRange::new(
                    NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                )
                .unwrap(),
            ),
            ..Default::default()
        }
    }

    fn test_engine(store: Arc<InMemoryStore>) -> BookingEngine {
        BookingEngine::new(store, Arc::new(NullCalendarSync), Arc::new(NullDispatcher))
    }

    // 2030-01-07 is a Monday
    fn iv(day: u32, h1: u32, m1: u32, h2: u32, m2: u32) -> TimeInterval {
        TimeInterval::new(
            Utc.with_ymd_and_hms(2030, 1, day, h1, m1, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, day, h2, m2, 0).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn past_dated_request_is_rejected() {
        let engine = test_engine(Arc::new(InMemoryStore::new()));
        let stale = TimeInterval::new(
            Utc.with_ymd_and_hms(2020, 1, 6, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 6, 11, 0, 0).unwrap(),
        )
        .unwrap();

        let err = engine
            .book(BookingRequest::new("alice", stale), &nine_to_five())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::Validation(ValidationError::PastDated { .. })
        ));
    }

    #[tokio::test]
    async fn duration_bounds_are_enforced() {
        let engine = test_engine(Arc::new(InMemoryStore::new()));
        let ctx = nine_to_five();

        // 3 minutes is below the 5-minute floor
        let err = engine
            .book(BookingRequest::new("alice", iv(7, 10, 0, 10, 3)), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::Validation(ValidationError::DurationOutOfBounds { minutes: 3, .. })
        ));

        // 8.5 hours exceeds the 8-hour ceiling
        let err = engine
            .book(BookingRequest::new("alice", iv(7, 9, 0, 17, 30)), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::Validation(ValidationError::DurationOutOfBounds { minutes: 510, .. })
        ));
    }

    #[tokio::test]
    async fn midnight_spanning_request_is_rejected() {
        let engine = test_engine(Arc::new(InMemoryStore::new()));

        // Two hours, but across a calendar-day boundary
        let overnight = TimeInterval::new(
            Utc.with_ymd_and_hms(2030, 1, 7, 23, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 8, 1, 0, 0).unwrap(),
        )
        .unwrap();
        let err = engine
            .book(BookingRequest::new("alice", overnight), &nine_to_five())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::Validation(ValidationError::MultiDaySpan { .. })
        ));
    }

    #[tokio::test]
    async fn reschedule_validates_before_touching_state() {
        let store = Arc::new(InMemoryStore::new());
        let engine = test_engine(store.clone());
        let ctx = nine_to_five();

        let booked = engine
            .book(BookingRequest::new("alice", iv(7, 10, 0, 11, 0)), &ctx)
            .await
            .unwrap()
            .appointment;

        let overnight = TimeInterval::new(
            Utc.with_ymd_and_hms(2030, 1, 7, 23, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 8, 1, 0, 0).unwrap(),
        )
        .unwrap();
        let err = engine
            .reschedule(booked.id, overnight, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::Validation(ValidationError::MultiDaySpan { .. })
        ));

        let stored = store.load(booked.id).await.unwrap().unwrap();
        assert_eq!(stored.interval, booked.interval);
        assert_eq!(stored.version, booked.version);
    }

    #[tokio::test]
    async fn owner_locks_are_dropped_when_idle() {
        let engine = test_engine(Arc::new(InMemoryStore::new()));
        let ctx = nine_to_five();

        engine
            .book(BookingRequest::new("alice", iv(7, 10, 0, 11, 0)), &ctx)
            .await
            .unwrap();
        engine
            .book(BookingRequest::new("bob", iv(7, 10, 0, 11, 0)), &ctx)
            .await
            .unwrap();
        engine
            .book(BookingRequest::new("carol", iv(7, 10, 0, 11, 0)), &ctx)
            .await
            .unwrap();

        // Each acquisition prunes entries no task holds, so only the most
        // recent owner's lock can remain
        let locks = engine.locks.lock().unwrap();
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key("carol"));
    }
}
