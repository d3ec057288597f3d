//! Reminder scheduling and dispatch.
//!
//! Fire times are computed relative to the appointment start and held in a
//! single time-ordered queue. A periodic driver calls `fire_due`; the
//! engine never fires reminders inline. Reminders leave the map as soon as
//! they reach a terminal status, and the queue drops orphaned ids lazily on
//! pop, so neither structure outgrows the set of pending reminders.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::appointment::{Appointment, AppointmentStatus};
use crate::collaborators::{Channel, NotificationDispatcher};
use crate::store::AppointmentStore;

const DEFAULT_DISPATCH_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// How long before the appointment start a reminder should fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSpec {
    pub offset_minutes: i64,
    pub channel: Channel,
}

impl ReminderSpec {
    pub fn new(offset_minutes: i64, channel: Channel) -> Self {
        Self {
            offset_minutes,
            channel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Scheduled,
    Fired,
    Cancelled,
    Failed,
}

/// A concrete reminder derived from a spec at confirmation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledReminder {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub fire_at: DateTime<Utc>,
    pub channel: Channel,
    pub status: ReminderStatus,
}

#[derive(Default)]
struct ReminderState {
    reminders: HashMap<Uuid, ScheduledReminder>,
    queue: BinaryHeap<Reverse<(DateTime<Utc>, Uuid)>>,
}

/// Time-ordered reminder queue with a pull-based dispatch driver.
pub struct ReminderScheduler {
    dispatcher: Arc<dyn NotificationDispatcher>,
    store: Arc<dyn AppointmentStore>,
    dispatch_timeout: StdDuration,
    inner: Mutex<ReminderState>,
}

impl ReminderScheduler {
    pub fn new(
        dispatcher: Arc<dyn NotificationDispatcher>,
        store: Arc<dyn AppointmentStore>,
    ) -> Self {
        Self {
            dispatcher,
            store,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            inner: Mutex::new(ReminderState::default()),
        }
    }

    pub fn with_dispatch_timeout(mut self, timeout: StdDuration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Compute and enqueue reminders for the appointment's specs. Past-due
    /// fire times are recorded anyway and fire on the next tick; reminders
    /// are never silently dropped.
    pub async fn schedule(&self, appointment: &Appointment) -> Vec<ScheduledReminder> {
        let mut state = self.inner.lock().await;
        let mut created = Vec::with_capacity(appointment.reminders.len());

        for spec in &appointment.reminders {
            let reminder = ScheduledReminder {
                id: Uuid::new_v4(),
                appointment_id: appointment.id,
                fire_at: appointment.interval.start() - Duration::minutes(spec.offset_minutes),
                channel: spec.channel,
                status: ReminderStatus::Scheduled,
            };
            state.queue.push(Reverse((reminder.fire_at, reminder.id)));
            state.reminders.insert(reminder.id, reminder.clone());
            created.push(reminder);
        }

        debug!(
            appointment_id = %appointment.id,
            count = created.len(),
            "reminders scheduled"
        );
        created
    }

    /// Cancel every scheduled reminder for the appointment, dropping the
    /// entries. Idempotent: a second call is a no-op and returns zero.
    pub async fn cancel_all(&self, appointment_id: Uuid) -> usize {
        let mut state = self.inner.lock().await;
        let before = state.reminders.len();
        state
            .reminders
            .retain(|_, r| r.appointment_id != appointment_id);
        let cancelled = before - state.reminders.len();
        if cancelled > 0 {
            debug!(%appointment_id, cancelled, "reminders cancelled");
        }
        cancelled
    }

    /// Reminders still scheduled for an appointment.
    pub async fn scheduled_count(&self, appointment_id: Uuid) -> usize {
        let state = self.inner.lock().await;
        state
            .reminders
            .values()
            .filter(|r| {
                r.appointment_id == appointment_id && r.status == ReminderStatus::Scheduled
            })
            .count()
    }

    /// Pop and dispatch everything due at `now`. Invoked by the driver (or
    /// a test clock), never by booking operations.
    ///
    /// The appointment's status is re-checked immediately before dispatch:
    /// a reminder for an appointment that is no longer `Confirmed` is
    /// marked `Cancelled` instead of delivered. Dispatch failure marks the
    /// reminder `Failed` with no auto-retry.
    pub async fn fire_due(&self, now: DateTime<Utc>) -> Vec<ScheduledReminder> {
        let due: Vec<Uuid> = {
            let mut state = self.inner.lock().await;
            let mut due = Vec::new();
            while let Some(Reverse((fire_at, id))) = state.queue.peek().copied() {
                if fire_at > now {
                    break;
                }
                state.queue.pop();
                if state
                    .reminders
                    .get(&id)
                    .is_some_and(|r| r.status == ReminderStatus::Scheduled)
                {
                    due.push(id);
                }
            }
            due
        };

        let mut processed = Vec::with_capacity(due.len());
        for id in due {
            let reminder = {
                let state = self.inner.lock().await;
                match state.reminders.get(&id) {
                    Some(r) if r.status == ReminderStatus::Scheduled => r.clone(),
                    _ => continue,
                }
            };

            let outcome = self.dispatch_one(&reminder).await;

            let mut state = self.inner.lock().await;
            // Terminal reminders leave the map. A cancellation that raced
            // the dispatch has already removed this entry and wins the
            // record, even if the payload went out.
            if let Some(mut entry) = state.reminders.remove(&id) {
                entry.status = outcome;
                processed.push(entry);
            }
        }
        processed
    }

    async fn dispatch_one(&self, reminder: &ScheduledReminder) -> ReminderStatus {
        let appointment = match self.store.load(reminder.appointment_id).await {
            Ok(Some(a)) if a.status == AppointmentStatus::Confirmed => a,
            Ok(_) => {
                debug!(
                    reminder_id = %reminder.id,
                    appointment_id = %reminder.appointment_id,
                    "appointment no longer confirmed, dropping reminder"
                );
                return ReminderStatus::Cancelled;
            }
            Err(err) => {
                warn!(reminder_id = %reminder.id, error = %err, "store lookup failed");
                return ReminderStatus::Failed;
            }
        };

        let payload = json!({
            "appointment_id": appointment.id,
            "owner": appointment.owner,
            "starts_at": appointment.interval.start(),
        });

        match tokio::time::timeout(
            self.dispatch_timeout,
            self.dispatcher.dispatch(reminder.channel, payload),
        )
        .await
        {
            Ok(Ok(())) => ReminderStatus::Fired,
            Ok(Err(err)) => {
                warn!(reminder_id = %reminder.id, error = %err, "reminder dispatch failed");
                ReminderStatus::Failed
            }
            Err(_) => {
                warn!(reminder_id = %reminder.id, "reminder dispatch timed out");
                ReminderStatus::Failed
            }
        }
    }

    /// Spawn the periodic driver loop. The host owns the returned handle
    /// and aborts it on shutdown.
    pub fn spawn_driver(self: &Arc<Self>, period: StdDuration) -> tokio::task::JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                scheduler.fire_due(Utc::now()).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::interval::TimeInterval;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<(Channel, serde_json::Value)>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl NotificationDispatcher for RecordingDispatcher {
        async fn dispatch(
            &self,
            channel: Channel,
            payload: serde_json::Value,
        ) -> Result<(), CollaboratorError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CollaboratorError::new("dispatcher", "unreachable"));
            }
            self.sent.lock().await.push((channel, payload));
            Ok(())
        }
    }

    fn start_at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 7, h, 0, 0).unwrap()
    }

    async fn confirmed_with_reminders(
        store: &InMemoryStore,
        specs: Vec<ReminderSpec>,
    ) -> Appointment {
        let interval = TimeInterval::new(start_at(10), start_at(11)).unwrap();
        let mut appt = Appointment::new("alice", interval).with_reminders(specs);
        appt.transition_to(AppointmentStatus::Confirmed).unwrap();
        store.save(&appt).await.unwrap();
        appt
    }

    fn scheduler(
        dispatcher: Arc<RecordingDispatcher>,
        store: Arc<InMemoryStore>,
    ) -> ReminderScheduler {
        ReminderScheduler::new(dispatcher, store)
    }

    #[tokio::test]
    async fn fire_times_are_offset_from_start() {
        let store = Arc::new(InMemoryStore::new());
        let sched = scheduler(Arc::new(RecordingDispatcher::default()), store.clone());
        let appt = confirmed_with_reminders(
            &store,
            vec![
                ReminderSpec::new(60, Channel::Email),
                ReminderSpec::new(15, Channel::Push),
            ],
        )
        .await;

        let reminders = sched.schedule(&appt).await;
        assert_eq!(reminders.len(), 2);
        assert_eq!(reminders[0].fire_at, start_at(9));
        assert_eq!(
            reminders[1].fire_at,
            start_at(10) - Duration::minutes(15)
        );
        assert_eq!(sched.scheduled_count(appt.id).await, 2);
    }

    #[tokio::test]
    async fn fires_only_due_reminders_in_order() {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sched = scheduler(dispatcher.clone(), store.clone());
        let appt = confirmed_with_reminders(
            &store,
            vec![
                ReminderSpec::new(60, Channel::Email),
                ReminderSpec::new(15, Channel::Push),
            ],
        )
        .await;
        sched.schedule(&appt).await;

        // 09:30: only the 60-minute reminder is due
        let fired = sched.fire_due(start_at(9) + Duration::minutes(30)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].channel, Channel::Email);
        assert_eq!(fired[0].status, ReminderStatus::Fired);
        assert_eq!(sched.scheduled_count(appt.id).await, 1);

        // 10:00: the rest
        let fired = sched.fire_due(start_at(10)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].channel, Channel::Push);
        assert_eq!(dispatcher.sent.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn past_due_reminder_fires_on_next_tick() {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sched = scheduler(dispatcher.clone(), store.clone());
        // Offset puts the fire time well before "now"
        let appt =
            confirmed_with_reminders(&store, vec![ReminderSpec::new(24 * 60, Channel::Email)])
                .await;

        let reminders = sched.schedule(&appt).await;
        assert_eq!(reminders[0].status, ReminderStatus::Scheduled);

        let fired = sched.fire_due(start_at(9)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].status, ReminderStatus::Fired);
    }

    #[tokio::test]
    async fn cancel_all_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let sched = scheduler(Arc::new(RecordingDispatcher::default()), store.clone());
        let appt = confirmed_with_reminders(
            &store,
            vec![
                ReminderSpec::new(60, Channel::Email),
                ReminderSpec::new(15, Channel::Sms),
            ],
        )
        .await;
        sched.schedule(&appt).await;

        assert_eq!(sched.cancel_all(appt.id).await, 2);
        assert_eq!(sched.cancel_all(appt.id).await, 0);
        assert_eq!(sched.scheduled_count(appt.id).await, 0);

        // Nothing fires after cancellation
        let fired = sched.fire_due(start_at(10)).await;
        assert!(fired.is_empty());
    }

    #[tokio::test]
    async fn cancelled_appointment_suppresses_dispatch() {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sched = scheduler(dispatcher.clone(), store.clone());
        let mut appt =
            confirmed_with_reminders(&store, vec![ReminderSpec::new(60, Channel::Email)]).await;
        sched.schedule(&appt).await;

        // Appointment cancelled after scheduling but before the tick
        appt.transition_to(AppointmentStatus::Cancelled).unwrap();
        store.save(&appt).await.unwrap();

        let fired = sched.fire_due(start_at(10)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].status, ReminderStatus::Cancelled);
        assert!(dispatcher.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn dispatch_failure_marks_failed_without_retry() {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        dispatcher.fail.store(true, Ordering::SeqCst);
        let sched = scheduler(dispatcher.clone(), store.clone());
        let appt =
            confirmed_with_reminders(&store, vec![ReminderSpec::new(60, Channel::Email)]).await;
        sched.schedule(&appt).await;

        let fired = sched.fire_due(start_at(10)).await;
        assert_eq!(fired[0].status, ReminderStatus::Failed);

        // No retry on the next tick
        dispatcher.fail.store(false, Ordering::SeqCst);
        let fired = sched.fire_due(start_at(11)).await;
        assert!(fired.is_empty());
        assert!(dispatcher.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn terminal_reminders_do_not_accumulate() {
        let store = Arc::new(InMemoryStore::new());
        let sched = scheduler(Arc::new(RecordingDispatcher::default()), store.clone());
        let appt = confirmed_with_reminders(
            &store,
            vec![
                ReminderSpec::new(60, Channel::Email),
                ReminderSpec::new(15, Channel::Sms),
            ],
        )
        .await;
        sched.schedule(&appt).await;

        // Cancellation drops the entries outright
        assert_eq!(sched.cancel_all(appt.id).await, 2);
        {
            let state = sched.inner.lock().await;
            assert!(state.reminders.is_empty());
        }

        // Orphaned heap ids drain on the next tick without dispatching
        let fired = sched.fire_due(start_at(10)).await;
        assert!(fired.is_empty());
        {
            let state = sched.inner.lock().await;
            assert!(state.queue.is_empty());
        }

        // Firing prunes the same way
        let appt = confirmed_with_reminders(&store, vec![ReminderSpec::new(60, Channel::Email)])
            .await;
        sched.schedule(&appt).await;
        let fired = sched.fire_due(start_at(10)).await;
        assert_eq!(fired[0].status, ReminderStatus::Fired);
        let state = sched.inner.lock().await;
        assert!(state.reminders.is_empty());
        assert!(state.queue.is_empty());
    }

    #[tokio::test]
    async fn driver_dispatches_without_manual_ticks() {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sched = Arc::new(scheduler(dispatcher.clone(), store.clone()));

        // Fire time one hour in the real past, so the first tick delivers
        let start = Utc::now() + Duration::hours(1);
        let interval = TimeInterval::new(start, start + Duration::hours(1)).unwrap();
        let mut appt = Appointment::new("alice", interval)
            .with_reminders(vec![ReminderSpec::new(120, Channel::Email)]);
        appt.transition_to(AppointmentStatus::Confirmed).unwrap();
        store.save(&appt).await.unwrap();
        sched.schedule(&appt).await;

        let driver = sched.spawn_driver(StdDuration::from_millis(10));
        for _ in 0..200 {
            if !dispatcher.sent.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        driver.abort();

        assert_eq!(dispatcher.sent.lock().await.len(), 1);
        assert_eq!(sched.scheduled_count(appt.id).await, 0);
    }
}
