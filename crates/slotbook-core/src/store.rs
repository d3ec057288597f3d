//! Durable appointment store interface.
//!
//! The engine never assumes a storage technology; it requires
//! read-after-write consistency within a single contention domain. An
//! in-memory implementation ships here for tests and simple hosts.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::appointment::{Appointment, AppointmentStatus};
use crate::error::StoreError;
use crate::interval::TimeInterval;

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Insert or replace an appointment.
    async fn save(&self, appointment: &Appointment) -> Result<(), StoreError>;

    async fn load(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// Non-cancelled appointments overlapping `range`, for one owner or
    /// (with `owner = None`) across all owners, ordered by start time.
    async fn list_active(
        &self,
        owner: Option<&str>,
        range: &TimeInterval,
    ) -> Result<Vec<Appointment>, StoreError>;
}

/// HashMap-backed store. Suitable for tests and single-process hosts.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryStore {
    async fn save(&self, appointment: &Appointment) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.inner.read().await.get(&id).cloned())
    }

    async fn list_active(
        &self,
        owner: Option<&str>,
        range: &TimeInterval,
    ) -> Result<Vec<Appointment>, StoreError> {
        let guard = self.inner.read().await;
        let mut active: Vec<Appointment> = guard
            .values()
            .filter(|a| a.status != AppointmentStatus::Cancelled)
            .filter(|a| owner.map_or(true, |o| a.owner == o))
            .filter(|a| a.interval.overlaps(range))
            .cloned()
            .collect();
        active.sort_by_key(|a| a.interval.start());
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn iv(day: u32, h1: u32, h2: u32) -> TimeInterval {
        TimeInterval::new(
            Utc.with_ymd_and_hms(2030, 1, day, h1, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, day, h2, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn save_then_load_roundtrip() {
        let store = InMemoryStore::new();
        let appt = Appointment::new("alice", iv(7, 10, 11));
        store.save(&appt).await.unwrap();

        let loaded = store.load(appt.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, appt.id);
        assert_eq!(loaded.version, appt.version);
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_active_filters_owner_range_and_status() {
        let store = InMemoryStore::new();
        let mut a = Appointment::new("alice", iv(7, 10, 11));
        a.transition_to(AppointmentStatus::Confirmed).unwrap();
        let b = Appointment::new("bob", iv(7, 10, 11));
        let mut cancelled = Appointment::new("alice", iv(7, 12, 13));
        cancelled
            .transition_to(AppointmentStatus::Cancelled)
            .unwrap();
        let other_day = Appointment::new("alice", iv(9, 10, 11));

        for appt in [&a, &b, &cancelled, &other_day] {
            store.save(appt).await.unwrap();
        }

        let day = iv(7, 0, 23);
        let alice = store.list_active(Some("alice"), &day).await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].id, a.id);

        let everyone = store.list_active(None, &day).await.unwrap();
        assert_eq!(everyone.len(), 2);
    }
}
