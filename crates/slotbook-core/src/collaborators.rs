//! External collaborator interfaces.
//!
//! Calendar sync and notification dispatch are best-effort by contract:
//! their failures never roll back a committed appointment. The engine
//! wraps every call in a timeout and downgrades failures to warnings on an
//! otherwise successful outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::appointment::Appointment;
use crate::error::CollaboratorError;

/// Delivery channel for reminders and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Push,
}

/// Pushes confirmed/cancelled appointments to an external calendar.
#[async_trait]
pub trait CalendarSync: Send + Sync {
    async fn push(&self, appointment: &Appointment) -> Result<(), CollaboratorError>;
}

/// Delivers reminder/notification payloads. Retry policy, if any, lives on
/// the dispatcher side, not in the engine.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, channel: Channel, payload: Value) -> Result<(), CollaboratorError>;
}

/// A non-fatal collaborator failure attached to a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorWarning {
    pub service: String,
    pub message: String,
}

impl From<CollaboratorError> for CollaboratorWarning {
    fn from(err: CollaboratorError) -> Self {
        Self {
            service: err.service,
            message: err.message,
        }
    }
}

/// No-op calendar sync for hosts without an external calendar.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCalendarSync;

#[async_trait]
impl CalendarSync for NullCalendarSync {
    async fn push(&self, _appointment: &Appointment) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// No-op dispatcher; reminders fire into the void.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDispatcher;

#[async_trait]
impl NotificationDispatcher for NullDispatcher {
    async fn dispatch(&self, _channel: Channel, _payload: Value) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
