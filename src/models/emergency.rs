use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{EmergencySeverity, ResponseStatus};

/// Resolution text prefix marking a cancelled (false alarm) emergency.
pub const CANCELLED_PREFIX: &str = "Cancelled (false alarm)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in metres.
    pub accuracy: Option<f64>,
    pub address: Option<String>,
}

/// An immediate distress signal raised by or for a circle recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyAlert {
    pub id: Uuid,
    pub user_id: Uuid,
    pub care_circle_id: Uuid,
    pub message: Option<String>,
    pub location: Option<GeoLocation>,
    pub severity: EmergencySeverity,
    pub contact_emergency_services: bool,
    pub triggered_at: NaiveDateTime,
    pub resolved: bool,
    pub resolved_at: Option<NaiveDateTime>,
    pub resolved_by: Option<Uuid>,
    pub resolution: Option<String>,
    /// Append-only, in arrival order.
    pub responses: Vec<EmergencyResponse>,
}

impl EmergencyAlert {
    pub fn is_cancelled(&self) -> bool {
        self.resolution
            .as_deref()
            .is_some_and(|r| r.starts_with(CANCELLED_PREFIX))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyResponse {
    pub id: Uuid,
    pub responder_id: Uuid,
    pub responded_at: NaiveDateTime,
    pub message: Option<String>,
    pub eta_minutes: Option<u32>,
    pub status: ResponseStatus,
}

/// Optional details supplied when triggering an emergency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerOptions {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub location: Option<GeoLocation>,
    #[serde(default)]
    pub severity: Option<EmergencySeverity>,
    #[serde(default)]
    pub contact_emergency_services: bool,
}

/// A member's reply to an emergency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseInput {
    pub status: ResponseStatus,
    #[serde(default)]
    pub eta_minutes: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ResponseInput {
    pub fn new(status: ResponseStatus) -> Self {
        Self {
            status,
            eta_minutes: None,
            message: None,
        }
    }
}
