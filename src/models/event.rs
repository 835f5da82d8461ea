use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::alert::MissedCheckInAlert;
use super::emergency::EmergencyAlert;
use super::enums::{AlertEventKind, AlertLevel};

/// What the delivery layer is told about alert state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_id: Uuid,
    pub kind: AlertEventKind,
    pub recipient_id: Uuid,
    pub care_circle_id: Uuid,
    pub severity: AlertLevel,
    pub escalated: bool,
    /// Only set for missed check-in events.
    pub consecutive_missed: Option<u32>,
    pub occurred_at: NaiveDateTime,
}

impl AlertEvent {
    pub fn for_missed_check_in(
        alert: &MissedCheckInAlert,
        kind: AlertEventKind,
        occurred_at: NaiveDateTime,
    ) -> Self {
        Self {
            alert_id: alert.id,
            kind,
            recipient_id: alert.user_id,
            care_circle_id: alert.care_circle_id,
            severity: if alert.escalated {
                AlertLevel::Urgent
            } else {
                AlertLevel::Warning
            },
            escalated: alert.escalated,
            consecutive_missed: Some(alert.consecutive_missed),
            occurred_at,
        }
    }

    pub fn for_emergency(
        alert: &EmergencyAlert,
        kind: AlertEventKind,
        occurred_at: NaiveDateTime,
    ) -> Self {
        let severity = match kind {
            AlertEventKind::EmergencyResolved | AlertEventKind::EmergencyCancelled => AlertLevel::Info,
            _ => alert.severity.into(),
        };
        Self {
            alert_id: alert.id,
            kind,
            recipient_id: alert.user_id,
            care_circle_id: alert.care_circle_id,
            severity,
            escalated: false,
            consecutive_missed: None,
            occurred_at,
        }
    }
}
