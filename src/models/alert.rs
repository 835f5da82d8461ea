use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raised by the monitor when a recipient is overdue for a check-in.
///
/// At most one unacknowledged alert exists per (user_id, care_circle_id).
/// Once acknowledged it is retired for good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedCheckInAlert {
    pub id: Uuid,
    pub user_id: Uuid,
    pub care_circle_id: Uuid,
    pub consecutive_missed: u32,
    pub last_check_in_at: Option<NaiveDateTime>,
    pub alert_sent_at: NaiveDateTime,
    pub escalated: bool,
    pub acknowledged: bool,
    /// Ordered, duplicate-free.
    pub acknowledged_by: Vec<Uuid>,
    pub acknowledged_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}
