use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::CheckInStatus;

/// One self-reported wellness entry. Entries are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: CheckInStatus,
    pub message: Option<String>,
    pub created_at: NaiveDateTime,
    pub acknowledged: bool,
    pub acknowledged_by: Option<Uuid>,
    pub acknowledged_at: Option<NaiveDateTime>,
}
