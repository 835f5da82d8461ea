use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{NeedPriority, NeedStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CareNeed {
    pub id: Uuid,
    pub care_circle_id: Uuid,
    #[serde(rename = "type")]
    pub need_type: String,
    pub description: String,
    pub priority: NeedPriority,
    pub status: NeedStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
