use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::ResponsibilityFrequency;

/// A schedulable care task owned by a circle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CareResponsibility {
    pub id: Uuid,
    pub care_circle_id: Uuid,
    #[serde(rename = "type")]
    pub responsibility_type: String,
    pub description: String,
    pub assigned_to: Option<Uuid>,
    pub frequency: ResponsibilityFrequency,
    pub completed: bool,
    pub completed_at: Option<NaiveDateTime>,
    pub completed_by: Option<Uuid>,
    pub completion_notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Advisory assignment produced by the distributor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentSuggestion {
    pub responsibility_id: Uuid,
    pub suggested_member_id: Uuid,
    pub reason: String,
}
