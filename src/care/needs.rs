use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::registry::require_circle;
use super::CareError;
use crate::db::repository;
use crate::models::enums::{NeedPriority, NeedStatus};
use crate::models::CareNeed;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNeed {
    #[serde(rename = "type")]
    pub need_type: String,
    pub description: String,
    #[serde(default)]
    pub priority: Option<NeedPriority>,
}

/// Record help the recipient needs. New needs start `unmet`.
pub fn add_need(
    conn: &Connection,
    circle_id: &Uuid,
    input: NewNeed,
    now: NaiveDateTime,
) -> Result<CareNeed, CareError> {
    let need_type = input.need_type.trim();
    let description = input.description.trim();
    if need_type.is_empty() || description.is_empty() {
        return Err(CareError::Validation("need requires a type and a description".into()));
    }
    let circle = require_circle(conn, circle_id)?;

    let need = CareNeed {
        id: Uuid::new_v4(),
        care_circle_id: circle.id,
        need_type: need_type.to_string(),
        description: description.to_string(),
        priority: input.priority.unwrap_or(NeedPriority::Medium),
        status: NeedStatus::Unmet,
        created_at: now,
        updated_at: now,
    };
    repository::insert_need(conn, &need)?;

    tracing::info!(circle_id = %circle.id, need_id = %need.id, priority = need.priority.as_str(), "need added");
    Ok(need)
}

pub fn update_need_status(
    conn: &Connection,
    need_id: &Uuid,
    status: NeedStatus,
    now: NaiveDateTime,
) -> Result<CareNeed, CareError> {
    if repository::get_need(conn, need_id)?.is_none() {
        return Err(CareError::NotFound(format!("need {need_id}")));
    }
    repository::set_need_status(conn, need_id, status, &now)?;
    tracing::info!(need_id = %need_id, status = status.as_str(), "need status updated");

    repository::get_need(conn, need_id)?.ok_or_else(|| CareError::NotFound(format!("need {need_id}")))
}

/// Needs of a circle, most pressing first.
pub fn list_needs(conn: &Connection, circle_id: &Uuid) -> Result<Vec<CareNeed>, CareError> {
    Ok(repository::list_needs_for_circle(conn, circle_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::test_support::{at, family};
    use crate::db::sqlite::open_memory_database;
    use crate::models::CircleConfig;

    fn new_need(description: &str, priority: Option<NeedPriority>) -> NewNeed {
        NewNeed {
            need_type: "transport".into(),
            description: description.into(),
            priority,
        }
    }

    #[test]
    fn new_need_is_unmet_with_medium_priority() {
        let conn = open_memory_database().unwrap();
        let fam = family(&conn, 1, CircleConfig::default());

        let need = add_need(&conn, &fam.circle.id, new_need("ride to clinic", None), at(1)).unwrap();
        assert_eq!(need.status, NeedStatus::Unmet);
        assert_eq!(need.priority, NeedPriority::Medium);
        assert_eq!(list_needs(&conn, &fam.circle.id).unwrap(), vec![need]);
    }

    #[test]
    fn status_transitions_persist() {
        let conn = open_memory_database().unwrap();
        let fam = family(&conn, 1, CircleConfig::default());
        let need = add_need(&conn, &fam.circle.id, new_need("meals", Some(NeedPriority::High)), at(1)).unwrap();

        let in_progress = update_need_status(&conn, &need.id, NeedStatus::InProgress, at(2)).unwrap();
        assert_eq!(in_progress.status, NeedStatus::InProgress);
        assert_eq!(in_progress.updated_at, at(2));

        let met = update_need_status(&conn, &need.id, NeedStatus::Met, at(3)).unwrap();
        assert_eq!(met.status, NeedStatus::Met);
        assert_eq!(met.created_at, at(1));
    }

    #[test]
    fn unknown_need_and_circle() {
        let conn = open_memory_database().unwrap();
        assert!(matches!(
            update_need_status(&conn, &Uuid::new_v4(), NeedStatus::Met, at(1)),
            Err(CareError::NotFound(_))
        ));
        assert!(matches!(
            add_need(&conn, &Uuid::new_v4(), new_need("meals", None), at(1)),
            Err(CareError::NotFound(_))
        ));
    }
}
