use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::registry::require_member;
use super::{immediate_transaction, CareError};
use crate::db::repository;
use crate::models::enums::CheckInStatus;
use crate::models::CheckIn;

/// Outcome of recording a check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInReceipt {
    pub check_in: CheckIn,
    /// Missed check-in alerts retired by this check-in.
    pub cleared_alerts: Vec<Uuid>,
}

/// Record a check-in by `user_id`. Whatever the status, it proves the
/// recipient is reachable, so every open missed check-in alert of theirs
/// is retired in the same transaction.
pub fn record_check_in(
    conn: &Connection,
    user_id: Uuid,
    status: CheckInStatus,
    message: Option<String>,
    now: NaiveDateTime,
) -> Result<CheckInReceipt, CareError> {
    let check_in = CheckIn {
        id: Uuid::new_v4(),
        user_id,
        status,
        message: message.filter(|m| !m.trim().is_empty()),
        created_at: now,
        acknowledged: false,
        acknowledged_by: None,
        acknowledged_at: None,
    };

    let tx = immediate_transaction(conn)?;
    repository::insert_check_in(&tx, &check_in)?;
    let cleared_alerts = repository::acknowledge_open_alerts_for_user(&tx, &user_id, &now)?;
    tx.commit()?;

    tracing::info!(
        user_id = %user_id,
        status = status.as_str(),
        cleared = cleared_alerts.len(),
        "check-in recorded"
    );
    Ok(CheckInReceipt {
        check_in,
        cleared_alerts,
    })
}

pub fn latest_check_in(conn: &Connection, user_id: &Uuid) -> Result<Option<CheckIn>, CareError> {
    Ok(repository::latest_check_in(conn, user_id)?)
}

/// A member of the recipient's circle marks a check-in as seen.
pub fn acknowledge_check_in(
    conn: &Connection,
    check_in_id: &Uuid,
    member_id: &Uuid,
    now: NaiveDateTime,
) -> Result<CheckIn, CareError> {
    let check_in = repository::get_check_in(conn, check_in_id)?
        .ok_or_else(|| CareError::NotFound(format!("check-in {check_in_id}")))?;
    let circle = repository::get_circle_by_recipient(conn, &check_in.user_id)?
        .ok_or(CareError::NoCareCircle(check_in.user_id))?;
    require_member(&circle, member_id)?;

    repository::acknowledge_check_in(conn, check_in_id, member_id, &now)?;
    repository::get_check_in(conn, check_in_id)?
        .ok_or_else(|| CareError::NotFound(format!("check-in {check_in_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::test_support::{at, family};
    use crate::care::scan;
    use crate::db::sqlite::open_memory_database;
    use crate::models::CircleConfig;

    #[test]
    fn any_status_clears_every_open_alert_of_the_recipient() {
        let conn = open_memory_database().unwrap();
        let fam = family(&conn, 1, CircleConfig::default());

        let report = scan(&conn, at(30)).unwrap();
        assert_eq!(report.events.len(), 1);
        assert_eq!(
            repository::list_open_missed_alerts_for_user(&conn, &fam.recipient.id)
                .unwrap()
                .len(),
            1
        );

        let receipt = record_check_in(
            &conn,
            fam.recipient.id,
            CheckInStatus::NeedSupport,
            Some("rough night".into()),
            at(31),
        )
        .unwrap();

        assert_eq!(receipt.cleared_alerts.len(), 1);
        assert!(repository::list_open_missed_alerts_for_user(&conn, &fam.recipient.id)
            .unwrap()
            .is_empty());
        let retired = repository::get_missed_alert(&conn, &receipt.cleared_alerts[0])
            .unwrap()
            .unwrap();
        assert!(retired.acknowledged);
        assert_eq!(retired.acknowledged_at, Some(at(31)));
    }

    #[test]
    fn check_in_without_alerts_clears_nothing() {
        let conn = open_memory_database().unwrap();
        let fam = family(&conn, 1, CircleConfig::default());

        let receipt =
            record_check_in(&conn, fam.recipient.id, CheckInStatus::Okay, None, at(1)).unwrap();
        assert!(receipt.cleared_alerts.is_empty());
        assert_eq!(
            latest_check_in(&conn, &fam.recipient.id).unwrap().map(|c| c.id),
            Some(receipt.check_in.id)
        );
    }

    #[test]
    fn blank_message_is_dropped() {
        let conn = open_memory_database().unwrap();
        let fam = family(&conn, 1, CircleConfig::default());
        let receipt = record_check_in(
            &conn,
            fam.recipient.id,
            CheckInStatus::Okay,
            Some("   ".into()),
            at(1),
        )
        .unwrap();
        assert_eq!(receipt.check_in.message, None);
    }

    #[test]
    fn only_members_acknowledge_check_ins() {
        let conn = open_memory_database().unwrap();
        let fam = family(&conn, 1, CircleConfig::default());
        let receipt =
            record_check_in(&conn, fam.recipient.id, CheckInStatus::Okay, None, at(1)).unwrap();

        let outsider = acknowledge_check_in(&conn, &receipt.check_in.id, &Uuid::new_v4(), at(2));
        assert!(matches!(outsider, Err(CareError::NotACircleMember { .. })));

        let seen =
            acknowledge_check_in(&conn, &receipt.check_in.id, &fam.members[0].id, at(2)).unwrap();
        assert!(seen.acknowledged);
        assert_eq!(seen.acknowledged_by, Some(fam.members[0].id));
    }
}
