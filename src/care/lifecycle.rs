use chrono::NaiveDateTime;
use rusqlite::Connection;
use uuid::Uuid;

use super::registry::{require_circle, require_member};
use super::{immediate_transaction, CareError};
use crate::db::repository;
use crate::models::MissedCheckInAlert;

/// A circle member acknowledges a missed check-in alert.
///
/// Acknowledgers accumulate: acknowledging an already retired alert adds
/// the member to `acknowledged_by` if absent and changes nothing else.
pub fn acknowledge_alert(
    conn: &Connection,
    alert_id: &Uuid,
    member_id: &Uuid,
    now: NaiveDateTime,
) -> Result<MissedCheckInAlert, CareError> {
    let tx = immediate_transaction(conn)?;
    let mut alert =
        repository::get_missed_alert(&tx, alert_id)?.ok_or(CareError::AlertNotFound(*alert_id))?;
    let circle = require_circle(&tx, &alert.care_circle_id)?;
    require_member(&circle, member_id)?;

    if alert.acknowledged && alert.acknowledged_by.contains(member_id) {
        return Ok(alert);
    }
    if !alert.acknowledged_by.contains(member_id) {
        alert.acknowledged_by.push(*member_id);
    }
    repository::mark_missed_alert_acknowledged(&tx, alert_id, &alert.acknowledged_by, &now)?;
    let stored =
        repository::get_missed_alert(&tx, alert_id)?.ok_or(CareError::AlertNotFound(*alert_id))?;
    tx.commit()?;

    tracing::info!(
        alert_id = %alert_id,
        circle_id = %circle.id,
        member_id = %member_id,
        "missed check-in alert acknowledged"
    );
    Ok(stored)
}

/// Retire every open missed check-in alert of `user_id`. Returns the ids
/// of the alerts retired.
pub fn clear_alerts_for_user(
    conn: &Connection,
    user_id: &Uuid,
    now: NaiveDateTime,
) -> Result<Vec<Uuid>, CareError> {
    let cleared = repository::acknowledge_open_alerts_for_user(conn, user_id, &now)?;
    if !cleared.is_empty() {
        tracing::info!(user_id = %user_id, cleared = cleared.len(), "missed check-in alerts cleared");
    }
    Ok(cleared)
}

/// Every missed check-in alert of a circle, open and retired, oldest first.
pub fn list_alerts_for_circle(
    conn: &Connection,
    circle_id: &Uuid,
) -> Result<Vec<MissedCheckInAlert>, CareError> {
    Ok(repository::list_missed_alerts_for_circle(conn, circle_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::scan;
    use crate::care::test_support::{at, family};
    use crate::db::sqlite::open_memory_database;
    use crate::models::CircleConfig;

    fn raise_alert(conn: &Connection, user_id: &Uuid) -> MissedCheckInAlert {
        scan(conn, at(27)).unwrap();
        repository::list_open_missed_alerts_for_user(conn, user_id)
            .unwrap()
            .remove(0)
    }

    #[test]
    fn acknowledgers_accumulate() {
        let conn = open_memory_database().unwrap();
        let fam = family(&conn, 2, CircleConfig::default());
        let alert = raise_alert(&conn, &fam.recipient.id);

        let first = acknowledge_alert(&conn, &alert.id, &fam.members[0].id, at(28)).unwrap();
        assert!(first.acknowledged);
        assert_eq!(first.acknowledged_by, vec![fam.members[0].id]);
        assert_eq!(first.acknowledged_at, Some(at(28)));

        let second = acknowledge_alert(&conn, &alert.id, &fam.members[1].id, at(29)).unwrap();
        assert_eq!(
            second.acknowledged_by,
            vec![fam.members[0].id, fam.members[1].id]
        );
        assert_eq!(second.acknowledged_at, Some(at(28)));

        let repeat = acknowledge_alert(&conn, &alert.id, &fam.members[0].id, at(30)).unwrap();
        assert_eq!(repeat, second);
    }

    #[test]
    fn outsiders_and_recipient_cannot_acknowledge() {
        let conn = open_memory_database().unwrap();
        let fam = family(&conn, 1, CircleConfig::default());
        let alert = raise_alert(&conn, &fam.recipient.id);

        for user in [Uuid::new_v4(), fam.recipient.id] {
            assert!(matches!(
                acknowledge_alert(&conn, &alert.id, &user, at(28)),
                Err(CareError::NotACircleMember { .. })
            ));
        }
        let stored = repository::get_missed_alert(&conn, &alert.id).unwrap().unwrap();
        assert!(!stored.acknowledged);
    }

    #[test]
    fn unknown_alert() {
        let conn = open_memory_database().unwrap();
        let fam = family(&conn, 1, CircleConfig::default());
        assert!(matches!(
            acknowledge_alert(&conn, &Uuid::new_v4(), &fam.members[0].id, at(1)),
            Err(CareError::AlertNotFound(_))
        ));
    }

    #[test]
    fn clear_retires_open_alerts_only() {
        let conn = open_memory_database().unwrap();
        let fam = family(&conn, 1, CircleConfig::default());
        let alert = raise_alert(&conn, &fam.recipient.id);

        let cleared = clear_alerts_for_user(&conn, &fam.recipient.id, at(28)).unwrap();
        assert_eq!(cleared, vec![alert.id]);
        assert!(clear_alerts_for_user(&conn, &fam.recipient.id, at(29))
            .unwrap()
            .is_empty());
        assert_eq!(list_alerts_for_circle(&conn, &fam.circle.id).unwrap().len(), 1);
    }
}
