use std::str::FromStr;

use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{format_ts, parse_ts, parse_uuid, parse_uuid_list, uuid_list_json, DatabaseError};
use crate::models::enums::CheckInFrequency;
use crate::models::{CareCircle, CircleConfig};

const CIRCLE_COLUMNS: &str = "id, recipient_id, members, check_in_enabled, check_in_frequency,
     missed_check_in_threshold, escalation_threshold, preferred_check_in_time,
     created_at, updated_at";

// Internal row type for CareCircle mapping
struct CircleRow {
    id: String,
    recipient_id: String,
    members: String,
    check_in_enabled: i32,
    check_in_frequency: String,
    missed_check_in_threshold: i64,
    escalation_threshold: i64,
    preferred_check_in_time: Option<i64>,
    created_at: String,
    updated_at: String,
}

fn read_circle_row(row: &Row<'_>) -> rusqlite::Result<CircleRow> {
    Ok(CircleRow {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        members: row.get(2)?,
        check_in_enabled: row.get(3)?,
        check_in_frequency: row.get(4)?,
        missed_check_in_threshold: row.get(5)?,
        escalation_threshold: row.get(6)?,
        preferred_check_in_time: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn circle_from_row(row: CircleRow) -> Result<CareCircle, DatabaseError> {
    Ok(CareCircle {
        id: parse_uuid(&row.id)?,
        recipient_id: parse_uuid(&row.recipient_id)?,
        members: parse_uuid_list(&row.members)?,
        config: CircleConfig {
            check_in_enabled: row.check_in_enabled != 0,
            check_in_frequency: CheckInFrequency::from_str(&row.check_in_frequency)?,
            missed_check_in_threshold: row.missed_check_in_threshold.max(0) as u32,
            escalation_threshold: row.escalation_threshold.max(1) as u32,
            preferred_check_in_time: row.preferred_check_in_time.map(|m| m as u16),
        },
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

pub fn insert_circle(conn: &Connection, circle: &CareCircle) -> Result<(), DatabaseError> {
    conn.execute(
        &format!("INSERT INTO care_circles ({CIRCLE_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        params![
            circle.id.to_string(),
            circle.recipient_id.to_string(),
            uuid_list_json(&circle.members),
            circle.config.check_in_enabled as i32,
            circle.config.check_in_frequency.as_str(),
            circle.config.missed_check_in_threshold,
            circle.config.escalation_threshold,
            circle.config.preferred_check_in_time,
            format_ts(&circle.created_at),
            format_ts(&circle.updated_at),
        ],
    )?;
    Ok(())
}

/// Persist members, configuration and `updated_at` of an existing circle.
pub fn update_circle(conn: &Connection, circle: &CareCircle) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE care_circles SET members = ?1, check_in_enabled = ?2, check_in_frequency = ?3,
         missed_check_in_threshold = ?4, escalation_threshold = ?5,
         preferred_check_in_time = ?6, updated_at = ?7
         WHERE id = ?8",
        params![
            uuid_list_json(&circle.members),
            circle.config.check_in_enabled as i32,
            circle.config.check_in_frequency.as_str(),
            circle.config.missed_check_in_threshold,
            circle.config.escalation_threshold,
            circle.config.preferred_check_in_time,
            format_ts(&circle.updated_at),
            circle.id.to_string(),
        ],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "CareCircle".into(),
            id: circle.id.to_string(),
        });
    }
    Ok(())
}

/// Insert or overwrite a circle by id without cascading deletes
/// (used when applying a replica's copy).
pub fn put_circle(conn: &Connection, circle: &CareCircle) -> Result<(), DatabaseError> {
    conn.execute(
        &format!("INSERT INTO care_circles ({CIRCLE_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            recipient_id = excluded.recipient_id,
            members = excluded.members,
            check_in_enabled = excluded.check_in_enabled,
            check_in_frequency = excluded.check_in_frequency,
            missed_check_in_threshold = excluded.missed_check_in_threshold,
            escalation_threshold = excluded.escalation_threshold,
            preferred_check_in_time = excluded.preferred_check_in_time,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at"),
        params![
            circle.id.to_string(),
            circle.recipient_id.to_string(),
            uuid_list_json(&circle.members),
            circle.config.check_in_enabled as i32,
            circle.config.check_in_frequency.as_str(),
            circle.config.missed_check_in_threshold,
            circle.config.escalation_threshold,
            circle.config.preferred_check_in_time,
            format_ts(&circle.created_at),
            format_ts(&circle.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_circle(conn: &Connection, id: &Uuid) -> Result<Option<CareCircle>, DatabaseError> {
    let result = conn.query_row(
        &format!("SELECT {CIRCLE_COLUMNS} FROM care_circles WHERE id = ?1"),
        params![id.to_string()],
        read_circle_row,
    );

    match result {
        Ok(row) => Ok(Some(circle_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_circle_by_recipient(
    conn: &Connection,
    recipient_id: &Uuid,
) -> Result<Option<CareCircle>, DatabaseError> {
    let result = conn.query_row(
        &format!("SELECT {CIRCLE_COLUMNS} FROM care_circles WHERE recipient_id = ?1"),
        params![recipient_id.to_string()],
        read_circle_row,
    );

    match result {
        Ok(row) => Ok(Some(circle_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn query_circles(conn: &Connection, sql: &str) -> Result<Vec<CareCircle>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], read_circle_row)?;

    let mut circles = Vec::new();
    for row in rows {
        circles.push(circle_from_row(row?)?);
    }
    Ok(circles)
}

pub fn list_circles(conn: &Connection) -> Result<Vec<CareCircle>, DatabaseError> {
    query_circles(
        conn,
        &format!("SELECT {CIRCLE_COLUMNS} FROM care_circles ORDER BY created_at, id"),
    )
}

/// Circles with check-in monitoring switched on.
pub fn list_monitored_circles(conn: &Connection) -> Result<Vec<CareCircle>, DatabaseError> {
    query_circles(
        conn,
        &format!(
            "SELECT {CIRCLE_COLUMNS} FROM care_circles
             WHERE check_in_enabled = 1 ORDER BY created_at, id"
        ),
    )
}

/// Delete a circle. Alerts, emergencies, responsibilities and needs go
/// with it through `ON DELETE CASCADE`.
pub fn delete_circle(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM care_circles WHERE id = ?1",
        params![id.to_string()],
    )?;
    if deleted == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "CareCircle".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn make_circle(members: Vec<Uuid>) -> CareCircle {
        let now = parse_ts("2025-01-10 09:00:00.000").unwrap();
        CareCircle {
            id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            members,
            config: CircleConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn insert_and_get_round_trip() {
        let conn = open_memory_database().unwrap();
        let mut circle = make_circle(vec![Uuid::new_v4(), Uuid::new_v4()]);
        circle.config.preferred_check_in_time = Some(480);
        insert_circle(&conn, &circle).unwrap();

        assert_eq!(get_circle(&conn, &circle.id).unwrap(), Some(circle.clone()));
        assert_eq!(
            get_circle_by_recipient(&conn, &circle.recipient_id).unwrap(),
            Some(circle)
        );
    }

    #[test]
    fn recipient_is_unique() {
        let conn = open_memory_database().unwrap();
        let circle = make_circle(vec![Uuid::new_v4()]);
        insert_circle(&conn, &circle).unwrap();

        let mut second = make_circle(vec![Uuid::new_v4()]);
        second.recipient_id = circle.recipient_id;
        assert!(insert_circle(&conn, &second).is_err());
    }

    #[test]
    fn update_persists_members_and_config() {
        let conn = open_memory_database().unwrap();
        let mut circle = make_circle(vec![Uuid::new_v4()]);
        insert_circle(&conn, &circle).unwrap();

        circle.members.push(Uuid::new_v4());
        circle.config.check_in_frequency = CheckInFrequency::Weekly;
        update_circle(&conn, &circle).unwrap();

        let stored = get_circle(&conn, &circle.id).unwrap().unwrap();
        assert_eq!(stored.members.len(), 2);
        assert_eq!(stored.config.check_in_frequency, CheckInFrequency::Weekly);
    }

    #[test]
    fn update_missing_circle_is_not_found() {
        let conn = open_memory_database().unwrap();
        let circle = make_circle(vec![Uuid::new_v4()]);
        assert!(matches!(
            update_circle(&conn, &circle),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn monitored_list_skips_disabled() {
        let conn = open_memory_database().unwrap();
        let on = make_circle(vec![Uuid::new_v4()]);
        let mut off = make_circle(vec![Uuid::new_v4()]);
        off.config.check_in_enabled = false;
        insert_circle(&conn, &on).unwrap();
        insert_circle(&conn, &off).unwrap();

        let monitored = list_monitored_circles(&conn).unwrap();
        assert_eq!(monitored.len(), 1);
        assert_eq!(monitored[0].id, on.id);
        assert_eq!(list_circles(&conn).unwrap().len(), 2);
    }

    #[test]
    fn delete_missing_circle_is_not_found() {
        let conn = open_memory_database().unwrap();
        assert!(matches!(
            delete_circle(&conn, &Uuid::new_v4()),
            Err(DatabaseError::NotFound { .. })
        ));
    }
}
