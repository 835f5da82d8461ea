use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{format_ts, parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid, DatabaseError};
use crate::models::enums::CheckInStatus;
use crate::models::CheckIn;

const CHECK_IN_COLUMNS: &str =
    "id, user_id, status, message, created_at, acknowledged, acknowledged_by, acknowledged_at";

type CheckInRow = (
    String,
    String,
    String,
    Option<String>,
    String,
    i32,
    Option<String>,
    Option<String>,
);

fn read_check_in_row(row: &Row<'_>) -> rusqlite::Result<CheckInRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn check_in_from_row(row: CheckInRow) -> Result<CheckIn, DatabaseError> {
    let (id, user_id, status, message, created_at, acknowledged, acknowledged_by, acknowledged_at) =
        row;
    Ok(CheckIn {
        id: parse_uuid(&id)?,
        user_id: parse_uuid(&user_id)?,
        status: CheckInStatus::from_str(&status)?,
        message,
        created_at: parse_ts(&created_at)?,
        acknowledged: acknowledged != 0,
        acknowledged_by: parse_opt_uuid(acknowledged_by)?,
        acknowledged_at: parse_opt_ts(acknowledged_at)?,
    })
}

pub fn insert_check_in(conn: &Connection, check_in: &CheckIn) -> Result<(), DatabaseError> {
    insert_check_in_sql(conn, "INSERT", check_in)?;
    Ok(())
}

/// Insert unless a check-in with the same id already exists.
/// Returns whether a row was written.
pub fn insert_check_in_if_absent(conn: &Connection, check_in: &CheckIn) -> Result<bool, DatabaseError> {
    Ok(insert_check_in_sql(conn, "INSERT OR IGNORE", check_in)? > 0)
}

fn insert_check_in_sql(conn: &Connection, verb: &str, check_in: &CheckIn) -> Result<usize, DatabaseError> {
    let written = conn.execute(
        &format!("{verb} INTO check_ins ({CHECK_IN_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        params![
            check_in.id.to_string(),
            check_in.user_id.to_string(),
            check_in.status.as_str(),
            check_in.message,
            format_ts(&check_in.created_at),
            check_in.acknowledged as i32,
            check_in.acknowledged_by.map(|id| id.to_string()),
            check_in.acknowledged_at.as_ref().map(format_ts),
        ],
    )?;
    Ok(written)
}

pub fn get_check_in(conn: &Connection, id: &Uuid) -> Result<Option<CheckIn>, DatabaseError> {
    let result = conn.query_row(
        &format!("SELECT {CHECK_IN_COLUMNS} FROM check_ins WHERE id = ?1"),
        params![id.to_string()],
        read_check_in_row,
    );

    match result {
        Ok(row) => Ok(Some(check_in_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Most recent check-in of a user, if they ever checked in.
pub fn latest_check_in(conn: &Connection, user_id: &Uuid) -> Result<Option<CheckIn>, DatabaseError> {
    let result = conn.query_row(
        &format!(
            "SELECT {CHECK_IN_COLUMNS} FROM check_ins
             WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ),
        params![user_id.to_string()],
        read_check_in_row,
    );

    match result {
        Ok(row) => Ok(Some(check_in_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_check_ins(conn: &Connection) -> Result<Vec<CheckIn>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHECK_IN_COLUMNS} FROM check_ins ORDER BY created_at, rowid"
    ))?;
    let rows = stmt.query_map([], read_check_in_row)?;

    let mut check_ins = Vec::new();
    for row in rows {
        check_ins.push(check_in_from_row(row?)?);
    }
    Ok(check_ins)
}

/// Record that a circle member has seen a check-in. The first
/// acknowledgement sticks.
pub fn acknowledge_check_in(
    conn: &Connection,
    id: &Uuid,
    acknowledged_by: &Uuid,
    at: &NaiveDateTime,
) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE check_ins SET acknowledged = 1,
            acknowledged_by = COALESCE(acknowledged_by, ?1),
            acknowledged_at = COALESCE(acknowledged_at, ?2)
         WHERE id = ?3",
        params![acknowledged_by.to_string(), format_ts(at), id.to_string()],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "CheckIn".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Replace the acknowledgement of a check-in (used when a replica saw it
/// acknowledged first).
pub fn overwrite_check_in_acknowledgement(
    conn: &Connection,
    id: &Uuid,
    acknowledged_by: Option<&Uuid>,
    at: Option<&NaiveDateTime>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE check_ins SET acknowledged = 1, acknowledged_by = ?1, acknowledged_at = ?2
         WHERE id = ?3",
        params![
            acknowledged_by.map(|id| id.to_string()),
            at.map(format_ts),
            id.to_string()
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn make_check_in(user_id: Uuid, created_at: &str) -> CheckIn {
        CheckIn {
            id: Uuid::new_v4(),
            user_id,
            status: CheckInStatus::Okay,
            message: None,
            created_at: parse_ts(created_at).unwrap(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
        }
    }

    #[test]
    fn latest_picks_newest_entry() {
        let conn = open_memory_database().unwrap();
        let user = Uuid::new_v4();
        let older = make_check_in(user, "2025-01-01 08:00:00.000");
        let newer = make_check_in(user, "2025-01-02 08:00:00.000");
        insert_check_in(&conn, &newer).unwrap();
        insert_check_in(&conn, &older).unwrap();

        let latest = latest_check_in(&conn, &user).unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
    }

    #[test]
    fn latest_is_none_without_entries() {
        let conn = open_memory_database().unwrap();
        insert_check_in(&conn, &make_check_in(Uuid::new_v4(), "2025-01-01 08:00:00.000")).unwrap();
        assert!(latest_check_in(&conn, &Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn insert_if_absent_ignores_duplicates() {
        let conn = open_memory_database().unwrap();
        let entry = make_check_in(Uuid::new_v4(), "2025-01-01 08:00:00.000");
        assert!(insert_check_in_if_absent(&conn, &entry).unwrap());
        assert!(!insert_check_in_if_absent(&conn, &entry).unwrap());
        assert_eq!(list_check_ins(&conn).unwrap().len(), 1);
    }

    #[test]
    fn acknowledge_keeps_first_acknowledger() {
        let conn = open_memory_database().unwrap();
        let entry = make_check_in(Uuid::new_v4(), "2025-01-01 08:00:00.000");
        insert_check_in(&conn, &entry).unwrap();

        let first = Uuid::new_v4();
        let at = parse_ts("2025-01-01 09:00:00.000").unwrap();
        acknowledge_check_in(&conn, &entry.id, &first, &at).unwrap();
        acknowledge_check_in(&conn, &entry.id, &Uuid::new_v4(), &at).unwrap();

        let stored = get_check_in(&conn, &entry.id).unwrap().unwrap();
        assert!(stored.acknowledged);
        assert_eq!(stored.acknowledged_by, Some(first));
        assert_eq!(stored.acknowledged_at, Some(at));
    }
}
