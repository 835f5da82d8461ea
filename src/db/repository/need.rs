use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::{format_ts, parse_ts, parse_uuid, DatabaseError};
use crate::models::enums::{NeedPriority, NeedStatus};
use crate::models::CareNeed;

const NEED_COLUMNS: &str =
    "id, care_circle_id, type, description, priority, status, created_at, updated_at";

type NeedRow = (String, String, String, String, String, String, String, String);

fn need_from_row(row: NeedRow) -> Result<CareNeed, DatabaseError> {
    let (id, care_circle_id, need_type, description, priority, status, created_at, updated_at) = row;
    Ok(CareNeed {
        id: parse_uuid(&id)?,
        care_circle_id: parse_uuid(&care_circle_id)?,
        need_type,
        description,
        priority: NeedPriority::from_str(&priority)?,
        status: NeedStatus::from_str(&status)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn write_need(conn: &Connection, verb: &str, need: &CareNeed) -> Result<(), DatabaseError> {
    conn.execute(
        &format!("{verb} INTO care_needs ({NEED_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        params![
            need.id.to_string(),
            need.care_circle_id.to_string(),
            need.need_type,
            need.description,
            need.priority.as_str(),
            need.status.as_str(),
            format_ts(&need.created_at),
            format_ts(&need.updated_at),
        ],
    )?;
    Ok(())
}

pub fn insert_need(conn: &Connection, need: &CareNeed) -> Result<(), DatabaseError> {
    write_need(conn, "INSERT", need)
}

/// Insert or overwrite by id (used when applying a replica's copy).
pub fn put_need(conn: &Connection, need: &CareNeed) -> Result<(), DatabaseError> {
    write_need(conn, "INSERT OR REPLACE", need)
}

pub fn get_need(conn: &Connection, id: &Uuid) -> Result<Option<CareNeed>, DatabaseError> {
    let result = conn.query_row(
        &format!("SELECT {NEED_COLUMNS} FROM care_needs WHERE id = ?1"),
        params![id.to_string()],
        |row| -> rusqlite::Result<NeedRow> {
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
        },
    );

    match result {
        Ok(row) => Ok(Some(need_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn query_needs(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<CareNeed>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| -> rusqlite::Result<NeedRow> {
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
    })?;

    let mut needs = Vec::new();
    for row in rows {
        needs.push(need_from_row(row?)?);
    }
    Ok(needs)
}

/// Needs of a circle, most pressing first, then oldest first.
pub fn list_needs_for_circle(conn: &Connection, care_circle_id: &Uuid) -> Result<Vec<CareNeed>, DatabaseError> {
    query_needs(
        conn,
        &format!(
            "SELECT {NEED_COLUMNS} FROM care_needs WHERE care_circle_id = ?1
             ORDER BY CASE priority
                WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END,
                created_at, rowid"
        ),
        params![care_circle_id.to_string()],
    )
}

pub fn list_needs(conn: &Connection) -> Result<Vec<CareNeed>, DatabaseError> {
    query_needs(
        conn,
        &format!("SELECT {NEED_COLUMNS} FROM care_needs ORDER BY created_at, rowid"),
        [],
    )
}

pub fn set_need_status(
    conn: &Connection,
    id: &Uuid,
    status: NeedStatus,
    at: &NaiveDateTime,
) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE care_needs SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), format_ts(at), id.to_string()],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "CareNeed".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}
