use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{format_ts, parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid, DatabaseError};
use crate::models::enums::ResponsibilityFrequency;
use crate::models::CareResponsibility;

const RESPONSIBILITY_COLUMNS: &str = "id, care_circle_id, type, description, assigned_to, frequency,
     completed, completed_at, completed_by, completion_notes, created_at, updated_at";

// Internal row type for CareResponsibility mapping
struct ResponsibilityRow {
    id: String,
    care_circle_id: String,
    responsibility_type: String,
    description: String,
    assigned_to: Option<String>,
    frequency: String,
    completed: i32,
    completed_at: Option<String>,
    completed_by: Option<String>,
    completion_notes: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_responsibility_row(row: &Row<'_>) -> rusqlite::Result<ResponsibilityRow> {
    Ok(ResponsibilityRow {
        id: row.get(0)?,
        care_circle_id: row.get(1)?,
        responsibility_type: row.get(2)?,
        description: row.get(3)?,
        assigned_to: row.get(4)?,
        frequency: row.get(5)?,
        completed: row.get(6)?,
        completed_at: row.get(7)?,
        completed_by: row.get(8)?,
        completion_notes: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn responsibility_from_row(row: ResponsibilityRow) -> Result<CareResponsibility, DatabaseError> {
    Ok(CareResponsibility {
        id: parse_uuid(&row.id)?,
        care_circle_id: parse_uuid(&row.care_circle_id)?,
        responsibility_type: row.responsibility_type,
        description: row.description,
        assigned_to: parse_opt_uuid(row.assigned_to)?,
        frequency: ResponsibilityFrequency::from_str(&row.frequency)?,
        completed: row.completed != 0,
        completed_at: parse_opt_ts(row.completed_at)?,
        completed_by: parse_opt_uuid(row.completed_by)?,
        completion_notes: row.completion_notes,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

fn responsibility_sql(verb: &str) -> String {
    format!(
        "{verb} INTO care_responsibilities ({RESPONSIBILITY_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
    )
}

fn write_responsibility(
    conn: &Connection,
    sql: &str,
    item: &CareResponsibility,
) -> Result<(), DatabaseError> {
    conn.execute(
        sql,
        params![
            item.id.to_string(),
            item.care_circle_id.to_string(),
            item.responsibility_type,
            item.description,
            item.assigned_to.map(|id| id.to_string()),
            item.frequency.as_str(),
            item.completed as i32,
            item.completed_at.as_ref().map(format_ts),
            item.completed_by.map(|id| id.to_string()),
            item.completion_notes,
            format_ts(&item.created_at),
            format_ts(&item.updated_at),
        ],
    )?;
    Ok(())
}

pub fn insert_responsibility(conn: &Connection, item: &CareResponsibility) -> Result<(), DatabaseError> {
    write_responsibility(conn, &responsibility_sql("INSERT"), item)
}

/// Insert or overwrite by id (used when applying a replica's copy).
pub fn put_responsibility(conn: &Connection, item: &CareResponsibility) -> Result<(), DatabaseError> {
    write_responsibility(conn, &responsibility_sql("INSERT OR REPLACE"), item)
}

pub fn get_responsibility(conn: &Connection, id: &Uuid) -> Result<Option<CareResponsibility>, DatabaseError> {
    let result = conn.query_row(
        &format!("SELECT {RESPONSIBILITY_COLUMNS} FROM care_responsibilities WHERE id = ?1"),
        params![id.to_string()],
        read_responsibility_row,
    );

    match result {
        Ok(row) => Ok(Some(responsibility_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn query_responsibilities(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<CareResponsibility>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, read_responsibility_row)?;

    let mut items = Vec::new();
    for row in rows {
        items.push(responsibility_from_row(row?)?);
    }
    Ok(items)
}

/// Responsibilities of a circle in creation order.
pub fn list_responsibilities_for_circle(
    conn: &Connection,
    care_circle_id: &Uuid,
) -> Result<Vec<CareResponsibility>, DatabaseError> {
    query_responsibilities(
        conn,
        &format!(
            "SELECT {RESPONSIBILITY_COLUMNS} FROM care_responsibilities
             WHERE care_circle_id = ?1 ORDER BY created_at, rowid"
        ),
        params![care_circle_id.to_string()],
    )
}

pub fn list_responsibilities(conn: &Connection) -> Result<Vec<CareResponsibility>, DatabaseError> {
    query_responsibilities(
        conn,
        &format!("SELECT {RESPONSIBILITY_COLUMNS} FROM care_responsibilities ORDER BY created_at, rowid"),
        [],
    )
}

pub fn set_responsibility_assignee(
    conn: &Connection,
    id: &Uuid,
    assigned_to: Option<&Uuid>,
    at: &NaiveDateTime,
) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE care_responsibilities SET assigned_to = ?1, updated_at = ?2 WHERE id = ?3",
        params![assigned_to.map(|id| id.to_string()), format_ts(at), id.to_string()],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "CareResponsibility".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn mark_responsibility_completed(
    conn: &Connection,
    id: &Uuid,
    completed_by: &Uuid,
    notes: Option<&str>,
    at: &NaiveDateTime,
) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE care_responsibilities SET completed = 1, completed_at = ?1, completed_by = ?2,
            completion_notes = ?3, updated_at = ?1
         WHERE id = ?4",
        params![format_ts(at), completed_by.to_string(), notes, id.to_string()],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "CareResponsibility".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}
