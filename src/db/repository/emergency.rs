use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{format_ts, parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid, DatabaseError};
use crate::models::enums::{EmergencySeverity, ResponseStatus};
use crate::models::{EmergencyAlert, EmergencyResponse, GeoLocation};

const EMERGENCY_COLUMNS: &str = "id, user_id, care_circle_id, message, latitude, longitude,
     location_accuracy, location_address, severity, contact_emergency_services, triggered_at,
     resolved, resolved_at, resolved_by, resolution";

// Internal row type for EmergencyAlert mapping
struct EmergencyRow {
    id: String,
    user_id: String,
    care_circle_id: String,
    message: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    location_accuracy: Option<f64>,
    location_address: Option<String>,
    severity: String,
    contact_emergency_services: i32,
    triggered_at: String,
    resolved: i32,
    resolved_at: Option<String>,
    resolved_by: Option<String>,
    resolution: Option<String>,
}

fn read_emergency_row(row: &Row<'_>) -> rusqlite::Result<EmergencyRow> {
    Ok(EmergencyRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        care_circle_id: row.get(2)?,
        message: row.get(3)?,
        latitude: row.get(4)?,
        longitude: row.get(5)?,
        location_accuracy: row.get(6)?,
        location_address: row.get(7)?,
        severity: row.get(8)?,
        contact_emergency_services: row.get(9)?,
        triggered_at: row.get(10)?,
        resolved: row.get(11)?,
        resolved_at: row.get(12)?,
        resolved_by: row.get(13)?,
        resolution: row.get(14)?,
    })
}

fn emergency_from_row(
    row: EmergencyRow,
    responses: Vec<EmergencyResponse>,
) -> Result<EmergencyAlert, DatabaseError> {
    let location = match (row.latitude, row.longitude) {
        (Some(latitude), Some(longitude)) => Some(GeoLocation {
            latitude,
            longitude,
            accuracy: row.location_accuracy,
            address: row.location_address,
        }),
        _ => None,
    };

    Ok(EmergencyAlert {
        id: parse_uuid(&row.id)?,
        user_id: parse_uuid(&row.user_id)?,
        care_circle_id: parse_uuid(&row.care_circle_id)?,
        message: row.message,
        location,
        severity: EmergencySeverity::from_str(&row.severity)?,
        contact_emergency_services: row.contact_emergency_services != 0,
        triggered_at: parse_ts(&row.triggered_at)?,
        resolved: row.resolved != 0,
        resolved_at: parse_opt_ts(row.resolved_at)?,
        resolved_by: parse_opt_uuid(row.resolved_by)?,
        resolution: row.resolution,
        responses,
    })
}

/// Insert the alert's own fields. Responses are stored separately.
pub fn insert_emergency(conn: &Connection, alert: &EmergencyAlert) -> Result<(), DatabaseError> {
    let location = alert.location.as_ref();
    conn.execute(
        &format!("INSERT INTO emergency_alerts ({EMERGENCY_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"),
        params![
            alert.id.to_string(),
            alert.user_id.to_string(),
            alert.care_circle_id.to_string(),
            alert.message,
            location.map(|l| l.latitude),
            location.map(|l| l.longitude),
            location.and_then(|l| l.accuracy),
            location.and_then(|l| l.address.clone()),
            alert.severity.as_str(),
            alert.contact_emergency_services as i32,
            format_ts(&alert.triggered_at),
            alert.resolved as i32,
            alert.resolved_at.as_ref().map(format_ts),
            alert.resolved_by.map(|id| id.to_string()),
            alert.resolution,
        ],
    )?;
    Ok(())
}

pub fn get_emergency(conn: &Connection, id: &Uuid) -> Result<Option<EmergencyAlert>, DatabaseError> {
    let result = conn.query_row(
        &format!("SELECT {EMERGENCY_COLUMNS} FROM emergency_alerts WHERE id = ?1"),
        params![id.to_string()],
        read_emergency_row,
    );

    match result {
        Ok(row) => {
            let responses = list_responses(conn, id)?;
            Ok(Some(emergency_from_row(row, responses)?))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn query_emergencies(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<EmergencyAlert>, DatabaseError> {
    let rows: Vec<EmergencyRow> = {
        let mut stmt = conn.prepare(sql)?;
        let mapped = stmt.query_map(params, read_emergency_row)?;
        let collected = mapped.collect::<Result<Vec<_>, _>>()?;
        collected
    };

    let mut alerts = Vec::with_capacity(rows.len());
    for row in rows {
        let id = parse_uuid(&row.id)?;
        let responses = list_responses(conn, &id)?;
        alerts.push(emergency_from_row(row, responses)?);
    }
    Ok(alerts)
}

pub fn list_emergencies(conn: &Connection) -> Result<Vec<EmergencyAlert>, DatabaseError> {
    query_emergencies(
        conn,
        &format!("SELECT {EMERGENCY_COLUMNS} FROM emergency_alerts ORDER BY triggered_at, id"),
        [],
    )
}

/// Unresolved emergencies of a circle, oldest first.
pub fn list_active_emergencies_for_circle(
    conn: &Connection,
    care_circle_id: &Uuid,
) -> Result<Vec<EmergencyAlert>, DatabaseError> {
    query_emergencies(
        conn,
        &format!(
            "SELECT {EMERGENCY_COLUMNS} FROM emergency_alerts
             WHERE care_circle_id = ?1 AND resolved = 0 ORDER BY triggered_at, id"
        ),
        params![care_circle_id.to_string()],
    )
}

/// Whether the alert is already resolved; `None` when it does not exist.
pub fn emergency_resolved_state(conn: &Connection, id: &Uuid) -> Result<Option<bool>, DatabaseError> {
    let result = conn.query_row(
        "SELECT resolved FROM emergency_alerts WHERE id = ?1",
        params![id.to_string()],
        |row| row.get::<_, i32>(0),
    );
    match result {
        Ok(resolved) => Ok(Some(resolved != 0)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Resolve an alert if it is still open. Returns `false` when it was
/// already resolved (resolution only ever moves false → true).
pub fn mark_emergency_resolved(
    conn: &Connection,
    id: &Uuid,
    resolved_at: &NaiveDateTime,
    resolved_by: Option<&Uuid>,
    resolution: Option<&str>,
) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE emergency_alerts SET resolved = 1, resolved_at = ?1, resolved_by = ?2, resolution = ?3
         WHERE id = ?4 AND resolved = 0",
        params![
            format_ts(resolved_at),
            resolved_by.map(|id| id.to_string()),
            resolution,
            id.to_string(),
        ],
    )?;
    Ok(updated > 0)
}

/// Overwrite the resolution metadata of an already resolved alert
/// (used when a replica resolved it earlier).
pub fn overwrite_emergency_resolution(
    conn: &Connection,
    id: &Uuid,
    resolved_at: Option<&NaiveDateTime>,
    resolved_by: Option<&Uuid>,
    resolution: Option<&str>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE emergency_alerts SET resolved = 1, resolved_at = ?1, resolved_by = ?2, resolution = ?3
         WHERE id = ?4",
        params![
            resolved_at.map(format_ts),
            resolved_by.map(|id| id.to_string()),
            resolution,
            id.to_string(),
        ],
    )?;
    Ok(())
}

// ═══════════════════════════════════════════
// Responses (append-only)
// ═══════════════════════════════════════════

pub fn insert_response(
    conn: &Connection,
    alert_id: &Uuid,
    response: &EmergencyResponse,
) -> Result<(), DatabaseError> {
    insert_response_sql(conn, "INSERT", alert_id, response)?;
    Ok(())
}

/// Insert unless a response with the same id exists. Returns whether a
/// row was written.
pub fn insert_response_if_absent(
    conn: &Connection,
    alert_id: &Uuid,
    response: &EmergencyResponse,
) -> Result<bool, DatabaseError> {
    Ok(insert_response_sql(conn, "INSERT OR IGNORE", alert_id, response)? > 0)
}

fn insert_response_sql(
    conn: &Connection,
    verb: &str,
    alert_id: &Uuid,
    response: &EmergencyResponse,
) -> Result<usize, DatabaseError> {
    let written = conn.execute(
        &format!("{verb} INTO emergency_responses
            (id, alert_id, responder_id, responded_at, message, eta_minutes, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        params![
            response.id.to_string(),
            alert_id.to_string(),
            response.responder_id.to_string(),
            format_ts(&response.responded_at),
            response.message,
            response.eta_minutes,
            response.status.as_str(),
        ],
    )?;
    Ok(written)
}

pub fn list_responses(conn: &Connection, alert_id: &Uuid) -> Result<Vec<EmergencyResponse>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, responder_id, responded_at, message, eta_minutes, status
         FROM emergency_responses WHERE alert_id = ?1
         ORDER BY responded_at, rowid",
    )?;

    let rows = stmt.query_map(params![alert_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<u32>>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut responses = Vec::new();
    for row in rows {
        let (id, responder_id, responded_at, message, eta_minutes, status) = row?;
        responses.push(EmergencyResponse {
            id: parse_uuid(&id)?,
            responder_id: parse_uuid(&responder_id)?,
            responded_at: parse_ts(&responded_at)?,
            message,
            eta_minutes,
            status: ResponseStatus::from_str(&status)?,
        });
    }
    Ok(responses)
}
