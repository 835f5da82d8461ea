use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{
    format_ts, parse_opt_ts, parse_ts, parse_uuid, parse_uuid_list, uuid_list_json, DatabaseError,
};
use crate::models::MissedCheckInAlert;

const ALERT_COLUMNS: &str = "id, user_id, care_circle_id, consecutive_missed, last_check_in_at,
     alert_sent_at, escalated, acknowledged, acknowledged_by, acknowledged_at, updated_at";

// Internal row type for MissedCheckInAlert mapping
struct AlertRow {
    id: String,
    user_id: String,
    care_circle_id: String,
    consecutive_missed: i64,
    last_check_in_at: Option<String>,
    alert_sent_at: String,
    escalated: i32,
    acknowledged: i32,
    acknowledged_by: String,
    acknowledged_at: Option<String>,
    updated_at: String,
}

fn read_alert_row(row: &Row<'_>) -> rusqlite::Result<AlertRow> {
    Ok(AlertRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        care_circle_id: row.get(2)?,
        consecutive_missed: row.get(3)?,
        last_check_in_at: row.get(4)?,
        alert_sent_at: row.get(5)?,
        escalated: row.get(6)?,
        acknowledged: row.get(7)?,
        acknowledged_by: row.get(8)?,
        acknowledged_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn alert_from_row(row: AlertRow) -> Result<MissedCheckInAlert, DatabaseError> {
    Ok(MissedCheckInAlert {
        id: parse_uuid(&row.id)?,
        user_id: parse_uuid(&row.user_id)?,
        care_circle_id: parse_uuid(&row.care_circle_id)?,
        consecutive_missed: row.consecutive_missed.max(1) as u32,
        last_check_in_at: parse_opt_ts(row.last_check_in_at)?,
        alert_sent_at: parse_ts(&row.alert_sent_at)?,
        escalated: row.escalated != 0,
        acknowledged: row.acknowledged != 0,
        acknowledged_by: parse_uuid_list(&row.acknowledged_by)?,
        acknowledged_at: parse_opt_ts(row.acknowledged_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

fn query_alerts(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<MissedCheckInAlert>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, read_alert_row)?;

    let mut alerts = Vec::new();
    for row in rows {
        alerts.push(alert_from_row(row?)?);
    }
    Ok(alerts)
}

pub fn get_missed_alert(conn: &Connection, id: &Uuid) -> Result<Option<MissedCheckInAlert>, DatabaseError> {
    let result = conn.query_row(
        &format!("SELECT {ALERT_COLUMNS} FROM missed_check_in_alerts WHERE id = ?1"),
        params![id.to_string()],
        read_alert_row,
    );

    match result {
        Ok(row) => Ok(Some(alert_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// The unacknowledged alert for a (recipient, circle) pair, if any.
pub fn get_open_missed_alert(
    conn: &Connection,
    user_id: &Uuid,
    care_circle_id: &Uuid,
) -> Result<Option<MissedCheckInAlert>, DatabaseError> {
    let result = conn.query_row(
        &format!(
            "SELECT {ALERT_COLUMNS} FROM missed_check_in_alerts
             WHERE user_id = ?1 AND care_circle_id = ?2 AND acknowledged = 0"
        ),
        params![user_id.to_string(), care_circle_id.to_string()],
        read_alert_row,
    );

    match result {
        Ok(row) => Ok(Some(alert_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Create the open alert for `(alert.user_id, alert.care_circle_id)` or,
/// when one already exists, update it in place.
///
/// The conflict target is the partial unique index over unacknowledged
/// alerts, so the existence check and the write are one statement. The
/// stored count never decreases. Returns the id of the row written,
/// which differs from `alert.id` when an existing alert was updated.
pub fn upsert_open_missed_alert(
    conn: &Connection,
    alert: &MissedCheckInAlert,
) -> Result<Uuid, DatabaseError> {
    let id: String = conn.query_row(
        "INSERT INTO missed_check_in_alerts
            (id, user_id, care_circle_id, consecutive_missed, last_check_in_at,
             alert_sent_at, escalated, acknowledged, acknowledged_by, acknowledged_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, '[]', NULL, ?8)
         ON CONFLICT(user_id, care_circle_id) WHERE acknowledged = 0 DO UPDATE SET
            consecutive_missed = MAX(consecutive_missed, excluded.consecutive_missed),
            last_check_in_at = excluded.last_check_in_at,
            escalated = excluded.escalated,
            updated_at = excluded.updated_at
         RETURNING id",
        params![
            alert.id.to_string(),
            alert.user_id.to_string(),
            alert.care_circle_id.to_string(),
            alert.consecutive_missed,
            alert.last_check_in_at.as_ref().map(format_ts),
            format_ts(&alert.alert_sent_at),
            alert.escalated as i32,
            format_ts(&alert.updated_at),
        ],
        |row| row.get(0),
    )?;
    parse_uuid(&id)
}

/// Insert or overwrite an alert by id (used when applying a replica's copy).
pub fn put_missed_alert(conn: &Connection, alert: &MissedCheckInAlert) -> Result<(), DatabaseError> {
    conn.execute(
        &format!("INSERT INTO missed_check_in_alerts ({ALERT_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
            consecutive_missed = excluded.consecutive_missed,
            last_check_in_at = excluded.last_check_in_at,
            alert_sent_at = excluded.alert_sent_at,
            escalated = excluded.escalated,
            acknowledged = excluded.acknowledged,
            acknowledged_by = excluded.acknowledged_by,
            acknowledged_at = excluded.acknowledged_at,
            updated_at = excluded.updated_at"),
        params![
            alert.id.to_string(),
            alert.user_id.to_string(),
            alert.care_circle_id.to_string(),
            alert.consecutive_missed,
            alert.last_check_in_at.as_ref().map(format_ts),
            format_ts(&alert.alert_sent_at),
            alert.escalated as i32,
            alert.acknowledged as i32,
            uuid_list_json(&alert.acknowledged_by),
            alert.acknowledged_at.as_ref().map(format_ts),
            format_ts(&alert.updated_at),
        ],
    )?;
    Ok(())
}

/// Retire an alert, recording the full acknowledger set.
pub fn mark_missed_alert_acknowledged(
    conn: &Connection,
    id: &Uuid,
    acknowledged_by: &[Uuid],
    at: &NaiveDateTime,
) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE missed_check_in_alerts SET acknowledged = 1, acknowledged_by = ?1,
            acknowledged_at = COALESCE(acknowledged_at, ?2), updated_at = ?2
         WHERE id = ?3",
        params![uuid_list_json(acknowledged_by), format_ts(at), id.to_string()],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "MissedCheckInAlert".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Retire every open alert of a recipient. Returns the retired alert ids.
pub fn acknowledge_open_alerts_for_user(
    conn: &Connection,
    user_id: &Uuid,
    at: &NaiveDateTime,
) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare(
        "UPDATE missed_check_in_alerts
         SET acknowledged = 1, acknowledged_at = ?1, updated_at = ?1
         WHERE user_id = ?2 AND acknowledged = 0
         RETURNING id",
    )?;
    let rows = stmt.query_map(params![format_ts(at), user_id.to_string()], |row| {
        row.get::<_, String>(0)
    })?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(parse_uuid(&row?)?);
    }
    Ok(ids)
}

pub fn list_open_missed_alerts_for_user(
    conn: &Connection,
    user_id: &Uuid,
) -> Result<Vec<MissedCheckInAlert>, DatabaseError> {
    query_alerts(
        conn,
        &format!(
            "SELECT {ALERT_COLUMNS} FROM missed_check_in_alerts
             WHERE user_id = ?1 AND acknowledged = 0 ORDER BY alert_sent_at"
        ),
        params![user_id.to_string()],
    )
}

pub fn list_missed_alerts_for_circle(
    conn: &Connection,
    care_circle_id: &Uuid,
) -> Result<Vec<MissedCheckInAlert>, DatabaseError> {
    query_alerts(
        conn,
        &format!(
            "SELECT {ALERT_COLUMNS} FROM missed_check_in_alerts
             WHERE care_circle_id = ?1 ORDER BY alert_sent_at, id"
        ),
        params![care_circle_id.to_string()],
    )
}

pub fn list_missed_alerts(conn: &Connection) -> Result<Vec<MissedCheckInAlert>, DatabaseError> {
    query_alerts(
        conn,
        &format!("SELECT {ALERT_COLUMNS} FROM missed_check_in_alerts ORDER BY alert_sent_at, id"),
        [],
    )
}
