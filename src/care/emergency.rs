use chrono::NaiveDateTime;
use rusqlite::Connection;
use uuid::Uuid;

use super::registry::{require_circle, require_member, require_participant};
use super::{immediate_transaction, CareError};
use crate::db::repository;
use crate::models::enums::ResponseStatus;
use crate::models::{
    EmergencyAlert, EmergencyResponse, GeoLocation, ResponseInput, TriggerOptions,
    CANCELLED_PREFIX,
};

/// Raise an emergency for `user_id`, who must be the recipient of a care
/// circle. The alert starts unresolved with no responses.
pub fn trigger_emergency(
    conn: &Connection,
    user_id: Uuid,
    options: TriggerOptions,
    now: NaiveDateTime,
) -> Result<EmergencyAlert, CareError> {
    if let Some(location) = &options.location {
        validate_location(location)?;
    }
    let circle = repository::get_circle_by_recipient(conn, &user_id)?
        .ok_or(CareError::NoCareCircle(user_id))?;

    let alert = EmergencyAlert {
        id: Uuid::new_v4(),
        user_id,
        care_circle_id: circle.id,
        message: options.message.filter(|m| !m.trim().is_empty()),
        location: options.location,
        severity: options.severity.unwrap_or_default(),
        contact_emergency_services: options.contact_emergency_services,
        triggered_at: now,
        resolved: false,
        resolved_at: None,
        resolved_by: None,
        resolution: None,
        responses: Vec::new(),
    };
    repository::insert_emergency(conn, &alert)?;

    tracing::warn!(
        alert_id = %alert.id,
        circle_id = %circle.id,
        recipient_id = %user_id,
        severity = alert.severity.as_str(),
        "emergency triggered"
    );
    Ok(alert)
}

/// Append a member's response. `arrived` and `resolved` responses close
/// the emergency on behalf of the responder.
pub fn respond_to_emergency(
    conn: &Connection,
    alert_id: &Uuid,
    responder_id: &Uuid,
    input: ResponseInput,
    now: NaiveDateTime,
) -> Result<EmergencyAlert, CareError> {
    let tx = immediate_transaction(conn)?;
    let alert = load_open(&tx, alert_id)?;
    let circle = require_circle(&tx, &alert.care_circle_id)?;
    require_member(&circle, responder_id)?;

    let response = EmergencyResponse {
        id: Uuid::new_v4(),
        responder_id: *responder_id,
        responded_at: now,
        message: input.message.filter(|m| !m.trim().is_empty()),
        eta_minutes: input.eta_minutes,
        status: input.status,
    };
    repository::insert_response(&tx, alert_id, &response)?;

    if response.status.ends_emergency() {
        let resolution = match response.status {
            ResponseStatus::Arrived => "Responder arrived",
            _ => "Resolved by responder",
        };
        if !repository::mark_emergency_resolved(&tx, alert_id, &now, Some(responder_id), Some(resolution))? {
            return Err(CareError::AlreadyResolved(*alert_id));
        }
    }

    let updated = repository::get_emergency(&tx, alert_id)?.ok_or(CareError::AlertNotFound(*alert_id))?;
    tx.commit()?;

    tracing::info!(
        alert_id = %alert_id,
        responder_id = %responder_id,
        status = response.status.as_str(),
        resolved = updated.resolved,
        "emergency response recorded"
    );
    Ok(updated)
}

/// Explicitly close an emergency. Any circle participant may do so.
pub fn resolve_emergency(
    conn: &Connection,
    alert_id: &Uuid,
    resolved_by: &Uuid,
    reason: Option<&str>,
    now: NaiveDateTime,
) -> Result<EmergencyAlert, CareError> {
    let tx = immediate_transaction(conn)?;
    let alert = load_open(&tx, alert_id)?;
    let circle = require_circle(&tx, &alert.care_circle_id)?;
    require_participant(&circle, resolved_by)?;

    let resolution = reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("Resolved");
    if !repository::mark_emergency_resolved(&tx, alert_id, &now, Some(resolved_by), Some(resolution))? {
        return Err(CareError::AlreadyResolved(*alert_id));
    }
    let updated = repository::get_emergency(&tx, alert_id)?.ok_or(CareError::AlertNotFound(*alert_id))?;
    tx.commit()?;

    tracing::info!(alert_id = %alert_id, resolved_by = %resolved_by, "emergency resolved");
    Ok(updated)
}

/// Withdraw a false alarm. Only the user who triggered the emergency may
/// cancel it.
pub fn cancel_emergency(
    conn: &Connection,
    alert_id: &Uuid,
    user_id: &Uuid,
    reason: Option<&str>,
    now: NaiveDateTime,
) -> Result<EmergencyAlert, CareError> {
    let tx = immediate_transaction(conn)?;
    let alert = repository::get_emergency(&tx, alert_id)?.ok_or(CareError::AlertNotFound(*alert_id))?;
    if alert.user_id != *user_id {
        return Err(CareError::Unauthorized(
            "only the user who triggered an emergency can cancel it".into(),
        ));
    }
    if alert.resolved {
        return Err(CareError::AlreadyResolved(*alert_id));
    }

    let resolution = match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => format!("{CANCELLED_PREFIX}: {reason}"),
        None => CANCELLED_PREFIX.to_string(),
    };
    if !repository::mark_emergency_resolved(&tx, alert_id, &now, Some(user_id), Some(&resolution))? {
        return Err(CareError::AlreadyResolved(*alert_id));
    }
    let updated = repository::get_emergency(&tx, alert_id)?.ok_or(CareError::AlertNotFound(*alert_id))?;
    tx.commit()?;

    tracing::info!(alert_id = %alert_id, user_id = %user_id, "emergency cancelled");
    Ok(updated)
}

pub fn get_emergency(conn: &Connection, alert_id: &Uuid) -> Result<EmergencyAlert, CareError> {
    repository::get_emergency(conn, alert_id)?.ok_or(CareError::AlertNotFound(*alert_id))
}

/// Unresolved emergencies of a circle, oldest first.
pub fn list_active_emergencies(
    conn: &Connection,
    circle_id: &Uuid,
) -> Result<Vec<EmergencyAlert>, CareError> {
    Ok(repository::list_active_emergencies_for_circle(conn, circle_id)?)
}

fn load_open(conn: &Connection, alert_id: &Uuid) -> Result<EmergencyAlert, CareError> {
    let alert = repository::get_emergency(conn, alert_id)?.ok_or(CareError::AlertNotFound(*alert_id))?;
    if alert.resolved {
        return Err(CareError::AlreadyResolved(*alert_id));
    }
    Ok(alert)
}

fn validate_location(location: &GeoLocation) -> Result<(), CareError> {
    if !(-90.0..=90.0).contains(&location.latitude) {
        return Err(CareError::Validation(format!(
            "latitude {} out of range",
            location.latitude
        )));
    }
    if !(-180.0..=180.0).contains(&location.longitude) {
        return Err(CareError::Validation(format!(
            "longitude {} out of range",
            location.longitude
        )));
    }
    if location.accuracy.is_some_and(|a| a < 0.0 || !a.is_finite()) {
        return Err(CareError::Validation("accuracy must be a positive distance".into()));
    }
    Ok(())
}
