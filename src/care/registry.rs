use chrono::NaiveDateTime;
use rusqlite::Connection;
use uuid::Uuid;

use super::{immediate_transaction, CareError, UserDirectory};
use crate::db::{repository, DatabaseError};
use crate::models::{CareCircle, CircleConfig, CircleSettings, MINUTES_PER_DAY};

/// Create the care circle of `recipient_id`.
///
/// Every member must resolve in `directory`, appear once, and differ from
/// the recipient. A recipient has at most one circle.
pub fn create_circle(
    conn: &Connection,
    directory: &dyn UserDirectory,
    recipient_id: Uuid,
    members: &[Uuid],
    config: CircleConfig,
    now: NaiveDateTime,
) -> Result<CareCircle, CareError> {
    validate_config(&config)?;
    if members.is_empty() {
        return Err(CareError::Validation(
            "a care circle needs at least one member".into(),
        ));
    }
    if directory.resolve_user(conn, &recipient_id)?.is_none() {
        return Err(CareError::InvalidMember(recipient_id));
    }

    let mut seen: Vec<Uuid> = Vec::with_capacity(members.len());
    for member_id in members {
        if seen.contains(member_id) {
            return Err(CareError::DuplicateMember(*member_id));
        }
        check_candidate(conn, directory, &recipient_id, member_id)?;
        seen.push(*member_id);
    }

    let tx = immediate_transaction(conn)?;
    if repository::get_circle_by_recipient(&tx, &recipient_id)?.is_some() {
        return Err(CareError::AlreadyExists(recipient_id));
    }

    let circle = CareCircle {
        id: Uuid::new_v4(),
        recipient_id,
        members: seen,
        config,
        created_at: now,
        updated_at: now,
    };
    repository::insert_circle(&tx, &circle).map_err(|e| match e {
        DatabaseError::Sqlite(ref err) if is_unique_violation(err) => {
            CareError::AlreadyExists(recipient_id)
        }
        other => other.into(),
    })?;
    tx.commit()?;

    tracing::info!(
        circle_id = %circle.id,
        recipient_id = %recipient_id,
        members = circle.members.len(),
        "care circle created"
    );
    Ok(circle)
}

pub fn add_member(
    conn: &Connection,
    directory: &dyn UserDirectory,
    circle_id: &Uuid,
    member_id: Uuid,
    now: NaiveDateTime,
) -> Result<CareCircle, CareError> {
    let tx = immediate_transaction(conn)?;
    let mut circle = require_circle(&tx, circle_id)?;
    if circle.is_member(&member_id) {
        return Err(CareError::DuplicateMember(member_id));
    }
    check_candidate(&tx, directory, &circle.recipient_id, &member_id)?;

    circle.members.push(member_id);
    circle.updated_at = now;
    repository::update_circle(&tx, &circle)?;
    tx.commit()?;

    tracing::info!(circle_id = %circle.id, member_id = %member_id, "member added");
    Ok(circle)
}

pub fn remove_member(
    conn: &Connection,
    circle_id: &Uuid,
    member_id: &Uuid,
    now: NaiveDateTime,
) -> Result<CareCircle, CareError> {
    let tx = immediate_transaction(conn)?;
    let mut circle = require_circle(&tx, circle_id)?;
    if !circle.is_member(member_id) {
        return Err(CareError::NotAMember(*member_id));
    }
    if circle.members.len() == 1 {
        return Err(CareError::LastMemberViolation);
    }

    circle.members.retain(|id| id != member_id);
    circle.updated_at = now;
    repository::update_circle(&tx, &circle)?;
    tx.commit()?;

    tracing::info!(circle_id = %circle.id, member_id = %member_id, "member removed");
    Ok(circle)
}

/// Overlay the provided settings; fields left as `None` keep their value.
pub fn update_settings(
    conn: &Connection,
    circle_id: &Uuid,
    settings: &CircleSettings,
    now: NaiveDateTime,
) -> Result<CareCircle, CareError> {
    let tx = immediate_transaction(conn)?;
    let mut circle = require_circle(&tx, circle_id)?;

    let mut config = circle.config.clone();
    config.apply(settings);
    validate_config(&config)?;

    circle.config = config;
    circle.updated_at = now;
    repository::update_circle(&tx, &circle)?;
    tx.commit()?;

    tracing::info!(circle_id = %circle.id, "circle settings updated");
    Ok(circle)
}

/// Switch missed check-in monitoring on or off. Membership is untouched.
pub fn set_monitoring_enabled(
    conn: &Connection,
    circle_id: &Uuid,
    enabled: bool,
    now: NaiveDateTime,
) -> Result<CareCircle, CareError> {
    update_settings(
        conn,
        circle_id,
        &CircleSettings {
            check_in_enabled: Some(enabled),
            ..Default::default()
        },
        now,
    )
}

/// Delete the circle of `recipient_id` together with its alerts,
/// emergencies, responsibilities and needs.
pub fn delete_circle(conn: &Connection, recipient_id: &Uuid) -> Result<(), CareError> {
    let circle = repository::get_circle_by_recipient(conn, recipient_id)?
        .ok_or(CareError::NoCareCircle(*recipient_id))?;
    repository::delete_circle(conn, &circle.id)?;
    tracing::info!(circle_id = %circle.id, recipient_id = %recipient_id, "care circle deleted");
    Ok(())
}

pub fn get_circle(conn: &Connection, circle_id: &Uuid) -> Result<CareCircle, CareError> {
    require_circle(conn, circle_id)
}

pub fn get_circle_for_recipient(
    conn: &Connection,
    recipient_id: &Uuid,
) -> Result<Option<CareCircle>, CareError> {
    Ok(repository::get_circle_by_recipient(conn, recipient_id)?)
}

pub fn list_monitored_circles(conn: &Connection) -> Result<Vec<CareCircle>, CareError> {
    Ok(repository::list_monitored_circles(conn)?)
}

pub(crate) fn require_circle(conn: &Connection, circle_id: &Uuid) -> Result<CareCircle, CareError> {
    repository::get_circle(conn, circle_id)?
        .ok_or_else(|| CareError::NotFound(format!("care circle {circle_id}")))
}

/// Fail with `NotACircleMember` unless `user_id` is a designated member.
pub(crate) fn require_member(circle: &CareCircle, user_id: &Uuid) -> Result<(), CareError> {
    if circle.is_member(user_id) {
        Ok(())
    } else {
        Err(CareError::NotACircleMember {
            member_id: *user_id,
            circle_id: circle.id,
        })
    }
}

/// Like [`require_member`] but also admits the recipient.
pub(crate) fn require_participant(circle: &CareCircle, user_id: &Uuid) -> Result<(), CareError> {
    if circle.is_participant(user_id) {
        Ok(())
    } else {
        Err(CareError::NotACircleMember {
            member_id: *user_id,
            circle_id: circle.id,
        })
    }
}

fn check_candidate(
    conn: &Connection,
    directory: &dyn UserDirectory,
    recipient_id: &Uuid,
    member_id: &Uuid,
) -> Result<(), CareError> {
    if member_id == recipient_id {
        return Err(CareError::Validation(
            "the recipient cannot be a member of their own circle".into(),
        ));
    }
    if directory.resolve_user(conn, member_id)?.is_none() {
        return Err(CareError::InvalidMember(*member_id));
    }
    Ok(())
}

fn validate_config(config: &CircleConfig) -> Result<(), CareError> {
    if config.escalation_threshold < 1 {
        return Err(CareError::Validation(
            "escalation threshold must be at least 1".into(),
        ));
    }
    if let Some(minutes) = config.preferred_check_in_time {
        if minutes >= MINUTES_PER_DAY {
            return Err(CareError::Validation(format!(
                "preferred check-in time {minutes} is not a minute of the day"
            )));
        }
    }
    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
