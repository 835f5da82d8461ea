use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{immediate_transaction, CareError};
use crate::db::repository;
use crate::models::enums::AlertEventKind;
use crate::models::{AlertEvent, CareCircle, MissedCheckInAlert};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Result of one monitoring pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Circles with monitoring enabled that were examined.
    pub scanned: usize,
    /// Alerts created, updated or escalated by this pass.
    pub events: Vec<AlertEvent>,
    /// Circles whose evaluation failed; the pass continued past them.
    pub failures: Vec<ScanFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub care_circle_id: Uuid,
    pub error: String,
}

/// How far behind a recipient is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overdue {
    /// Infinite when the recipient never checked in.
    pub hours_since: f64,
    pub consecutive_missed: u32,
    pub escalated: bool,
}

/// Decide whether the recipient of `circle` is overdue at `now`.
///
/// Without any check-in the missed intervals are counted from the
/// circle's creation.
pub fn evaluate(
    circle: &CareCircle,
    last_check_in: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> Option<Overdue> {
    let config = &circle.config;
    let hours_since = match last_check_in {
        Some(last) => hours_between(last, now),
        None => f64::INFINITY,
    };
    if hours_since <= f64::from(config.missed_check_in_threshold) {
        return None;
    }

    let counted_hours = if hours_since.is_finite() {
        hours_since
    } else {
        hours_between(circle.created_at, now)
    };
    let interval = f64::from(config.check_in_frequency.interval_hours());
    let intervals = (counted_hours / interval).floor().clamp(1.0, f64::from(u32::MAX));
    let consecutive_missed = intervals as u32;

    Some(Overdue {
        hours_since,
        consecutive_missed,
        escalated: consecutive_missed >= config.escalation_threshold,
    })
}

fn hours_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_milliseconds() as f64 / MILLIS_PER_HOUR
}

/// Examine every monitored circle and create or refresh missed check-in
/// alerts. Safe to run repeatedly and from several processes at once:
/// a circle never ends up with two open alerts.
pub fn scan(conn: &Connection, now: NaiveDateTime) -> Result<ScanReport, CareError> {
    let circles = repository::list_monitored_circles(conn)?;
    let mut report = ScanReport {
        scanned: circles.len(),
        ..Default::default()
    };

    for circle in &circles {
        match scan_circle(conn, circle, now) {
            Ok(Some(event)) => report.events.push(event),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(circle_id = %circle.id, error = %e, "check-in scan failed for circle");
                report.failures.push(ScanFailure {
                    care_circle_id: circle.id,
                    error: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        scanned = report.scanned,
        events = report.events.len(),
        failures = report.failures.len(),
        "check-in scan complete"
    );
    Ok(report)
}

fn scan_circle(
    conn: &Connection,
    circle: &CareCircle,
    now: NaiveDateTime,
) -> Result<Option<AlertEvent>, CareError> {
    let tx = immediate_transaction(conn)?;

    let last_check_in = repository::latest_check_in(&tx, &circle.recipient_id)?.map(|c| c.created_at);
    let Some(overdue) = evaluate(circle, last_check_in, now) else {
        tracing::debug!(circle_id = %circle.id, "recipient is up to date");
        return Ok(None);
    };

    let previous = repository::get_open_missed_alert(&tx, &circle.recipient_id, &circle.id)?;
    let consecutive_missed = previous
        .as_ref()
        .map_or(overdue.consecutive_missed, |p| {
            p.consecutive_missed.max(overdue.consecutive_missed)
        });

    let candidate = MissedCheckInAlert {
        id: Uuid::new_v4(),
        user_id: circle.recipient_id,
        care_circle_id: circle.id,
        consecutive_missed,
        last_check_in_at: last_check_in,
        alert_sent_at: now,
        escalated: consecutive_missed >= circle.config.escalation_threshold,
        acknowledged: false,
        acknowledged_by: Vec::new(),
        acknowledged_at: None,
        updated_at: now,
    };
    let alert_id = repository::upsert_open_missed_alert(&tx, &candidate)?;
    let stored = repository::get_missed_alert(&tx, &alert_id)?
        .ok_or(CareError::AlertNotFound(alert_id))?;
    tx.commit()?;

    let kind = match &previous {
        None => Some(AlertEventKind::MissedCheckInCreated),
        Some(prev) if !prev.escalated && stored.escalated => Some(AlertEventKind::MissedCheckInEscalated),
        Some(prev) if prev.consecutive_missed != stored.consecutive_missed => {
            Some(AlertEventKind::MissedCheckInUpdated)
        }
        Some(_) => None,
    };

    if let Some(kind) = kind {
        tracing::info!(
            circle_id = %circle.id,
            alert_id = %stored.id,
            recipient_id = %circle.recipient_id,
            consecutive_missed = stored.consecutive_missed,
            escalated = stored.escalated,
            kind = kind.as_str(),
            "missed check-in alert"
        );
    }
    Ok(kind.map(|k| AlertEvent::for_missed_check_in(&stored, k, now)))
}
