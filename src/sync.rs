//! Replica merge: exchange the whole care store between devices that each
//! hold a copy and apply the other side's state deterministically.
//!
//! Merge rules per entity:
//! - users, check-ins, emergency responses: union by id (append-only)
//! - circles, responsibilities, needs: last writer wins on `updated_at`
//! - missed check-in alerts: union by id with monotone fields folded; two
//!   open alerts for the same recipient and circle collapse into one,
//!   the other kept as retired
//! - emergencies: union by id, resolution only moves false → true and the
//!   earliest resolution wins
//!
//! Deletions are not propagated.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::care::{immediate_transaction, CareError};
use crate::db::repository;
use crate::models::{
    CareCircle, CareNeed, CareResponsibility, CheckIn, EmergencyAlert, MissedCheckInAlert,
    UserProfile,
};

// ═══════════════════════════════════════════════════════════════════════════
// Snapshot Types
// ═══════════════════════════════════════════════════════════════════════════

/// Full copy of a replica's care store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub exported_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub users: Vec<UserProfile>,
    #[serde(default)]
    pub circles: Vec<CareCircle>,
    #[serde(default)]
    pub check_ins: Vec<CheckIn>,
    #[serde(default)]
    pub missed_alerts: Vec<MissedCheckInAlert>,
    #[serde(default)]
    pub emergencies: Vec<EmergencyAlert>,
    #[serde(default)]
    pub responsibilities: Vec<CareResponsibility>,
    #[serde(default)]
    pub needs: Vec<CareNeed>,
}

/// What a merge changed locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub users_added: usize,
    pub circles_applied: usize,
    pub check_ins_added: usize,
    pub check_ins_acknowledged: usize,
    pub missed_alerts_applied: usize,
    pub missed_alerts_reconciled: usize,
    pub missed_alerts_retired: usize,
    pub emergencies_applied: usize,
    pub responses_added: usize,
    pub responsibilities_applied: usize,
    pub needs_applied: usize,
    /// Remote records dropped because their circle is unknown here or
    /// conflicts with a different local circle of the same recipient.
    pub skipped: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        *self
            != Self {
                skipped: self.skipped,
                ..Self::default()
            }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Export
// ═══════════════════════════════════════════════════════════════════════════

pub fn export_snapshot(conn: &Connection, now: NaiveDateTime) -> Result<StoreSnapshot, CareError> {
    Ok(StoreSnapshot {
        exported_at: Some(now),
        users: repository::list_users(conn)?,
        circles: repository::list_circles(conn)?,
        check_ins: repository::list_check_ins(conn)?,
        missed_alerts: repository::list_missed_alerts(conn)?,
        emergencies: repository::list_emergencies(conn)?,
        responsibilities: repository::list_responsibilities(conn)?,
        needs: repository::list_needs(conn)?,
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Merge
// ═══════════════════════════════════════════════════════════════════════════

/// Apply a remote snapshot in one transaction. Merging the same snapshot
/// twice changes nothing the second time.
pub fn merge_snapshot(conn: &Connection, remote: &StoreSnapshot) -> Result<MergeReport, CareError> {
    let tx = immediate_transaction(conn)?;
    let mut report = MergeReport::default();

    for user in &remote.users {
        if repository::insert_user_if_absent(&tx, user)? {
            report.users_added += 1;
        }
    }

    for circle in &remote.circles {
        merge_circle(&tx, circle, &mut report)?;
    }

    let mut touched_users = BTreeSet::new();
    for check_in in &remote.check_ins {
        merge_check_in(&tx, check_in, &mut report, &mut touched_users)?;
    }

    for alert in &remote.missed_alerts {
        if repository::get_circle(&tx, &alert.care_circle_id)?.is_none() {
            report.skipped += 1;
            continue;
        }
        merge_missed_alert(&tx, alert, &mut report)?;
        touched_users.insert(alert.user_id);
    }
    for user_id in &touched_users {
        report.missed_alerts_retired += retire_stale_alerts(&tx, user_id)?;
    }

    for alert in &remote.emergencies {
        if repository::get_circle(&tx, &alert.care_circle_id)?.is_none() {
            report.skipped += 1;
            continue;
        }
        merge_emergency(&tx, alert, &mut report)?;
    }

    for item in &remote.responsibilities {
        if repository::get_circle(&tx, &item.care_circle_id)?.is_none() {
            report.skipped += 1;
            continue;
        }
        let local = repository::get_responsibility(&tx, &item.id)?;
        if remote_wins(local.as_ref().map(|l| (l, l.updated_at)), item, item.updated_at)? {
            repository::put_responsibility(&tx, item)?;
            report.responsibilities_applied += 1;
        }
    }

    for need in &remote.needs {
        if repository::get_circle(&tx, &need.care_circle_id)?.is_none() {
            report.skipped += 1;
            continue;
        }
        let local = repository::get_need(&tx, &need.id)?;
        if remote_wins(local.as_ref().map(|l| (l, l.updated_at)), need, need.updated_at)? {
            repository::put_need(&tx, need)?;
            report.needs_applied += 1;
        }
    }

    tx.commit()?;
    tracing::info!(
        circles = report.circles_applied,
        check_ins = report.check_ins_added,
        missed_alerts = report.missed_alerts_applied,
        reconciled = report.missed_alerts_reconciled,
        emergencies = report.emergencies_applied,
        responses = report.responses_added,
        skipped = report.skipped,
        "snapshot merged"
    );
    Ok(report)
}

/// Last-writer-wins decision. Equal timestamps fall back to comparing the
/// serialized records so both replicas pick the same winner.
fn remote_wins<T: Serialize>(
    local: Option<(&T, NaiveDateTime)>,
    remote: &T,
    remote_updated_at: NaiveDateTime,
) -> Result<bool, CareError> {
    let Some((local, local_updated_at)) = local else {
        return Ok(true);
    };
    Ok(match remote_updated_at.cmp(&local_updated_at) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => serde_json::to_string(remote)? > serde_json::to_string(local)?,
    })
}

fn merge_circle(
    conn: &Connection,
    remote: &CareCircle,
    report: &mut MergeReport,
) -> Result<(), CareError> {
    let local = repository::get_circle(conn, &remote.id)?;
    if local.is_none() {
        if let Some(other) = repository::get_circle_by_recipient(conn, &remote.recipient_id)? {
            tracing::warn!(
                local_circle = %other.id,
                remote_circle = %remote.id,
                recipient_id = %remote.recipient_id,
                "recipient has a different circle on each replica; keeping the local one"
            );
            report.skipped += 1;
            return Ok(());
        }
    }
    if remote_wins(local.as_ref().map(|l| (l, l.updated_at)), remote, remote.updated_at)? {
        repository::put_circle(conn, remote)?;
        report.circles_applied += 1;
    }
    Ok(())
}

fn merge_check_in(
    conn: &Connection,
    remote: &CheckIn,
    report: &mut MergeReport,
    touched_users: &mut BTreeSet<Uuid>,
) -> Result<(), CareError> {
    if repository::insert_check_in_if_absent(conn, remote)? {
        report.check_ins_added += 1;
        touched_users.insert(remote.user_id);
        return Ok(());
    }
    if !remote.acknowledged {
        return Ok(());
    }

    let Some(local) = repository::get_check_in(conn, &remote.id)? else {
        return Ok(());
    };
    let remote_first = !local.acknowledged
        || (remote.acknowledged_at, remote.acknowledged_by) < (local.acknowledged_at, local.acknowledged_by);
    if remote_first {
        repository::overwrite_check_in_acknowledgement(
            conn,
            &remote.id,
            remote.acknowledged_by.as_ref(),
            remote.acknowledged_at.as_ref(),
        )?;
        report.check_ins_acknowledged += 1;
    }
    Ok(())
}

fn merge_missed_alert(
    conn: &Connection,
    remote: &MissedCheckInAlert,
    report: &mut MergeReport,
) -> Result<(), CareError> {
    if let Some(local) = repository::get_missed_alert(conn, &remote.id)? {
        let mut merged = local.clone();
        fold_alert(&mut merged, remote);
        // An open merged alert was already the local open alert for its
        // pair, so the write cannot collide with another open alert.
        if merged != local {
            repository::put_missed_alert(conn, &merged)?;
            report.missed_alerts_applied += 1;
        }
        return Ok(());
    }

    if !remote.acknowledged {
        if let Some(local_open) =
            repository::get_open_missed_alert(conn, &remote.user_id, &remote.care_circle_id)?
        {
            reconcile_open_alerts(conn, local_open, remote.clone())?;
            report.missed_alerts_reconciled += 1;
            return Ok(());
        }
    }

    repository::put_missed_alert(conn, remote)?;
    report.missed_alerts_applied += 1;
    Ok(())
}

/// Two different open alerts for one (recipient, circle): keep the older
/// one (smallest id on ties) open and fold the other into it. The other
/// stays stored as retired, so a later delivery of it folds into the
/// retired row instead of reopening it.
fn reconcile_open_alerts(
    conn: &Connection,
    local: MissedCheckInAlert,
    remote: MissedCheckInAlert,
) -> Result<(), CareError> {
    let local_key = (local.alert_sent_at, local.id);
    let remote_key = (remote.alert_sent_at, remote.id);
    let (mut survivor, mut loser) = if remote_key < local_key {
        (remote, local)
    } else {
        (local, remote)
    };
    fold_alert(&mut survivor, &loser);

    loser.acknowledged = true;
    loser.acknowledged_at = Some(survivor.alert_sent_at);
    // Retire first: the partial unique index allows one open alert per pair.
    repository::put_missed_alert(conn, &loser)?;
    repository::put_missed_alert(conn, &survivor)?;

    tracing::info!(
        survivor = %survivor.id,
        retired = %loser.id,
        recipient_id = %survivor.user_id,
        "duplicate open missed check-in alerts reconciled"
    );
    Ok(())
}

/// Fold `other` into `into`: counts and flags only grow, acknowledgers
/// union, the earliest acknowledgement and send time win.
fn fold_alert(into: &mut MissedCheckInAlert, other: &MissedCheckInAlert) {
    into.consecutive_missed = into.consecutive_missed.max(other.consecutive_missed);
    into.escalated |= other.escalated;
    into.acknowledged |= other.acknowledged;
    if into.acknowledged_by != other.acknowledged_by {
        let mut union: Vec<Uuid> = into.acknowledged_by.clone();
        for id in &other.acknowledged_by {
            if !union.contains(id) {
                union.push(*id);
            }
        }
        // Replicas may have seen acknowledgers in a different order.
        union.sort();
        into.acknowledged_by = union;
    }
    into.acknowledged_at = match (into.acknowledged_at, other.acknowledged_at) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    into.last_check_in_at = into.last_check_in_at.max(other.last_check_in_at);
    into.alert_sent_at = into.alert_sent_at.min(other.alert_sent_at);
    into.updated_at = into.updated_at.max(other.updated_at);
}

/// Retire open alerts of `user_id` that were raised without knowledge of
/// the recipient's latest check-in. Returns how many were retired.
fn retire_stale_alerts(conn: &Connection, user_id: &Uuid) -> Result<usize, CareError> {
    let Some(latest) = repository::latest_check_in(conn, user_id)? else {
        return Ok(0);
    };

    let mut retired = 0;
    for alert in repository::list_open_missed_alerts_for_user(conn, user_id)? {
        let stale = alert
            .last_check_in_at
            .map_or(true, |seen| latest.created_at > seen);
        if stale {
            let at = latest.created_at.max(alert.alert_sent_at);
            repository::mark_missed_alert_acknowledged(conn, &alert.id, &alert.acknowledged_by, &at)?;
            retired += 1;
        }
    }
    Ok(retired)
}

fn merge_emergency(
    conn: &Connection,
    remote: &EmergencyAlert,
    report: &mut MergeReport,
) -> Result<(), CareError> {
    match repository::get_emergency(conn, &remote.id)? {
        None => {
            repository::insert_emergency(conn, remote)?;
            report.emergencies_applied += 1;
        }
        Some(local) if remote.resolved => {
            let remote_key = (remote.resolved_at, remote.resolution.as_deref(), remote.resolved_by);
            let local_key = (local.resolved_at, local.resolution.as_deref(), local.resolved_by);
            if !local.resolved || remote_key < local_key {
                repository::overwrite_emergency_resolution(
                    conn,
                    &remote.id,
                    remote.resolved_at.as_ref(),
                    remote.resolved_by.as_ref(),
                    remote.resolution.as_deref(),
                )?;
                report.emergencies_applied += 1;
            }
        }
        Some(_) => {}
    }

    for response in &remote.responses {
        if repository::insert_response_if_absent(conn, &remote.id, response)? {
            report.responses_added += 1;
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::test_support::{at, family, Family};
    use crate::care::{
        acknowledge_alert, cancel_emergency, record_check_in, resolve_emergency,
        respond_to_emergency, scan, trigger_emergency, update_settings,
    };
    use crate::db::sqlite::open_memory_database;
    use crate::models::enums::{CheckInStatus, ResponseStatus};
    use crate::models::{CircleConfig, CircleSettings, ResponseInput, TriggerOptions};

    /// Two replicas holding the same circle.
    fn replicas() -> (Connection, Connection, Family) {
        let a = open_memory_database().unwrap();
        let fam = family(&a, 2, CircleConfig::default());
        let b = open_memory_database().unwrap();
        merge_snapshot(&b, &export_snapshot(&a, at(0)).unwrap()).unwrap();
        (a, b, fam)
    }

    fn sync_both(a: &Connection, b: &Connection) {
        let from_a = export_snapshot(a, at(0)).unwrap();
        let from_b = export_snapshot(b, at(0)).unwrap();
        merge_snapshot(b, &from_a).unwrap();
        merge_snapshot(a, &from_b).unwrap();
    }

    fn normalized(conn: &Connection) -> StoreSnapshot {
        let mut snapshot = export_snapshot(conn, at(0)).unwrap();
        snapshot.users.sort_by_key(|u| u.id);
        snapshot.circles.sort_by_key(|c| c.id);
        snapshot.check_ins.sort_by_key(|c| c.id);
        snapshot.missed_alerts.sort_by_key(|a| a.id);
        snapshot.emergencies.sort_by_key(|e| e.id);
        snapshot.responsibilities.sort_by_key(|r| r.id);
        snapshot.needs.sort_by_key(|n| n.id);
        snapshot
    }

    #[test]
    fn fresh_replica_receives_everything() {
        let (a, b, fam) = replicas();
        assert_eq!(normalized(&a), normalized(&b));
        assert_eq!(
            repository::get_circle(&b, &fam.circle.id).unwrap(),
            Some(fam.circle)
        );
    }

    #[test]
    fn merging_twice_is_a_no_op() {
        let (a, b, fam) = replicas();
        trigger_emergency(&a, fam.recipient.id, TriggerOptions::default(), at(1)).unwrap();
        scan(&a, at(30)).unwrap();

        let snapshot = export_snapshot(&a, at(31)).unwrap();
        assert!(merge_snapshot(&b, &snapshot).unwrap().changed());
        assert!(!merge_snapshot(&b, &snapshot).unwrap().changed());
    }

    #[test]
    fn snapshot_survives_json() {
        let (a, _b, fam) = replicas();
        trigger_emergency(&a, fam.recipient.id, TriggerOptions::default(), at(1)).unwrap();
        let snapshot = export_snapshot(&a, at(2)).unwrap();
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: StoreSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn responses_from_both_replicas_are_kept() {
        let (a, b, fam) = replicas();
        let alert = trigger_emergency(&a, fam.recipient.id, TriggerOptions::default(), at(1)).unwrap();
        sync_both(&a, &b);

        respond_to_emergency(&a, &alert.id, &fam.members[0].id, ResponseInput::new(ResponseStatus::OnWay), at(2)).unwrap();
        respond_to_emergency(&b, &alert.id, &fam.members[1].id, ResponseInput::new(ResponseStatus::Contacted), at(3)).unwrap();
        sync_both(&a, &b);

        let stored = repository::get_emergency(&a, &alert.id).unwrap().unwrap();
        assert_eq!(stored.responses.len(), 2);
        assert_eq!(stored.responses[0].responder_id, fam.members[0].id);
        assert_eq!(stored.responses[1].responder_id, fam.members[1].id);
        assert_eq!(normalized(&a), normalized(&b));
    }

    #[test]
    fn earliest_resolution_wins() {
        let (a, b, fam) = replicas();
        let alert = trigger_emergency(&a, fam.recipient.id, TriggerOptions::default(), at(1)).unwrap();
        sync_both(&a, &b);

        resolve_emergency(&a, &alert.id, &fam.members[0].id, Some("handled"), at(2)).unwrap();
        cancel_emergency(&b, &alert.id, &fam.recipient.id, None, at(3)).unwrap();
        sync_both(&a, &b);

        for conn in [&a, &b] {
            let stored = repository::get_emergency(conn, &alert.id).unwrap().unwrap();
            assert!(stored.resolved);
            assert_eq!(stored.resolution.as_deref(), Some("handled"));
            assert_eq!(stored.resolved_at, Some(at(2)));
        }
    }

    #[test]
    fn independent_scans_collapse_to_one_open_alert() {
        let (a, b, fam) = replicas();
        scan(&a, at(27)).unwrap();
        scan(&b, at(50)).unwrap();
        sync_both(&a, &b);

        for conn in [&a, &b] {
            let open = repository::list_open_missed_alerts_for_user(conn, &fam.recipient.id).unwrap();
            assert_eq!(open.len(), 1);
            assert_eq!(open[0].alert_sent_at, at(27));
            assert_eq!(open[0].consecutive_missed, 2);
            assert!(open[0].escalated);
        }
        assert_eq!(normalized(&a), normalized(&b));

        // A later scan keeps updating the survivor rather than adding one.
        scan(&a, at(51)).unwrap();
        assert_eq!(
            repository::list_open_missed_alerts_for_user(&a, &fam.recipient.id)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn acknowledged_survivor_stays_closed_on_redelivery() {
        let (a, b, fam) = replicas();
        scan(&a, at(27)).unwrap();
        scan(&b, at(50)).unwrap();

        let from_b = export_snapshot(&b, at(50)).unwrap();
        merge_snapshot(&a, &from_b).unwrap();
        let survivor = repository::list_open_missed_alerts_for_user(&a, &fam.recipient.id)
            .unwrap()
            .remove(0);
        assert_eq!(survivor.alert_sent_at, at(27));

        acknowledge_alert(&a, &survivor.id, &fam.members[0].id, at(51)).unwrap();
        let report = merge_snapshot(&a, &from_b).unwrap();

        assert!(!report.changed());
        assert!(repository::list_open_missed_alerts_for_user(&a, &fam.recipient.id)
            .unwrap()
            .is_empty());
        let stored = repository::list_missed_alerts_for_circle(&a, &fam.circle.id).unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|alert| alert.acknowledged));
    }

    #[test]
    fn acknowledgers_union_across_replicas() {
        let (a, b, fam) = replicas();
        scan(&a, at(27)).unwrap();
        sync_both(&a, &b);
        let alert = repository::list_open_missed_alerts_for_user(&a, &fam.recipient.id)
            .unwrap()
            .remove(0);

        acknowledge_alert(&a, &alert.id, &fam.members[0].id, at(28)).unwrap();
        acknowledge_alert(&b, &alert.id, &fam.members[1].id, at(29)).unwrap();
        sync_both(&a, &b);

        let mut expected = vec![fam.members[0].id, fam.members[1].id];
        expected.sort();
        for conn in [&a, &b] {
            let stored = repository::get_missed_alert(conn, &alert.id).unwrap().unwrap();
            assert!(stored.acknowledged);
            assert_eq!(stored.acknowledged_by, expected);
            assert_eq!(stored.acknowledged_at, Some(at(28)));
        }
    }

    #[test]
    fn remote_check_in_retires_stale_alert() {
        let (a, b, fam) = replicas();
        record_check_in(&b, fam.recipient.id, CheckInStatus::Okay, None, at(20)).unwrap();
        scan(&a, at(27)).unwrap();
        sync_both(&a, &b);

        for conn in [&a, &b] {
            assert!(repository::list_open_missed_alerts_for_user(conn, &fam.recipient.id)
                .unwrap()
                .is_empty());
        }
        assert_eq!(normalized(&a), normalized(&b));
    }

    #[test]
    fn newer_settings_win() {
        let (a, b, fam) = replicas();
        update_settings(
            &a,
            &fam.circle.id,
            &CircleSettings {
                missed_check_in_threshold: Some(10),
                ..Default::default()
            },
            at(2),
        )
        .unwrap();
        update_settings(
            &b,
            &fam.circle.id,
            &CircleSettings {
                missed_check_in_threshold: Some(40),
                ..Default::default()
            },
            at(3),
        )
        .unwrap();
        sync_both(&a, &b);

        for conn in [&a, &b] {
            let circle = repository::get_circle(conn, &fam.circle.id).unwrap().unwrap();
            assert_eq!(circle.config.missed_check_in_threshold, 40);
        }
    }

    #[test]
    fn foreign_circle_for_same_recipient_is_skipped() {
        let (a, b, fam) = replicas();
        let mut rogue = fam.circle.clone();
        rogue.id = Uuid::new_v4();
        let snapshot = StoreSnapshot {
            circles: vec![rogue],
            ..Default::default()
        };
        let report = merge_snapshot(&b, &snapshot).unwrap();
        assert_eq!(report.skipped, 1);
        assert!(!report.changed());
        assert_eq!(normalized(&a), normalized(&b));
    }
}
