//! Shared fixtures for the care tests.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;

use super::{create_circle, register_user, SqliteUserDirectory};
use crate::models::{CareCircle, CircleConfig, UserProfile};

/// 2025-01-01 00:00 UTC plus `hours`.
pub fn at(hours: i64) -> NaiveDateTime {
    base() + Duration::hours(hours)
}

/// 2025-01-01 00:00 UTC plus `minutes`.
pub fn at_minutes(minutes: i64) -> NaiveDateTime {
    base() + Duration::minutes(minutes)
}

fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap()
}

pub struct Family {
    pub recipient: UserProfile,
    pub members: Vec<UserProfile>,
    pub circle: CareCircle,
}

/// A recipient with a circle of `member_count` members, created at `at(0)`.
pub fn family(conn: &Connection, member_count: usize, config: CircleConfig) -> Family {
    let recipient = register_user(conn, "Recipient", at(0)).unwrap();
    let members: Vec<UserProfile> = (0..member_count)
        .map(|i| register_user(conn, &format!("Member {i}"), at(0)).unwrap())
        .collect();
    let member_ids: Vec<_> = members.iter().map(|m| m.id).collect();
    let circle = create_circle(
        conn,
        &SqliteUserDirectory,
        recipient.id,
        &member_ids,
        config,
        at(0),
    )
    .unwrap();
    Family {
        recipient,
        members,
        circle,
    }
}
