use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::{format_ts, parse_ts, parse_uuid, DatabaseError};
use crate::models::UserProfile;

pub fn insert_user(conn: &Connection, user: &UserProfile) -> Result<(), DatabaseError> {
    write_user(conn, "INSERT", user)?;
    Ok(())
}

/// Insert unless the id is already known. Returns whether a row was written.
pub fn insert_user_if_absent(conn: &Connection, user: &UserProfile) -> Result<bool, DatabaseError> {
    Ok(write_user(conn, "INSERT OR IGNORE", user)? > 0)
}

fn write_user(conn: &Connection, verb: &str, user: &UserProfile) -> Result<usize, DatabaseError> {
    let written = conn.execute(
        &format!("{verb} INTO users (id, display_name, created_at) VALUES (?1, ?2, ?3)"),
        params![
            user.id.to_string(),
            user.display_name,
            format_ts(&user.created_at),
        ],
    )?;
    Ok(written)
}

pub fn get_user(conn: &Connection, id: &Uuid) -> Result<Option<UserProfile>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, display_name, created_at FROM users WHERE id = ?1",
        params![id.to_string()],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        },
    );

    match result {
        Ok((id, display_name, created_at)) => Ok(Some(UserProfile {
            id: parse_uuid(&id)?,
            display_name,
            created_at: parse_ts(&created_at)?,
        })),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_users(conn: &Connection) -> Result<Vec<UserProfile>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT id, display_name, created_at FROM users ORDER BY created_at, id")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut users = Vec::new();
    for row in rows {
        let (id, display_name, created_at) = row?;
        users.push(UserProfile {
            id: parse_uuid(&id)?,
            display_name,
            created_at: parse_ts(&created_at)?,
        });
    }
    Ok(users)
}
