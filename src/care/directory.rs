use chrono::NaiveDateTime;
use rusqlite::Connection;
use uuid::Uuid;

use super::CareError;
use crate::db::repository;
use crate::models::UserProfile;

/// Lookup of known users. Circle membership is only ever granted to ids
/// that resolve here.
pub trait UserDirectory: Send + Sync {
    fn resolve_user(&self, conn: &Connection, id: &Uuid) -> Result<Option<UserProfile>, CareError>;
}

/// Directory backed by the `users` table of the care database.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteUserDirectory;

impl UserDirectory for SqliteUserDirectory {
    fn resolve_user(&self, conn: &Connection, id: &Uuid) -> Result<Option<UserProfile>, CareError> {
        Ok(repository::get_user(conn, id)?)
    }
}

/// Add a user to the directory.
pub fn register_user(
    conn: &Connection,
    display_name: &str,
    now: NaiveDateTime,
) -> Result<UserProfile, CareError> {
    let display_name = display_name.trim();
    if display_name.is_empty() {
        return Err(CareError::Validation("display name must not be empty".into()));
    }

    let user = UserProfile {
        id: Uuid::new_v4(),
        display_name: display_name.to_string(),
        created_at: now,
    };
    repository::insert_user(conn, &user)?;
    tracing::debug!(user_id = %user.id, "registered user");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::test_support::at;
    use crate::db::sqlite::open_memory_database;

    #[test]
    fn registered_user_resolves() {
        let conn = open_memory_database().unwrap();
        let user = register_user(&conn, "  Maria  ", at(0)).unwrap();
        assert_eq!(user.display_name, "Maria");

        let resolved = SqliteUserDirectory.resolve_user(&conn, &user.id).unwrap();
        assert_eq!(resolved, Some(user));
    }

    #[test]
    fn unknown_id_does_not_resolve() {
        let conn = open_memory_database().unwrap();
        let resolved = SqliteUserDirectory
            .resolve_user(&conn, &Uuid::new_v4())
            .unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn blank_name_rejected() {
        let conn = open_memory_database().unwrap();
        assert!(matches!(
            register_user(&conn, "   ", at(0)),
            Err(CareError::Validation(_))
        ));
    }
}
