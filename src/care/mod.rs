//! Care coordination: circles, check-in monitoring, emergencies and the
//! shared workload of a care circle.
//!
//! Sub-systems:
//! 1. Registry: care circles, membership and monitoring settings
//! 2. Check-in ledger: recipient check-ins, which retire open alerts
//! 3. Monitor: periodic detection of overdue check-ins
//! 4. Alert lifecycle: member acknowledgement of missed check-in alerts
//! 5. Emergency coordinator: trigger, respond, resolve, cancel
//! 6. Distributor and needs: responsibilities and requested help

mod check_in;
mod directory;
mod distribution;
mod emergency;
mod events;
mod lifecycle;
mod monitor;
mod needs;
mod registry;

#[cfg(test)]
pub(crate) mod test_support;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;

// ═══════════════════════════════════════════════════════════════════════════
// Error type
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum CareError {
    #[error("Unknown user: {0}")]
    InvalidMember(Uuid),

    #[error("{0} is already a member of this care circle")]
    DuplicateMember(Uuid),

    #[error("{0} is not a member of this care circle")]
    NotAMember(Uuid),

    #[error("A care circle must keep at least one member")]
    LastMemberViolation,

    #[error("Recipient {0} already has a care circle")]
    AlreadyExists(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("{member_id} is not a member of care circle {circle_id}")]
    NotACircleMember { member_id: Uuid, circle_id: Uuid },

    #[error("Emergency alert {0} is already resolved")]
    AlreadyResolved(Uuid),

    #[error("Alert not found: {0}")]
    AlertNotFound(Uuid),

    #[error("User {0} has no care circle")]
    NoCareCircle(Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Coarse classification of a [`CareError`] for callers that only need
/// to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    State,
    Storage,
}

impl CareError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidMember(_)
            | Self::DuplicateMember(_)
            | Self::NotAMember(_)
            | Self::LastMemberViolation
            | Self::AlreadyExists(_)
            | Self::Validation(_)
            | Self::Config(_) => ErrorKind::Validation,
            Self::Unauthorized(_) | Self::NotACircleMember { .. } => ErrorKind::Authorization,
            Self::AlreadyResolved(_)
            | Self::AlertNotFound(_)
            | Self::NoCareCircle(_)
            | Self::NotFound(_) => ErrorKind::State,
            Self::Database(_) | Self::Sqlite(_) | Self::Json(_) | Self::LockPoisoned => {
                ErrorKind::Storage
            }
        }
    }
}

/// Begin a write transaction that takes the database write lock up front,
/// so read-then-write sequences from separate connections serialize.
pub(crate) fn immediate_transaction(conn: &Connection) -> Result<Transaction<'_>, CareError> {
    Ok(Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?)
}

// ═══════════════════════════════════════════════════════════════════════════
// Re-exports
// ═══════════════════════════════════════════════════════════════════════════

pub use check_in::*;
pub use directory::*;
pub use distribution::*;
pub use emergency::*;
pub use events::*;
pub use lifecycle::*;
pub use monitor::*;
pub use needs::*;
pub use registry::*;

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
