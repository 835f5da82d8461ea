use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::registry::{require_circle, require_member};
use super::{immediate_transaction, CareError};
use crate::db::repository;
use crate::models::enums::ResponsibilityFrequency;
use crate::models::{AssignmentSuggestion, CareResponsibility};

/// Input for a new responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResponsibility {
    #[serde(rename = "type")]
    pub responsibility_type: String,
    pub description: String,
    #[serde(default)]
    pub frequency: Option<ResponsibilityFrequency>,
    #[serde(default)]
    pub assigned_to: Option<Uuid>,
}

pub fn add_responsibility(
    conn: &Connection,
    circle_id: &Uuid,
    input: NewResponsibility,
    now: NaiveDateTime,
) -> Result<CareResponsibility, CareError> {
    let responsibility_type = input.responsibility_type.trim();
    let description = input.description.trim();
    if responsibility_type.is_empty() || description.is_empty() {
        return Err(CareError::Validation(
            "responsibility needs a type and a description".into(),
        ));
    }

    let circle = require_circle(conn, circle_id)?;
    if let Some(member_id) = &input.assigned_to {
        require_member(&circle, member_id)?;
    }

    let item = CareResponsibility {
        id: Uuid::new_v4(),
        care_circle_id: circle.id,
        responsibility_type: responsibility_type.to_string(),
        description: description.to_string(),
        assigned_to: input.assigned_to,
        frequency: input.frequency.unwrap_or(ResponsibilityFrequency::Once),
        completed: false,
        completed_at: None,
        completed_by: None,
        completion_notes: None,
        created_at: now,
        updated_at: now,
    };
    repository::insert_responsibility(conn, &item)?;

    tracing::info!(
        circle_id = %circle.id,
        responsibility_id = %item.id,
        "responsibility added"
    );
    Ok(item)
}

/// Hand a responsibility to a member of its circle.
pub fn assign_responsibility(
    conn: &Connection,
    responsibility_id: &Uuid,
    member_id: &Uuid,
    now: NaiveDateTime,
) -> Result<CareResponsibility, CareError> {
    let tx = immediate_transaction(conn)?;
    let item = require_responsibility(&tx, responsibility_id)?;
    let circle = require_circle(&tx, &item.care_circle_id)?;
    require_member(&circle, member_id)?;

    repository::set_responsibility_assignee(&tx, responsibility_id, Some(member_id), &now)?;
    let updated = require_responsibility(&tx, responsibility_id)?;
    tx.commit()?;

    tracing::info!(
        responsibility_id = %responsibility_id,
        member_id = %member_id,
        "responsibility assigned"
    );
    Ok(updated)
}

pub fn complete_responsibility(
    conn: &Connection,
    responsibility_id: &Uuid,
    completed_by: &Uuid,
    notes: Option<&str>,
    now: NaiveDateTime,
) -> Result<CareResponsibility, CareError> {
    let tx = immediate_transaction(conn)?;
    let item = require_responsibility(&tx, responsibility_id)?;
    let circle = require_circle(&tx, &item.care_circle_id)?;
    require_member(&circle, completed_by)?;
    if item.completed {
        return Err(CareError::Validation(format!(
            "responsibility {responsibility_id} is already completed"
        )));
    }

    let notes = notes.map(str::trim).filter(|n| !n.is_empty());
    repository::mark_responsibility_completed(&tx, responsibility_id, completed_by, notes, &now)?;
    let updated = require_responsibility(&tx, responsibility_id)?;
    tx.commit()?;

    tracing::info!(
        responsibility_id = %responsibility_id,
        completed_by = %completed_by,
        "responsibility completed"
    );
    Ok(updated)
}

pub fn list_responsibilities(
    conn: &Connection,
    circle_id: &Uuid,
) -> Result<Vec<CareResponsibility>, CareError> {
    Ok(repository::list_responsibilities_for_circle(conn, circle_id)?)
}

/// Suggest a member for every open, unassigned responsibility of the
/// circle. Nothing is written.
pub fn suggest_distribution(
    conn: &Connection,
    circle_id: &Uuid,
) -> Result<Vec<AssignmentSuggestion>, CareError> {
    let circle = require_circle(conn, circle_id)?;
    let items = repository::list_responsibilities_for_circle(conn, circle_id)?;
    Ok(suggest(&circle.members, &items))
}

/// Least-busy assignment: each unassigned item, in creation order, goes
/// to the member with the fewest open assignments (earliest in `members`
/// on ties), whose count then grows by one.
pub fn suggest(members: &[Uuid], items: &[CareResponsibility]) -> Vec<AssignmentSuggestion> {
    if members.is_empty() {
        return Vec::new();
    }

    let mut workload: Vec<usize> = members
        .iter()
        .map(|member| {
            items
                .iter()
                .filter(|i| !i.completed && i.assigned_to.as_ref() == Some(member))
                .count()
        })
        .collect();

    let mut suggestions = Vec::new();
    for item in items.iter().filter(|i| !i.completed && i.assigned_to.is_none()) {
        let Some((slot, load)) = workload
            .iter()
            .enumerate()
            .min_by_key(|(slot, load)| (**load, *slot))
            .map(|(slot, load)| (slot, *load))
        else {
            break;
        };
        suggestions.push(AssignmentSuggestion {
            responsibility_id: item.id,
            suggested_member_id: members[slot],
            reason: format!("Lowest current workload ({load} open responsibilities)"),
        });
        workload[slot] += 1;
    }
    suggestions
}

fn require_responsibility(conn: &Connection, id: &Uuid) -> Result<CareResponsibility, CareError> {
    repository::get_responsibility(conn, id)?
        .ok_or_else(|| CareError::NotFound(format!("responsibility {id}")))
}
