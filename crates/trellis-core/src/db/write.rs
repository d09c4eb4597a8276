//! Row-level writes for the entity store.
//!
//! These helpers do not open transactions and do not enforce cross-entity
//! invariants; lifecycle operations call them inside a unit of work.

use rusqlite::{Connection, params};

use super::date_text;
use crate::model::notification::{Notification, NotificationDraft};
use crate::model::phase::{Milestone, Phase};
use crate::model::project::{NewProject, NewUser};
use crate::model::request::RequestStatus;
use crate::model::task::{FieldChange, NewTask, Task};

/// Insert a user row and return its id.
///
/// # Errors
///
/// Returns an error if the insert fails (e.g. duplicate email).
pub fn insert_user(conn: &Connection, user: &NewUser, now_us: i64) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO users (name, email, role, created_at_us) VALUES (?1, ?2, ?3, ?4)",
        params![user.name.trim(), user.email.trim(), user.role.as_str(), now_us],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert a project row and return its id.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_project(
    conn: &Connection,
    project: &NewProject,
    now_us: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO projects (name, description, manager_id, created_at_us, updated_at_us)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![
            project.name.trim(),
            project.description,
            project.manager_id,
            now_us
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Bump a project's `updated_at_us`.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn touch_project(conn: &Connection, project_id: i64, now_us: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE projects SET updated_at_us = ?2 WHERE project_id = ?1",
        params![project_id, now_us],
    )?;
    Ok(())
}

/// Insert a task row and return its id.
///
/// # Errors
///
/// Returns an error if the insert fails (enum `CHECK`s and foreign keys apply).
pub fn insert_task(
    conn: &Connection,
    project_id: i64,
    task: &NewTask,
    now_us: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO tasks (
            project_id, phase_id, title, description, status, priority,
            assignee_id, due_date, is_archived, created_at_us, updated_at_us
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
        params![
            project_id,
            task.phase_id,
            task.title.trim(),
            task.description,
            task.status.as_str(),
            task.priority.as_str(),
            task.assignee_id,
            task.due_date.map(date_text),
            now_us,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Persist every mutable column of `task` and stamp `updated_at_us`.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn update_task(conn: &Connection, task: &Task, now_us: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE tasks SET
            phase_id = ?2,
            title = ?3,
            description = ?4,
            status = ?5,
            priority = ?6,
            assignee_id = ?7,
            due_date = ?8,
            is_archived = ?9,
            updated_at_us = ?10
         WHERE task_id = ?1",
        params![
            task.id,
            task.phase_id,
            task.title,
            task.description,
            task.status.as_str(),
            task.priority.as_str(),
            task.assignee_id,
            task.due_date.map(date_text),
            task.is_archived,
            now_us,
        ],
    )?;
    Ok(())
}

/// Append one history entry to a task.
///
/// # Errors
///
/// Returns an error if the change list cannot be encoded or the insert fails.
pub fn insert_history(
    conn: &Connection,
    task_id: i64,
    action: &str,
    changes: &[FieldChange],
    actor_id: Option<i64>,
    now_us: i64,
) -> rusqlite::Result<i64> {
    let changes_json = serde_json::to_string(changes)
        .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
    conn.execute(
        "INSERT INTO task_history (task_id, action, changes_json, actor_id, created_at_us)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![task_id, action, changes_json, actor_id, now_us],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert a phase row (lists live in edge tables) and return its id.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_phase(conn: &Connection, phase: &Phase, now_us: i64) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO phases (
            project_id, name, description, start_date, end_date, status,
            created_at_us, updated_at_us
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            phase.project_id,
            phase.name.trim(),
            phase.description,
            date_text(phase.start_date),
            date_text(phase.end_date),
            phase.status.as_str(),
            now_us,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Persist a phase's scalar columns.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn update_phase(conn: &Connection, phase: &Phase, now_us: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE phases SET
            name = ?2,
            description = ?3,
            start_date = ?4,
            end_date = ?5,
            status = ?6,
            updated_at_us = ?7
         WHERE phase_id = ?1",
        params![
            phase.id,
            phase.name,
            phase.description,
            date_text(phase.start_date),
            date_text(phase.end_date),
            phase.status.as_str(),
            now_us,
        ],
    )?;
    Ok(())
}

/// Delete a phase row. Membership rows cascade.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn delete_phase(conn: &Connection, phase_id: i64) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM phases WHERE phase_id = ?1", [phase_id])
}

/// Insert a milestone row and return its id.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_milestone(
    conn: &Connection,
    milestone: &Milestone,
    now_us: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO milestones (
            phase_id, title, due_date, progress, completed, created_at_us, updated_at_us
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            milestone.phase_id,
            milestone.title.trim(),
            milestone.due_date.map(date_text),
            milestone.progress,
            milestone.completed,
            now_us,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Persist a milestone's mutable columns.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn update_milestone(
    conn: &Connection,
    milestone: &Milestone,
    now_us: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE milestones SET
            title = ?2,
            due_date = ?3,
            progress = ?4,
            completed = ?5,
            updated_at_us = ?6
         WHERE milestone_id = ?1",
        params![
            milestone.id,
            milestone.title,
            milestone.due_date.map(date_text),
            milestone.progress,
            milestone.completed,
            now_us,
        ],
    )?;
    Ok(())
}

/// Delete one milestone.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn delete_milestone(conn: &Connection, milestone_id: i64) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM milestones WHERE milestone_id = ?1", [milestone_id])
}

/// Delete every milestone of a phase.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn delete_milestones_for_phase(conn: &Connection, phase_id: i64) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM milestones WHERE phase_id = ?1", [phase_id])
}

/// Insert a pending join request and return its id.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_request(
    conn: &Connection,
    task_id: i64,
    user_id: i64,
    now_us: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO join_requests (task_id, user_id, status, created_at_us)
         VALUES (?1, ?2, 'pending', ?3)",
        params![task_id, user_id, now_us],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Record a decision on a join request.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn update_request_status(
    conn: &Connection,
    request_id: i64,
    status: RequestStatus,
    now_us: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE join_requests SET status = ?2, decided_at_us = ?3 WHERE request_id = ?1",
        params![request_id, status.as_str(), now_us],
    )?;
    Ok(())
}

/// Insert a notification and return the stored record.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_notification(
    conn: &Connection,
    recipient_id: i64,
    draft: &NotificationDraft,
    now_us: i64,
) -> rusqlite::Result<Notification> {
    conn.execute(
        "INSERT INTO notifications (
            recipient_id, message, link, kind, related_kind, related_id, is_read, created_at_us
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        params![
            recipient_id,
            draft.message,
            draft.link,
            draft.kind.as_str(),
            draft.related_kind.as_str(),
            draft.related_id,
            now_us,
        ],
    )?;
    Ok(Notification {
        id: conn.last_insert_rowid(),
        recipient_id,
        message: draft.message.clone(),
        link: draft.link.clone(),
        kind: draft.kind,
        related_kind: draft.related_kind,
        related_id: draft.related_id,
        is_read: false,
        created_at_us: now_us,
    })
}

/// Flip a notification's read flag.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn mark_notification_read(conn: &Connection, notification_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE notification_id = ?1",
        [notification_id],
    )
}

/// Insert an attachment record and return its id.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_attachment(
    conn: &Connection,
    task_id: i64,
    handle: &str,
    file_name: &str,
    size_bytes: i64,
    uploaded_by: Option<i64>,
    now_us: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO task_attachments (task_id, handle, file_name, size_bytes, uploaded_by, created_at_us)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![task_id, handle, file_name, size_bytes, uploaded_by, now_us],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Delete an attachment record.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn delete_attachment(conn: &Connection, attachment_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM task_attachments WHERE attachment_id = ?1",
        [attachment_id],
    )
}
