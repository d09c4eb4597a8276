//! Lifecycle managers: every mutating operation on tasks, phases and
//! milestones, written against a [`UnitOfWork`] so that store writes, history
//! and notifications commit or roll back together.
//!
//! Read operations take a plain `&Connection`.

pub mod phase;
pub mod project;
pub mod task;

use rusqlite::Connection;

use crate::auth::Principal;
use crate::db::query;
use crate::error::{Entity, Result, TrackerError};
use crate::model::phase::Phase;
use crate::model::project::{Project, User};
use crate::model::task::Task;

pub(crate) fn require_project(conn: &Connection, project_id: i64) -> Result<Project> {
    query::get_project(conn, project_id)?
        .ok_or_else(|| TrackerError::not_found(Entity::Project, project_id))
}

pub(crate) fn require_user(conn: &Connection, user_id: i64) -> Result<User> {
    query::get_user(conn, user_id)?.ok_or_else(|| TrackerError::not_found(Entity::User, user_id))
}

pub(crate) fn require_task(conn: &Connection, task_id: i64) -> Result<Task> {
    query::get_task(conn, task_id)?.ok_or_else(|| TrackerError::not_found(Entity::Task, task_id))
}

/// A task that must also belong to `project_id`; a task from another project
/// is reported as missing.
pub(crate) fn require_project_task(
    conn: &Connection,
    project_id: i64,
    task_id: i64,
) -> Result<Task> {
    match query::get_task(conn, task_id)? {
        Some(task) if task.project_id == project_id => Ok(task),
        _ => Err(TrackerError::not_found(Entity::Task, task_id)),
    }
}

/// A phase that must also belong to `project_id`.
pub(crate) fn require_project_phase(
    conn: &Connection,
    project_id: i64,
    phase_id: i64,
) -> Result<Phase> {
    match query::get_phase(conn, phase_id)? {
        Some(phase) if phase.project_id == project_id => Ok(phase),
        _ => Err(TrackerError::not_found(Entity::Phase, phase_id)),
    }
}

/// Only the project's manager or an admin may restructure a project.
pub(crate) fn ensure_manager(actor: &Principal, project: &Project) -> Result<()> {
    if actor.is_admin() || actor.user_id == project.manager_id {
        Ok(())
    } else {
        Err(TrackerError::Forbidden(format!(
            "user {} is not the manager of project {}",
            actor.user_id, project.id
        )))
    }
}

pub(crate) fn non_empty(value: &str, what: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::validation(format!("{what} must not be empty")));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn ensure_live(task: &Task) -> Result<()> {
    if task.is_archived {
        return Err(TrackerError::Conflict(format!("task {} is archived", task.id)));
    }
    Ok(())
}
