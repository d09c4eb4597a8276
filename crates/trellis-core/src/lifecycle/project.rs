//! Bootstrap records: users and projects.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use super::{non_empty, require_project, require_user};
use crate::auth::Principal;
use crate::db::write;
use crate::error::{Result, TrackerError};
use crate::model::project::{NewProject, NewUser, Project, Role, User};
use crate::tx::UnitOfWork;

/// Register a user. Admin only.
///
/// # Errors
///
/// `Forbidden` for non-admins; `Validation` for an empty name or an email
/// without `@`; `Conflict` when the email is taken.
pub fn create_user(unit: &mut UnitOfWork<'_>, actor: &Principal, draft: &NewUser) -> Result<User> {
    if !actor.is_admin() {
        return Err(TrackerError::Forbidden("only admins may create users".to_string()));
    }
    let name = non_empty(&draft.name, "user name")?;
    let email = non_empty(&draft.email, "email")?;
    if !email.contains('@') {
        return Err(TrackerError::validation(format!("'{email}' is not an email address")));
    }
    let taken: Option<i64> = unit
        .query_row("SELECT user_id FROM users WHERE email = ?1", [&email], |row| row.get(0))
        .optional()?;
    if let Some(existing) = taken {
        return Err(TrackerError::Conflict(format!(
            "email {email} is already used by user {existing}"
        )));
    }

    let draft = NewUser {
        name,
        email,
        role: draft.role,
    };
    let user_id = write::insert_user(unit, &draft, unit.now_us())?;
    info!(user_id, role = %draft.role, "user created");
    require_user(unit, user_id)
}

/// Create a project managed by `draft.manager_id`. Admins and managers only.
///
/// # Errors
///
/// `Forbidden` for members; `NotFound` for a missing manager; `Validation`
/// for an empty name.
pub fn create_project(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    draft: &NewProject,
) -> Result<Project> {
    if actor.role == Role::Member {
        return Err(TrackerError::Forbidden(
            "members may not create projects".to_string(),
        ));
    }
    let name = non_empty(&draft.name, "project name")?;
    require_user(unit, draft.manager_id)?;

    let draft = NewProject {
        name,
        description: draft.description.clone(),
        manager_id: draft.manager_id,
    };
    let project_id = write::insert_project(unit, &draft, unit.now_us())?;
    info!(project_id, manager_id = draft.manager_id, "project created");
    require_project(unit, project_id)
}

/// Load a project record.
///
/// # Errors
///
/// `NotFound` for a missing project.
pub fn get_project(conn: &Connection, project_id: i64) -> Result<Project> {
    require_project(conn, project_id)
}
