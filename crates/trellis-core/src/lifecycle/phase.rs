//! Phase lifecycle: phase CRUD, task membership, milestones, and the
//! cascading delete.
//!
//! Phase membership (`phase_tasks`) and `task.phase_id` are kept in step
//! only here; task operations never touch them except archival, which drops
//! the membership row.

use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::{debug, info};

use super::{
    ensure_live, ensure_manager, non_empty, require_project, require_project_phase,
    require_project_task, require_task,
};
use crate::auth::Principal;
use crate::db::edges::{self, Edge};
use crate::db::{query, write};
use crate::error::{Entity, ErrorCode, Result, TrackerError};
use crate::model::notification::NotificationKind;
use crate::model::phase::{
    Milestone, MilestoneDraft, MilestonePatch, Phase, PhaseDraft, PhasePatch, PhaseStatus,
    PhaseView,
};
use crate::model::task::{FieldChange, Task, TaskField};
use crate::notify::{self, about_task};
use crate::tx::UnitOfWork;

/// Summary returned by [`delete_phase`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseDeletion {
    pub phase_id: i64,
    pub archived_tasks: Vec<i64>,
    pub released_tasks: Vec<i64>,
    pub deleted_milestones: usize,
}

/// Reject `start > end`.
///
/// # Errors
///
/// `Validation` with [`ErrorCode::InvalidDateRange`].
pub fn validate_date_range(start: NaiveDate, end: NaiveDate) -> Result<()> {
    if start > end {
        return Err(TrackerError::Validation {
            code: ErrorCode::InvalidDateRange,
            message: format!("start date {start} is after end date {end}"),
        });
    }
    Ok(())
}

fn parse_status(raw: Option<&str>) -> Result<Option<PhaseStatus>> {
    raw.map(|text| {
        text.parse::<PhaseStatus>()
            .map_err(|err| TrackerError::Validation {
                code: ErrorCode::InvalidEnumValue,
                message: err.to_string(),
            })
    })
    .transpose()
}

fn validate_progress(progress: i64) -> Result<u8> {
    u8::try_from(progress)
        .ok()
        .filter(|value| *value <= 100)
        .ok_or_else(|| {
            TrackerError::validation(format!("progress must be between 0 and 100, got {progress}"))
        })
}

fn history(
    unit: &UnitOfWork<'_>,
    task_id: i64,
    label: &str,
    changes: &[FieldChange],
    actor: &Principal,
) -> Result<()> {
    write::insert_history(unit, task_id, label, changes, Some(actor.user_id), unit.now_us())?;
    Ok(())
}

fn reload_phase(conn: &Connection, phase_id: i64) -> Result<Phase> {
    query::get_phase(conn, phase_id)?
        .ok_or_else(|| TrackerError::not_found(Entity::Phase, phase_id))
}

/// Create a phase with empty task and milestone lists.
///
/// # Errors
///
/// `NotFound` for a missing project; `Forbidden` unless `actor` manages it;
/// `Validation` for an empty name, inverted dates or an unknown status.
pub fn add_phase(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    project_id: i64,
    draft: &PhaseDraft,
) -> Result<Phase> {
    debug!(project_id, actor = actor.user_id, "add phase");
    let project = require_project(unit, project_id)?;
    ensure_manager(actor, &project)?;
    let name = non_empty(&draft.name, "phase name")?;
    validate_date_range(draft.start_date, draft.end_date)?;
    let status = parse_status(draft.status.as_deref())?.unwrap_or_default();

    let phase = Phase {
        id: 0,
        project_id,
        name,
        description: draft.description.clone(),
        start_date: draft.start_date,
        end_date: draft.end_date,
        status,
        assigned_tasks: Vec::new(),
        milestones: Vec::new(),
        created_at_us: unit.now_us(),
        updated_at_us: unit.now_us(),
    };
    let phase_id = write::insert_phase(unit, &phase, unit.now_us())?;
    edges::append(unit, Edge::ProjectPhases, project_id, phase_id)?;
    write::touch_project(unit, project_id, unit.now_us())?;

    info!(phase_id, project_id, "phase added");
    reload_phase(unit, phase_id)
}

/// Update a phase. Dates are validated after merging with the stored values.
///
/// # Errors
///
/// `NotFound` for a phase missing from `project_id`; `Forbidden` unless
/// `actor` manages the project; `Validation` as for [`add_phase`].
pub fn update_phase(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    project_id: i64,
    phase_id: i64,
    patch: &PhasePatch,
) -> Result<Phase> {
    debug!(phase_id, project_id, actor = actor.user_id, "update phase");
    let mut phase = require_project_phase(unit, project_id, phase_id)?;
    let project = require_project(unit, project_id)?;
    ensure_manager(actor, &project)?;

    if let Some(name) = &patch.name {
        phase.name = non_empty(name, "phase name")?;
    }
    if let Some(description) = &patch.description {
        phase.description.clone_from(description);
    }
    if let Some(start) = patch.start_date {
        phase.start_date = start;
    }
    if let Some(end) = patch.end_date {
        phase.end_date = end;
    }
    validate_date_range(phase.start_date, phase.end_date)?;
    if let Some(status) = parse_status(patch.status.as_deref())? {
        phase.status = status;
    }

    write::update_phase(unit, &phase, unit.now_us())?;
    reload_phase(unit, phase_id)
}

/// Delete a phase, its milestones and its project reference.
///
/// With `archive_tasks` every member task is unassigned and archived with a
/// history entry naming the phase; otherwise member tasks are released from
/// the phase. Either way no task keeps a dangling `phase_id`.
///
/// # Errors
///
/// `NotFound`, `Forbidden`, or any store error; the whole unit rolls back.
pub fn delete_phase(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    project_id: i64,
    phase_id: i64,
    archive_tasks: bool,
) -> Result<PhaseDeletion> {
    debug!(phase_id, project_id, archive_tasks, actor = actor.user_id, "delete phase");
    let phase = require_project_phase(unit, project_id, phase_id)?;
    let project = require_project(unit, project_id)?;
    ensure_manager(actor, &project)?;

    let mut archived_tasks = Vec::new();
    let mut released_tasks = Vec::new();
    for task_id in &phase.assigned_tasks {
        let mut task = require_task(unit, *task_id)?;
        let mut changes = vec![FieldChange::new(TaskField::Phase, &task.phase_id, &None::<i64>)?];
        task.phase_id = None;

        if archive_tasks && !task.is_archived {
            let former = task.assignee_id.take();
            if let Some(former) = former {
                changes.push(FieldChange::new(TaskField::Assignee, &Some(former), &None::<i64>)?);
                edges::remove(unit, Edge::UserAssignedTasks, former, task.id)?;
            }
            changes.push(FieldChange::new(TaskField::Archived, &false, &true)?);
            task.is_archived = true;
            write::update_task(unit, &task, unit.now_us())?;
            history(
                unit,
                task.id,
                &format!("Archived: phase '{}' deleted", phase.name),
                &changes,
                actor,
            )?;
            if let Some(former) = former {
                notify::create_notification(
                    unit,
                    former,
                    &about_task(
                        NotificationKind::TaskArchived,
                        &task,
                        format!(
                            "Task '{}' was archived because phase '{}' was deleted",
                            task.title, phase.name
                        ),
                    ),
                )?;
            }
            archived_tasks.push(task.id);
        } else {
            write::update_task(unit, &task, unit.now_us())?;
            history(
                unit,
                task.id,
                &format!("Removed from phase '{}': phase deleted", phase.name),
                &changes,
                actor,
            )?;
            released_tasks.push(task.id);
        }
    }

    let deleted_milestones = write::delete_milestones_for_phase(unit, phase_id)?;
    edges::remove(unit, Edge::ProjectPhases, project_id, phase_id)?;
    write::delete_phase(unit, phase_id)?;
    write::touch_project(unit, project_id, unit.now_us())?;

    info!(
        phase_id,
        project_id,
        archived = archived_tasks.len(),
        released = released_tasks.len(),
        deleted_milestones,
        "phase deleted"
    );
    Ok(PhaseDeletion {
        phase_id,
        archived_tasks,
        released_tasks,
        deleted_milestones,
    })
}

/// Put a task into a phase. Membership is idempotent; the task's phase is
/// always (re)written and a history entry always appended.
///
/// # Errors
///
/// `NotFound` for a phase or task missing from `project_id`; `Forbidden`
/// unless `actor` manages the project; `Conflict` for an archived task.
pub fn assign_task_to_phase(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    project_id: i64,
    phase_id: i64,
    task_id: i64,
) -> Result<Task> {
    debug!(phase_id, task_id, actor = actor.user_id, "assign task to phase");
    let phase = require_project_phase(unit, project_id, phase_id)?;
    let project = require_project(unit, project_id)?;
    ensure_manager(actor, &project)?;
    let mut task = require_project_task(unit, project_id, task_id)?;
    ensure_live(&task)?;

    let label = match task.phase_id {
        Some(previous) if previous != phase_id => {
            edges::remove(unit, Edge::PhaseTasks, previous, task_id)?;
            let previous_name = query::get_phase(unit, previous)?
                .map_or_else(|| format!("#{previous}"), |p| p.name);
            format!("Moved from phase '{previous_name}' to '{}'", phase.name)
        }
        _ => format!("Assigned to phase '{}'", phase.name),
    };

    let change = FieldChange::new(TaskField::Phase, &task.phase_id, &Some(phase_id))?;
    task.phase_id = Some(phase_id);
    write::update_task(unit, &task, unit.now_us())?;
    if !edges::append(unit, Edge::PhaseTasks, phase_id, task_id)? {
        debug!(phase_id, task_id, "task already a phase member");
    }
    history(unit, task_id, &label, &[change], actor)?;

    require_task(unit, task_id)
}

/// Take a task out of a phase.
///
/// # Errors
///
/// `NotFound` if the phase is missing or the task is not a member;
/// `Forbidden` unless `actor` manages the project.
pub fn remove_task_from_phase(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    project_id: i64,
    phase_id: i64,
    task_id: i64,
) -> Result<Task> {
    debug!(phase_id, task_id, actor = actor.user_id, "remove task from phase");
    let phase = require_project_phase(unit, project_id, phase_id)?;
    let project = require_project(unit, project_id)?;
    ensure_manager(actor, &project)?;
    if !edges::remove(unit, Edge::PhaseTasks, phase_id, task_id)? {
        return Err(TrackerError::not_found(Entity::Task, task_id));
    }

    let mut task = require_task(unit, task_id)?;
    let change = FieldChange::new(TaskField::Phase, &task.phase_id, &None::<i64>)?;
    task.phase_id = None;
    write::update_task(unit, &task, unit.now_us())?;
    history(
        unit,
        task_id,
        &format!("Removed from phase '{}'", phase.name),
        &[change],
        actor,
    )?;
    require_task(unit, task_id)
}

/// Computed views of a project's phases, in project order.
///
/// # Errors
///
/// `NotFound` for a missing project.
pub fn get_phases(conn: &Connection, project_id: i64) -> Result<Vec<PhaseView>> {
    require_project(conn, project_id)?;
    Ok(query::project_phase_views(conn, project_id)?)
}

/// Computed view of one phase.
///
/// # Errors
///
/// `NotFound` for a phase missing from `project_id`.
pub fn get_phase(conn: &Connection, project_id: i64, phase_id: i64) -> Result<PhaseView> {
    require_project_phase(conn, project_id, phase_id)?;
    query::phase_view(conn, phase_id)?
        .ok_or_else(|| TrackerError::not_found(Entity::Phase, phase_id))
}

fn milestone_project(conn: &Connection, milestone: &Milestone) -> Result<i64> {
    Ok(reload_phase(conn, milestone.phase_id)?.project_id)
}

/// Add a milestone to a phase.
///
/// # Errors
///
/// `NotFound`, `Forbidden`, or `Validation` for an empty title or progress
/// outside 0..=100.
pub fn add_milestone(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    project_id: i64,
    phase_id: i64,
    draft: &MilestoneDraft,
) -> Result<Milestone> {
    debug!(phase_id, actor = actor.user_id, "add milestone");
    require_project_phase(unit, project_id, phase_id)?;
    let project = require_project(unit, project_id)?;
    ensure_manager(actor, &project)?;
    let progress = validate_progress(draft.progress)?;

    let milestone = Milestone {
        id: 0,
        phase_id,
        title: non_empty(&draft.title, "milestone title")?,
        due_date: draft.due_date,
        progress,
        completed: progress == 100,
        created_at_us: unit.now_us(),
        updated_at_us: unit.now_us(),
    };
    let milestone_id = write::insert_milestone(unit, &milestone, unit.now_us())?;
    query::get_milestone(unit, milestone_id)?
        .ok_or_else(|| TrackerError::not_found(Entity::Milestone, milestone_id))
}

/// Update a milestone; `completed` follows progress.
///
/// # Errors
///
/// `NotFound`, `Forbidden`, or `Validation` as for [`add_milestone`].
pub fn update_milestone(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    milestone_id: i64,
    patch: &MilestonePatch,
) -> Result<Milestone> {
    debug!(milestone_id, actor = actor.user_id, "update milestone");
    let mut milestone = query::get_milestone(unit, milestone_id)?
        .ok_or_else(|| TrackerError::not_found(Entity::Milestone, milestone_id))?;
    let project = require_project(unit, milestone_project(unit, &milestone)?)?;
    ensure_manager(actor, &project)?;

    if let Some(title) = &patch.title {
        milestone.title = non_empty(title, "milestone title")?;
    }
    if let Some(due_date) = patch.due_date {
        milestone.due_date = due_date;
    }
    if let Some(progress) = patch.progress {
        milestone.progress = validate_progress(progress)?;
    }
    milestone.completed = milestone.progress == 100;

    write::update_milestone(unit, &milestone, unit.now_us())?;
    query::get_milestone(unit, milestone_id)?
        .ok_or_else(|| TrackerError::not_found(Entity::Milestone, milestone_id))
}

/// Delete a milestone and return it.
///
/// # Errors
///
/// `NotFound` or `Forbidden`.
pub fn delete_milestone(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    milestone_id: i64,
) -> Result<Milestone> {
    debug!(milestone_id, actor = actor.user_id, "delete milestone");
    let milestone = query::get_milestone(unit, milestone_id)?
        .ok_or_else(|| TrackerError::not_found(Entity::Milestone, milestone_id))?;
    let project = require_project(unit, milestone_project(unit, &milestone)?)?;
    ensure_manager(actor, &project)?;
    write::delete_milestone(unit, milestone_id)?;
    Ok(milestone)
}
