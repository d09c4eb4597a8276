//! Typed read helpers for the entity store.
//!
//! Every function takes a shared `&Connection` (a transaction derefs to one)
//! and returns typed records, never raw rows. Missing rows come back as
//! `Ok(None)`; deciding whether that is an error is the caller's job.
//!
//! The phase read path is an explicit pipeline: load phase rows, join their
//! member tasks and milestones, then project the computed counters.

use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};

use super::edges::{self, Edge};
use super::{date_column, optional_date_column, parse_column};
use crate::model::notification::{Notification, NotificationPage};
use crate::model::phase::{Milestone, Phase, PhaseView};
use crate::model::project::{Project, User, UserSummary};
use crate::model::request::JoinRequest;
use crate::model::task::{Attachment, FieldChange, HistoryEntry, Task, TaskStatus, TaskView};

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

const TASK_COLUMNS: &str = "task_id, project_id, phase_id, title, description, status, priority, \
     assignee_id, due_date, is_archived, created_at_us, updated_at_us";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        project_id: row.get(1)?,
        phase_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: parse_column(row, 5)?,
        priority: parse_column(row, 6)?,
        assignee_id: row.get(7)?,
        due_date: optional_date_column(row, 8)?,
        is_archived: row.get(9)?,
        created_at_us: row.get(10)?,
        updated_at_us: row.get(11)?,
    })
}

const MILESTONE_COLUMNS: &str =
    "milestone_id, phase_id, title, due_date, progress, completed, created_at_us, updated_at_us";

fn milestone_from_row(row: &Row<'_>) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        id: row.get(0)?,
        phase_id: row.get(1)?,
        title: row.get(2)?,
        due_date: optional_date_column(row, 3)?,
        progress: row.get(4)?,
        completed: row.get(5)?,
        created_at_us: row.get(6)?,
        updated_at_us: row.get(7)?,
    })
}

const NOTIFICATION_COLUMNS: &str = "notification_id, recipient_id, message, link, kind, \
     related_kind, related_id, is_read, created_at_us";

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        message: row.get(2)?,
        link: row.get(3)?,
        kind: parse_column(row, 4)?,
        related_kind: parse_column(row, 5)?,
        related_id: row.get(6)?,
        is_read: row.get(7)?,
        created_at_us: row.get(8)?,
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let changes_json: String = row.get(3)?;
    let changes: Vec<FieldChange> = serde_json::from_str(&changes_json)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(err)))?;
    Ok(HistoryEntry {
        id: row.get(0)?,
        task_id: row.get(1)?,
        action: row.get(2)?,
        changes,
        actor_id: row.get(4)?,
        created_at_us: row.get(5)?,
    })
}

fn attachment_from_row(row: &Row<'_>) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: row.get(0)?,
        task_id: row.get(1)?,
        handle: row.get(2)?,
        file_name: row.get(3)?,
        size_bytes: row.get(4)?,
        uploaded_by: row.get(5)?,
        created_at_us: row.get(6)?,
    })
}

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<JoinRequest> {
    Ok(JoinRequest {
        id: row.get(0)?,
        task_id: row.get(1)?,
        user_id: row.get(2)?,
        status: parse_column(row, 3)?,
        created_at_us: row.get(4)?,
        decided_at_us: row.get(5)?,
    })
}

// ---------------------------------------------------------------------------
// Single-entity lookups
// ---------------------------------------------------------------------------

/// Load a user with its assigned-task list.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_user(conn: &Connection, user_id: i64) -> rusqlite::Result<Option<User>> {
    let row = conn
        .query_row(
            "SELECT user_id, name, email, role, created_at_us FROM users WHERE user_id = ?1",
            [user_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    parse_column(row, 3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((id, name, email, role, created_at_us)) = row else {
        return Ok(None);
    };
    Ok(Some(User {
        id,
        name,
        email,
        role,
        assigned_tasks: edges::members(conn, Edge::UserAssignedTasks, id)?,
        created_at_us,
    }))
}

/// Load the display slice of a user.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_user_summary(conn: &Connection, user_id: i64) -> rusqlite::Result<Option<UserSummary>> {
    conn.query_row(
        "SELECT user_id, name, email FROM users WHERE user_id = ?1",
        [user_id],
        |row| {
            Ok(UserSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
            })
        },
    )
    .optional()
}

/// Load a project with its team, phase and task lists.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_project(conn: &Connection, project_id: i64) -> rusqlite::Result<Option<Project>> {
    let row = conn
        .query_row(
            "SELECT project_id, name, description, manager_id, created_at_us, updated_at_us
             FROM projects WHERE project_id = ?1",
            [project_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((id, name, description, manager_id, created_at_us, updated_at_us)) = row else {
        return Ok(None);
    };
    Ok(Some(Project {
        id,
        name,
        description,
        manager_id,
        team: edges::members(conn, Edge::ProjectTeam, id)?,
        phases: edges::members(conn, Edge::ProjectPhases, id)?,
        tasks: edges::members(conn, Edge::ProjectTasks, id)?,
        created_at_us,
        updated_at_us,
    }))
}

/// Load a phase with its assigned-task and milestone lists.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_phase(conn: &Connection, phase_id: i64) -> rusqlite::Result<Option<Phase>> {
    let row = conn
        .query_row(
            "SELECT phase_id, project_id, name, description, start_date, end_date, status,
                    created_at_us, updated_at_us
             FROM phases WHERE phase_id = ?1",
            [phase_id],
            |row| {
                Ok(Phase {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                    start_date: date_column(row, 4)?,
                    end_date: date_column(row, 5)?,
                    status: parse_column(row, 6)?,
                    assigned_tasks: Vec::new(),
                    milestones: Vec::new(),
                    created_at_us: row.get(7)?,
                    updated_at_us: row.get(8)?,
                })
            },
        )
        .optional()?;

    let Some(mut phase) = row else {
        return Ok(None);
    };
    phase.assigned_tasks = edges::members(conn, Edge::PhaseTasks, phase.id)?;
    phase.milestones = milestone_ids_for_phase(conn, phase.id)?;
    Ok(Some(phase))
}

/// Load a task row.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_task(conn: &Connection, task_id: i64) -> rusqlite::Result<Option<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1");
    conn.query_row(&sql, [task_id], task_from_row).optional()
}

/// Load a milestone row.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_milestone(conn: &Connection, milestone_id: i64) -> rusqlite::Result<Option<Milestone>> {
    let sql = format!("SELECT {MILESTONE_COLUMNS} FROM milestones WHERE milestone_id = ?1");
    conn.query_row(&sql, [milestone_id], milestone_from_row)
        .optional()
}

/// Load a join request.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_request(conn: &Connection, request_id: i64) -> rusqlite::Result<Option<JoinRequest>> {
    conn.query_row(
        "SELECT request_id, task_id, user_id, status, created_at_us, decided_at_us
         FROM join_requests WHERE request_id = ?1",
        [request_id],
        request_from_row,
    )
    .optional()
}

/// The user's pending request for a task, if any.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn pending_request(
    conn: &Connection,
    task_id: i64,
    user_id: i64,
) -> rusqlite::Result<Option<JoinRequest>> {
    conn.query_row(
        "SELECT request_id, task_id, user_id, status, created_at_us, decided_at_us
         FROM join_requests
         WHERE task_id = ?1 AND user_id = ?2 AND status = 'pending'
         ORDER BY request_id ASC LIMIT 1",
        params![task_id, user_id],
        request_from_row,
    )
    .optional()
}

/// Load a notification.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_notification(
    conn: &Connection,
    notification_id: i64,
) -> rusqlite::Result<Option<Notification>> {
    let sql = format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE notification_id = ?1"
    );
    conn.query_row(&sql, [notification_id], notification_from_row)
        .optional()
}

/// Load an attachment record.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_attachment(
    conn: &Connection,
    attachment_id: i64,
) -> rusqlite::Result<Option<Attachment>> {
    conn.query_row(
        "SELECT attachment_id, task_id, handle, file_name, size_bytes, uploaded_by, created_at_us
         FROM task_attachments WHERE attachment_id = ?1",
        [attachment_id],
        attachment_from_row,
    )
    .optional()
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// History of a task, oldest first.
///
/// # Errors
///
/// Returns an error if the query fails or a stored change list is corrupt.
pub fn task_history(conn: &Connection, task_id: i64) -> rusqlite::Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare_cached(
        "SELECT history_id, task_id, action, changes_json, actor_id, created_at_us
         FROM task_history WHERE task_id = ?1 ORDER BY history_id ASC",
    )?;
    let rows = stmt.query_map([task_id], history_from_row)?;
    rows.collect()
}

/// Attachments of a task, oldest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn task_attachments(conn: &Connection, task_id: i64) -> rusqlite::Result<Vec<Attachment>> {
    let mut stmt = conn.prepare_cached(
        "SELECT attachment_id, task_id, handle, file_name, size_bytes, uploaded_by, created_at_us
         FROM task_attachments WHERE task_id = ?1 ORDER BY attachment_id ASC",
    )?;
    let rows = stmt.query_map([task_id], attachment_from_row)?;
    rows.collect()
}

/// Load tasks by id, preserving the order of `ids` and skipping missing rows.
///
/// # Errors
///
/// Returns an error if a query fails.
pub fn tasks_by_ids(conn: &Connection, ids: &[i64]) -> rusqlite::Result<Vec<Task>> {
    let mut tasks = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(task) = get_task(conn, *id)? {
            tasks.push(task);
        }
    }
    Ok(tasks)
}

/// Tasks on a project's task list, in list order.
///
/// # Errors
///
/// Returns an error if a query fails.
pub fn project_tasks(conn: &Connection, project_id: i64) -> rusqlite::Result<Vec<Task>> {
    let ids = edges::members(conn, Edge::ProjectTasks, project_id)?;
    tasks_by_ids(conn, &ids)
}

/// Populate a task with its assignee, phase name, history and attachments.
///
/// # Errors
///
/// Returns an error if a query fails.
pub fn task_view(conn: &Connection, task: Task) -> rusqlite::Result<TaskView> {
    let assignee = match task.assignee_id {
        Some(user_id) => get_user_summary(conn, user_id)?,
        None => None,
    };
    let phase_name = match task.phase_id {
        Some(phase_id) => conn
            .query_row(
                "SELECT name FROM phases WHERE phase_id = ?1",
                [phase_id],
                |row| row.get(0),
            )
            .optional()?,
        None => None,
    };
    let history = task_history(conn, task.id)?;
    let attachments = task_attachments(conn, task.id)?;
    Ok(TaskView {
        task,
        assignee,
        phase_name,
        history,
        attachments,
    })
}

/// Populated views of every task on a project's task list.
///
/// # Errors
///
/// Returns an error if a query fails.
pub fn project_task_views(conn: &Connection, project_id: i64) -> rusqlite::Result<Vec<TaskView>> {
    project_tasks(conn, project_id)?
        .into_iter()
        .map(|task| task_view(conn, task))
        .collect()
}

fn milestone_ids_for_phase(conn: &Connection, phase_id: i64) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare_cached(
        "SELECT milestone_id FROM milestones WHERE phase_id = ?1 ORDER BY milestone_id ASC",
    )?;
    let rows = stmt.query_map([phase_id], |row| row.get(0))?;
    rows.collect()
}

/// Milestones of a phase, oldest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn milestones_for_phase(conn: &Connection, phase_id: i64) -> rusqlite::Result<Vec<Milestone>> {
    let sql = format!(
        "SELECT {MILESTONE_COLUMNS} FROM milestones WHERE phase_id = ?1 ORDER BY milestone_id ASC"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map([phase_id], milestone_from_row)?;
    rows.collect()
}

/// Count the user's tasks on a project that are neither completed nor archived.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn open_task_count_for_assignee(
    conn: &Connection,
    project_id: i64,
    user_id: i64,
) -> rusqlite::Result<u64> {
    conn.query_row(
        "SELECT COUNT(*) FROM tasks
         WHERE project_id = ?1 AND assignee_id = ?2
           AND status <> 'completed' AND is_archived = 0",
        params![project_id, user_id],
        |row| row.get(0),
    )
}

/// Number of attachment records still pointing at a blob handle.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn attachment_handle_refs(conn: &Connection, handle: &str) -> rusqlite::Result<u64> {
    conn.query_row(
        "SELECT COUNT(*) FROM task_attachments WHERE handle = ?1",
        [handle],
        |row| row.get(0),
    )
}

// ---------------------------------------------------------------------------
// Phase read pipeline
// ---------------------------------------------------------------------------

/// Computed view of a single phase.
///
/// # Errors
///
/// Returns an error if a query fails.
pub fn phase_view(conn: &Connection, phase_id: i64) -> rusqlite::Result<Option<PhaseView>> {
    match get_phase(conn, phase_id)? {
        Some(phase) => join_phase(conn, phase).map(Some),
        None => Ok(None),
    }
}

/// Computed views of every phase on a project's phase list, in list order.
///
/// # Errors
///
/// Returns an error if a query fails.
pub fn project_phase_views(conn: &Connection, project_id: i64) -> rusqlite::Result<Vec<PhaseView>> {
    let mut views = Vec::new();
    for phase_id in edges::members(conn, Edge::ProjectPhases, project_id)? {
        if let Some(view) = phase_view(conn, phase_id)? {
            views.push(view);
        }
    }
    Ok(views)
}

fn join_phase(conn: &Connection, phase: Phase) -> rusqlite::Result<PhaseView> {
    let tasks = tasks_by_ids(conn, &phase.assigned_tasks)?;
    let milestones = milestones_for_phase(conn, phase.id)?;
    Ok(project_phase(phase, tasks, milestones))
}

/// Projection step of the phase pipeline: derive counters from joined rows.
#[must_use]
pub fn project_phase(phase: Phase, tasks: Vec<Task>, milestones: Vec<Milestone>) -> PhaseView {
    let completed_tasks = tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Completed)
        .count();
    PhaseView {
        id: phase.id,
        project_id: phase.project_id,
        name: phase.name,
        description: phase.description,
        start_date: phase.start_date,
        end_date: phase.end_date,
        status: phase.status,
        task_count: tasks.len(),
        completed_tasks,
        milestone_progress: mean_progress(&milestones),
        assigned_tasks: tasks,
        milestones,
    }
}

/// Arithmetic mean of milestone progress, `0.0` for an empty list.
#[must_use]
pub fn mean_progress(milestones: &[Milestone]) -> f64 {
    if milestones.is_empty() {
        return 0.0;
    }
    let total: f64 = milestones.iter().map(|m| f64::from(m.progress)).sum();
    #[allow(clippy::cast_precision_loss)]
    let count = milestones.len() as f64;
    total / count
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// One page of a user's notifications, newest first. `page` is 1-based.
///
/// # Errors
///
/// Returns an error if a query fails.
pub fn notifications_for_user(
    conn: &Connection,
    user_id: i64,
    page: u32,
    limit: u32,
) -> rusqlite::Result<NotificationPage> {
    let page = page.max(1);
    let limit = limit.max(1);
    let offset = i64::from(page - 1) * i64::from(limit);

    let sql = format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications
         WHERE recipient_id = ?1
         ORDER BY created_at_us DESC, notification_id DESC
         LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let notifications = stmt
        .query_map(params![user_id, i64::from(limit), offset], notification_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let (total, unread): (u64, u64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END), 0)
         FROM notifications WHERE recipient_id = ?1",
        [user_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(NotificationPage {
        notifications,
        page,
        limit,
        total,
        unread,
    })
}
