//! Task lifecycle: creation, field updates, assignment, completion,
//! archival, join requests and attachments.
//!
//! Every operation that changes a task row appends exactly one history entry
//! in the same unit of work.

use rusqlite::Connection;
use tracing::{debug, info};

use super::{
    ensure_live, ensure_manager, non_empty, require_project, require_project_task, require_task,
    require_user,
};
use crate::auth::Principal;
use crate::db::edges::{self, Edge};
use crate::db::{query, write};
use crate::error::{Entity, Result, TrackerError};
use crate::model::notification::NotificationKind;
use crate::model::request::{Decision, JoinRequest, RequestStatus};
use crate::model::task::{
    Attachment, FieldChange, NewTask, Task, TaskField, TaskPatch, TaskStatus, TaskView,
};
use crate::notify::{self, about_request, about_task};
use crate::tx::UnitOfWork;

/// History action labels.
pub mod action {
    pub const CREATED: &str = "Task Created";
    pub const UPDATED: &str = "Task Updated";
    pub const ASSIGNED: &str = "Task Assigned";
    pub const UNASSIGNED: &str = "Task Unassigned";
    pub const COMPLETED: &str = "Task Completed";
    pub const ARCHIVED: &str = "Task Archived";
    pub const ATTACHMENT_ADDED: &str = "Attachment Added";
    pub const ATTACHMENT_REMOVED: &str = "Attachment Removed";
}

fn record(
    unit: &UnitOfWork<'_>,
    task_id: i64,
    label: &str,
    changes: &[FieldChange],
    actor: &Principal,
) -> Result<()> {
    write::insert_history(unit, task_id, label, changes, Some(actor.user_id), unit.now_us())?;
    Ok(())
}

fn reload(unit: &UnitOfWork<'_>, task_id: i64) -> Result<Task> {
    require_task(unit, task_id)
}

/// Drop `user_id` from the project team once they hold no open task there.
fn prune_if_idle(unit: &UnitOfWork<'_>, project_id: i64, user_id: i64) -> Result<()> {
    let open = query::open_task_count_for_assignee(unit, project_id, user_id)?;
    if open == 0 && edges::remove(unit, Edge::ProjectTeam, project_id, user_id)? {
        debug!(project_id, user_id, "user left project team");
    }
    Ok(())
}

/// Bring the assigned lists and the project team in line with an assignee
/// changed through a field update. A new assignee is recorded as
/// `assign_task` records one; a cleared one loses the task from their list
/// and leaves the team when idle.
fn sync_assignee_edges(unit: &UnitOfWork<'_>, task: &Task, previous: Option<i64>) -> Result<()> {
    if let Some(user_id) = task.assignee_id {
        edges::append(unit, Edge::UserAssignedTasks, user_id, task.id)?;
        if edges::append(unit, Edge::ProjectTeam, task.project_id, user_id)? {
            debug!(project_id = task.project_id, user_id, "user joined project team");
        }
    }
    if let (None, Some(former)) = (task.assignee_id, previous) {
        edges::remove(unit, Edge::UserAssignedTasks, former, task.id)?;
        prune_if_idle(unit, task.project_id, former)?;
    }
    Ok(())
}

/// Create a task on `project_id`.
///
/// # Errors
///
/// `NotFound` for a missing project, assignee or phase; `Validation` for an
/// empty title or a phase from another project.
pub fn create_task(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    project_id: i64,
    draft: NewTask,
) -> Result<Task> {
    debug!(project_id, actor = actor.user_id, "create task");
    let project = require_project(unit, project_id)?;
    let title = non_empty(&draft.title, "task title")?;

    if let Some(assignee_id) = draft.assignee_id {
        require_user(unit, assignee_id)?;
    }
    if let Some(phase_id) = draft.phase_id {
        let phase = query::get_phase(unit, phase_id)?
            .ok_or_else(|| TrackerError::not_found(Entity::Phase, phase_id))?;
        if phase.project_id != project_id {
            return Err(TrackerError::validation(format!(
                "phase {phase_id} does not belong to project {project_id}"
            )));
        }
    }

    let draft = NewTask { title, ..draft };
    let task_id = write::insert_task(unit, project_id, &draft, unit.now_us())?;
    edges::append(unit, Edge::ProjectTasks, project_id, task_id)?;
    if let Some(assignee_id) = draft.assignee_id {
        edges::append(unit, Edge::UserAssignedTasks, assignee_id, task_id)?;
        edges::append(unit, Edge::ProjectTeam, project_id, assignee_id)?;
    }
    if let Some(phase_id) = draft.phase_id {
        edges::append(unit, Edge::PhaseTasks, phase_id, task_id)?;
    }
    record(unit, task_id, action::CREATED, &[], actor)?;
    write::touch_project(unit, project_id, unit.now_us())?;

    let task = reload(unit, task_id)?;
    let exclude: Vec<i64> = task.assignee_id.into_iter().collect();
    notify::notify_team(
        unit,
        project_id,
        &about_task(
            NotificationKind::TaskCreated,
            &task,
            format!("New task '{}' in project '{}'", task.title, project.name),
        ),
        &exclude,
    )?;
    if let Some(assignee_id) = task.assignee_id {
        notify::create_notification(
            unit,
            assignee_id,
            &about_task(
                NotificationKind::TaskAssigned,
                &task,
                format!("You have been assigned to task '{}'", task.title),
            ),
        )?;
    }

    info!(task_id, project_id, "task created");
    Ok(task)
}

/// Apply a partial update to a task.
///
/// An empty diff is a successful no-op: nothing is written and no history is
/// recorded. An `assigneeId` change keeps the assigned lists and the project
/// team in step in the same unit, and a cleared assignee is told.
///
/// # Errors
///
/// `NotFound` if the task is missing or not on `project_id`; `Conflict` for
/// an archived task; `Validation` for an empty title.
pub fn update_task(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    project_id: i64,
    task_id: i64,
    patch: &TaskPatch,
) -> Result<Task> {
    debug!(task_id, project_id, actor = actor.user_id, "update task");
    let mut task = require_project_task(unit, project_id, task_id)?;
    ensure_live(&task)?;

    let mut patch = patch.clone();
    if let Some(title) = &patch.title {
        patch.title = Some(non_empty(title, "task title")?);
    }

    let changes = patch.diff(&task)?;
    if changes.is_empty() {
        debug!(task_id, "patch matches stored task; nothing to do");
        return Ok(task);
    }
    if let Some(Some(assignee_id)) = patch.assignee_id {
        require_user(unit, assignee_id)?;
    }

    let previous_assignee = task.assignee_id;
    patch.apply(&mut task);
    write::update_task(unit, &task, unit.now_us())?;
    if changes.iter().any(|change| change.field == TaskField::Assignee) {
        sync_assignee_edges(unit, &task, previous_assignee)?;
    }
    if let (TaskStatus::Completed, Some(assignee_id)) = (task.status, task.assignee_id) {
        prune_if_idle(unit, task.project_id, assignee_id)?;
    }
    record(unit, task_id, action::UPDATED, &changes, actor)?;

    let task = reload(unit, task_id)?;
    if let (None, Some(former)) = (task.assignee_id, previous_assignee) {
        notify::create_notification(
            unit,
            former,
            &about_task(
                NotificationKind::TaskUnassigned,
                &task,
                format!("You have been unassigned from task '{}'", task.title),
            ),
        )?;
    }
    let worth_telling = changes.iter().any(|change| change.field.notifies_assignee());
    if let (true, Some(assignee_id)) = (worth_telling, task.assignee_id) {
        let fields: Vec<&str> = changes.iter().map(|change| change.field.as_str()).collect();
        notify::create_notification(
            unit,
            assignee_id,
            &about_task(
                NotificationKind::TaskUpdated,
                &task,
                format!("Task '{}' was updated: {}", task.title, fields.join(", ")),
            ),
        )?;
    }
    Ok(task)
}

/// Assign a task to a user.
///
/// The task joins the user's assigned list and the user joins the project
/// team. A previous assignee keeps the task on their own list. Re-assigning
/// the current assignee changes nothing.
///
/// # Errors
///
/// `NotFound` for a missing task or user; `Conflict` for an archived task.
pub fn assign_task(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    task_id: i64,
    user_id: i64,
) -> Result<Task> {
    debug!(task_id, user_id, actor = actor.user_id, "assign task");
    let mut task = require_task(unit, task_id)?;
    ensure_live(&task)?;
    require_user(unit, user_id)?;

    if task.assignee_id == Some(user_id) {
        debug!(task_id, user_id, "already assigned");
        return Ok(task);
    }

    let change = FieldChange::new(TaskField::Assignee, &task.assignee_id, &Some(user_id))?;
    task.assignee_id = Some(user_id);
    write::update_task(unit, &task, unit.now_us())?;
    edges::append(unit, Edge::UserAssignedTasks, user_id, task_id)?;
    if edges::append(unit, Edge::ProjectTeam, task.project_id, user_id)? {
        debug!(project_id = task.project_id, user_id, "user joined project team");
    }
    record(unit, task_id, action::ASSIGNED, &[change], actor)?;

    let task = reload(unit, task_id)?;
    notify::create_notification(
        unit,
        user_id,
        &about_task(
            NotificationKind::TaskAssigned,
            &task,
            format!("You have been assigned to task '{}'", task.title),
        ),
    )?;
    info!(task_id, user_id, "task assigned");
    Ok(task)
}

/// Clear a task's assignee.
///
/// # Errors
///
/// `NotFound` for a missing task; `InvalidState` when nobody is assigned.
pub fn unassign_task(unit: &mut UnitOfWork<'_>, actor: &Principal, task_id: i64) -> Result<Task> {
    debug!(task_id, actor = actor.user_id, "unassign task");
    let mut task = require_task(unit, task_id)?;
    let Some(former) = task.assignee_id else {
        return Err(TrackerError::InvalidState(format!(
            "task {task_id} has no assignee"
        )));
    };

    let change = FieldChange::new(TaskField::Assignee, &task.assignee_id, &None::<i64>)?;
    task.assignee_id = None;
    write::update_task(unit, &task, unit.now_us())?;
    edges::remove(unit, Edge::UserAssignedTasks, former, task_id)?;
    record(unit, task_id, action::UNASSIGNED, &[change], actor)?;

    let task = reload(unit, task_id)?;
    notify::create_notification(
        unit,
        former,
        &about_task(
            NotificationKind::TaskUnassigned,
            &task,
            format!("You have been unassigned from task '{}'", task.title),
        ),
    )?;
    info!(task_id, former, "task unassigned");
    Ok(task)
}

/// Mark a task completed and tell the project manager.
///
/// If the assignee has no other open work on the project afterwards they
/// leave the project team.
///
/// # Errors
///
/// `NotFound` for a missing task; `Conflict` for an archived task;
/// `InvalidState` if it is already completed.
pub fn complete_task(unit: &mut UnitOfWork<'_>, actor: &Principal, task_id: i64) -> Result<Task> {
    debug!(task_id, actor = actor.user_id, "complete task");
    let mut task = require_task(unit, task_id)?;
    ensure_live(&task)?;
    if task.status == TaskStatus::Completed {
        return Err(TrackerError::InvalidState(format!(
            "task {task_id} is already completed"
        )));
    }
    let project = require_project(unit, task.project_id)?;

    let change = FieldChange::new(TaskField::Status, &task.status, &TaskStatus::Completed)?;
    task.status = TaskStatus::Completed;
    write::update_task(unit, &task, unit.now_us())?;
    record(unit, task_id, action::COMPLETED, &[change], actor)?;

    // counted after the status change so this task no longer counts
    if let Some(assignee_id) = task.assignee_id {
        prune_if_idle(unit, project.id, assignee_id)?;
    }

    let task = reload(unit, task_id)?;
    notify::create_notification(
        unit,
        project.manager_id,
        &about_task(
            NotificationKind::TaskCompleted,
            &task,
            format!("Task '{}' was completed", task.title),
        ),
    )?;
    info!(task_id, project_id = project.id, "task completed");
    Ok(task)
}

/// Archive (soft-delete) a task.
///
/// The task leaves its phase's assigned list but keeps its `phase_id` so the
/// history view can still name the phase.
///
/// # Errors
///
/// `NotFound` if the task is missing or not on `project_id`; `ArchiveBlocked`
/// while the task is assigned; `Conflict` if it is already archived.
pub fn archive_task(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    project_id: i64,
    task_id: i64,
) -> Result<Task> {
    debug!(task_id, project_id, actor = actor.user_id, "archive task");
    let mut task = require_project_task(unit, project_id, task_id)?;
    ensure_live(&task)?;
    if let Some(assignee_id) = task.assignee_id {
        return Err(TrackerError::ArchiveBlocked {
            task_id,
            assignee_id,
        });
    }

    let change = FieldChange::new(TaskField::Archived, &false, &true)?;
    task.is_archived = true;
    write::update_task(unit, &task, unit.now_us())?;
    if let Some(phase_id) = task.phase_id {
        edges::remove(unit, Edge::PhaseTasks, phase_id, task_id)?;
    }
    record(unit, task_id, action::ARCHIVED, &[change], actor)?;

    let task = reload(unit, task_id)?;
    notify::notify_team(
        unit,
        project_id,
        &about_task(
            NotificationKind::TaskArchived,
            &task,
            format!("Task '{}' was archived", task.title),
        ),
        &[],
    )?;
    info!(task_id, project_id, "task archived");
    Ok(task)
}

/// File a pending request by `user_id` to join a task.
///
/// # Errors
///
/// `NotFound` for a missing task or user; `Conflict` for an archived task,
/// when the user already is the assignee, or when a pending request exists.
pub fn request_to_join(
    unit: &mut UnitOfWork<'_>,
    task_id: i64,
    user_id: i64,
) -> Result<JoinRequest> {
    debug!(task_id, user_id, "request to join task");
    let task = require_task(unit, task_id)?;
    ensure_live(&task)?;
    let user = require_user(unit, user_id)?;
    if task.assignee_id == Some(user_id) {
        return Err(TrackerError::Conflict(format!(
            "user {user_id} is already assigned to task {task_id}"
        )));
    }
    if let Some(existing) = query::pending_request(unit, task_id, user_id)? {
        return Err(TrackerError::Conflict(format!(
            "request {} is already pending",
            existing.id
        )));
    }

    let request_id = write::insert_request(unit, task_id, user_id, unit.now_us())?;
    let project = require_project(unit, task.project_id)?;
    notify::create_notification(
        unit,
        project.manager_id,
        &about_request(
            NotificationKind::JoinRequested,
            &task,
            request_id,
            format!("{} asked to join task '{}'", user.name, task.title),
        ),
    )?;

    query::get_request(unit, request_id)?
        .ok_or_else(|| TrackerError::not_found(Entity::Request, request_id))
}

/// Approve or reject a pending join request. Approval assigns the task to the
/// requester; the requester is notified either way.
///
/// # Errors
///
/// `NotFound` if the request is missing or belongs to another task;
/// `Forbidden` unless `actor` manages the project; `Conflict` if the request
/// was already decided; anything [`assign_task`] returns on approval.
pub fn respond_to_join_request(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    task_id: i64,
    request_id: i64,
    decision: Decision,
) -> Result<JoinRequest> {
    debug!(task_id, request_id, ?decision, actor = actor.user_id, "respond to join request");
    let request = match query::get_request(unit, request_id)? {
        Some(request) if request.task_id == task_id => request,
        _ => return Err(TrackerError::not_found(Entity::Request, request_id)),
    };
    let task = require_task(unit, task_id)?;
    let project = require_project(unit, task.project_id)?;
    ensure_manager(actor, &project)?;
    if request.status != RequestStatus::Pending {
        return Err(TrackerError::Conflict(format!(
            "request {request_id} was already {}",
            request.status
        )));
    }

    write::update_request_status(unit, request_id, decision.status(), unit.now_us())?;
    let (kind, verb) = match decision {
        Decision::Approved => {
            assign_task(unit, actor, task_id, request.user_id)?;
            (NotificationKind::JoinApproved, "approved")
        }
        Decision::Rejected => (NotificationKind::JoinRejected, "rejected"),
    };
    notify::create_notification(
        unit,
        request.user_id,
        &about_request(
            kind,
            &task,
            request_id,
            format!("Your request to join task '{}' was {verb}", task.title),
        ),
    )?;
    info!(task_id, request_id, %verb, "join request decided");

    query::get_request(unit, request_id)?
        .ok_or_else(|| TrackerError::not_found(Entity::Request, request_id))
}

/// Record an already-stored blob as a task attachment.
///
/// # Errors
///
/// `NotFound` for a missing task; `Conflict` for an archived task;
/// `Validation` for an empty file name.
pub fn attach_file(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    task_id: i64,
    handle: &str,
    file_name: &str,
    size_bytes: u64,
) -> Result<Attachment> {
    debug!(task_id, %handle, actor = actor.user_id, "attach file");
    let task = require_task(unit, task_id)?;
    ensure_live(&task)?;
    let file_name = non_empty(file_name, "file name")?;
    let size_bytes = i64::try_from(size_bytes)
        .map_err(|_| TrackerError::validation("attachment is too large"))?;

    let attachment_id = write::insert_attachment(
        unit,
        task_id,
        handle,
        &file_name,
        size_bytes,
        Some(actor.user_id),
        unit.now_us(),
    )?;
    let change =
        FieldChange::new(TaskField::Attachments, &None::<&str>, &Some(file_name.as_str()))?;
    write::update_task(unit, &task, unit.now_us())?;
    record(unit, task_id, action::ATTACHMENT_ADDED, &[change], actor)?;

    query::get_attachment(unit, attachment_id)?
        .ok_or_else(|| TrackerError::not_found(Entity::Attachment, attachment_id))
}

/// Remove an attachment record and return it. The blob is left for the
/// caller to release once nothing references it.
///
/// # Errors
///
/// `NotFound` for a missing attachment.
pub fn detach_file(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    attachment_id: i64,
) -> Result<Attachment> {
    debug!(attachment_id, actor = actor.user_id, "detach file");
    let attachment = query::get_attachment(unit, attachment_id)?
        .ok_or_else(|| TrackerError::not_found(Entity::Attachment, attachment_id))?;
    let task = require_task(unit, attachment.task_id)?;

    write::delete_attachment(unit, attachment_id)?;
    let change = FieldChange::new(
        TaskField::Attachments,
        &Some(attachment.file_name.as_str()),
        &None::<&str>,
    )?;
    write::update_task(unit, &task, unit.now_us())?;
    record(unit, task.id, action::ATTACHMENT_REMOVED, &[change], actor)?;
    Ok(attachment)
}

/// Populated views of a project's tasks, archived ones included.
///
/// # Errors
///
/// `NotFound` for a missing project.
pub fn list_tasks(conn: &Connection, project_id: i64) -> Result<Vec<TaskView>> {
    require_project(conn, project_id)?;
    Ok(query::project_task_views(conn, project_id)?)
}

/// Populated view of one task.
///
/// # Errors
///
/// `NotFound` for a missing task.
pub fn get_task(conn: &Connection, task_id: i64) -> Result<TaskView> {
    let task = require_task(conn, task_id)?;
    Ok(query::task_view(conn, task)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::testing::{ALICE, BOB, MANAGER, PROJECT, count, run, seeded};
    use crate::model::task::Priority;
    use serde_json::json;

    fn create(conn: &mut Connection, draft: NewTask) -> Task {
        run(conn, |unit| create_task(unit, &MANAGER, PROJECT, draft))
            .expect("create task")
            .value
    }

    fn titled(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            ..NewTask::default()
        }
    }

    #[test]
    fn create_records_history_and_project_list() {
        let mut conn = seeded();
        let task = create(&mut conn, titled("  Design  "));
        assert_eq!(task.title, "Design");
        assert_eq!(task.status, TaskStatus::Open);

        let project = query::get_project(&conn, PROJECT).expect("query").expect("project");
        assert_eq!(project.tasks, vec![task.id]);
        let history = query::task_history(&conn, task.id).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, action::CREATED);
    }

    #[test]
    fn create_notifies_team_except_assignee() {
        let mut conn = seeded();
        conn.execute_batch(
            "INSERT INTO project_team (project_id, user_id, position) VALUES (1, 2, 0), (1, 3, 1)",
        )
        .expect("team");

        let committed = run(&mut conn, |unit| {
            create_task(
                unit,
                &MANAGER,
                PROJECT,
                NewTask {
                    assignee_id: Some(ALICE),
                    ..titled("Spec")
                },
            )
        })
        .expect("create");

        let created: Vec<i64> = committed
            .notifications
            .iter()
            .filter(|n| n.kind == NotificationKind::TaskCreated)
            .map(|n| n.recipient_id)
            .collect();
        assert_eq!(created, vec![BOB]);
        assert!(
            committed
                .notifications
                .iter()
                .any(|n| n.kind == NotificationKind::TaskAssigned && n.recipient_id == ALICE)
        );
        let user = query::get_user(&conn, ALICE).expect("query").expect("user");
        assert_eq!(user.assigned_tasks, vec![committed.value.id]);
    }

    #[test]
    fn create_on_missing_project_is_not_found() {
        let mut conn = seeded();
        let err = run(&mut conn, |unit| create_task(unit, &MANAGER, 99, titled("x")))
            .expect_err("missing project");
        assert!(matches!(
            err,
            TrackerError::NotFound {
                entity: Entity::Project,
                id: 99
            }
        ));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM tasks"), 0);
    }

    #[test]
    fn create_rejects_empty_title() {
        let mut conn = seeded();
        let err = run(&mut conn, |unit| create_task(unit, &MANAGER, PROJECT, titled("   ")))
            .expect_err("empty title");
        assert!(matches!(err, TrackerError::Validation { .. }));
    }

    #[test]
    fn update_with_equal_fields_is_a_no_op() {
        let mut conn = seeded();
        let task = create(&mut conn, titled("Design"));
        let patch = TaskPatch {
            title: Some("Design".to_string()),
            priority: Some(Priority::Medium),
            ..TaskPatch::default()
        };

        let committed = run(&mut conn, |unit| update_task(unit, &MANAGER, PROJECT, task.id, &patch))
            .expect("update");
        assert_eq!(committed.value, task);
        assert!(committed.notifications.is_empty());
        assert_eq!(query::task_history(&conn, task.id).expect("history").len(), 1);
    }

    #[test]
    fn update_records_diff_and_notifies_assignee() {
        let mut conn = seeded();
        let task = create(
            &mut conn,
            NewTask {
                assignee_id: Some(ALICE),
                ..titled("Design")
            },
        );
        let patch = TaskPatch {
            priority: Some(Priority::High),
            description: Some(Some("wireframes".to_string())),
            ..TaskPatch::default()
        };

        let committed = run(&mut conn, |unit| update_task(unit, &MANAGER, PROJECT, task.id, &patch))
            .expect("update");
        assert_eq!(committed.value.priority, Priority::High);
        assert_eq!(committed.notifications.len(), 1);
        assert_eq!(committed.notifications[0].recipient_id, ALICE);
        assert_eq!(committed.notifications[0].kind, NotificationKind::TaskUpdated);

        let history = query::task_history(&conn, task.id).expect("history");
        let last = history.last().expect("entry");
        assert_eq!(last.action, action::UPDATED);
        assert_eq!(last.changes.len(), 2);
        assert_eq!(last.changes[0].field, TaskField::Description);
        assert_eq!(last.changes[1].old, json!("medium"));
        assert_eq!(last.changes[1].new, json!("high"));
    }

    #[test]
    fn update_of_title_only_does_not_notify() {
        let mut conn = seeded();
        let task = create(
            &mut conn,
            NewTask {
                assignee_id: Some(ALICE),
                ..titled("Design")
            },
        );
        let patch = TaskPatch {
            title: Some("Design v2".to_string()),
            ..TaskPatch::default()
        };
        let committed = run(&mut conn, |unit| update_task(unit, &MANAGER, PROJECT, task.id, &patch))
            .expect("update");
        assert!(committed.notifications.is_empty());
    }

    #[test]
    fn update_from_other_project_is_not_found() {
        let mut conn = seeded();
        let task = create(&mut conn, titled("Design"));
        let patch = TaskPatch {
            title: Some("x".to_string()),
            ..TaskPatch::default()
        };
        let err = run(&mut conn, |unit| update_task(unit, &MANAGER, 42, task.id, &patch))
            .expect_err("wrong project");
        assert!(matches!(err, TrackerError::NotFound { entity: Entity::Task, .. }));
    }

    #[test]
    fn reassign_keeps_stale_back_reference() {
        let mut conn = seeded();
        let task = create(&mut conn, titled("Design"));
        run(&mut conn, |unit| assign_task(unit, &MANAGER, task.id, ALICE)).expect("assign a");
        let committed =
            run(&mut conn, |unit| assign_task(unit, &MANAGER, task.id, BOB)).expect("assign b");

        assert_eq!(committed.value.assignee_id, Some(BOB));
        let alice = query::get_user(&conn, ALICE).expect("query").expect("alice");
        let bob = query::get_user(&conn, BOB).expect("query").expect("bob");
        assert_eq!(alice.assigned_tasks, vec![task.id]);
        assert_eq!(bob.assigned_tasks, vec![task.id]);
        let project = query::get_project(&conn, PROJECT).expect("query").expect("project");
        assert_eq!(project.team, vec![ALICE, BOB]);
    }

    #[test]
    fn assignee_patch_keeps_lists_and_team_in_step() {
        let mut conn = seeded();
        let task = create(&mut conn, titled("Design"));

        let to_alice = TaskPatch {
            assignee_id: Some(Some(ALICE)),
            ..TaskPatch::default()
        };
        let committed =
            run(&mut conn, |unit| update_task(unit, &MANAGER, PROJECT, task.id, &to_alice))
                .expect("patch assignee");
        assert_eq!(committed.value.assignee_id, Some(ALICE));
        let alice = query::get_user(&conn, ALICE).expect("query").expect("alice");
        assert_eq!(alice.assigned_tasks, vec![task.id]);
        let project = query::get_project(&conn, PROJECT).expect("query").expect("project");
        assert_eq!(project.team, vec![ALICE]);

        run(&mut conn, |unit| assign_task(unit, &MANAGER, task.id, BOB)).expect("assign bob");
        let cleared = TaskPatch {
            assignee_id: Some(None),
            ..TaskPatch::default()
        };
        let committed =
            run(&mut conn, |unit| update_task(unit, &MANAGER, PROJECT, task.id, &cleared))
                .expect("clear assignee");
        assert!(
            committed
                .notifications
                .iter()
                .any(|n| n.kind == NotificationKind::TaskUnassigned && n.recipient_id == BOB)
        );

        run(&mut conn, |unit| archive_task(unit, &MANAGER, PROJECT, task.id)).expect("archive");
        let bob = query::get_user(&conn, BOB).expect("query").expect("bob");
        assert!(bob.assigned_tasks.is_empty());
        let project = query::get_project(&conn, PROJECT).expect("query").expect("project");
        assert!(!project.team.contains(&BOB));
    }

    #[test]
    fn completing_through_a_patch_prunes_idle_assignee() {
        let mut conn = seeded();
        let task = create(
            &mut conn,
            NewTask {
                assignee_id: Some(ALICE),
                ..titled("Design")
            },
        );
        let done = TaskPatch {
            status: Some(TaskStatus::Completed),
            ..TaskPatch::default()
        };
        run(&mut conn, |unit| update_task(unit, &MANAGER, PROJECT, task.id, &done))
            .expect("complete via patch");
        let project = query::get_project(&conn, PROJECT).expect("query").expect("project");
        assert!(project.team.is_empty());
    }

    #[test]
    fn assign_missing_user_rolls_back() {
        let mut conn = seeded();
        let task = create(&mut conn, titled("Design"));
        let err = run(&mut conn, |unit| assign_task(unit, &MANAGER, task.id, 77))
            .expect_err("missing user");
        assert!(matches!(
            err,
            TrackerError::NotFound {
                entity: Entity::User,
                id: 77
            }
        ));
        let stored = query::get_task(&conn, task.id).expect("query").expect("task");
        assert_eq!(stored.assignee_id, None);
    }

    #[test]
    fn unassign_without_assignee_is_invalid_state() {
        let mut conn = seeded();
        let task = create(&mut conn, titled("Design"));
        let err = run(&mut conn, |unit| unassign_task(unit, &MANAGER, task.id))
            .expect_err("not assigned");
        assert!(matches!(err, TrackerError::InvalidState(_)));
    }

    #[test]
    fn archive_blocked_while_assigned_then_allowed() {
        let mut conn = seeded();
        let task = create(&mut conn, titled("Design"));
        run(&mut conn, |unit| assign_task(unit, &MANAGER, task.id, ALICE)).expect("assign");

        let err = run(&mut conn, |unit| archive_task(unit, &MANAGER, PROJECT, task.id))
            .expect_err("assigned");
        assert!(matches!(err, TrackerError::ArchiveBlocked { assignee_id: ALICE, .. }));

        let unassigned =
            run(&mut conn, |unit| unassign_task(unit, &MANAGER, task.id)).expect("unassign");
        assert_eq!(unassigned.notifications[0].recipient_id, ALICE);
        let alice = query::get_user(&conn, ALICE).expect("query").expect("alice");
        assert!(alice.assigned_tasks.is_empty());

        let archived = run(&mut conn, |unit| archive_task(unit, &MANAGER, PROJECT, task.id))
            .expect("archive")
            .value;
        assert!(archived.is_archived);

        let again = run(&mut conn, |unit| archive_task(unit, &MANAGER, PROJECT, task.id))
            .expect_err("already archived");
        assert!(matches!(again, TrackerError::Conflict(_)));
    }

    #[test]
    fn complete_prunes_team_only_without_open_work() {
        let mut conn = seeded();
        let first = create(
            &mut conn,
            NewTask {
                assignee_id: Some(ALICE),
                ..titled("one")
            },
        );
        let second = create(
            &mut conn,
            NewTask {
                assignee_id: Some(ALICE),
                ..titled("two")
            },
        );

        let committed =
            run(&mut conn, |unit| complete_task(unit, &MANAGER, first.id)).expect("complete one");
        assert_eq!(committed.notifications[0].recipient_id, MANAGER.user_id);
        let project = query::get_project(&conn, PROJECT).expect("query").expect("project");
        assert_eq!(project.team, vec![ALICE]);

        run(&mut conn, |unit| complete_task(unit, &MANAGER, second.id)).expect("complete two");
        let project = query::get_project(&conn, PROJECT).expect("query").expect("project");
        assert!(project.team.is_empty());

        let err = run(&mut conn, |unit| complete_task(unit, &MANAGER, second.id))
            .expect_err("already completed");
        assert!(matches!(err, TrackerError::InvalidState(_)));
    }

    #[test]
    fn approved_join_request_assigns_and_notifies() {
        let mut conn = seeded();
        let task = create(&mut conn, titled("Design"));

        let filed = run(&mut conn, |unit| request_to_join(unit, task.id, BOB)).expect("request");
        assert_eq!(filed.value.status, RequestStatus::Pending);
        assert_eq!(filed.notifications[0].recipient_id, MANAGER.user_id);

        let dup = run(&mut conn, |unit| request_to_join(unit, task.id, BOB)).expect_err("dup");
        assert!(matches!(dup, TrackerError::Conflict(_)));

        let decided = run(&mut conn, |unit| {
            respond_to_join_request(unit, &MANAGER, task.id, filed.value.id, Decision::Approved)
        })
        .expect("approve");
        assert_eq!(decided.value.status, RequestStatus::Approved);
        let kinds: Vec<NotificationKind> =
            decided.notifications.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![NotificationKind::TaskAssigned, NotificationKind::JoinApproved]
        );
        let stored = query::get_task(&conn, task.id).expect("query").expect("task");
        assert_eq!(stored.assignee_id, Some(BOB));

        let again = run(&mut conn, |unit| {
            respond_to_join_request(unit, &MANAGER, task.id, filed.value.id, Decision::Rejected)
        })
        .expect_err("already decided");
        assert!(matches!(again, TrackerError::Conflict(_)));
    }

    #[test]
    fn only_the_manager_decides_join_requests() {
        let mut conn = seeded();
        let task = create(&mut conn, titled("Design"));
        let filed = run(&mut conn, |unit| request_to_join(unit, task.id, BOB))
            .expect("request")
            .value;
        let member = Principal::new(ALICE, crate::model::project::Role::Member);
        let err = run(&mut conn, |unit| {
            respond_to_join_request(unit, &member, task.id, filed.id, Decision::Rejected)
        })
        .expect_err("forbidden");
        assert!(matches!(err, TrackerError::Forbidden(_)));
    }

    #[test]
    fn attachments_are_recorded_in_history() {
        let mut conn = seeded();
        let task = create(&mut conn, titled("Design"));
        let handle = "a".repeat(64);
        let attachment = run(&mut conn, |unit| {
            attach_file(unit, &MANAGER, task.id, &handle, "brief.pdf", 12)
        })
        .expect("attach")
        .value;

        let view = get_task(&conn, task.id).expect("view");
        assert_eq!(view.attachments, vec![attachment.clone()]);

        run(&mut conn, |unit| detach_file(unit, &MANAGER, attachment.id)).expect("detach");
        let view = get_task(&conn, task.id).expect("view");
        assert!(view.attachments.is_empty());
        let actions: Vec<&str> = view.history.iter().map(|h| h.action.as_str()).collect();
        assert_eq!(
            actions,
            vec![action::CREATED, action::ATTACHMENT_ADDED, action::ATTACHMENT_REMOVED]
        );
    }

    #[test]
    fn list_includes_archived_tasks_with_names() {
        let mut conn = seeded();
        let kept = create(
            &mut conn,
            NewTask {
                assignee_id: Some(ALICE),
                ..titled("kept")
            },
        );
        let gone = create(&mut conn, titled("gone"));
        run(&mut conn, |unit| archive_task(unit, &MANAGER, PROJECT, gone.id)).expect("archive");

        let views = list_tasks(&conn, PROJECT).expect("list");
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].task.id, kept.id);
        assert_eq!(views[0].assignee.as_ref().map(|u| u.name.as_str()), Some("Alice"));
        assert!(views[1].task.is_archived);
    }
}
