//! Notification dispatcher.
//!
//! Records are written inside the caller's unit of work and queued on its
//! outbox; [`deliver`] pushes them to connected clients once the unit has
//! committed. A push failure never fails the operation that produced it.

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::auth::Principal;
use crate::db::edges::{self, Edge};
use crate::db::{query, write};
use crate::error::{Entity, Result, TrackerError};
use crate::model::notification::{
    LiveEvent, Notification, NotificationDraft, NotificationKind, NotificationPage, RelatedKind,
};
use crate::model::task::Task;
use crate::tx::UnitOfWork;

/// Why a live push did not reach its recipient.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("live connection for user {recipient_id} is closed")]
    Closed { recipient_id: i64 },

    #[error("failed to encode live event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Real-time delivery to connected clients, keyed by user id.
pub trait LiveChannel: Send + Sync {
    /// Push `event` to every live connection of `recipient_id`.
    ///
    /// Returns how many connections received it; `Ok(0)` when the user is
    /// offline.
    ///
    /// # Errors
    ///
    /// Returns an error if a connection was found but could not be written.
    fn push(&self, recipient_id: i64, event: &LiveEvent) -> Result<usize, PushError>;
}

/// A channel with nobody connected.
#[derive(Debug, Default, Clone, Copy)]
pub struct Offline;

impl LiveChannel for Offline {
    fn push(&self, _recipient_id: i64, _event: &LiveEvent) -> Result<usize, PushError> {
        Ok(0)
    }
}

/// Persist one notification for `recipient_id` and queue it for delivery.
///
/// # Errors
///
/// Returns an error if the insert fails; the caller's unit then rolls back.
pub fn create_notification(
    unit: &mut UnitOfWork<'_>,
    recipient_id: i64,
    draft: &NotificationDraft,
) -> Result<Notification> {
    let notification = write::insert_notification(unit, recipient_id, draft, unit.now_us())?;
    debug!(
        notification_id = notification.id,
        recipient_id,
        kind = %draft.kind,
        "notification recorded"
    );
    unit.queue(notification.clone());
    Ok(notification)
}

/// Persist one notification per project team member, skipping `exclude`.
///
/// # Errors
///
/// Returns an error if reading the team or any insert fails.
pub fn notify_team(
    unit: &mut UnitOfWork<'_>,
    project_id: i64,
    draft: &NotificationDraft,
    exclude: &[i64],
) -> Result<Vec<Notification>> {
    let team = edges::members(unit, Edge::ProjectTeam, project_id)?;
    let mut sent = Vec::with_capacity(team.len());
    for member in team.into_iter().filter(|member| !exclude.contains(member)) {
        sent.push(create_notification(unit, member, draft)?);
    }
    Ok(sent)
}

/// Push committed notifications to live clients. Failures are logged.
///
/// Returns the number of connections reached.
pub fn deliver(channel: &dyn LiveChannel, notifications: &[Notification]) -> usize {
    let mut reached = 0;
    for notification in notifications {
        let event = LiveEvent::Notification(notification.clone());
        match channel.push(notification.recipient_id, &event) {
            Ok(count) => reached += count,
            Err(err) => warn!(
                notification_id = notification.id,
                recipient_id = notification.recipient_id,
                error = %err,
                "live push failed"
            ),
        }
    }
    reached
}

/// Draft a notification that links to a task.
pub(crate) fn about_task(
    kind: NotificationKind,
    task: &Task,
    message: String,
) -> NotificationDraft {
    NotificationDraft {
        message,
        link: format!("/projects/{}/tasks/{}", task.project_id, task.id),
        kind,
        related_kind: RelatedKind::Task,
        related_id: task.id,
    }
}

/// Draft a notification that links to a join request.
pub(crate) fn about_request(
    kind: NotificationKind,
    task: &Task,
    request_id: i64,
    message: String,
) -> NotificationDraft {
    NotificationDraft {
        message,
        link: format!("/tasks/{}/requests/{request_id}", task.id),
        kind,
        related_kind: RelatedKind::Request,
        related_id: request_id,
    }
}

/// A page of `user_id`'s notifications, newest first. Users see their own;
/// admins see anyone's.
///
/// # Errors
///
/// `Forbidden` for someone else's inbox; `NotFound` for a missing user.
pub fn list_notifications(
    conn: &Connection,
    actor: &Principal,
    user_id: i64,
    page: u32,
    limit: u32,
) -> Result<NotificationPage> {
    if actor.user_id != user_id && !actor.is_admin() {
        return Err(TrackerError::Forbidden(format!(
            "user {} may not read notifications of user {user_id}",
            actor.user_id
        )));
    }
    if query::get_user_summary(conn, user_id)?.is_none() {
        return Err(TrackerError::not_found(Entity::User, user_id));
    }
    Ok(query::notifications_for_user(conn, user_id, page, limit)?)
}

/// Flip the read flag. Only the recipient may do this.
///
/// # Errors
///
/// `NotFound` for a missing notification; `Forbidden` for anyone but the
/// recipient.
pub fn mark_as_read(
    unit: &mut UnitOfWork<'_>,
    actor: &Principal,
    notification_id: i64,
) -> Result<Notification> {
    let notification = query::get_notification(unit, notification_id)?
        .ok_or_else(|| TrackerError::not_found(Entity::Notification, notification_id))?;
    if notification.recipient_id != actor.user_id {
        return Err(TrackerError::Forbidden(format!(
            "notification {notification_id} belongs to another user"
        )));
    }
    if !notification.is_read {
        write::mark_notification_read(unit, notification_id)?;
    }
    Ok(Notification {
        is_read: true,
        ..notification
    })
}
