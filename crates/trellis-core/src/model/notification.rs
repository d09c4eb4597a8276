use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::ParseEnumError;

/// Closed set of notification types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TaskCreated,
    TaskUpdated,
    TaskAssigned,
    TaskUnassigned,
    TaskCompleted,
    TaskArchived,
    JoinRequested,
    JoinApproved,
    JoinRejected,
}

impl NotificationKind {
    pub const ALL: [Self; 9] = [
        Self::TaskCreated,
        Self::TaskUpdated,
        Self::TaskAssigned,
        Self::TaskUnassigned,
        Self::TaskCompleted,
        Self::TaskArchived,
        Self::JoinRequested,
        Self::JoinApproved,
        Self::JoinRejected,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskUpdated => "task_updated",
            Self::TaskAssigned => "task_assigned",
            Self::TaskUnassigned => "task_unassigned",
            Self::TaskCompleted => "task_completed",
            Self::TaskArchived => "task_archived",
            Self::JoinRequested => "join_requested",
            Self::JoinApproved => "join_approved",
            Self::JoinRejected => "join_rejected",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                expected: "notification kind",
                got: s.to_string(),
            })
    }
}

/// Entity a notification points back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelatedKind {
    Project,
    Phase,
    Task,
    Request,
}

impl RelatedKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Phase => "phase",
            Self::Task => "task",
            Self::Request => "request",
        }
    }
}

impl FromStr for RelatedKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(Self::Project),
            "phase" => Ok(Self::Phase),
            "task" => Ok(Self::Task),
            "request" => Ok(Self::Request),
            _ => Err(ParseEnumError {
                expected: "related entity kind",
                got: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    pub message: String,
    pub link: String,
    pub kind: NotificationKind,
    pub related_kind: RelatedKind,
    pub related_id: i64,
    pub is_read: bool,
    pub created_at_us: i64,
}

/// Everything about a notification except who receives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDraft {
    pub message: String,
    pub link: String,
    pub kind: NotificationKind,
    pub related_kind: RelatedKind,
    pub related_id: i64,
}

/// A page of a user's notifications, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub unread: u64,
}

/// Event pushed over the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum LiveEvent {
    Notification(Notification),
}
