use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

use super::ParseEnumError;
use super::double_option;
use super::project::UserSummary;

/// Task workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "on hold")]
    OnHold,
    #[serde(rename = "completed")]
    Completed,
}

impl TaskStatus {
    pub const ALL: [Self; 4] = [Self::Open, Self::InProgress, Self::OnHold, Self::Completed];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in progress",
            Self::OnHold => "on hold",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError {
                expected: "task status",
                got: s.to_string(),
            })
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub const ALL: [Self; 3] = [Self::Low, Self::Medium, Self::High];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|priority| priority.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError {
                expected: "priority",
                got: s.to_string(),
            })
    }
}

/// A stored task row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    pub phase_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assignee_id: Option<i64>,
    pub due_date: Option<NaiveDate>,
    pub is_archived: bool,
    pub created_at_us: i64,
    pub updated_at_us: i64,
}

/// Fields accepted when creating a task.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assignee_id: Option<i64>,
    pub phase_id: Option<i64>,
    pub due_date: Option<NaiveDate>,
}

/// Task fields that participate in history diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskField {
    Title,
    Description,
    Status,
    Priority,
    Assignee,
    DueDate,
    Phase,
    #[serde(rename = "isArchived")]
    Archived,
    Attachments,
}

impl TaskField {
    /// Fields a client patch may change, in history order.
    pub const DIFFABLE: [Self; 6] = [
        Self::Title,
        Self::Description,
        Self::Status,
        Self::Priority,
        Self::Assignee,
        Self::DueDate,
    ];

    /// Wire name, as used in history entries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::Status => "status",
            Self::Priority => "priority",
            Self::Assignee => "assignee",
            Self::DueDate => "dueDate",
            Self::Phase => "phase",
            Self::Archived => "isArchived",
            Self::Attachments => "attachments",
        }
    }

    /// Fields whose change is worth telling the assignee about.
    #[must_use]
    pub const fn notifies_assignee(self) -> bool {
        matches!(self, Self::Assignee | Self::Status | Self::Priority)
    }
}

/// One field-level change inside a history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: TaskField,
    pub old: Value,
    pub new: Value,
}

impl FieldChange {
    /// Capture a typed old/new pair.
    ///
    /// # Errors
    ///
    /// Returns an error if either value fails to serialize.
    pub fn new<T: Serialize + ?Sized>(
        field: TaskField,
        old: &T,
        new: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            field,
            old: serde_json::to_value(old)?,
            new: serde_json::to_value(new)?,
        })
    }
}

/// Partial update for a task. Absent keys leave the field untouched; an
/// explicit `null` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<NaiveDate>>,
}

impl TaskPatch {
    /// Compute the changes this patch would make to `task`, one entry per
    /// field in [`TaskField::DIFFABLE`] whose proposed value differs.
    ///
    /// # Errors
    ///
    /// Returns an error if a value fails to serialize.
    pub fn diff(&self, task: &Task) -> Result<Vec<FieldChange>, serde_json::Error> {
        let mut changes = Vec::new();
        for field in TaskField::DIFFABLE {
            let change = match field {
                TaskField::Title => compare(field, &task.title, self.title.as_ref())?,
                TaskField::Description => {
                    compare(field, &task.description, self.description.as_ref())?
                }
                TaskField::Status => compare(field, &task.status, self.status.as_ref())?,
                TaskField::Priority => compare(field, &task.priority, self.priority.as_ref())?,
                TaskField::Assignee => {
                    compare(field, &task.assignee_id, self.assignee_id.as_ref())?
                }
                TaskField::DueDate => compare(field, &task.due_date, self.due_date.as_ref())?,
                TaskField::Phase | TaskField::Archived | TaskField::Attachments => None,
            };
            changes.extend(change);
        }
        Ok(changes)
    }

    /// Write every present field onto `task`.
    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            task.description.clone_from(description);
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(assignee_id) = self.assignee_id {
            task.assignee_id = assignee_id;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
    }
}

fn compare<T: Serialize + PartialEq>(
    field: TaskField,
    current: &T,
    proposed: Option<&T>,
) -> Result<Option<FieldChange>, serde_json::Error> {
    match proposed {
        Some(value) if value != current => FieldChange::new(field, current, value).map(Some),
        _ => Ok(None),
    }
}

/// Append-only change record on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: i64,
    pub task_id: i64,
    pub action: String,
    pub changes: Vec<FieldChange>,
    pub actor_id: Option<i64>,
    pub created_at_us: i64,
}

/// A file attached to a task; the bytes live in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: i64,
    pub task_id: i64,
    pub handle: String,
    pub file_name: String,
    pub size_bytes: i64,
    pub uploaded_by: Option<i64>,
    pub created_at_us: i64,
}

/// Task joined with its assignee, phase name, history and attachments.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub assignee: Option<UserSummary>,
    pub phase_name: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub attachments: Vec<Attachment>,
}
