use std::fmt;

const ENUM_VALUES_HINT: &str = "Task status: open, in progress, on hold, completed. \
    Phase status: planned, in progress, completed.";

/// Machine-readable error codes surfaced to API clients next to the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    ValidationFailed,
    InvalidEnumValue,
    InvalidDateRange,
    EntityNotFound,
    InvalidState,
    Conflict,
    ArchiveBlocked,
    Unauthorized,
    Forbidden,
    StoreFailure,
    BlobStoreFailure,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::ValidationFailed => "E2001",
            Self::InvalidEnumValue => "E2002",
            Self::InvalidDateRange => "E2003",
            Self::EntityNotFound => "E3001",
            Self::InvalidState => "E3002",
            Self::Conflict => "E3003",
            Self::ArchiveBlocked => "E3004",
            Self::Unauthorized => "E4001",
            Self::Forbidden => "E4002",
            Self::StoreFailure => "E5001",
            Self::BlobStoreFailure => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::ValidationFailed => "Validation failed",
            Self::InvalidEnumValue => "Invalid status/priority value",
            Self::InvalidDateRange => "Start date is after end date",
            Self::EntityNotFound => "Entity not found",
            Self::InvalidState => "Operation not valid in current state",
            Self::Conflict => "Operation blocked by current state",
            Self::ArchiveBlocked => "Task is still assigned",
            Self::Unauthorized => "Missing or invalid credential",
            Self::Forbidden => "Principal lacks the required role",
            Self::StoreFailure => "Entity store failure",
            Self::BlobStoreFailure => "Attachment storage failure",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint for operators and clients.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in trellis.toml and restart."),
            Self::InvalidEnumValue => Some(ENUM_VALUES_HINT),
            Self::InvalidDateRange => Some("Choose an end date on or after the start date."),
            Self::ArchiveBlocked => Some("Unassign the task before archiving it."),
            Self::Unauthorized => Some("Send `Authorization: Bearer <token>`."),
            Self::StoreFailure | Self::InternalUnexpected => {
                Some("Retry once. If persistent, report a bug with logs.")
            }
            Self::ValidationFailed
            | Self::EntityNotFound
            | Self::InvalidState
            | Self::Conflict
            | Self::Forbidden
            | Self::BlobStoreFailure => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Entity kinds referenced by [`TrackerError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Project,
    Phase,
    Milestone,
    Task,
    User,
    Request,
    Notification,
    Attachment,
}

impl Entity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Phase => "phase",
            Self::Milestone => "milestone",
            Self::Task => "task",
            Self::User => "user",
            Self::Request => "request",
            Self::Notification => "notification",
            Self::Attachment => "attachment",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by lifecycle operations and the entity store.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("{message}")]
    Validation { code: ErrorCode, message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: i64 },

    #[error("{0}")]
    Conflict(String),

    #[error("task {task_id} is assigned to user {assignee_id}; unassign it before archiving")]
    ArchiveBlocked { task_id: i64, assignee_id: i64 },

    #[error("{0}")]
    InvalidState(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("blob store error: {0}")]
    Blob(#[from] std::io::Error),
}

impl TrackerError {
    /// Plain validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            code: ErrorCode::ValidationFailed,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn not_found(entity: Entity, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { code, .. } => *code,
            Self::NotFound { .. } => ErrorCode::EntityNotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::ArchiveBlocked { .. } => ErrorCode::ArchiveBlocked,
            Self::InvalidState(_) => ErrorCode::InvalidState,
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::Store(_) => ErrorCode::StoreFailure,
            Self::Encoding(_) => ErrorCode::InternalUnexpected,
            Self::Blob(_) => ErrorCode::BlobStoreFailure,
        }
    }

    /// Whether the message is safe to show to API clients verbatim.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Encoding(_) | Self::Blob(_))
    }
}

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;
