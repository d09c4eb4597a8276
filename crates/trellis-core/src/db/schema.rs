//! Canonical SQLite schema for the trellis entity store.
//!
//! Entities are rows; every "list of references" a client sees (a project's
//! team, phases and tasks, a phase's assigned tasks, a user's assigned tasks)
//! is an explicit edge table so that each list mutation is one statement:
//! - `project_team`, `project_phases`, `project_tasks` hang off `projects`
//! - `phase_tasks` keeps ordered, unique phase membership
//! - `user_assigned_tasks` is the assignee back-reference list
//! - `task_history` is append-only, one row per mutating operation

/// Migration v1: entity tables, edge tables and enum/range constraints.
pub const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL CHECK (length(trim(name)) > 0),
    email TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL DEFAULT 'member' CHECK (role IN ('admin', 'manager', 'member')),
    created_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
    project_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL CHECK (length(trim(name)) > 0),
    description TEXT,
    manager_id INTEGER NOT NULL REFERENCES users(user_id),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS phases (
    phase_id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(project_id),
    name TEXT NOT NULL CHECK (length(trim(name)) > 0),
    description TEXT,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'planned'
        CHECK (status IN ('planned', 'in progress', 'completed')),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL,
    CHECK (start_date <= end_date)
);

CREATE TABLE IF NOT EXISTS milestones (
    milestone_id INTEGER PRIMARY KEY AUTOINCREMENT,
    phase_id INTEGER NOT NULL REFERENCES phases(phase_id),
    title TEXT NOT NULL CHECK (length(trim(title)) > 0),
    due_date TEXT,
    progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
    completed INTEGER NOT NULL DEFAULT 0 CHECK (completed IN (0, 1)),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    task_id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(project_id),
    phase_id INTEGER REFERENCES phases(phase_id) ON DELETE SET NULL,
    title TEXT NOT NULL CHECK (length(trim(title)) > 0),
    description TEXT,
    status TEXT NOT NULL DEFAULT 'open'
        CHECK (status IN ('open', 'in progress', 'on hold', 'completed')),
    priority TEXT NOT NULL DEFAULT 'medium' CHECK (priority IN ('low', 'medium', 'high')),
    assignee_id INTEGER REFERENCES users(user_id),
    due_date TEXT,
    is_archived INTEGER NOT NULL DEFAULT 0 CHECK (is_archived IN (0, 1)),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL,
    CHECK (is_archived = 0 OR assignee_id IS NULL)
);

CREATE TABLE IF NOT EXISTS project_team (
    project_id INTEGER NOT NULL REFERENCES projects(project_id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    PRIMARY KEY (project_id, user_id)
);

CREATE TABLE IF NOT EXISTS project_phases (
    project_id INTEGER NOT NULL REFERENCES projects(project_id) ON DELETE CASCADE,
    phase_id INTEGER NOT NULL REFERENCES phases(phase_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    PRIMARY KEY (project_id, phase_id)
);

CREATE TABLE IF NOT EXISTS project_tasks (
    project_id INTEGER NOT NULL REFERENCES projects(project_id) ON DELETE CASCADE,
    task_id INTEGER NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    PRIMARY KEY (project_id, task_id)
);

CREATE TABLE IF NOT EXISTS phase_tasks (
    phase_id INTEGER NOT NULL REFERENCES phases(phase_id) ON DELETE CASCADE,
    task_id INTEGER NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    PRIMARY KEY (phase_id, task_id)
);

CREATE TABLE IF NOT EXISTS user_assigned_tasks (
    user_id INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    task_id INTEGER NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    PRIMARY KEY (user_id, task_id)
);

CREATE TABLE IF NOT EXISTS task_history (
    history_id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
    action TEXT NOT NULL,
    changes_json TEXT NOT NULL DEFAULT '[]',
    actor_id INTEGER,
    created_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS task_attachments (
    attachment_id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
    handle TEXT NOT NULL,
    file_name TEXT NOT NULL,
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
    uploaded_by INTEGER,
    created_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS join_requests (
    request_id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'approved', 'rejected')),
    created_at_us INTEGER NOT NULL,
    decided_at_us INTEGER
);

CREATE TABLE IF NOT EXISTS notifications (
    notification_id INTEGER PRIMARY KEY AUTOINCREMENT,
    recipient_id INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    message TEXT NOT NULL,
    link TEXT NOT NULL,
    kind TEXT NOT NULL,
    related_kind TEXT NOT NULL CHECK (related_kind IN ('project', 'phase', 'task', 'request')),
    related_id INTEGER NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0 CHECK (is_read IN (0, 1)),
    created_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 1);
"#;

/// Migration v2: read-path indexes.
pub const MIGRATION_V2_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_tasks_project_status
    ON tasks(project_id, status, is_archived);

CREATE INDEX IF NOT EXISTS idx_tasks_assignee_project
    ON tasks(assignee_id, project_id, status);

CREATE INDEX IF NOT EXISTS idx_phases_project
    ON phases(project_id);

CREATE INDEX IF NOT EXISTS idx_milestones_phase
    ON milestones(phase_id);

CREATE INDEX IF NOT EXISTS idx_task_history_task
    ON task_history(task_id, history_id);

CREATE INDEX IF NOT EXISTS idx_join_requests_task_user
    ON join_requests(task_id, user_id, status);

CREATE INDEX IF NOT EXISTS idx_notifications_recipient_created
    ON notifications(recipient_id, created_at_us DESC, notification_id DESC);

UPDATE store_meta
SET schema_version = 2
WHERE id = 1;
"#;

/// Indexes expected by list/notification query paths.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_tasks_project_status",
    "idx_tasks_assignee_project",
    "idx_phases_project",
    "idx_milestones_phase",
    "idx_task_history_task",
    "idx_join_requests_task_user",
    "idx_notifications_recipient_created",
];
