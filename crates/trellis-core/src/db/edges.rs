//! Ordered reference lists stored as edge tables.
//!
//! Every list is unique per (owner, member); `append` assigns the next
//! position so iteration order is insertion order.

use rusqlite::{Connection, OptionalExtension, params};

/// The reference lists kept by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// `project.team`: users with open work on the project.
    ProjectTeam,
    /// `project.phases`
    ProjectPhases,
    /// `project.tasks`
    ProjectTasks,
    /// `phase.assignedTasks`
    PhaseTasks,
    /// `user.assignedTasks`
    UserAssignedTasks,
}

impl Edge {
    const fn table(self) -> &'static str {
        match self {
            Self::ProjectTeam => "project_team",
            Self::ProjectPhases => "project_phases",
            Self::ProjectTasks => "project_tasks",
            Self::PhaseTasks => "phase_tasks",
            Self::UserAssignedTasks => "user_assigned_tasks",
        }
    }

    const fn owner_column(self) -> &'static str {
        match self {
            Self::ProjectTeam | Self::ProjectPhases | Self::ProjectTasks => "project_id",
            Self::PhaseTasks => "phase_id",
            Self::UserAssignedTasks => "user_id",
        }
    }

    const fn member_column(self) -> &'static str {
        match self {
            Self::ProjectTeam => "user_id",
            Self::ProjectPhases => "phase_id",
            Self::ProjectTasks | Self::PhaseTasks | Self::UserAssignedTasks => "task_id",
        }
    }
}

/// Append `member` to the owner's list unless already present.
///
/// Returns `true` when a row was inserted.
///
/// # Errors
///
/// Returns an error if the insert fails (e.g. a foreign key is violated).
pub fn append(conn: &Connection, edge: Edge, owner: i64, member: i64) -> rusqlite::Result<bool> {
    let (table, owner_col, member_col) = (edge.table(), edge.owner_column(), edge.member_column());
    let sql = format!(
        "INSERT OR IGNORE INTO {table} ({owner_col}, {member_col}, position)
         VALUES (?1, ?2, COALESCE((SELECT MAX(position) + 1 FROM {table} WHERE {owner_col} = ?1), 0))"
    );
    let inserted = conn.execute(&sql, params![owner, member])?;
    Ok(inserted > 0)
}

/// Remove `member` from the owner's list. Returns `true` when it was present.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn remove(conn: &Connection, edge: Edge, owner: i64, member: i64) -> rusqlite::Result<bool> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?1 AND {} = ?2",
        edge.table(),
        edge.owner_column(),
        edge.member_column()
    );
    let removed = conn.execute(&sql, params![owner, member])?;
    Ok(removed > 0)
}

/// Members of the owner's list in insertion order.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn members(conn: &Connection, edge: Edge, owner: i64) -> rusqlite::Result<Vec<i64>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1 ORDER BY position ASC",
        edge.member_column(),
        edge.table(),
        edge.owner_column()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map([owner], |row| row.get(0))?;
    rows.collect()
}

/// Whether `member` is in the owner's list.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn contains(conn: &Connection, edge: Edge, owner: i64, member: i64) -> rusqlite::Result<bool> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE {} = ?1 AND {} = ?2",
        edge.table(),
        edge.owner_column(),
        edge.member_column()
    );
    let found: Option<i64> = conn
        .query_row(&sql, params![owner, member], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Owners whose list contains `member` (e.g. the phases holding a task).
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn owners_of(conn: &Connection, edge: Edge, member: i64) -> rusqlite::Result<Vec<i64>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1 ORDER BY {} ASC",
        edge.owner_column(),
        edge.table(),
        edge.member_column(),
        edge.owner_column()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map([member], |row| row.get(0))?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations;

    fn seeded() -> Connection {
        let mut conn = Connection::open_in_memory().expect("open db");
        migrations::migrate(&mut conn).expect("migrate");
        conn.execute_batch(
            "INSERT INTO users (name, email, created_at_us) VALUES ('a', 'a@x', 0), ('b', 'b@x', 0);
             INSERT INTO projects (name, manager_id, created_at_us, updated_at_us) VALUES ('p', 1, 0, 0);",
        )
        .expect("seed");
        conn
    }

    #[test]
    fn append_is_idempotent_and_ordered() {
        let conn = seeded();
        assert!(append(&conn, Edge::ProjectTeam, 1, 2).expect("append"));
        assert!(append(&conn, Edge::ProjectTeam, 1, 1).expect("append"));
        assert!(!append(&conn, Edge::ProjectTeam, 1, 2).expect("append again"));
        assert_eq!(members(&conn, Edge::ProjectTeam, 1).expect("members"), vec![2, 1]);
    }

    #[test]
    fn remove_reports_presence() {
        let conn = seeded();
        append(&conn, Edge::ProjectTeam, 1, 1).expect("append");
        assert!(contains(&conn, Edge::ProjectTeam, 1, 1).expect("contains"));
        assert!(remove(&conn, Edge::ProjectTeam, 1, 1).expect("remove"));
        assert!(!remove(&conn, Edge::ProjectTeam, 1, 1).expect("remove again"));
        assert!(!contains(&conn, Edge::ProjectTeam, 1, 1).expect("contains"));
    }

    #[test]
    fn append_rejects_dangling_member() {
        let conn = seeded();
        conn.pragma_update(None, "foreign_keys", "ON").expect("fk on");
        assert!(append(&conn, Edge::ProjectTeam, 1, 99).is_err());
    }
}
