//! Fault-injection tests for multi-entity operations.
//!
//! Scenarios:
//! 1. A store failure late in phase deletion (while removing milestones)
//!    leaves tasks, the phase, its milestones and the project untouched.
//! 2. A failure while recording a notification rolls back the task write
//!    that preceded it, and nothing reaches the live channel.
//! 3. A failed attachment unit removes the blob it had already stored.

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tempfile::TempDir;
use trellis_core::Tracker;
use trellis_core::auth::Principal;
use trellis_core::blob::{BlobStore, FsBlobStore};
use trellis_core::db;
use trellis_core::error::TrackerError;
use trellis_core::model::notification::LiveEvent;
use trellis_core::model::phase::{MilestoneDraft, PhaseDraft};
use trellis_core::model::project::{NewProject, NewUser, Role};
use trellis_core::model::task::NewTask;
use trellis_core::notify::{LiveChannel, PushError};

const ADMIN: Principal = Principal::new(1_000, Role::Admin);

#[derive(Default)]
struct Counting {
    pushed: Mutex<usize>,
}

impl LiveChannel for Counting {
    fn push(&self, _recipient_id: i64, _event: &LiveEvent) -> Result<usize, PushError> {
        *self.pushed.lock().expect("lock") += 1;
        Ok(1)
    }
}

struct Fixture {
    tracker: Tracker,
    live: Arc<Counting>,
    manager: Principal,
    alice: i64,
    project: i64,
}

fn fixture() -> Fixture {
    let live = Arc::new(Counting::default());
    let mut tracker = Tracker::new(db::open_in_memory().expect("open store"))
        .with_live(Arc::clone(&live) as Arc<dyn LiveChannel>);
    let manager_id = tracker
        .create_user(
            &ADMIN,
            &NewUser {
                name: "Mara".to_string(),
                email: "mara@example.com".to_string(),
                role: Role::Manager,
            },
        )
        .expect("manager")
        .id;
    let alice = tracker
        .create_user(
            &ADMIN,
            &NewUser {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                role: Role::Member,
            },
        )
        .expect("alice")
        .id;
    let manager = Principal::new(manager_id, Role::Manager);
    let project = tracker
        .create_project(
            &manager,
            &NewProject {
                name: "Apollo".to_string(),
                description: None,
                manager_id,
            },
        )
        .expect("project")
        .id;
    Fixture {
        tracker,
        live,
        manager,
        alice,
        project,
    }
}

fn count(tracker: &Tracker, sql: &str) -> i64 {
    tracker
        .connection()
        .query_row(sql, [], |row| row.get(0))
        .expect("count")
}

fn inject(tracker: &Tracker, sql: &str) {
    tracker.connection().execute_batch(sql).expect("install trigger");
}

#[test]
fn phase_deletion_failure_leaves_no_partial_state() {
    let mut f = fixture();
    let phase = f
        .tracker
        .add_phase(
            &f.manager,
            f.project,
            &PhaseDraft {
                name: "Kickoff".to_string(),
                description: None,
                start_date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"),
                end_date: NaiveDate::from_ymd_opt(2024, 1, 31).expect("date"),
                status: None,
            },
        )
        .expect("phase");
    let task = f
        .tracker
        .create_task(
            &f.manager,
            f.project,
            NewTask {
                title: "Charter".to_string(),
                assignee_id: Some(f.alice),
                phase_id: Some(phase.id),
                ..NewTask::default()
            },
        )
        .expect("task");
    f.tracker
        .add_milestone(
            &f.manager,
            f.project,
            phase.id,
            &MilestoneDraft {
                title: "Signed".to_string(),
                due_date: None,
                progress: 50,
            },
        )
        .expect("milestone");

    let pushed_before = *f.live.pushed.lock().expect("lock");
    let notifications_before = count(&f.tracker, "SELECT COUNT(*) FROM notifications");
    let history_before = count(&f.tracker, "SELECT COUNT(*) FROM task_history");

    inject(
        &f.tracker,
        "CREATE TRIGGER fail_milestone_delete BEFORE DELETE ON milestones
         BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
    );

    let err = f
        .tracker
        .delete_phase(&f.manager, f.project, phase.id, true)
        .expect_err("injected failure");
    assert!(matches!(err, TrackerError::Store(_)), "got {err:?}");

    let view = f.tracker.get_task(task.id).expect("task");
    assert!(!view.task.is_archived);
    assert_eq!(view.task.phase_id, Some(phase.id));
    assert_eq!(view.task.assignee_id, Some(f.alice));

    let phase_view = f.tracker.get_phase(f.project, phase.id).expect("phase kept");
    assert_eq!(phase_view.milestones.len(), 1);
    assert_eq!(phase_view.task_count, 1);
    assert_eq!(
        f.tracker.get_project(f.project).expect("project").phases,
        vec![phase.id]
    );

    assert_eq!(
        count(&f.tracker, "SELECT COUNT(*) FROM notifications"),
        notifications_before
    );
    assert_eq!(count(&f.tracker, "SELECT COUNT(*) FROM task_history"), history_before);
    assert_eq!(*f.live.pushed.lock().expect("lock"), pushed_before);
}

#[test]
fn notification_failure_rolls_back_the_assignment() {
    let mut f = fixture();
    let task = f
        .tracker
        .create_task(
            &f.manager,
            f.project,
            NewTask {
                title: "Design".to_string(),
                ..NewTask::default()
            },
        )
        .expect("task");

    inject(
        &f.tracker,
        "CREATE TRIGGER fail_notification BEFORE INSERT ON notifications
         BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
    );

    f.tracker
        .assign_task(&f.manager, task.id, f.alice)
        .expect_err("injected failure");

    let view = f.tracker.get_task(task.id).expect("task");
    assert_eq!(view.task.assignee_id, None);
    assert_eq!(view.history.len(), 1);
    assert!(f.tracker.get_project(f.project).expect("project").team.is_empty());
    assert_eq!(
        count(&f.tracker, "SELECT COUNT(*) FROM user_assigned_tasks"),
        0
    );
    assert_eq!(*f.live.pushed.lock().expect("lock"), 0);
}

#[test]
fn failed_attachment_unit_releases_its_blob() {
    let dir = TempDir::new().expect("tempdir");
    let blobs = Arc::new(FsBlobStore::open(dir.path()).expect("blob store"));
    let f = fixture();
    let mut tracker = f
        .tracker
        .with_blobs(Arc::clone(&blobs) as Arc<dyn BlobStore>, 1024);

    let task = tracker
        .create_task(
            &f.manager,
            f.project,
            NewTask {
                title: "Design".to_string(),
                ..NewTask::default()
            },
        )
        .expect("task");

    // an empty file name fails validation after the blob was written
    let err = tracker
        .attach_file(&f.manager, task.id, "   ", b"diagram bytes")
        .expect_err("empty file name");
    assert!(matches!(err, TrackerError::Validation { .. }), "got {err:?}");

    let handle = blake3::hash(b"diagram bytes").to_hex().to_string();
    assert!(blobs.retrieve(&handle).is_err(), "blob should be released");
}
