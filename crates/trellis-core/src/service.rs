//! [`Tracker`]: the entry point that owns the store connection and the
//! collaborators, runs each lifecycle operation in its own unit of work, and
//! delivers notifications once the unit has committed.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rusqlite::Connection;
use tracing::{error, warn};

use crate::auth::Principal;
use crate::blob::BlobStore;
use crate::db::{self, query};
use crate::error::{Entity, Result, TrackerError};
use crate::lifecycle::phase::{self as phase_ops, PhaseDeletion};
use crate::lifecycle::{project as project_ops, task as task_ops};
use crate::model::notification::{Notification, NotificationPage};
use crate::model::phase::{
    Milestone, MilestoneDraft, MilestonePatch, Phase, PhaseDraft, PhasePatch, PhaseView,
};
use crate::model::project::{NewProject, NewUser, Project, User};
use crate::model::request::{Decision, JoinRequest};
use crate::model::task::{Attachment, NewTask, Task, TaskPatch, TaskView};
use crate::notify::{self, LiveChannel, Offline};
use crate::tx::{UnitOfWork, with_transaction};

/// Default cap on a single attachment, in bytes.
pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

pub struct Tracker {
    conn: Connection,
    live: Arc<dyn LiveChannel>,
    blobs: Option<Arc<dyn BlobStore>>,
    max_attachment_bytes: u64,
}

impl Tracker {
    /// Wrap an already-migrated connection. Nobody is connected live and no
    /// blob store is configured until the `with_*` builders say otherwise.
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            live: Arc::new(Offline),
            blobs: None,
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        }
    }

    /// Open (and migrate) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or migrated.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = db::open_store(path)
            .with_context(|| format!("open tracker store {}", path.display()))?;
        Ok(Self::new(conn))
    }

    #[must_use]
    pub fn with_live(mut self, live: Arc<dyn LiveChannel>) -> Self {
        self.live = live;
        self
    }

    #[must_use]
    pub fn with_blobs(mut self, blobs: Arc<dyn BlobStore>, max_bytes: u64) -> Self {
        self.blobs = Some(blobs);
        self.max_attachment_bytes = max_bytes;
        self
    }

    /// Read access to the underlying store.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    fn run<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut UnitOfWork<'_>) -> Result<T>,
    ) -> Result<T> {
        let committed = with_transaction(&mut self.conn, f).inspect_err(|err| {
            if err.is_internal() {
                error!(op, error = %err, "operation failed");
            } else {
                tracing::debug!(op, error = %err, "operation rejected");
            }
        })?;
        notify::deliver(self.live.as_ref(), &committed.notifications);
        Ok(committed.value)
    }

    fn blob_store(&self) -> Result<Arc<dyn BlobStore>> {
        self.blobs.clone().ok_or_else(|| {
            TrackerError::Blob(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "no attachment storage configured",
            ))
        })
    }

    // -- bootstrap ---------------------------------------------------------

    /// # Errors
    ///
    /// See [`project_ops::create_user`].
    pub fn create_user(&mut self, actor: &Principal, draft: &NewUser) -> Result<User> {
        self.run("create_user", |unit| project_ops::create_user(unit, actor, draft))
    }

    /// # Errors
    ///
    /// See [`project_ops::create_project`].
    pub fn create_project(&mut self, actor: &Principal, draft: &NewProject) -> Result<Project> {
        self.run("create_project", |unit| project_ops::create_project(unit, actor, draft))
    }

    /// # Errors
    ///
    /// `NotFound` for a missing project.
    pub fn get_project(&self, project_id: i64) -> Result<Project> {
        project_ops::get_project(&self.conn, project_id)
    }

    // -- tasks -------------------------------------------------------------

    /// # Errors
    ///
    /// See [`task_ops::create_task`].
    pub fn create_task(
        &mut self,
        actor: &Principal,
        project_id: i64,
        draft: NewTask,
    ) -> Result<Task> {
        self.run("create_task", |unit| task_ops::create_task(unit, actor, project_id, draft))
    }

    /// # Errors
    ///
    /// See [`task_ops::update_task`].
    pub fn update_task(
        &mut self,
        actor: &Principal,
        project_id: i64,
        task_id: i64,
        patch: &TaskPatch,
    ) -> Result<Task> {
        self.run("update_task", |unit| {
            task_ops::update_task(unit, actor, project_id, task_id, patch)
        })
    }

    /// # Errors
    ///
    /// See [`task_ops::assign_task`].
    pub fn assign_task(&mut self, actor: &Principal, task_id: i64, user_id: i64) -> Result<Task> {
        self.run("assign_task", |unit| task_ops::assign_task(unit, actor, task_id, user_id))
    }

    /// # Errors
    ///
    /// See [`task_ops::unassign_task`].
    pub fn unassign_task(&mut self, actor: &Principal, task_id: i64) -> Result<Task> {
        self.run("unassign_task", |unit| task_ops::unassign_task(unit, actor, task_id))
    }

    /// # Errors
    ///
    /// See [`task_ops::complete_task`].
    pub fn complete_task(&mut self, actor: &Principal, task_id: i64) -> Result<Task> {
        self.run("complete_task", |unit| task_ops::complete_task(unit, actor, task_id))
    }

    /// # Errors
    ///
    /// See [`task_ops::archive_task`].
    pub fn archive_task(
        &mut self,
        actor: &Principal,
        project_id: i64,
        task_id: i64,
    ) -> Result<Task> {
        self.run("archive_task", |unit| {
            task_ops::archive_task(unit, actor, project_id, task_id)
        })
    }

    /// # Errors
    ///
    /// See [`task_ops::request_to_join`].
    pub fn request_to_join(&mut self, actor: &Principal, task_id: i64) -> Result<JoinRequest> {
        self.run("request_to_join", |unit| {
            task_ops::request_to_join(unit, task_id, actor.user_id)
        })
    }

    /// # Errors
    ///
    /// See [`task_ops::respond_to_join_request`].
    pub fn respond_to_join_request(
        &mut self,
        actor: &Principal,
        task_id: i64,
        request_id: i64,
        decision: Decision,
    ) -> Result<JoinRequest> {
        self.run("respond_to_join_request", |unit| {
            task_ops::respond_to_join_request(unit, actor, task_id, request_id, decision)
        })
    }

    /// # Errors
    ///
    /// `NotFound` for a missing project.
    pub fn list_tasks(&self, project_id: i64) -> Result<Vec<TaskView>> {
        task_ops::list_tasks(&self.conn, project_id)
    }

    /// # Errors
    ///
    /// `NotFound` for a missing task.
    pub fn get_task(&self, task_id: i64) -> Result<TaskView> {
        task_ops::get_task(&self.conn, task_id)
    }

    // -- attachments -------------------------------------------------------

    /// Store `bytes` and attach them to a task.
    ///
    /// The blob is written before the unit of work opens; if the unit fails
    /// and nothing else references the blob it is removed again.
    ///
    /// # Errors
    ///
    /// `Validation` for an oversized file, storage errors, or anything
    /// [`task_ops::attach_file`] returns.
    pub fn attach_file(
        &mut self,
        actor: &Principal,
        task_id: i64,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<Attachment> {
        let size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        if size > self.max_attachment_bytes {
            return Err(TrackerError::validation(format!(
                "attachment is {size} bytes; the limit is {}",
                self.max_attachment_bytes
            )));
        }
        let blobs = self.blob_store()?;
        let handle = blobs.store(bytes)?;

        let result = self.run("attach_file", |unit| {
            task_ops::attach_file(unit, actor, task_id, &handle, file_name, size)
        });
        if result.is_err() {
            self.release_blob(blobs.as_ref(), &handle);
        }
        result
    }

    /// Remove an attachment; its blob goes too once unreferenced.
    ///
    /// # Errors
    ///
    /// See [`task_ops::detach_file`].
    pub fn detach_file(&mut self, actor: &Principal, attachment_id: i64) -> Result<Attachment> {
        let attachment =
            self.run("detach_file", |unit| task_ops::detach_file(unit, actor, attachment_id))?;
        if let Some(blobs) = self.blobs.clone() {
            self.release_blob(blobs.as_ref(), &attachment.handle);
        }
        Ok(attachment)
    }

    /// Attachments of a task.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing task.
    pub fn list_attachments(&self, task_id: i64) -> Result<Vec<Attachment>> {
        task_ops::get_task(&self.conn, task_id).map(|view| view.attachments)
    }

    /// An attachment record and its bytes.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing attachment, or a storage error.
    pub fn download_attachment(&self, attachment_id: i64) -> Result<(Attachment, Vec<u8>)> {
        let attachment = query::get_attachment(&self.conn, attachment_id)?
            .ok_or_else(|| TrackerError::not_found(Entity::Attachment, attachment_id))?;
        let bytes = self.blob_store()?.retrieve(&attachment.handle)?;
        Ok((attachment, bytes))
    }

    fn release_blob(&self, blobs: &dyn BlobStore, handle: &str) {
        match query::attachment_handle_refs(&self.conn, handle) {
            Ok(0) => {
                if let Err(err) = blobs.delete(handle) {
                    warn!(%handle, error = %err, "failed to delete unreferenced blob");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(%handle, error = %err, "could not count blob references"),
        }
    }

    // -- phases ------------------------------------------------------------

    /// # Errors
    ///
    /// See [`phase_ops::add_phase`].
    pub fn add_phase(
        &mut self,
        actor: &Principal,
        project_id: i64,
        draft: &PhaseDraft,
    ) -> Result<Phase> {
        self.run("add_phase", |unit| phase_ops::add_phase(unit, actor, project_id, draft))
    }

    /// # Errors
    ///
    /// See [`phase_ops::update_phase`].
    pub fn update_phase(
        &mut self,
        actor: &Principal,
        project_id: i64,
        phase_id: i64,
        patch: &PhasePatch,
    ) -> Result<Phase> {
        self.run("update_phase", |unit| {
            phase_ops::update_phase(unit, actor, project_id, phase_id, patch)
        })
    }

    /// # Errors
    ///
    /// See [`phase_ops::delete_phase`].
    pub fn delete_phase(
        &mut self,
        actor: &Principal,
        project_id: i64,
        phase_id: i64,
        archive_tasks: bool,
    ) -> Result<PhaseDeletion> {
        self.run("delete_phase", |unit| {
            phase_ops::delete_phase(unit, actor, project_id, phase_id, archive_tasks)
        })
    }

    /// # Errors
    ///
    /// See [`phase_ops::assign_task_to_phase`].
    pub fn assign_task_to_phase(
        &mut self,
        actor: &Principal,
        project_id: i64,
        phase_id: i64,
        task_id: i64,
    ) -> Result<Task> {
        self.run("assign_task_to_phase", |unit| {
            phase_ops::assign_task_to_phase(unit, actor, project_id, phase_id, task_id)
        })
    }

    /// # Errors
    ///
    /// See [`phase_ops::remove_task_from_phase`].
    pub fn remove_task_from_phase(
        &mut self,
        actor: &Principal,
        project_id: i64,
        phase_id: i64,
        task_id: i64,
    ) -> Result<Task> {
        self.run("remove_task_from_phase", |unit| {
            phase_ops::remove_task_from_phase(unit, actor, project_id, phase_id, task_id)
        })
    }

    /// # Errors
    ///
    /// `NotFound` for a missing project.
    pub fn get_phases(&self, project_id: i64) -> Result<Vec<PhaseView>> {
        phase_ops::get_phases(&self.conn, project_id)
    }

    /// # Errors
    ///
    /// `NotFound` for a phase missing from the project.
    pub fn get_phase(&self, project_id: i64, phase_id: i64) -> Result<PhaseView> {
        phase_ops::get_phase(&self.conn, project_id, phase_id)
    }

    /// # Errors
    ///
    /// See [`phase_ops::add_milestone`].
    pub fn add_milestone(
        &mut self,
        actor: &Principal,
        project_id: i64,
        phase_id: i64,
        draft: &MilestoneDraft,
    ) -> Result<Milestone> {
        self.run("add_milestone", |unit| {
            phase_ops::add_milestone(unit, actor, project_id, phase_id, draft)
        })
    }

    /// # Errors
    ///
    /// See [`phase_ops::update_milestone`].
    pub fn update_milestone(
        &mut self,
        actor: &Principal,
        milestone_id: i64,
        patch: &MilestonePatch,
    ) -> Result<Milestone> {
        self.run("update_milestone", |unit| {
            phase_ops::update_milestone(unit, actor, milestone_id, patch)
        })
    }

    /// # Errors
    ///
    /// See [`phase_ops::delete_milestone`].
    pub fn delete_milestone(&mut self, actor: &Principal, milestone_id: i64) -> Result<Milestone> {
        self.run("delete_milestone", |unit| {
            phase_ops::delete_milestone(unit, actor, milestone_id)
        })
    }

    // -- notifications -----------------------------------------------------

    /// # Errors
    ///
    /// See [`notify::list_notifications`].
    pub fn list_notifications(
        &self,
        actor: &Principal,
        user_id: i64,
        page: u32,
        limit: u32,
    ) -> Result<NotificationPage> {
        notify::list_notifications(&self.conn, actor, user_id, page, limit)
    }

    /// # Errors
    ///
    /// See [`notify::mark_as_read`].
    pub fn mark_as_read(
        &mut self,
        actor: &Principal,
        notification_id: i64,
    ) -> Result<Notification> {
        self.run("mark_as_read", |unit| notify::mark_as_read(unit, actor, notification_id))
    }
}
