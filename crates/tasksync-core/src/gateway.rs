use chrono::{DateTime, Utc};
use tasksync_shared::{AttachmentFile, RawDocument, TASKS_COLLECTION, TaskDraft, TaskPatch, TaskStatus};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::backend::{
    CancelHandle, DocumentStore, IdentityProvider, ObjectStore, TransferCancelled, UploadProgress,
    UploadRequest, object_path,
};
use crate::changelog::{diff_changes, merge_logs};
use crate::datetime::{format_day, parse_due_input, today};
use crate::error::{SyncError, SyncResult};
use crate::mirror::LiveMirror;
use crate::record::{FIELD_CHANGE_LOG, change_log_value, draft_fields, normalize, patch_fields};
use crate::session::Session;
use crate::task::Task;

pub type Clock = fn() -> DateTime<Utc>;

/// Progress feed and cancel hook for an attachment upload. Clone the cancel
/// handle or subscribe to progress before starting the create.
#[derive(Debug)]
pub struct UploadControl {
    progress: watch::Sender<UploadProgress>,
    cancel: CancelHandle,
}

impl Default for UploadControl {
    fn default() -> Self {
        let (progress, _) = watch::channel(UploadProgress::default());
        Self {
            progress,
            cancel: CancelHandle::new(),
        }
    }
}

impl UploadControl {
    pub fn progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

/// Writes task changes to the backend and mirrors them locally right away,
/// so the view does not wait for the next push. The signed-in user is
/// looked up again for every write.
pub struct MutationGateway<'a, I: IdentityProvider, S, O> {
    session: Session<'a, I>,
    store: &'a S,
    objects: &'a O,
    clock: Clock,
}

impl<'a, I, S, O> MutationGateway<'a, I, S, O>
where
    I: IdentityProvider,
    S: DocumentStore,
    O: ObjectStore,
{
    pub fn new(store: &'a S, objects: &'a O, session: &Session<'a, I>) -> SyncResult<Self> {
        session.require_user()?;
        Ok(Self {
            session: *session,
            store,
            objects,
            clock: Utc::now,
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Uid of the account writes are currently attributed to.
    pub fn owner(&self) -> SyncResult<String> {
        Ok(self.session.require_user()?.uid)
    }

    #[instrument(skip(self, draft, mirror, upload), fields(has_attachment = draft.attachment.is_some()))]
    pub async fn create(&self, draft: &TaskDraft, mirror: &mut LiveMirror, upload: &UploadControl) -> SyncResult<Task> {
        let owner = self.owner()?;
        if draft.title.trim().is_empty() {
            return Err(SyncError::EmptyTitle);
        }
        let now = (self.clock)();
        let today = today(now);
        let due = match draft.due_date.as_deref() {
            None => today,
            Some(raw) => parse_due_input(raw, today).map_err(|err| SyncError::InvalidDate(format!("{err:#}")))?,
        };
        if due < today {
            return Err(SyncError::PastDueDate {
                due: format_day(due),
                today: format_day(today),
            });
        }

        let uploaded = match &draft.attachment {
            Some(file) => Some(self.upload(&owner, file, upload).await?),
            None => None,
        };
        let attachment_url = uploaded.as_ref().map(|(_, url)| url.as_str());

        let fields = draft_fields(draft, &owner, due, today, attachment_url);
        let id = match self.store.add(TASKS_COLLECTION, fields.clone()).await {
            Ok(id) => id,
            Err(err) => {
                if let Some((path, _)) = &uploaded {
                    self.discard_object(path).await;
                }
                return Err(SyncError::remote("create task", err));
            }
        };

        let task = normalize(&RawDocument::new(id, fields), now)?;
        self.reconcile(mirror, &owner, task.clone());
        info!(task_id = %task.id, owner = %owner, "task created");
        Ok(task)
    }

    /// Uploads the attachment and returns its object path and URL.
    async fn upload(&self, owner: &str, file: &AttachmentFile, upload: &UploadControl) -> SyncResult<(String, String)> {
        let path = object_path(owner, &file.file_name);
        let request = UploadRequest {
            path: path.clone(),
            bytes: file.bytes.clone(),
        };
        let url = self
            .objects
            .upload(request, &upload.progress, &upload.cancel)
            .await
            .map_err(|err| {
                if err.is::<TransferCancelled>() {
                    SyncError::UploadCancelled
                } else {
                    SyncError::remote("upload attachment", err)
                }
            })?;
        Ok((path, url))
    }

    async fn discard_object(&self, path: &str) {
        match self.objects.remove(path).await {
            Ok(()) => debug!(path, "removed attachment of failed create"),
            Err(err) => warn!(path, error = %format!("{err:#}"), "failed to remove orphaned attachment"),
        }
    }

    /// Persists the fields present in `patch` and appends one change entry
    /// per changed field. The task is re-read from the backend first so the
    /// stored log is merged with, not replaced by, the local one.
    #[instrument(skip(self, patch, mirror))]
    pub async fn update(&self, id: &str, patch: &TaskPatch, mirror: &mut LiveMirror) -> SyncResult<Task> {
        let owner = self.owner()?;
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(SyncError::EmptyTitle);
        }
        let now = (self.clock)();
        let patch = self.canonical_patch(patch, now)?;

        let latest = self
            .store
            .get(TASKS_COLLECTION, id)
            .await
            .map_err(|err| SyncError::remote("read task", err))?
            .ok_or_else(|| SyncError::UnknownTask(id.to_string()))?;
        let server_task = normalize(&latest, now)?;
        if server_task.user_id != owner {
            warn!(task_id = id, "refusing to edit a task owned by another account");
            return Err(SyncError::UnknownTask(id.to_string()));
        }

        let appended = diff_changes(&server_task, &patch, now);
        let local_log = mirror.get(id).map(|t| t.change_log.clone()).unwrap_or_default();
        let merged = merge_logs(&server_task.change_log, &local_log, &appended);

        let mut fields = patch_fields(&patch, now);
        fields.insert(FIELD_CHANGE_LOG.into(), change_log_value(&merged));
        self.store
            .update(TASKS_COLLECTION, id, fields)
            .await
            .map_err(|err| SyncError::remote("update task", err))?;

        let mut updated = server_task;
        updated.apply_patch(&patch);
        updated.last_updated = Some(now.max(updated.created_at));
        updated.change_log = merged;
        self.reconcile(mirror, &owner, updated.clone());
        debug!(task_id = id, appended = appended.len(), log_len = updated.change_log.len(), "task updated");
        Ok(updated)
    }

    pub async fn set_status(&self, id: &str, status: TaskStatus, mirror: &mut LiveMirror) -> SyncResult<Task> {
        self.update(id, &TaskPatch::status(status), mirror).await
    }

    #[instrument(skip(self, mirror))]
    pub async fn delete(&self, id: &str, mirror: &mut LiveMirror) -> SyncResult<()> {
        let owner = self.owner()?;
        self.store
            .delete(TASKS_COLLECTION, id)
            .await
            .map_err(|err| SyncError::remote("delete task", err))?;
        mirror.remove_local(id);
        info!(task_id = id, owner = %owner, "task deleted");
        Ok(())
    }

    /// Rewrites a user-entered due date into the stored day encoding.
    fn canonical_patch(&self, patch: &TaskPatch, now: DateTime<Utc>) -> SyncResult<TaskPatch> {
        let mut patch = patch.clone();
        if let Some(raw) = patch.due_date.take() {
            let due = parse_due_input(&raw, today(now)).map_err(|err| SyncError::InvalidDate(format!("{err:#}")))?;
            patch.due_date = Some(format_day(due));
        }
        Ok(patch)
    }

    fn reconcile(&self, mirror: &mut LiveMirror, owner: &str, task: Task) {
        if mirror.owner() == owner {
            mirror.upsert_local(task);
        } else {
            warn!(task_id = %task.id, "mirror belongs to another account; skipping optimistic update");
        }
    }
}
