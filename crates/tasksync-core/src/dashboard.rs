use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDate;
use tasksync_shared::{AttachmentFile, TaskDraft, TaskPatch, TaskStatus};
use tracing::{debug, instrument};

use crate::backend::{DocumentStore, IdentityProvider, ObjectStore};
use crate::error::SyncError;
use crate::gateway::{MutationGateway, UploadControl};
use crate::mirror::LiveMirror;
use crate::projector::{Projection, ViewFilters, project};
use crate::reorder::{ManualOrder, move_task};
use crate::selection::{BulkReport, Selection, bulk_delete, bulk_set_status};
use crate::task::Task;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViewMode {
    #[default]
    List,
    Board,
}

impl ViewMode {
    pub fn toggled(self) -> Self {
        match self {
            ViewMode::List => ViewMode::Board,
            ViewMode::Board => ViewMode::List,
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewMode::List => f.write_str("list"),
            ViewMode::Board => f.write_str("board"),
        }
    }
}

impl FromStr for ViewMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "list" => Ok(ViewMode::List),
            "board" => Ok(ViewMode::Board),
            other => Err(anyhow!("unknown view mode: {other} (expected list or board)")),
        }
    }
}

/// The create-task form. Submitting it successfully resets every field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskForm {
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub status: TaskStatus,
    pub due_date: Option<String>,
    pub attachment: Option<AttachmentFile>,
}

impl TaskForm {
    pub fn draft(&self) -> TaskDraft {
        let mut draft = TaskDraft {
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status,
            due_date: self.due_date.clone(),
            attachment: self.attachment.clone(),
            ..TaskDraft::default()
        };
        if let Some(category) = self.category.as_deref().filter(|c| !c.trim().is_empty()) {
            draft.category = category.trim().to_string();
        }
        draft
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A transient message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

impl From<&SyncError> for Notice {
    fn from(err: &SyncError) -> Self {
        Notice::error(err.to_string())
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            NoticeLevel::Info => write!(f, "{}", self.message),
            NoticeLevel::Error => write!(f, "error: {}", self.message),
        }
    }
}

/// State behind the task dashboard: one live mirror plus everything the user
/// has set on top of it. Failures of user actions end up as notices.
#[derive(Debug)]
pub struct Dashboard {
    mode: ViewMode,
    mirror: LiveMirror,
    filters: ViewFilters,
    order: ManualOrder,
    selection: Selection,
    pub form: TaskForm,
    notices: VecDeque<Notice>,
}

impl Dashboard {
    pub fn new(mirror: LiveMirror, mode: ViewMode) -> Self {
        Self {
            mode,
            mirror,
            filters: ViewFilters::default(),
            order: ManualOrder::default(),
            selection: Selection::default(),
            form: TaskForm::default(),
            notices: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ViewMode) {
        self.mode = mode;
    }

    pub fn toggle_mode(&mut self) -> ViewMode {
        self.mode = self.mode.toggled();
        self.mode
    }

    pub fn mirror(&self) -> &LiveMirror {
        &self.mirror
    }

    pub fn filters(&self) -> &ViewFilters {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut ViewFilters {
        &mut self.filters
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn toggle_selected(&mut self, id: &str) -> bool {
        self.selection.toggle(id)
    }

    pub fn projection(&self, today: NaiveDate) -> Projection {
        project(self.mirror.table(), &self.filters, today)
    }

    /// Tasks of one status bucket as displayed, with any manual order made
    /// since the last snapshot applied.
    pub fn bucket_view(&self, bucket: TaskStatus, today: NaiveDate) -> Vec<Task> {
        let projection = self.projection(today);
        self.order
            .apply(self.mirror.revision(), bucket, projection.bucket(bucket))
            .into_iter()
            .cloned()
            .collect()
    }

    /// Drags `active_id` onto `over_id` within `bucket`. Display only: the
    /// order lasts until the mirror applies its next snapshot.
    pub fn reorder(&mut self, bucket: TaskStatus, active_id: &str, over_id: &str, today: NaiveDate) -> bool {
        let shown = self.bucket_view(bucket, today);
        let Some(moved) = move_task(&shown, active_id, over_id) else {
            return false;
        };
        let ids = moved.into_iter().map(|task| task.id).collect();
        self.order.record(self.mirror.revision(), bucket, ids);
        true
    }

    /// Applies pushed snapshots already waiting. Returns how many.
    pub fn pump(&mut self) -> usize {
        let applied = self.mirror.pump();
        if applied > 0 {
            self.after_snapshot();
        }
        applied
    }

    pub async fn next_snapshot(&mut self) -> bool {
        let live = self.mirror.next().await;
        if live {
            self.after_snapshot();
        }
        live
    }

    fn after_snapshot(&mut self) {
        self.selection.retain_known(self.mirror.table());
        debug!(revision = self.mirror.revision(), "dashboard refreshed");
    }

    #[instrument(skip_all)]
    pub async fn submit_form<I, S, O>(&mut self, gateway: &MutationGateway<'_, I, S, O>, upload: &UploadControl) -> Option<Task>
    where
        I: IdentityProvider,
        S: DocumentStore,
        O: ObjectStore,
    {
        let draft = self.form.draft();
        match gateway.create(&draft, &mut self.mirror, upload).await {
            Ok(task) => {
                self.form.reset();
                self.notify(Notice::info(format!("Created task {}.", task.id)));
                Some(task)
            }
            Err(err) => {
                self.notify((&err).into());
                None
            }
        }
    }

    pub async fn edit<I, S, O>(&mut self, gateway: &MutationGateway<'_, I, S, O>, id: &str, patch: &TaskPatch) -> Option<Task>
    where
        I: IdentityProvider,
        S: DocumentStore,
        O: ObjectStore,
    {
        match gateway.update(id, patch, &mut self.mirror).await {
            Ok(task) => {
                self.notify(Notice::info(format!("Updated task {id}.")));
                Some(task)
            }
            Err(err) => {
                self.notify((&err).into());
                None
            }
        }
    }

    pub async fn delete<I, S, O>(&mut self, gateway: &MutationGateway<'_, I, S, O>, id: &str) -> bool
    where
        I: IdentityProvider,
        S: DocumentStore,
        O: ObjectStore,
    {
        match gateway.delete(id, &mut self.mirror).await {
            Ok(()) => {
                self.notify(Notice::info(format!("Deleted task {id}.")));
                true
            }
            Err(err) => {
                self.notify((&err).into());
                false
            }
        }
    }

    pub async fn bulk_set_status<I, S, O>(&mut self, gateway: &MutationGateway<'_, I, S, O>, status: TaskStatus) -> BulkReport
    where
        I: IdentityProvider,
        S: DocumentStore,
        O: ObjectStore,
    {
        let report = bulk_set_status(gateway, &mut self.mirror, &mut self.selection, status).await;
        self.report(&report, &format!("Moved to {status}"));
        report
    }

    pub async fn bulk_delete<I, S, O>(&mut self, gateway: &MutationGateway<'_, I, S, O>) -> BulkReport
    where
        I: IdentityProvider,
        S: DocumentStore,
        O: ObjectStore,
    {
        let report = bulk_delete(gateway, &mut self.mirror, &mut self.selection).await;
        self.report(&report, "Deleted");
        report
    }

    fn report(&mut self, report: &BulkReport, verb: &str) {
        if !report.succeeded.is_empty() {
            self.notify(Notice::info(format!("{verb} {} task(s).", report.succeeded.len())));
        }
        for (id, err) in &report.failed {
            self.notify(Notice::error(format!("{id}: {err}")));
        }
    }

    pub fn notify(&mut self, notice: Notice) {
        self.notices.push_back(notice);
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    /// Stops the live subscription. Later pushes leave this dashboard as is.
    pub fn unmount(&mut self) {
        self.mirror.unsubscribe();
        self.selection.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;
    use tasksync_shared::{Fields, RawDocument, TaskStatus};

    use super::{Dashboard, Notice, NoticeLevel, TaskForm, ViewMode};
    use crate::backend::SnapshotStream;
    use crate::error::SyncError;
    use crate::mirror::LiveMirror;

    fn doc(id: &str, category: &str) -> RawDocument {
        let mut fields = Fields::new();
        fields.insert("userId".into(), json!("me"));
        fields.insert("title".into(), json!(id));
        fields.insert("category".into(), json!(category));
        fields.insert("status".into(), json!("To Do"));
        RawDocument::new(id, fields)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 10).expect("valid date")
    }

    fn ids(tasks: &[crate::task::Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn view_mode_parses_and_toggles() {
        assert_eq!("Board".parse::<ViewMode>().expect("mode"), ViewMode::Board);
        assert!("grid".parse::<ViewMode>().is_err());
        assert_eq!(ViewMode::List.toggled(), ViewMode::Board);
    }

    #[test]
    fn form_defaults_category_and_resets() {
        let mut form = TaskForm {
            title: "Write".to_string(),
            category: Some("  ".to_string()),
            ..TaskForm::default()
        };
        assert_eq!(form.draft().category, "Work");
        form.reset();
        assert!(form.title.is_empty());
    }

    #[test]
    fn reorder_lasts_until_next_snapshot() {
        let (tx, stream) = SnapshotStream::channel();
        let mut dashboard = Dashboard::new(LiveMirror::attached("me".to_string(), stream), ViewMode::Board);
        tx.send(vec![doc("a", "Work"), doc("b", "Work"), doc("c", "Work")])
            .expect("send");
        dashboard.pump();

        assert!(dashboard.reorder(TaskStatus::Todo, "a", "c", today()));
        assert_eq!(ids(&dashboard.bucket_view(TaskStatus::Todo, today())), vec!["b", "c", "a"]);

        tx.send(vec![doc("a", "Work"), doc("b", "Work"), doc("c", "Work")])
            .expect("send");
        dashboard.pump();
        assert_eq!(ids(&dashboard.bucket_view(TaskStatus::Todo, today())), vec!["a", "b", "c"]);
    }

    #[test]
    fn unmount_stops_updates() {
        let (tx, stream) = SnapshotStream::channel();
        let mut dashboard = Dashboard::new(LiveMirror::attached("me".to_string(), stream), ViewMode::List);
        tx.send(vec![doc("a", "Work")]).expect("send");
        dashboard.pump();
        dashboard.toggle_selected("a");

        dashboard.unmount();
        let _ = tx.send(vec![doc("a", "Work"), doc("b", "Personal")]);
        assert_eq!(dashboard.pump(), 0);
        assert_eq!(dashboard.projection(today()).len(), 1);
        assert!(dashboard.selection().is_empty());
    }

    #[test]
    fn errors_become_error_notices() {
        let notice = Notice::from(&SyncError::EmptyTitle);
        assert_eq!(notice.level, NoticeLevel::Error);
        assert_eq!(notice.to_string(), "error: task title must not be empty");
    }
}
