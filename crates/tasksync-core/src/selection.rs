use std::collections::BTreeSet;

use tasksync_shared::TaskStatus;
use tracing::{info, instrument, warn};

use crate::backend::{DocumentStore, IdentityProvider, ObjectStore};
use crate::error::SyncError;
use crate::gateway::MutationGateway;
use crate::mirror::{LiveMirror, TaskTable};
use crate::projector::Projection;
use crate::task::Task;

/// Checked task ids. Checking a task never changes its status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: BTreeSet<String>,
}

impl Selection {
    /// Returns whether `id` is selected after the toggle.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.ids.remove(id) {
            false
        } else {
            self.ids.insert(id.to_string());
            true
        }
    }

    pub fn select(&mut self, id: &str) {
        self.ids.insert(id.to_string());
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Selected tasks shown in one status bucket.
    pub fn selected_in<'a>(&self, bucket: TaskStatus, projection: &'a Projection) -> Vec<&'a Task> {
        projection
            .bucket(bucket)
            .into_iter()
            .filter(|task| self.ids.contains(&task.id))
            .collect()
    }

    /// Drops ids the table no longer holds.
    pub fn retain_known(&mut self, table: &TaskTable) {
        self.ids.retain(|id| table.contains(id));
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

/// Outcome of a bulk action. Every id lands in exactly one list.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, SyncError)>,
}

impl BulkReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record<T>(&mut self, id: String, outcome: Result<T, SyncError>) {
        match outcome {
            Ok(_) => self.succeeded.push(id),
            Err(err) => {
                warn!(task_id = %id, error = %err, "bulk action failed for task");
                self.failed.push((id, err));
            }
        }
    }
}

/// Sets every selected task to `status`, one at a time, then clears the
/// selection.
#[instrument(skip_all, fields(count = selection.len(), status = %status))]
pub async fn bulk_set_status<I, S, O>(
    gateway: &MutationGateway<'_, I, S, O>,
    mirror: &mut LiveMirror,
    selection: &mut Selection,
    status: TaskStatus,
) -> BulkReport
where
    I: IdentityProvider,
    S: DocumentStore,
    O: ObjectStore,
{
    let mut report = BulkReport::default();
    for id in selection.ids() {
        let outcome = gateway.set_status(&id, status, mirror).await;
        report.record(id, outcome);
    }
    selection.clear();
    info!(succeeded = report.succeeded.len(), failed = report.failed.len(), "bulk status change done");
    report
}

#[instrument(skip_all, fields(count = selection.len()))]
pub async fn bulk_delete<I, S, O>(
    gateway: &MutationGateway<'_, I, S, O>,
    mirror: &mut LiveMirror,
    selection: &mut Selection,
) -> BulkReport
where
    I: IdentityProvider,
    S: DocumentStore,
    O: ObjectStore,
{
    let mut report = BulkReport::default();
    for id in selection.ids() {
        let outcome = gateway.delete(&id, mirror).await;
        report.record(id, outcome);
    }
    selection.clear();
    info!(succeeded = report.succeeded.len(), failed = report.failed.len(), "bulk delete done");
    report
}
