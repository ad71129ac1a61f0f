use std::collections::HashMap;

use chrono::Utc;
use tasksync_shared::RawDocument;
use tracing::{debug, info, warn};

use crate::backend::{DocumentStore, IdentityProvider, SnapshotStream};
use crate::error::{SyncError, SyncResult};
use crate::record::normalize_snapshot;
use crate::session::Session;
use crate::task::Task;

/// The canonical `id -> Task` mapping. Iteration follows the order in which
/// the backend delivered the documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskTable {
    order: Vec<String>,
    tasks: HashMap<String, Task>,
}

impl TaskTable {
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let mut table = Self::default();
        for task in tasks {
            if table.tasks.contains_key(&task.id) {
                warn!(task_id = %task.id, "duplicate id in snapshot; keeping latest");
            }
            table.upsert(task);
        }
        table
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn upsert(&mut self, task: Task) {
        if !self.tasks.contains_key(&task.id) {
            self.order.push(task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn remove(&mut self, id: &str) -> Option<Task> {
        let removed = self.tasks.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(removed)
    }
}

/// Push-synchronized mirror of every task owned by the signed-in account.
///
/// Each pushed snapshot replaces the whole table; optimistic local writes
/// made between pushes are overwritten by whatever the next snapshot holds,
/// in arrival order.
#[derive(Debug)]
pub struct LiveMirror {
    owner: String,
    table: TaskTable,
    revision: u64,
    stream: Option<SnapshotStream>,
}

impl LiveMirror {
    #[tracing::instrument(skip_all)]
    pub async fn open<I, S>(session: &Session<'_, I>, store: &S) -> SyncResult<Self>
    where
        I: IdentityProvider,
        S: DocumentStore,
    {
        let query = session.owner_query()?;
        let stream = store
            .subscribe(&query)
            .await
            .map_err(|err| SyncError::remote("subscribe", err))?;
        info!(owner = %query.owner, "listening for task updates");
        Ok(Self::attached(query.owner, stream))
    }

    pub fn attached(owner: String, stream: SnapshotStream) -> Self {
        Self {
            owner,
            table: TaskTable::default(),
            revision: 0,
            stream: Some(stream),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn table(&self) -> &TaskTable {
        &self.table
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.table.get(id)
    }

    /// Number of snapshots applied so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_live(&self) -> bool {
        self.stream.is_some()
    }

    #[tracing::instrument(skip(self, docs), fields(count = docs.len(), owner = %self.owner))]
    pub fn apply_snapshot(&mut self, docs: &[RawDocument]) {
        if docs.is_empty() {
            warn!("no tasks found for this user");
        }
        let tasks = normalize_snapshot(docs, &self.owner, Utc::now());
        self.table = TaskTable::from_tasks(tasks);
        self.revision += 1;
        debug!(revision = self.revision, tasks = self.table.len(), "applied snapshot");
    }

    /// Waits for the next pushed snapshot and applies it. Returns `false` once
    /// the subscription is gone.
    pub async fn next(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        match stream.next().await {
            Some(docs) => {
                self.apply_snapshot(&docs);
                true
            }
            None => false,
        }
    }

    /// Applies every snapshot already delivered, oldest first.
    pub fn pump(&mut self) -> usize {
        let mut pending = Vec::new();
        if let Some(stream) = self.stream.as_mut() {
            while let Some(docs) = stream.try_next() {
                pending.push(docs);
            }
        }
        for docs in &pending {
            self.apply_snapshot(docs);
        }
        pending.len()
    }

    pub fn unsubscribe(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.cancel();
            info!(owner = %self.owner, "stopped listening for task updates");
        }
    }

    pub fn upsert_local(&mut self, task: Task) {
        self.table.upsert(task);
    }

    pub fn remove_local(&mut self, id: &str) -> Option<Task> {
        self.table.remove(id)
    }
}

impl Drop for LiveMirror {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tasksync_shared::{Fields, RawDocument};

    use super::{LiveMirror, TaskTable};
    use crate::backend::SnapshotStream;
    use crate::task::sample;

    fn doc(id: &str, owner: &str, title: &str) -> RawDocument {
        let mut fields = Fields::new();
        fields.insert("userId".into(), json!(owner));
        fields.insert("title".into(), json!(title));
        RawDocument::new(id, fields)
    }

    #[test]
    fn table_keeps_first_position_for_duplicates() {
        let table = TaskTable::from_tasks(vec![
            sample("a", "one"),
            sample("b", "two"),
            sample("a", "three"),
        ]);
        assert_eq!(table.len(), 2);
        let titles: Vec<&str> = table.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["three", "two"]);
    }

    #[test]
    fn snapshots_replace_the_table_in_arrival_order() {
        let (tx, stream) = SnapshotStream::channel();
        let mut mirror = LiveMirror::attached("me".to_string(), stream);

        tx.send(vec![doc("a", "me", "A"), doc("b", "me", "B")]).expect("send");
        tx.send(vec![doc("b", "me", "B2")]).expect("send");
        assert_eq!(mirror.pump(), 2);

        assert_eq!(mirror.revision(), 2);
        assert_eq!(mirror.table().len(), 1);
        assert_eq!(mirror.get("b").map(|t| t.title.as_str()), Some("B2"));
    }

    #[test]
    fn push_discards_unpersisted_local_state() {
        let (tx, stream) = SnapshotStream::channel();
        let mut mirror = LiveMirror::attached("me".to_string(), stream);
        mirror.upsert_local(sample("local", "optimistic"));
        tx.send(vec![doc("a", "me", "A")]).expect("send");
        mirror.pump();
        assert!(mirror.get("local").is_none());
        assert!(mirror.get("a").is_some());
    }

    #[test]
    fn unsubscribed_mirror_ignores_pushes() {
        let (tx, stream) = SnapshotStream::channel();
        let mut mirror = LiveMirror::attached("me".to_string(), stream);
        tx.send(vec![doc("a", "me", "A")]).expect("send");
        mirror.pump();

        mirror.unsubscribe();
        assert!(!mirror.is_live());
        let _ = tx.send(vec![doc("b", "me", "B")]);
        assert_eq!(mirror.pump(), 0);
        assert_eq!(mirror.revision(), 1);
        assert!(mirror.get("b").is_none());
    }
}
