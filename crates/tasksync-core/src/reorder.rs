//! Drag-and-drop ordering within a status bucket. Display only: nothing
//! here reaches the backend, and an order is dropped as soon as the mirror
//! applies a newer snapshot than the one it was made against.

use std::borrow::Borrow;
use std::collections::HashMap;

use tracing::debug;

use crate::task::{Task, TaskStatus};

/// Moves `active_id` to the position currently held by `over_id`
/// (remove, then reinsert). Returns a new sequence, or `None` when the move
/// is a no-op or either id is not displayed.
pub fn move_task<T: Clone + Borrow<Task>>(sequence: &[T], active_id: &str, over_id: &str) -> Option<Vec<T>> {
    if active_id == over_id {
        return None;
    }
    let from = sequence.iter().position(|t| Borrow::<Task>::borrow(t).id == active_id)?;
    let to = sequence.iter().position(|t| Borrow::<Task>::borrow(t).id == over_id)?;

    let mut out = sequence.to_vec();
    let moved = out.remove(from);
    out.insert(to, moved);
    Some(out)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualOrder {
    revision: u64,
    buckets: HashMap<TaskStatus, Vec<String>>,
}

impl ManualOrder {
    /// Records a user-chosen order for `bucket`, valid for mirror `revision`.
    pub fn record(&mut self, revision: u64, bucket: TaskStatus, ids: Vec<String>) {
        if revision != self.revision {
            self.buckets.clear();
            self.revision = revision;
        }
        debug!(revision, bucket = %bucket, count = ids.len(), "recorded manual order");
        self.buckets.insert(bucket, ids);
    }

    pub fn is_current(&self, revision: u64, bucket: TaskStatus) -> bool {
        self.revision == revision && self.buckets.contains_key(&bucket)
    }

    /// Orders `tasks` by the recorded ids when the order is still current.
    /// Tasks the order does not know about keep their relative order at the
    /// end.
    pub fn apply<'a>(&self, revision: u64, bucket: TaskStatus, tasks: Vec<&'a Task>) -> Vec<&'a Task> {
        if self.revision != revision {
            return tasks;
        }
        let Some(ids) = self.buckets.get(&bucket) else {
            return tasks;
        };
        let rank: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        let mut ordered = tasks;
        ordered.sort_by_key(|task| rank.get(task.id.as_str()).copied().unwrap_or(usize::MAX));
        ordered
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}
