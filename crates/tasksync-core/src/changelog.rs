use chrono::{DateTime, Utc};
use tasksync_shared::TaskPatch;
use tracing::debug;

use crate::task::{ChangeEntry, Task, TaskField};

/// Recorded as the old value of a field the task did not have.
pub const MISSING_VALUE: &str = "N/A";

/// One entry per field that `patch` sets to a value different from `old`.
/// All entries of one save share `now`.
pub fn diff_changes(old: &Task, patch: &TaskPatch, now: DateTime<Utc>) -> Vec<ChangeEntry> {
    let entries: Vec<ChangeEntry> = TaskField::EDITABLE
        .into_iter()
        .filter_map(|field| {
            let new_value = field.patched_value(patch)?;
            let old_value = old.field_value(field);
            if old_value.as_deref() == Some(new_value.as_str()) {
                return None;
            }
            Some(ChangeEntry {
                field: field.name().to_string(),
                old_value: old_value.unwrap_or_else(|| MISSING_VALUE.to_string()),
                new_value,
                time: now,
            })
        })
        .collect();
    debug!(task_id = %old.id, changed = entries.len(), "computed field diff");
    entries
}

/// Additive union of logs: the backend's latest log first, then any locally
/// held entries it lacks, then the new entries. Nothing is dropped or
/// reordered, so the result is never shorter than any input.
pub fn merge_logs(server: &[ChangeEntry], local: &[ChangeEntry], appended: &[ChangeEntry]) -> Vec<ChangeEntry> {
    let mut merged: Vec<ChangeEntry> = Vec::with_capacity(server.len() + local.len() + appended.len());
    for entry in server.iter().chain(local).chain(appended) {
        if !merged.contains(entry) {
            merged.push(entry.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tasksync_shared::{TaskPatch, TaskStatus};

    use super::{MISSING_VALUE, diff_changes, merge_logs};
    use crate::task::{ChangeEntry, sample};

    fn at(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 10, hour, 0, 0)
            .single()
            .expect("valid time")
    }

    fn entry(field: &str, old: &str, new: &str, hour: u32) -> ChangeEntry {
        ChangeEntry {
            field: field.to_string(),
            old_value: old.to_string(),
            new_value: new.to_string(),
            time: at(hour),
        }
    }

    #[test]
    fn single_title_edit_yields_one_entry() {
        let old = sample("t1", "A");
        let patch = TaskPatch {
            title: Some("B".to_string()),
            ..TaskPatch::default()
        };
        let entries = diff_changes(&old, &patch, at(9));
        assert_eq!(entries, vec![entry("title", "A", "B", 9)]);
    }

    #[test]
    fn two_fields_share_one_timestamp() {
        let mut old = sample("t1", "A");
        old.description = "old".to_string();
        let patch = TaskPatch {
            title: Some("B".to_string()),
            description: Some("new".to_string()),
            ..TaskPatch::default()
        };
        let entries = diff_changes(&old, &patch, at(9));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].time, entries[1].time);
        assert_eq!(entries[1].field, "description");
    }

    #[test]
    fn unchanged_and_absent_fields_are_skipped() {
        let old = sample("t1", "A");
        let patch = TaskPatch {
            title: Some("A".to_string()),
            status: Some(TaskStatus::InProgress),
            due_date: Some("11-05-2025".to_string()),
            ..TaskPatch::default()
        };
        let entries = diff_changes(&old, &patch, at(9));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], entry("status", "Todo", "In-Progress", 9));
        assert_eq!(entries[1].field, "dueDate");
        assert_eq!(entries[1].old_value, MISSING_VALUE);
    }

    #[test]
    fn merge_is_an_ordered_union() {
        let server = vec![entry("title", "A", "B", 8), entry("category", "Work", "Personal", 8)];
        let local = vec![entry("title", "A", "B", 8)];
        let appended = vec![entry("title", "B", "C", 9)];
        let merged = merge_logs(&server, &local, &appended);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0], server[0]);
        assert_eq!(merged[2], appended[0]);

        let stale_local = vec![entry("status", "Todo", "Done", 7)];
        let merged = merge_logs(&[], &stale_local, &appended);
        assert_eq!(merged, vec![stale_local[0].clone(), appended[0].clone()]);
    }
}
