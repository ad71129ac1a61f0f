use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Value, json};
use tasksync_shared::{BackendTimestamp, Fields, RawDocument, TaskDraft, TaskPatch, TaskStatus};
use tracing::{trace, warn};

use crate::datetime::{format_day, parse_instant, timestamp_to_utc, to_project_date, utc_to_timestamp};
use crate::error::{SyncError, SyncResult};
use crate::task::{ChangeEntry, DueDate, Task, TaskField};

pub const FIELD_USER_ID: &str = "userId";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_LAST_UPDATED: &str = "lastUpdated";
pub const FIELD_ATTACHMENT: &str = "attachment";
pub const FIELD_CHANGE_LOG: &str = "changeLog";

/// Maps a stored status label onto the canonical enumeration. Exact,
/// case-sensitive match; anything else falls back to `Todo`.
pub fn normalize_status(raw: &str) -> TaskStatus {
    let status = match raw {
        "To Do" => TaskStatus::Todo,
        "In Progress" | "In-Progress" => TaskStatus::InProgress,
        "Done" | "Completed" => TaskStatus::Completed,
        _ => TaskStatus::Todo,
    };
    trace!(raw, mapped = %status, "normalized status");
    status
}

/// Label written to the backend for a canonical status.
fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "To Do",
        TaskStatus::InProgress => "In Progress",
        TaskStatus::Completed => "Done",
    }
}

pub fn normalize(doc: &RawDocument, now: DateTime<Utc>) -> SyncResult<Task> {
    if doc.id.trim().is_empty() {
        return Err(SyncError::MalformedRecord {
            id: None,
            reason: "missing document id".to_string(),
        });
    }
    let user_id = match doc.str_field(FIELD_USER_ID) {
        Some(owner) if !owner.trim().is_empty() => owner.to_string(),
        _ => {
            return Err(SyncError::MalformedRecord {
                id: Some(doc.id.clone()),
                reason: "missing owner".to_string(),
            });
        }
    };

    let text = |field: TaskField| doc.str_field(field.name()).unwrap_or_default().to_string();

    let status = doc
        .str_field(TaskField::Status.name())
        .map(normalize_status)
        .unwrap_or_default();

    let due_date = match doc.fields.get(TaskField::DueDate.name()) {
        Some(Value::String(raw)) => DueDate::from_text(raw),
        Some(value) => match read_instant(value) {
            Some(instant) => DueDate::Day(to_project_date(instant)),
            None => DueDate::Unscheduled,
        },
        None => DueDate::Unscheduled,
    };

    let created_at = doc
        .fields
        .get(FIELD_CREATED_AT)
        .and_then(read_instant)
        .unwrap_or(now);
    let last_updated = doc
        .fields
        .get(FIELD_LAST_UPDATED)
        .and_then(read_instant)
        .map(|updated| updated.max(created_at));

    let attachment = doc
        .str_field(FIELD_ATTACHMENT)
        .filter(|url| !url.trim().is_empty())
        .map(str::to_string);

    let change_log = match doc.fields.get(FIELD_CHANGE_LOG) {
        Some(value) => read_change_log(&doc.id, value),
        None => vec![],
    };

    Ok(Task {
        id: doc.id.clone(),
        user_id,
        title: text(TaskField::Title),
        description: text(TaskField::Description),
        category: text(TaskField::Category),
        status,
        due_date,
        created_at,
        last_updated,
        attachment,
        change_log,
    })
}

/// Normalizes a pushed snapshot for `owner`. Malformed documents and
/// documents owned by another account are logged and skipped.
pub fn normalize_snapshot(docs: &[RawDocument], owner: &str, now: DateTime<Utc>) -> Vec<Task> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match normalize(doc, now) {
            Ok(task) if task.user_id == owner => out.push(task),
            Ok(task) => {
                warn!(task_id = %task.id, owner = %task.user_id, "skipping task owned by another account");
            }
            Err(err) => {
                warn!(error = %err, "skipping malformed task record");
            }
        }
    }
    out
}

/// Reads a backend timestamp object or a textual instant.
pub fn read_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => parse_instant(raw),
        other => BackendTimestamp::from_value(other).and_then(timestamp_to_utc),
    }
}

pub fn read_change_log(task_id: &str, value: &Value) -> Vec<ChangeEntry> {
    let Some(items) = value.as_array() else {
        warn!(task_id, "change log is not an array; ignoring");
        return vec![];
    };
    items
        .iter()
        .filter_map(|item| {
            let entry = read_change_entry(item);
            if entry.is_none() {
                warn!(task_id, "skipping unreadable change entry");
            }
            entry
        })
        .collect()
}

fn read_change_entry(item: &Value) -> Option<ChangeEntry> {
    let obj = item.as_object()?;
    let text = |key: &str| -> Option<String> {
        match obj.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    };
    Some(ChangeEntry {
        field: text("field")?,
        old_value: text("oldValue").unwrap_or_else(|| "N/A".to_string()),
        new_value: text("newValue").unwrap_or_else(|| "N/A".to_string()),
        time: obj.get("time").and_then(read_instant)?,
    })
}

pub fn change_log_value(entries: &[ChangeEntry]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|entry| {
                json!({
                    "field": entry.field,
                    "oldValue": entry.old_value,
                    "newValue": entry.new_value,
                    "time": entry.time.to_rfc3339(),
                })
            })
            .collect(),
    )
}

/// Document fields for a new task. Dates use the `DD-MM-YYYY` encoding.
pub fn draft_fields(
    draft: &TaskDraft,
    owner: &str,
    due: NaiveDate,
    created: NaiveDate,
    attachment_url: Option<&str>,
) -> Fields {
    let mut fields = Fields::new();
    fields.insert(TaskField::Title.name().into(), json!(draft.title.trim()));
    fields.insert(TaskField::Description.name().into(), json!(draft.description));
    fields.insert(TaskField::Category.name().into(), json!(draft.category));
    fields.insert(TaskField::Status.name().into(), json!(status_label(draft.status)));
    fields.insert(TaskField::DueDate.name().into(), json!(format_day(due)));
    fields.insert(FIELD_USER_ID.into(), json!(owner));
    fields.insert(FIELD_CREATED_AT.into(), json!(format_day(created)));
    fields.insert(FIELD_CHANGE_LOG.into(), json!([]));
    if let Some(url) = attachment_url {
        fields.insert(FIELD_ATTACHMENT.into(), json!(url));
    }
    fields
}

/// Partial update for the fields present in `patch`, with a refreshed
/// `lastUpdated`. Status is written in its stored label form.
pub fn patch_fields(patch: &TaskPatch, now: DateTime<Utc>) -> Fields {
    let mut fields = Fields::new();
    if let Some(title) = &patch.title {
        fields.insert(TaskField::Title.name().into(), json!(title));
    }
    if let Some(description) = &patch.description {
        fields.insert(TaskField::Description.name().into(), json!(description));
    }
    if let Some(category) = &patch.category {
        fields.insert(TaskField::Category.name().into(), json!(category));
    }
    if let Some(status) = patch.status {
        fields.insert(TaskField::Status.name().into(), json!(status_label(status)));
    }
    if let Some(due) = &patch.due_date {
        fields.insert(TaskField::DueDate.name().into(), json!(due));
    }
    fields.insert(FIELD_LAST_UPDATED.into(), utc_to_timestamp(now).to_value());
    fields
}
