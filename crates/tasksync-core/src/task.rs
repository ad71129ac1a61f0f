use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
pub use tasksync_shared::TaskStatus;
use tasksync_shared::TaskPatch;

use crate::datetime::{NO_DUE_DATE, format_day, parse_day};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DueDate {
    Day(NaiveDate),
    Unscheduled,
    /// Text the backend stored that is not a `DD-MM-YYYY` day. Kept verbatim.
    Unparsed(String),
}

impl DueDate {
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == NO_DUE_DATE {
            return DueDate::Unscheduled;
        }
        match parse_day(trimmed) {
            Some(day) => DueDate::Day(day),
            None => DueDate::Unparsed(trimmed.to_string()),
        }
    }

    pub fn as_day(&self) -> Option<NaiveDate> {
        match self {
            DueDate::Day(day) => Some(*day),
            _ => None,
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, DueDate::Unscheduled)
    }
}

impl fmt::Display for DueDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DueDate::Day(day) => f.write_str(&format_day(*day)),
            DueDate::Unscheduled => f.write_str(NO_DUE_DATE),
            DueDate::Unparsed(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskField {
    Title,
    Description,
    Category,
    Status,
    DueDate,
}

impl TaskField {
    pub const EDITABLE: [TaskField; 5] = [
        TaskField::Title,
        TaskField::Description,
        TaskField::Category,
        TaskField::Status,
        TaskField::DueDate,
    ];

    /// Field name as stored in backend documents and change entries.
    pub fn name(self) -> &'static str {
        match self {
            TaskField::Title => "title",
            TaskField::Description => "description",
            TaskField::Category => "category",
            TaskField::Status => "status",
            TaskField::DueDate => "dueDate",
        }
    }

    /// New value carried by `patch` for this field, in display form.
    pub fn patched_value(self, patch: &TaskPatch) -> Option<String> {
        match self {
            TaskField::Title => patch.title.clone(),
            TaskField::Description => patch.description.clone(),
            TaskField::Category => patch.category.clone(),
            TaskField::Status => patch.status.map(|s| s.label().to_string()),
            TaskField::DueDate => patch.due_date.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub status: TaskStatus,
    pub due_date: DueDate,
    pub created_at: DateTime<Utc>,
    pub last_updated: Option<DateTime<Utc>>,
    pub attachment: Option<String>,
    pub change_log: Vec<ChangeEntry>,
}

impl Task {
    /// Current value of `field`, or `None` when the task has no value for it.
    pub fn field_value(&self, field: TaskField) -> Option<String> {
        match field {
            TaskField::Title => Some(self.title.clone()),
            TaskField::Description => Some(self.description.clone()),
            TaskField::Category => Some(self.category.clone()),
            TaskField::Status => Some(self.status.label().to_string()),
            TaskField::DueDate => match &self.due_date {
                DueDate::Unscheduled => None,
                other => Some(other.to_string()),
            },
        }
    }

    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(category) = &patch.category {
            self.category = category.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(due) = &patch.due_date {
            self.due_date = DueDate::from_text(due);
        }
    }

    pub fn matches_text(&self, needle_lower: &str) -> bool {
        self.title.to_lowercase().contains(needle_lower)
            || self.description.to_lowercase().contains(needle_lower)
    }
}

#[cfg(test)]
pub(crate) fn sample(id: &str, title: &str) -> Task {
    use chrono::TimeZone;

    let created = Utc
        .with_ymd_and_hms(2025, 5, 1, 9, 0, 0)
        .single()
        .expect("valid created_at");
    Task {
        id: id.to_string(),
        user_id: "user-1".to_string(),
        title: title.to_string(),
        description: String::new(),
        category: "Work".to_string(),
        status: TaskStatus::Todo,
        due_date: DueDate::Unscheduled,
        created_at: created,
        last_updated: None,
        attachment: None,
        change_log: vec![],
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use tasksync_shared::TaskPatch;

    use super::{DueDate, TaskField, TaskStatus, sample};

    #[test]
    fn due_date_text_forms() {
        assert_eq!(
            DueDate::from_text("10-05-2025"),
            DueDate::Day(NaiveDate::from_ymd_opt(2025, 5, 10).expect("date"))
        );
        assert_eq!(DueDate::from_text("No Due Date"), DueDate::Unscheduled);
        assert_eq!(DueDate::from_text(""), DueDate::Unscheduled);
        assert_eq!(
            DueDate::from_text("next week"),
            DueDate::Unparsed("next week".to_string())
        );
        assert_eq!(DueDate::Unscheduled.to_string(), "No Due Date");
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut task = sample("t1", "A");
        task.description = "keep".to_string();
        let patch = TaskPatch {
            title: Some("B".to_string()),
            status: Some(TaskStatus::Completed),
            ..TaskPatch::default()
        };
        task.apply_patch(&patch);
        assert_eq!(task.title, "B");
        assert_eq!(task.description, "keep");
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn unscheduled_due_date_has_no_field_value() {
        let task = sample("t1", "A");
        assert_eq!(task.field_value(TaskField::DueDate), None);
        assert_eq!(
            task.field_value(TaskField::Status).as_deref(),
            Some("Todo")
        );
    }
}
