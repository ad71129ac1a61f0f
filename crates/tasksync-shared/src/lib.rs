use std::fmt;
use std::str::FromStr;

use serde::{
  Deserialize,
  Serialize
};
use serde_json::Value;

pub const TASKS_COLLECTION: &str =
  "tasks";
pub const DEFAULT_CATEGORY: &str =
  "Work";

pub type Fields =
  serde_json::Map<String, Value>;

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
)]
pub struct RawDocument {
  pub id:     String,
  #[serde(default)]
  pub fields: Fields
}

impl RawDocument {
  pub fn new(
    id: impl Into<String>,
    fields: Fields
  ) -> Self {
    Self {
      id: id.into(),
      fields
    }
  }

  pub fn str_field(
    &self,
    key: &str
  ) -> Option<&str> {
    self
      .fields
      .get(key)
      .and_then(Value::as_str)
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct BackendTimestamp {
  pub seconds:     i64,
  #[serde(default)]
  pub nanoseconds: u32
}

impl BackendTimestamp {
  pub fn from_value(
    value: &Value
  ) -> Option<Self> {
    let obj = value.as_object()?;
    if !obj.contains_key("seconds") {
      return None;
    }
    serde_json::from_value(
      value.clone()
    )
    .ok()
  }

  pub fn to_value(self) -> Value {
    serde_json::json!({
      "seconds": self.seconds,
      "nanoseconds": self.nanoseconds
    })
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Default,
)]
pub enum TaskStatus {
  #[default]
  Todo,
  #[serde(rename = "In-Progress")]
  InProgress,
  Completed
}

impl TaskStatus {
  pub const ALL: [TaskStatus; 3] = [
    TaskStatus::Todo,
    TaskStatus::InProgress,
    TaskStatus::Completed
  ];

  pub fn label(self) -> &'static str {
    match self {
      | TaskStatus::Todo => "Todo",
      | TaskStatus::InProgress => {
        "In-Progress"
      }
      | TaskStatus::Completed => {
        "Completed"
      }
    }
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.label())
  }
}

impl FromStr for TaskStatus {
  type Err = String;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "todo" | "to do" => {
        Ok(TaskStatus::Todo)
      }
      | "in-progress" | "inprogress"
      | "in progress" => {
        Ok(TaskStatus::InProgress)
      }
      | "completed" | "done" => {
        Ok(TaskStatus::Completed)
      }
      | other => Err(format!(
        "unknown status: {other} \
         (expected todo, \
         in-progress or completed)"
      ))
    }
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct UserProfile {
  pub uid:          String,
  pub display_name: Option<String>,
  pub email:        Option<String>,
  pub photo_url:    Option<String>
}

impl UserProfile {
  pub fn new(
    uid: impl Into<String>
  ) -> Self {
    Self {
      uid:          uid.into(),
      display_name: None,
      email:        None,
      photo_url:    None
    }
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct AttachmentFile {
  pub file_name: String,
  pub bytes:     Vec<u8>
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
)]
pub struct TaskDraft {
  pub title:       String,
  #[serde(default)]
  pub description: String,
  pub category:    String,
  #[serde(default)]
  pub status:      TaskStatus,
  pub due_date:    Option<String>,
  pub attachment:
    Option<AttachmentFile>
}

impl Default for TaskDraft {
  fn default() -> Self {
    Self {
      title:       String::new(),
      description: String::new(),
      category:
        DEFAULT_CATEGORY.to_string(),
      status:      TaskStatus::Todo,
      due_date:    None,
      attachment:  None
    }
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
  PartialEq,
)]
pub struct TaskPatch {
  pub title:       Option<String>,
  pub description: Option<String>,
  pub category:    Option<String>,
  pub status:      Option<TaskStatus>,
  pub due_date:    Option<String>
}

impl TaskPatch {
  pub fn status(
    status: TaskStatus
  ) -> Self {
    Self {
      status: Some(status),
      ..Self::default()
    }
  }

  pub fn is_empty(&self) -> bool {
    self.title.is_none()
      && self.description.is_none()
      && self.category.is_none()
      && self.status.is_none()
      && self.due_date.is_none()
  }
}
