use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  Duration,
  NaiveDate
};
use tracing::trace;

use crate::datetime::{
  month_bounds,
  week_bounds
};
use crate::mirror::TaskTable;
use crate::task::{
  Task,
  TaskStatus
};

/// Select values that mean "no filter on this axis".
pub const CATEGORY_SENTINEL: &str =
  "Category";
pub const DUE_SENTINEL: &str =
  "Due Date";

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum DueBucket {
  Today,
  Tomorrow,
  ThisWeek,
  ThisMonth
}

impl DueBucket {
  pub fn key(self) -> &'static str {
    match self {
      | DueBucket::Today => "today",
      | DueBucket::Tomorrow => {
        "tomorrow"
      }
      | DueBucket::ThisWeek => {
        "this-week"
      }
      | DueBucket::ThisMonth => {
        "this-month"
      }
    }
  }

  pub fn contains(
    self,
    due: NaiveDate,
    today: NaiveDate
  ) -> bool {
    match self {
      | DueBucket::Today => due == today,
      | DueBucket::Tomorrow => {
        due == today + Duration::days(1)
      }
      | DueBucket::ThisWeek => {
        let (start, end) =
          week_bounds(today);
        due >= start && due <= end
      }
      | DueBucket::ThisMonth => {
        let (start, end) =
          month_bounds(today);
        due >= start && due <= end
      }
    }
  }
}

impl FromStr for DueBucket {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s.trim() {
      | "today" => Ok(DueBucket::Today),
      | "tomorrow" => {
        Ok(DueBucket::Tomorrow)
      }
      | "this-week" => {
        Ok(DueBucket::ThisWeek)
      }
      | "this-month" => {
        Ok(DueBucket::ThisMonth)
      }
      | other => Err(anyhow!(
        "unknown due-date filter: \
         {other} (expected today, \
         tomorrow, this-week or \
         this-month)"
      ))
    }
  }
}

/// One optional predicate per axis. Active predicates combine with AND.
#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub struct ViewFilters {
  category: Option<String>,
  due:      Option<DueBucket>,
  search:   Option<String>
}

impl ViewFilters {
  pub fn set_category(
    &mut self,
    raw: &str
  ) {
    let value = raw.trim();
    self.category = if value.is_empty()
      || value == CATEGORY_SENTINEL
    {
      None
    } else {
      Some(value.to_lowercase())
    };
  }

  pub fn set_due(
    &mut self,
    raw: &str
  ) -> anyhow::Result<()> {
    let value = raw.trim();
    self.due = if value.is_empty()
      || value == DUE_SENTINEL
    {
      None
    } else {
      Some(value.parse()?)
    };
    Ok(())
  }

  pub fn set_search(
    &mut self,
    raw: &str
  ) {
    self.search = if raw.is_empty() {
      None
    } else {
      Some(raw.to_lowercase())
    };
  }

  pub fn clear(&mut self) {
    *self = Self::default();
  }

  pub fn category(
    &self
  ) -> Option<&str> {
    self.category.as_deref()
  }

  pub fn due(
    &self
  ) -> Option<DueBucket> {
    self.due
  }

  pub fn search(&self) -> Option<&str> {
    self.search.as_deref()
  }

  pub fn is_active(&self) -> bool {
    self.category.is_some()
      || self.due.is_some()
      || self.search.is_some()
  }

  pub fn matches(
    &self,
    task: &Task,
    today: NaiveDate
  ) -> bool {
    if let Some(category) =
      self.category.as_deref()
      && task.category.to_lowercase()
        != category
    {
      return false;
    }

    if let Some(bucket) = self.due {
      let Some(due) =
        task.due_date.as_day()
      else {
        return false;
      };
      if !bucket.contains(due, today) {
        return false;
      }
    }

    if let Some(needle) =
      self.search.as_deref()
      && !task.matches_text(needle)
    {
      return false;
    }

    true
  }
}

/// The displayed sequence derived from the canonical table.
#[derive(
  Debug, Clone, Default, PartialEq,
)]
pub struct Projection {
  tasks: Vec<Task>
}

impl Projection {
  pub fn from_tasks(
    tasks: Vec<Task>
  ) -> Self {
    Self {
      tasks
    }
  }

  pub fn tasks(&self) -> &[Task] {
    &self.tasks
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  pub fn ids(&self) -> Vec<&str> {
    self
      .tasks
      .iter()
      .map(|t| t.id.as_str())
      .collect()
  }

  pub fn bucket(
    &self,
    status: TaskStatus
  ) -> Vec<&Task> {
    self
      .tasks
      .iter()
      .filter(|t| t.status == status)
      .collect()
  }

  pub fn count(
    &self,
    status: TaskStatus
  ) -> usize {
    self
      .tasks
      .iter()
      .filter(|t| t.status == status)
      .count()
  }
}

/// Re-derives the displayed sequence from the latest table.
#[tracing::instrument(skip(
  table, filters
), fields(tasks = table.len()))]
pub fn project(
  table: &TaskTable,
  filters: &ViewFilters,
  today: NaiveDate
) -> Projection {
  let tasks: Vec<Task> = table
    .iter()
    .filter(|task| {
      filters.matches(task, today)
    })
    .cloned()
    .collect();
  trace!(
    shown = tasks.len(),
    "projected tasks"
  );
  Projection::from_tasks(tasks)
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::{
    DueBucket,
    ViewFilters,
    project
  };
  use crate::mirror::TaskTable;
  use crate::task::{
    DueDate,
    Task,
    TaskStatus,
    sample
  };

  fn day(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  fn with_category(
    id: &str,
    category: &str
  ) -> Task {
    let mut task = sample(id, id);
    task.category =
      category.to_string();
    task
  }

  fn five_tasks() -> TaskTable {
    TaskTable::from_tasks(vec![
      with_category("w1", "Work"),
      with_category("p1", "Personal"),
      with_category("w2", "Work"),
      with_category("p2", "Personal"),
      with_category("w3", "Work"),
    ])
  }

  #[test]
  fn category_filter_is_case_insensitive_and_clearable()
   {
    let table = five_tasks();
    let today = day(2025, 5, 10);
    let mut filters =
      ViewFilters::default();

    filters.set_category("personal");
    let shown =
      project(&table, &filters, today);
    assert_eq!(shown.ids(), vec![
      "p1", "p2"
    ]);

    filters.set_category("Category");
    assert_eq!(
      project(&table, &filters, today)
        .len(),
      5
    );
  }

  #[test]
  fn same_filter_twice_is_idempotent()
  {
    let table = five_tasks();
    let today = day(2025, 5, 10);
    let mut filters =
      ViewFilters::default();
    filters.set_category("work");
    let first =
      project(&table, &filters, today);
    filters.set_category("work");
    let second =
      project(&table, &filters, today);
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
  }

  #[test]
  fn due_buckets_use_today() {
    let today = day(2025, 5, 10);
    let mut a = sample("a", "today");
    a.due_date = DueDate::from_text(
      "10-05-2025"
    );
    let mut b = sample("b", "tomorrow");
    b.due_date = DueDate::from_text(
      "11-05-2025"
    );
    let mut c = sample("c", "past");
    c.due_date = DueDate::from_text(
      "01-01-2025"
    );
    let d = sample("d", "none");
    let table =
      TaskTable::from_tasks(vec![
        a, b, c, d,
      ]);

    let mut filters =
      ViewFilters::default();
    filters
      .set_due("today")
      .expect("bucket");
    assert_eq!(
      project(&table, &filters, today)
        .ids(),
      vec!["a"]
    );

    filters
      .set_due("tomorrow")
      .expect("bucket");
    assert_eq!(
      project(&table, &filters, today)
        .ids(),
      vec!["b"]
    );

    filters
      .set_due("this-month")
      .expect("bucket");
    assert_eq!(
      project(&table, &filters, today)
        .ids(),
      vec!["a", "b"]
    );

    filters
      .set_due("Due Date")
      .expect("clear");
    assert_eq!(
      project(&table, &filters, today)
        .len(),
      4
    );
    assert!(
      filters.set_due("someday").is_err()
    );
  }

  #[test]
  fn this_week_spans_sunday_to_saturday()
   {
    // Wednesday 7 May 2025.
    let today = day(2025, 5, 7);
    assert!(DueBucket::ThisWeek
      .contains(day(2025, 5, 4), today));
    assert!(DueBucket::ThisWeek
      .contains(day(2025, 5, 10), today));
    assert!(!DueBucket::ThisWeek
      .contains(day(2025, 5, 11), today));
    assert!(!DueBucket::ThisWeek
      .contains(day(2025, 5, 3), today));
  }

  #[test]
  fn search_matches_title_or_description()
   {
    let mut a = sample("a", "Buy Milk");
    a.description =
      "from the store".to_string();
    let mut b = sample("b", "Call mom");
    b.description =
      "about MILK prices".to_string();
    let c = sample("c", "Other");
    let table =
      TaskTable::from_tasks(vec![
        a, b, c,
      ]);
    let today = day(2025, 5, 10);

    let mut filters =
      ViewFilters::default();
    filters.set_search("milk");
    assert_eq!(
      project(&table, &filters, today)
        .ids(),
      vec!["a", "b"]
    );
    filters.set_search("STORE");
    assert_eq!(
      project(&table, &filters, today)
        .ids(),
      vec!["a"]
    );
    filters.set_search("");
    assert!(!filters.is_active());
  }

  #[test]
  fn axes_combine() {
    let mut a =
      with_category("a", "Work");
    a.title = "report".to_string();
    let mut b =
      with_category("b", "Personal");
    b.title = "report".to_string();
    b.status = TaskStatus::Completed;
    let table =
      TaskTable::from_tasks(vec![a, b]);
    let mut filters =
      ViewFilters::default();
    filters.set_search("report");
    filters.set_category("personal");
    let shown = project(
      &table,
      &filters,
      day(2025, 5, 10)
    );
    assert_eq!(shown.ids(), vec!["b"]);
    assert_eq!(
      shown.count(TaskStatus::Completed),
      1
    );
    assert!(
      shown
        .bucket(TaskStatus::Todo)
        .is_empty()
    );
  }
}
