use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, NaiveDate, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::dashboard::{Notice, NoticeLevel};
use crate::datetime::{due_label, format_day, to_project_date};
use crate::selection::Selection;
use crate::session::ProfileCard;
use crate::task::{DueDate, Task, TaskStatus};

const MAX_TITLE_WIDTH: usize = 48;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            color: cfg.color_enabled() && io::stdout().is_terminal(),
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all, fields(count = tasks.len()))]
    pub fn write_task_list<W: Write>(
        &self,
        out: &mut W,
        tasks: &[Task],
        selection: &Selection,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }
        let headers = ["", "ID", "Status", "Due", "Category", "Title"];
        let rows = tasks
            .iter()
            .map(|task| {
                vec![
                    checkbox(selection.is_selected(&task.id)),
                    self.paint(&task.id, "33"),
                    task.status.label().to_string(),
                    self.due_cell(&task.due_date, today),
                    task.category.clone(),
                    truncate(&task.title, MAX_TITLE_WIDTH),
                ]
            })
            .collect();
        write_table(out, &headers, rows)
    }

    /// One section per status bucket, in `TaskStatus::ALL` order.
    #[tracing::instrument(skip_all)]
    pub fn write_board<W: Write>(
        &self,
        out: &mut W,
        buckets: &[(TaskStatus, Vec<Task>)],
        selection: &Selection,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        for (idx, (status, tasks)) in buckets.iter().enumerate() {
            if idx > 0 {
                writeln!(out)?;
            }
            let picked = tasks.iter().filter(|t| selection.is_selected(&t.id)).count();
            let heading = format!("{} ({})", status.label(), tasks.len());
            write!(out, "{}", self.paint(&heading, "1"))?;
            if picked > 0 {
                write!(out, "  [{picked} selected]")?;
            }
            writeln!(out)?;

            if tasks.is_empty() {
                writeln!(out, "  (empty)")?;
                continue;
            }
            let rows = tasks
                .iter()
                .map(|task| {
                    vec![
                        checkbox(selection.is_selected(&task.id)),
                        self.paint(&task.id, "33"),
                        self.due_cell(&task.due_date, today),
                        truncate(&task.title, MAX_TITLE_WIDTH),
                    ]
                })
                .collect();
            write_table(out, &["", "ID", "Due", "Title"], rows)?;
        }
        Ok(())
    }

    pub fn write_task_info<W: Write>(&self, out: &mut W, task: &Task, today: NaiveDate) -> anyhow::Result<()> {
        writeln!(out, "id           {}", task.id)?;
        writeln!(out, "title        {}", task.title)?;
        writeln!(out, "description  {}", task.description)?;
        writeln!(out, "category     {}", task.category)?;
        writeln!(out, "status       {}", task.status.label())?;
        writeln!(out, "due          {}", self.due_cell(&task.due_date, today))?;
        writeln!(out, "created      {}", format_day(to_project_date(task.created_at)))?;
        if let Some(updated) = task.last_updated {
            writeln!(out, "updated      {}", format_instant(updated))?;
        }
        if let Some(url) = &task.attachment {
            writeln!(out, "attachment   {url}")?;
        }
        writeln!(out, "changes      {}", task.change_log.len())?;
        Ok(())
    }

    pub fn write_history<W: Write>(&self, out: &mut W, task: &Task) -> anyhow::Result<()> {
        if task.change_log.is_empty() {
            writeln!(out, "No changes recorded for {}.", task.id)?;
            return Ok(());
        }
        let rows = task
            .change_log
            .iter()
            .map(|entry| {
                vec![
                    format_instant(entry.time),
                    entry.field.clone(),
                    truncate(&entry.old_value, MAX_TITLE_WIDTH),
                    truncate(&entry.new_value, MAX_TITLE_WIDTH),
                ]
            })
            .collect();
        write_table(out, &["Time", "Field", "Old", "New"], rows)
    }

    pub fn write_profile<W: Write>(&self, out: &mut W, card: &ProfileCard) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&card.name, "1"))?;
        if !card.email.is_empty() {
            writeln!(out, "{}", card.email)?;
        }
        if let Some(photo) = &card.photo_url {
            writeln!(out, "photo: {photo}")?;
        }
        Ok(())
    }

    pub fn write_notices<W: Write>(&self, out: &mut W, notices: &[Notice]) -> anyhow::Result<()> {
        for notice in notices {
            match notice.level {
                NoticeLevel::Info => writeln!(out, "{}", notice.message)?,
                NoticeLevel::Error => writeln!(out, "{}", self.paint(&notice.to_string(), "31"))?,
            }
        }
        Ok(())
    }

    fn due_cell(&self, due: &DueDate, today: NaiveDate) -> String {
        let label = match due {
            DueDate::Unparsed(_) => return self.paint("Invalid Date", "35"),
            other => due_label(other.as_day(), today),
        };
        if label.is_overdue() {
            self.paint(&label.to_string(), "31")
        } else {
            label.to_string()
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn checkbox(selected: bool) -> String {
    if selected { "[x]" } else { "[ ]" }.to_string()
}

fn format_instant(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%SZ").to_string()
}

fn truncate(text: &str, max_width: usize) -> String {
    let text = text.replace('\n', " ");
    if UnicodeWidthStr::width(text.as_str()) <= max_width {
        return text;
    }
    let mut out = String::new();
    let mut width = 0;
    for ch in text.chars() {
        let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + w + 1 > max_width {
            break;
        }
        width += w;
        out.push(ch);
    }
    out.push('…');
    out
}

fn write_table<W: Write>(writer: &mut W, headers: &[&str], rows: Vec<Vec<String>>) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| UnicodeWidthStr::width(*h)).collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{h:w$}"))
        .collect();
    writeln!(writer, "{}", header_line.join(" ").trim_end())?;
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(writer, "{}", rule.join(" ").trim_end())?;

    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| {
                let visible = UnicodeWidthStr::width(strip_ansi(cell).as_str());
                format!("{cell}{}", " ".repeat(width.saturating_sub(visible)))
            })
            .collect();
        writeln!(writer, "{}", cells.join(" ").trim_end())?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{Renderer, strip_ansi, truncate};
    use crate::selection::Selection;
    use crate::task::{DueDate, TaskStatus, sample};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 10).expect("valid date")
    }

    fn render_list(tasks: &[crate::task::Task], selection: &Selection) -> String {
        let mut out = Vec::new();
        Renderer::plain()
            .write_task_list(&mut out, tasks, selection, today())
            .expect("render");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn list_marks_overdue_and_selection() {
        let mut a = sample("a", "Today's task");
        a.due_date = DueDate::from_text("10-05-2025");
        let mut c = sample("c", "Old task");
        c.due_date = DueDate::from_text("01-01-2025");
        let mut d = sample("d", "Broken");
        d.due_date = DueDate::from_text("sometime");
        let mut selection = Selection::default();
        selection.select("c");

        let text = render_list(&[a, c, d], &selection);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[2].contains("Today"));
        assert!(lines[3].starts_with("[x]"));
        assert!(lines[3].contains("! Overdue"));
        assert!(lines[4].contains("Invalid Date"));
    }

    #[test]
    fn board_has_a_section_per_bucket() {
        let a = sample("a", "first");
        let buckets = vec![
            (TaskStatus::Todo, vec![a]),
            (TaskStatus::InProgress, vec![]),
            (TaskStatus::Completed, vec![]),
        ];
        let mut out = Vec::new();
        Renderer::plain()
            .write_board(&mut out, &buckets, &Selection::default(), today())
            .expect("render");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("Todo (1)"));
        assert!(text.contains("In-Progress (0)"));
        assert!(!text.contains("To Do"));
        assert_eq!(text.matches("(empty)").count(), 2);
    }

    #[test]
    fn truncate_respects_display_width() {
        assert_eq!(truncate("short", 10), "short");
        let cut = truncate("日本語のタイトルです", 9);
        assert!(unicode_width::UnicodeWidthStr::width(cut.as_str()) <= 9);
        assert!(cut.ends_with('…'));
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m"), "red");
    }
}
