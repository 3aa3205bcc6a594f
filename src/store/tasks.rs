use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::errors::StudioResult;
use crate::store::kv::{KeyValueExt, KeyValueStore};
use crate::store::types::{next_id, now_millis, Task, TaskPriority, TaskStatus};

pub const TASKS_KEY: &str = "tasks";

/// Task fields parsed from a chat command or a model function call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
}

fn priority_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:^|\s)#(low|medium|med|high)\b").expect("valid priority regex"))
}

/// Parses `@task <title> [- <description>] [#low|#medium|#high]`.
/// Returns None when the text is not a task command or has no title.
pub fn parse_task_command(input: &str) -> Option<NewTask> {
    let trimmed = input.trim_start();
    let rest = trimmed.strip_prefix("@task")?;
    if !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
        return None;
    }

    let mut priority = TaskPriority::default();
    if let Some(caps) = priority_tag_re().captures(rest) {
        priority = TaskPriority::parse(&caps[1]).unwrap_or_default();
    }
    let body = priority_tag_re().replace_all(rest, "");

    let (title, description) = match body.split_once(" - ") {
        Some((t, d)) => (t.trim(), d.trim()),
        None => (body.trim(), ""),
    };
    if title.is_empty() {
        return None;
    }

    Some(NewTask {
        title: title.to_string(),
        description: description.to_string(),
        priority,
    })
}

/// Task list stored as one JSON array, oldest first.
#[derive(Clone)]
pub struct TaskStore {
    kv: Arc<dyn KeyValueStore>,
}

impl TaskStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn list(&self) -> StudioResult<Vec<Task>> {
        Ok(self.kv.get_json(TASKS_KEY)?.unwrap_or_default())
    }

    pub fn create(&self, new: NewTask) -> StudioResult<Task> {
        let task = Task {
            id: next_id(),
            title: new.title,
            description: new.description,
            status: TaskStatus::Todo,
            priority: new.priority,
            created_at: now_millis(),
        };
        let mut tasks = self.list()?;
        tasks.push(task.clone());
        self.kv.set_json(TASKS_KEY, &tasks)?;
        tracing::info!(task_id = %task.id, title = %task.title, priority = ?task.priority, "task created");
        Ok(task)
    }
}
