//! Task management
//!
//! Tasks are memories of type `task` whose structured fields live in their
//! own table. An update writes the memory row and the `TaskFields` row in one
//! transaction, and re-embeds through the memory store when title,
//! description or tags change.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SearchDefaults;
use crate::context::RequestContext;
use crate::error::{MembankError, Result, Service};
use crate::memory::MemoryStore;
use crate::storage::queries::{self, TaskQuery};
use crate::types::*;

/// Input for creating a task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTaskInput {
    pub project_id: ProjectId,
    pub session_id: Option<SessionId>,
    pub title: String,
    #[serde(default, alias = "content")]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    pub assignee: Option<String>,
    #[serde(default, deserialize_with = "deserialize_datetime_opt")]
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
}

/// Partial task update.
///
/// Absent fields stay unchanged. `clear_due_date` and `clear_assignee` null
/// the field; combining a clear flag with a value for the same field is
/// rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTaskInput {
    pub title: Option<String>,
    #[serde(alias = "content")]
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee: Option<String>,
    #[serde(default)]
    pub clear_assignee: bool,
    #[serde(default, deserialize_with = "deserialize_datetime_opt")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub clear_due_date: bool,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
}

impl UpdateTaskInput {
    fn memory_update(&self) -> UpdateMemoryInput {
        UpdateMemoryInput {
            title: self.title.clone(),
            content: self.description.clone(),
            context: None,
            tags: self.tags.clone(),
        }
    }

    fn touches_fields(&self) -> bool {
        self.status.is_some()
            || self.priority.is_some()
            || self.assignee.is_some()
            || self.clear_assignee
            || self.due_date.is_some()
            || self.clear_due_date
            || self.estimated_hours.is_some()
            || self.actual_hours.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.due_date.is_some() && self.clear_due_date {
            return Err(MembankError::Validation(
                "due_date and clear_due_date cannot be combined".into(),
            ));
        }
        if self.assignee.is_some() && self.clear_assignee {
            return Err(MembankError::Validation(
                "assignee and clear_assignee cannot be combined".into(),
            ));
        }
        validate_hours("estimated_hours", self.estimated_hours)?;
        validate_hours("actual_hours", self.actual_hours)?;
        self.memory_update().validate()
    }

    /// Apply the field changes to a copy of the current fields
    fn apply(&self, current: &TaskFields) -> TaskFields {
        let mut fields = current.clone();
        if let Some(status) = self.status {
            fields.status = status;
        }
        if let Some(priority) = self.priority {
            fields.priority = priority;
        }
        if self.clear_assignee {
            fields.assignee = None;
        } else if let Some(ref assignee) = self.assignee {
            fields.assignee = Some(assignee.clone());
        }
        if self.clear_due_date {
            fields.due_date = None;
        } else if let Some(due) = self.due_date {
            fields.due_date = Some(due);
        }
        if let Some(hours) = self.estimated_hours {
            fields.estimated_hours = Some(hours);
        }
        if let Some(hours) = self.actual_hours {
            fields.actual_hours = Some(hours);
        }
        fields
    }
}

fn validate_hours(field: &str, hours: Option<f64>) -> Result<()> {
    match hours {
        Some(h) if !h.is_finite() || h < 0.0 => Err(MembankError::Validation(format!(
            "{} must be a non-negative number",
            field
        ))),
        _ => Ok(()),
    }
}

/// Filters for listing tasks; every populated field must match
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskListFilter {
    pub project_id: Option<ProjectId>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Only tasks past their due date that are not done or cancelled
    #[serde(default)]
    pub overdue: bool,
    pub limit: Option<usize>,
}

/// Task counts for a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub total: usize,
    pub by_status: BTreeMap<TaskStatus, usize>,
    pub by_priority: BTreeMap<TaskPriority, usize>,
    pub overdue: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHours {
    pub id: MemoryId,
    pub title: String,
    pub estimated_hours: f64,
    pub actual_hours: f64,
    /// actual / estimated, absent when nothing was estimated
    pub ratio: Option<f64>,
}

/// Estimated versus actual hours over tasks that have both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEfficiency {
    pub tasks: Vec<TaskHours>,
    pub total_estimated_hours: f64,
    pub total_actual_hours: f64,
    pub ratio: Option<f64>,
}

fn ratio(actual: f64, estimated: f64) -> Option<f64> {
    (estimated > 0.0).then(|| actual / estimated)
}

/// Urgent first, then earliest due date with undated tasks last, then oldest first
fn task_order(a: &Memory, b: &Memory) -> Ordering {
    let (fa, fb) = match (a.task_fields(), b.task_fields()) {
        (Some(fa), Some(fb)) => (fa, fb),
        _ => return a.id.cmp(&b.id),
    };

    fb.priority
        .cmp(&fa.priority)
        .then_with(|| match (fa.due_date, fb.due_date) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Clone)]
pub struct TaskManager {
    memories: MemoryStore,
    list_all_limit: usize,
}

impl TaskManager {
    pub fn new(memories: MemoryStore, defaults: &SearchDefaults) -> Self {
        Self {
            memories,
            list_all_limit: defaults.list_all_limit,
        }
    }

    #[tracing::instrument(skip(self, ctx, input), fields(project_id = %input.project_id))]
    pub async fn create(&self, ctx: &RequestContext, input: CreateTaskInput) -> Result<Memory> {
        validate_hours("estimated_hours", input.estimated_hours)?;
        validate_hours("actual_hours", input.actual_hours)?;

        let fields = TaskFields {
            status: input.status,
            priority: input.priority,
            assignee: input.assignee,
            due_date: input.due_date,
            estimated_hours: input.estimated_hours,
            actual_hours: input.actual_hours,
            dependencies: vec![],
            subtasks: vec![],
        };

        let memory = CreateMemoryInput {
            project_id: input.project_id,
            session_id: input.session_id,
            memory_type: MemoryType::Task,
            title: input.title,
            content: input.description,
            context: String::new(),
            tags: input.tags,
            details: Some(MemoryDetails::Task(fields)),
            extensions: BTreeMap::new(),
        };

        let task = self.memories.create(ctx, memory).await?;
        tracing::info!(task_id = %task.id, "task created");
        Ok(task)
    }

    /// Fetch a task; a memory of any other type is NotFound
    pub async fn get(&self, ctx: &RequestContext, id: &str) -> Result<Memory> {
        let memory = self.memories.get(ctx, id).await?;
        if memory.memory_type != MemoryType::Task {
            return Err(MembankError::not_found("task", id));
        }
        Ok(memory)
    }

    #[tracing::instrument(skip(self, ctx, input))]
    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: &str,
        input: UpdateTaskInput,
    ) -> Result<Memory> {
        input.validate()?;

        let memory_update = input.memory_update();
        if memory_update.is_empty() && !input.touches_fields() {
            return Err(MembankError::Validation("no fields to update".into()));
        }

        // Fields are read and rewritten inside the write transaction
        let (before, task) = self
            .memories
            .update_task(ctx, id, memory_update, move |current| input.apply(current))
            .await?;

        if let Some(after) = task.task_fields() {
            if before.status != after.status {
                tracing::info!(task_id = %id, from = before.status.as_str(), to = after.status.as_str(), "task status changed");
            }
        }
        Ok(task)
    }

    pub async fn delete(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        self.get(ctx, id).await?;
        self.memories.delete(ctx, id).await
    }

    /// Filtered tasks in priority, due date, creation order
    pub async fn list(&self, ctx: &RequestContext, filter: TaskListFilter) -> Result<Vec<Memory>> {
        let limit = filter.limit.unwrap_or(self.list_all_limit);
        if limit == 0 {
            return Ok(vec![]);
        }

        let mut tasks = self.load(ctx, &filter).await?;
        if filter.overdue {
            let now = Utc::now();
            tasks.retain(|t| t.task_fields().map(|f| f.is_overdue(now)).unwrap_or(false));
        }

        tasks.sort_by(task_order);
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn load(&self, ctx: &RequestContext, filter: &TaskListFilter) -> Result<Vec<Memory>> {
        let query = TaskQuery {
            project_id: filter.project_id.clone(),
            status: filter.status,
            priority: filter.priority,
            assignee: filter.assignee.clone(),
            tags: filter.tags.clone(),
        };
        let limit = self.list_all_limit;

        ctx.guard(
            Service::Persistence,
            self.memories
                .storage()
                .call(move |conn| queries::list_tasks(conn, &query, limit)),
        )
        .await
    }

    pub async fn statistics(&self, ctx: &RequestContext, project_id: &str) -> Result<TaskStatistics> {
        let filter = TaskListFilter {
            project_id: Some(project_id.to_string()),
            ..Default::default()
        };
        let tasks = self.load(ctx, &filter).await?;
        Ok(summarize(&tasks, Utc::now()))
    }

    pub async fn efficiency(&self, ctx: &RequestContext, project_id: &str) -> Result<TaskEfficiency> {
        let filter = TaskListFilter {
            project_id: Some(project_id.to_string()),
            ..Default::default()
        };
        let mut tasks = self.load(ctx, &filter).await?;
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(efficiency(&tasks))
    }

    pub async fn add_dependency(&self, _task_id: &str, _depends_on: &str) -> Result<Memory> {
        Err(MembankError::Unsupported(
            "task dependencies are not supported yet".into(),
        ))
    }

    pub async fn add_subtask(&self, _parent_id: &str, _subtask_id: &str) -> Result<Memory> {
        Err(MembankError::Unsupported("subtasks are not supported yet".into()))
    }
}

fn summarize(tasks: &[Memory], now: DateTime<Utc>) -> TaskStatistics {
    let mut by_status: BTreeMap<TaskStatus, usize> =
        TaskStatus::all().iter().map(|s| (*s, 0)).collect();
    let mut by_priority: BTreeMap<TaskPriority, usize> =
        TaskPriority::all().iter().map(|p| (*p, 0)).collect();
    let mut overdue = 0;

    for fields in tasks.iter().filter_map(Memory::task_fields) {
        *by_status.entry(fields.status).or_default() += 1;
        *by_priority.entry(fields.priority).or_default() += 1;
        if fields.is_overdue(now) {
            overdue += 1;
        }
    }

    TaskStatistics {
        total: tasks.len(),
        by_status,
        by_priority,
        overdue,
    }
}

fn efficiency(tasks: &[Memory]) -> TaskEfficiency {
    let rows: Vec<TaskHours> = tasks
        .iter()
        .filter_map(|task| {
            let fields = task.task_fields()?;
            let (estimated, actual) = (fields.estimated_hours?, fields.actual_hours?);
            Some(TaskHours {
                id: task.id.clone(),
                title: task.title.clone(),
                estimated_hours: estimated,
                actual_hours: actual,
                ratio: ratio(actual, estimated),
            })
        })
        .collect();

    let total_estimated_hours: f64 = rows.iter().map(|r| r.estimated_hours).sum();
    let total_actual_hours: f64 = rows.iter().map(|r| r.actual_hours).sum();

    TaskEfficiency {
        ratio: ratio(total_actual_hours, total_estimated_hours),
        tasks: rows,
        total_estimated_hours,
        total_actual_hours,
    }
}
