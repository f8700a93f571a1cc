//! Core types for the memory bank

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{MembankError, Result};

/// Unique identifier for a memory (UUID v4 string)
pub type MemoryId = String;
/// Unique identifier for a project
pub type ProjectId = String;
/// Unique identifier for a development session
pub type SessionId = String;

/// Maximum title length in characters
pub const MAX_TITLE_LENGTH: usize = 500;

/// Maximum number of tags on a single memory
pub const MAX_TAGS: usize = 50;

/// A stored knowledge unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier, generated at creation and never reassigned
    pub id: MemoryId,
    pub project_id: ProjectId,
    pub session_id: Option<SessionId>,
    /// Fixed at creation
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub title: String,
    pub content: String,
    /// Free-text context
    #[serde(default)]
    pub context: String,
    /// Ordered tags; duplicates are preserved
    #[serde(default)]
    pub tags: Vec<String>,
    /// Typed per-type fields
    pub details: MemoryDetails,
    /// Free-form string fields not covered by `details`
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// Text submitted to the embedding provider for this memory
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.title, &self.content, &self.tags)
    }

    pub fn task_fields(&self) -> Option<&TaskFields> {
        match &self.details {
            MemoryDetails::Task(fields) => Some(fields),
            _ => None,
        }
    }
}

pub(crate) fn embedding_text(title: &str, content: &str, tags: &[String]) -> String {
    let mut text = String::with_capacity(title.len() + content.len() + 16);
    text.push_str(title);
    if !content.is_empty() {
        text.push('\n');
        text.push_str(content);
    }
    if !tags.is_empty() {
        text.push('\n');
        text.push_str(&tags.join(" "));
    }
    text
}

/// Memory type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Decision,
    Pattern,
    ErrorSolution,
    Code,
    Documentation,
    /// Reserved for the task manager
    Task,
    DocMapping,
    DocTemplate,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Decision => "decision",
            MemoryType::Pattern => "pattern",
            MemoryType::ErrorSolution => "error_solution",
            MemoryType::Code => "code",
            MemoryType::Documentation => "documentation",
            MemoryType::Task => "task",
            MemoryType::DocMapping => "doc_mapping",
            MemoryType::DocTemplate => "doc_template",
        }
    }

    pub fn all() -> &'static [MemoryType] {
        &[
            MemoryType::Decision,
            MemoryType::Pattern,
            MemoryType::ErrorSolution,
            MemoryType::Code,
            MemoryType::Documentation,
            MemoryType::Task,
            MemoryType::DocMapping,
            MemoryType::DocTemplate,
        ]
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "decision" => Ok(MemoryType::Decision),
            "pattern" => Ok(MemoryType::Pattern),
            "error_solution" | "error-solution" => Ok(MemoryType::ErrorSolution),
            "code" => Ok(MemoryType::Code),
            "documentation" | "docs" => Ok(MemoryType::Documentation),
            "task" => Ok(MemoryType::Task),
            "doc_mapping" => Ok(MemoryType::DocMapping),
            "doc_template" => Ok(MemoryType::DocTemplate),
            _ => Err(format!("Unknown memory type: {}", s)),
        }
    }
}

/// Typed fields attached to a memory, keyed by its type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryDetails {
    Decision {
        rationale: Option<String>,
        #[serde(default)]
        alternatives: Vec<String>,
    },
    Pattern {
        language: Option<String>,
        #[serde(default)]
        applies_to: Vec<String>,
    },
    ErrorSolution {
        error_message: Option<String>,
        root_cause: Option<String>,
    },
    Code {
        language: Option<String>,
        file_path: Option<String>,
    },
    Documentation {
        source_url: Option<String>,
    },
    Task(TaskFields),
    DocMapping {
        doc_path: Option<String>,
        #[serde(default)]
        code_paths: Vec<String>,
    },
    DocTemplate {
        template_kind: Option<String>,
    },
}

impl MemoryDetails {
    /// Empty details for a memory type
    pub fn empty(memory_type: MemoryType) -> Self {
        match memory_type {
            MemoryType::Decision => MemoryDetails::Decision {
                rationale: None,
                alternatives: vec![],
            },
            MemoryType::Pattern => MemoryDetails::Pattern {
                language: None,
                applies_to: vec![],
            },
            MemoryType::ErrorSolution => MemoryDetails::ErrorSolution {
                error_message: None,
                root_cause: None,
            },
            MemoryType::Code => MemoryDetails::Code {
                language: None,
                file_path: None,
            },
            MemoryType::Documentation => MemoryDetails::Documentation { source_url: None },
            MemoryType::Task => MemoryDetails::Task(TaskFields::default()),
            MemoryType::DocMapping => MemoryDetails::DocMapping {
                doc_path: None,
                code_paths: vec![],
            },
            MemoryType::DocTemplate => MemoryDetails::DocTemplate {
                template_kind: None,
            },
        }
    }

    /// The memory type these details belong to
    pub fn memory_type(&self) -> MemoryType {
        match self {
            MemoryDetails::Decision { .. } => MemoryType::Decision,
            MemoryDetails::Pattern { .. } => MemoryType::Pattern,
            MemoryDetails::ErrorSolution { .. } => MemoryType::ErrorSolution,
            MemoryDetails::Code { .. } => MemoryType::Code,
            MemoryDetails::Documentation { .. } => MemoryType::Documentation,
            MemoryDetails::Task(_) => MemoryType::Task,
            MemoryDetails::DocMapping { .. } => MemoryType::DocMapping,
            MemoryDetails::DocTemplate { .. } => MemoryType::DocTemplate,
        }
    }
}

/// Task workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Blocked,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Done and cancelled tasks can no longer be overdue
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }

    pub fn all() -> &'static [TaskStatus] {
        &[
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Done,
            TaskStatus::Blocked,
            TaskStatus::Cancelled,
        ]
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" | "in-progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            "blocked" => Ok(TaskStatus::Blocked),
            "cancelled" | "canceled" => Ok(TaskStatus::Cancelled),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// Task priority, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }

    pub fn all() -> &'static [TaskPriority] {
        &[
            TaskPriority::Low,
            TaskPriority::Medium,
            TaskPriority::High,
            TaskPriority::Urgent,
        ]
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            "urgent" => Ok(TaskPriority::Urgent),
            _ => Err(format!("Unknown task priority: {}", s)),
        }
    }
}

/// Structured fields carried by task memories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskFields {
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    pub assignee: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    /// Not operational yet; see `TaskManager::add_dependency`
    #[serde(default)]
    pub dependencies: Vec<MemoryId>,
    #[serde(default)]
    pub subtasks: Vec<MemoryId>,
}

impl TaskFields {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.due_date.map(|due| due < now).unwrap_or(false)
    }
}

/// A project that memories, sessions and tasks belong to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Alternate lookup key
    pub path: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Input for initializing a project
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InitProjectInput {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub description: String,
}

/// Lifecycle state of a development session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Aborted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "aborted" => Ok(SessionStatus::Aborted),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// Kind of a progress log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProgressType {
    #[default]
    Info,
    Milestone,
    Issue,
    Decision,
}

impl ProgressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressType::Info => "info",
            ProgressType::Milestone => "milestone",
            ProgressType::Issue => "issue",
            ProgressType::Decision => "decision",
        }
    }
}

impl std::str::FromStr for ProgressType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(ProgressType::Info),
            "milestone" => Ok(ProgressType::Milestone),
            "issue" => Ok(ProgressType::Issue),
            "decision" => Ok(ProgressType::Decision),
            _ => Err(format!("Unknown progress type: {}", s)),
        }
    }
}

/// One entry of a session's append-only progress log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub entry_type: ProgressType,
    pub message: String,
}

/// A bounded unit of work within a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub project_id: ProjectId,
    pub task_description: String,
    /// Set to the outcome on completion
    pub summary: Option<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: Vec<ProgressEntry>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Elapsed time between start and end; `None` while active
    pub fn duration(&self) -> Option<chrono::Duration> {
        if self.is_active() {
            return None;
        }
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// Filters for listing sessions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionListFilter {
    pub project_id: Option<ProjectId>,
    pub status: Option<SessionStatus>,
    #[serde(default, deserialize_with = "deserialize_datetime_opt")]
    pub started_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Input for creating a new memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMemoryInput {
    pub project_id: ProjectId,
    pub session_id: Option<SessionId>,
    #[serde(alias = "type")]
    pub memory_type: MemoryType,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Must match `memory_type` when present
    pub details: Option<MemoryDetails>,
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
}

impl CreateMemoryInput {
    pub fn new(
        project_id: impl Into<String>,
        memory_type: MemoryType,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            session_id: None,
            memory_type,
            title: title.into(),
            content: content.into(),
            context: String::new(),
            tags: vec![],
            details: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Reject malformed input before touching any collaborator
    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(MembankError::Validation("project_id is required".into()));
        }
        validate_title(&self.title)?;
        if self.memory_type != MemoryType::Task && self.content.trim().is_empty() {
            return Err(MembankError::Validation("content is required".into()));
        }
        validate_tags(&self.tags)?;
        if let Some(ref details) = self.details {
            if details.memory_type() != self.memory_type {
                return Err(MembankError::Validation(format!(
                    "details of kind '{}' do not match memory type '{}'",
                    details.memory_type(),
                    self.memory_type
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(MembankError::Validation("title is required".into()));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(MembankError::Validation(format!(
            "title exceeds {} characters",
            MAX_TITLE_LENGTH
        )));
    }
    Ok(())
}

pub(crate) fn validate_tags(tags: &[String]) -> Result<()> {
    if tags.len() > MAX_TAGS {
        return Err(MembankError::Validation(format!(
            "at most {} tags are allowed",
            MAX_TAGS
        )));
    }
    if tags.iter().any(|t| t.trim().is_empty()) {
        return Err(MembankError::Validation("tags cannot be empty".into()));
    }
    Ok(())
}

/// Input for updating a memory. Only title, content, tags and context are mutable.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateMemoryInput {
    pub title: Option<String>,
    pub content: Option<String>,
    pub context: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl UpdateMemoryInput {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.context.is_none() && self.tags.is_none()
    }

    /// Whether the change alters the embedded text
    pub fn touches_embedding(&self) -> bool {
        self.title.is_some() || self.content.is_some() || self.tags.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(ref title) = self.title {
            validate_title(title)?;
        }
        if let Some(ref tags) = self.tags {
            validate_tags(tags)?;
        }
        Ok(())
    }
}

/// Inclusive range over creation time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Structured filters; every populated field must match (logical AND)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MemoryFilter {
    pub project_id: Option<ProjectId>,
    /// Any of these types
    #[serde(default, alias = "types")]
    pub memory_types: Vec<MemoryType>,
    /// All of these tags must be present
    #[serde(default)]
    pub tags: Vec<String>,
    /// Any of these sessions
    #[serde(default)]
    pub session_ids: Vec<SessionId>,
    #[serde(default)]
    pub created: TimeRange,
    pub min_content_length: Option<usize>,
    pub max_content_length: Option<usize>,
    pub has_content: Option<bool>,
}

impl MemoryFilter {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_types.push(memory_type);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min_content_length, self.max_content_length) {
            if min > max {
                return Err(MembankError::Validation(
                    "min_content_length exceeds max_content_length".into(),
                ));
            }
        }
        if let (Some(start), Some(end)) = (self.created.start, self.created.end) {
            if start > end {
                return Err(MembankError::Validation(
                    "time range start is after its end".into(),
                ));
            }
        }
        Ok(())
    }

    /// Evaluate the filter against a loaded memory
    pub fn matches(&self, memory: &Memory) -> bool {
        if let Some(ref project_id) = self.project_id {
            if &memory.project_id != project_id {
                return false;
            }
        }
        if !self.memory_types.is_empty() && !self.memory_types.contains(&memory.memory_type) {
            return false;
        }
        if !self.tags.iter().all(|tag| memory.tags.contains(tag)) {
            return false;
        }
        if !self.session_ids.is_empty() {
            match memory.session_id {
                Some(ref sid) if self.session_ids.contains(sid) => {}
                _ => return false,
            }
        }
        if let Some(start) = self.created.start {
            if memory.created_at < start {
                return false;
            }
        }
        if let Some(end) = self.created.end {
            if memory.created_at > end {
                return false;
            }
        }
        let content_len = memory.content.chars().count();
        if let Some(min) = self.min_content_length {
            if content_len < min {
                return false;
            }
        }
        if let Some(max) = self.max_content_length {
            if content_len > max {
                return false;
            }
        }
        if let Some(has_content) = self.has_content {
            if has_content == memory.content.trim().is_empty() {
                return false;
            }
        }
        true
    }
}

/// Fields search results can be ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Relevance,
    CreatedAt,
    UpdatedAt,
    Title,
    Type,
}

impl SortField {
    /// Lenient boundary parse: unknown fields fall back to relevance
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "created_at" | "created" => SortField::CreatedAt,
            "updated_at" | "updated" => SortField::UpdatedAt,
            "title" => SortField::Title,
            "type" => SortField::Type,
            _ => SortField::Relevance,
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "asc" | "ascending" => SortDirection::Asc,
            _ => SortDirection::Desc,
        }
    }
}

/// A memory with its vector similarity to the query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub memory: Memory,
    /// In [0, 1]
    pub similarity: f32,
}

/// A memory ranked by the composite relevance score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedSearchResult {
    pub memory: Memory,
    pub similarity: f32,
    pub relevance_score: f32,
    #[serde(default)]
    pub match_reasons: Vec<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// One page of results plus the filtered, pre-pagination total
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage<T> {
    pub results: Vec<T>,
    pub total: usize,
}

impl<T> SearchPage<T> {
    pub fn empty() -> Self {
        Self {
            results: vec![],
            total: 0,
        }
    }
}

/// A (key, count) aggregation entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetCount {
    pub key: String,
    pub count: usize,
}

/// Grouped counts over a filtered result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Facets {
    pub types: Vec<FacetCount>,
    pub tags: Vec<FacetCount>,
    pub projects: Vec<FacetCount>,
    pub sessions: Vec<FacetCount>,
    pub time_periods: Vec<FacetCount>,
}

/// Response of a faceted search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacetedSearchResponse {
    pub results: Vec<SearchResult>,
    pub total: usize,
    pub facets: Option<Facets>,
}

/// Parse either an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC)
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| MembankError::Validation(format!("Invalid date: {}", s)))
}

pub(crate) fn deserialize_datetime_opt<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    match opt.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => parse_datetime(s)
            .map(Some)
            .map_err(<D::Error as serde::de::Error>::custom),
    }
}

/// Parse an RFC 3339 column value, falling back to the epoch for corrupt rows
pub(crate) fn parse_stored_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_memory() -> Memory {
        let now = Utc::now();
        Memory {
            id: "m-1".into(),
            project_id: "p-1".into(),
            session_id: Some("s-1".into()),
            memory_type: MemoryType::Decision,
            title: "Use JWT".into(),
            content: "Chose JWT for stateless auth".into(),
            context: String::new(),
            tags: vec!["auth".into(), "security".into()],
            details: MemoryDetails::empty(MemoryType::Decision),
            extensions: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_memory_type_round_trip() {
        for t in MemoryType::all() {
            assert_eq!(t.as_str().parse::<MemoryType>().unwrap(), *t);
            assert_eq!(MemoryDetails::empty(*t).memory_type(), *t);
        }
        assert!("note".parse::<MemoryType>().is_err());
    }

    #[test]
    fn test_details_serde_tagging() {
        let details = MemoryDetails::Task(TaskFields {
            status: TaskStatus::InProgress,
            priority: TaskPriority::Urgent,
            ..Default::default()
        });
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["kind"], "task");
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["priority"], "urgent");
        let back: MemoryDetails = serde_json::from_value(json).unwrap();
        assert_eq!(back, details);
    }

    #[test]
    fn test_create_input_rejects_mismatched_details() {
        let mut input = CreateMemoryInput::new("p", MemoryType::Code, "title", "body");
        input.details = Some(MemoryDetails::empty(MemoryType::Decision));
        assert!(input.validate().is_err());

        input.details = Some(MemoryDetails::empty(MemoryType::Code));
        assert!(input.validate().is_ok());

        let blank = CreateMemoryInput::new("p", MemoryType::Code, "  ", "body");
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_filter_requires_all_tags() {
        let memory = sample_memory();
        let mut filter = MemoryFilter::for_project("p-1");
        filter.tags = vec!["auth".into()];
        assert!(filter.matches(&memory));

        filter.tags = vec!["auth".into(), "db".into()];
        assert!(!filter.matches(&memory));
    }

    #[test]
    fn test_filter_dimensions() {
        let memory = sample_memory();
        assert!(!MemoryFilter::for_project("other").matches(&memory));
        assert!(!MemoryFilter::default()
            .with_type(MemoryType::Code)
            .matches(&memory));

        let filter = MemoryFilter {
            session_ids: vec!["s-2".into()],
            ..Default::default()
        };
        assert!(!filter.matches(&memory));

        let filter = MemoryFilter {
            max_content_length: Some(5),
            ..Default::default()
        };
        assert!(!filter.matches(&memory));

        let filter = MemoryFilter {
            has_content: Some(false),
            ..Default::default()
        };
        assert!(!filter.matches(&memory));
    }

    #[test]
    fn test_sort_field_lenient() {
        assert_eq!(SortField::parse_lenient("title"), SortField::Title);
        assert_eq!(SortField::parse_lenient("bogus"), SortField::Relevance);
        assert_eq!(SortDirection::parse_lenient("ASC"), SortDirection::Asc);
        assert_eq!(SortDirection::parse_lenient("sideways"), SortDirection::Desc);
    }

    #[test]
    fn test_parse_datetime_formats() {
        let date = parse_datetime("2025-01-01").unwrap();
        assert_eq!(date.to_rfc3339(), "2025-01-01T00:00:00+00:00");
        assert!(parse_datetime("2025-01-01T10:00:00Z").is_ok());
        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn test_overdue() {
        let now = Utc::now();
        let mut fields = TaskFields {
            due_date: Some(now - chrono::Duration::days(1)),
            ..Default::default()
        };
        assert!(fields.is_overdue(now));
        fields.status = TaskStatus::Done;
        assert!(!fields.is_overdue(now));
    }
}
