//! Database queries for memory and task records

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::format_time;
use crate::error::{MembankError, Result};
use crate::types::*;

/// Column list shared by every memory SELECT; task columns come from a LEFT JOIN
const MEMORY_COLUMNS: &str = "m.id, m.project_id, m.session_id, m.memory_type, m.title,
        m.content, m.context, m.tags, m.details, m.extensions, m.created_at, m.updated_at,
        t.status AS task_status, t.priority AS task_priority, t.assignee AS task_assignee,
        t.due_date AS task_due_date, t.estimated_hours AS task_estimated_hours,
        t.actual_hours AS task_actual_hours, t.dependencies AS task_dependencies,
        t.subtasks AS task_subtasks";

const MEMORY_FROM: &str = "FROM memories m LEFT JOIN task_fields t ON t.memory_id = m.id";

/// Parse a memory from a database row
pub fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let memory_type_str: String = row.get("memory_type")?;
    let tags_json: String = row.get("tags")?;
    let details_json: Option<String> = row.get("details")?;
    let extensions_json: String = row.get("extensions")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let memory_type = memory_type_str.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })?;

    let details = if memory_type == MemoryType::Task {
        MemoryDetails::Task(task_fields_from_row(row)?)
    } else {
        details_json
            .and_then(|json| serde_json::from_str::<MemoryDetails>(&json).ok())
            .filter(|details| details.memory_type() == memory_type)
            .unwrap_or_else(|| MemoryDetails::empty(memory_type))
    };

    let extensions: BTreeMap<String, String> =
        serde_json::from_str(&extensions_json).unwrap_or_default();

    Ok(Memory {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        session_id: row.get("session_id")?,
        memory_type,
        title: row.get("title")?,
        content: row.get("content")?,
        context: row.get("context")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        details,
        extensions,
        created_at: parse_stored_time(&created_at),
        updated_at: parse_stored_time(&updated_at),
    })
}

fn task_fields_from_row(row: &Row) -> rusqlite::Result<TaskFields> {
    let status: Option<String> = row.get("task_status")?;
    let priority: Option<String> = row.get("task_priority")?;
    let due_date: Option<String> = row.get("task_due_date")?;
    let dependencies: Option<String> = row.get("task_dependencies")?;
    let subtasks: Option<String> = row.get("task_subtasks")?;

    Ok(TaskFields {
        status: status.and_then(|s| s.parse().ok()).unwrap_or_default(),
        priority: priority.and_then(|s| s.parse().ok()).unwrap_or_default(),
        assignee: row.get("task_assignee")?,
        due_date: due_date.map(|s| parse_stored_time(&s)),
        estimated_hours: row.get("task_estimated_hours")?,
        actual_hours: row.get("task_actual_hours")?,
        dependencies: dependencies
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        subtasks: subtasks
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
    })
}

/// Insert a fully-formed memory (id and timestamps already assigned)
pub fn insert_memory(conn: &Connection, memory: &Memory) -> Result<()> {
    let tags_json = serde_json::to_string(&memory.tags)?;
    let extensions_json = serde_json::to_string(&memory.extensions)?;
    let details_json = match memory.details {
        MemoryDetails::Task(_) => None,
        ref details => Some(serde_json::to_string(details)?),
    };

    conn.execute(
        "INSERT INTO memories (id, project_id, session_id, memory_type, title, content,
                               context, tags, details, extensions, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            memory.id,
            memory.project_id,
            memory.session_id,
            memory.memory_type.as_str(),
            memory.title,
            memory.content,
            memory.context,
            tags_json,
            details_json,
            extensions_json,
            format_time(&memory.created_at),
            format_time(&memory.updated_at),
        ],
    )?;

    if let MemoryDetails::Task(ref fields) = memory.details {
        write_task_fields(conn, &memory.id, fields)?;
    }

    Ok(())
}

/// Insert or replace the structured fields of a task
pub fn write_task_fields(conn: &Connection, memory_id: &str, fields: &TaskFields) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO task_fields (memory_id, status, priority, assignee, due_date,
                                             estimated_hours, actual_hours, dependencies, subtasks)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            memory_id,
            fields.status.as_str(),
            fields.priority.as_str(),
            fields.assignee,
            fields.due_date.as_ref().map(format_time),
            fields.estimated_hours,
            fields.actual_hours,
            serde_json::to_string(&fields.dependencies)?,
            serde_json::to_string(&fields.subtasks)?,
        ],
    )?;
    Ok(())
}

/// Get a memory by ID
pub fn get_memory(conn: &Connection, id: &str) -> Result<Memory> {
    find_memory(conn, id)?.ok_or_else(|| MembankError::not_found("memory", id))
}

/// Get a memory by ID, `None` when absent
pub fn find_memory(conn: &Connection, id: &str) -> Result<Option<Memory>> {
    let sql = format!("SELECT {} {} WHERE m.id = ?", MEMORY_COLUMNS, MEMORY_FROM);
    let mut stmt = conn.prepare_cached(&sql)?;
    let memory = stmt.query_row(params![id], memory_from_row).optional()?;
    Ok(memory)
}

/// Load several memories at once; missing IDs are skipped
pub fn get_memories_by_ids(conn: &Connection, ids: &[MemoryId]) -> Result<Vec<Memory>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let mut memories = Vec::with_capacity(ids.len());
    // Stay well below SQLITE_MAX_VARIABLE_NUMBER
    for chunk in ids.chunks(500) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT {} {} WHERE m.id IN ({})",
            MEMORY_COLUMNS, MEMORY_FROM, placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), memory_from_row)?;
        for row in rows {
            memories.push(row?);
        }
    }

    Ok(memories)
}

/// Apply a partial update; only title, content, context and tags are mutable
pub fn update_memory(
    conn: &Connection,
    id: &str,
    input: &UpdateMemoryInput,
    now: DateTime<Utc>,
) -> Result<Memory> {
    let mut updates = vec!["updated_at = ?".to_string()];
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(format_time(&now))];

    if let Some(ref title) = input.title {
        updates.push("title = ?".to_string());
        values.push(Box::new(title.clone()));
    }
    if let Some(ref content) = input.content {
        updates.push("content = ?".to_string());
        values.push(Box::new(content.clone()));
    }
    if let Some(ref context) = input.context {
        updates.push("context = ?".to_string());
        values.push(Box::new(context.clone()));
    }
    if let Some(ref tags) = input.tags {
        updates.push("tags = ?".to_string());
        values.push(Box::new(serde_json::to_string(tags)?));
    }

    let sql = format!("UPDATE memories SET {} WHERE id = ?", updates.join(", "));
    values.push(Box::new(id.to_string()));

    let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
    let affected = conn.execute(&sql, params.as_slice())?;
    if affected == 0 {
        return Err(MembankError::not_found("memory", id));
    }

    get_memory(conn, id)
}

/// Bump `updated_at` without touching content
pub fn touch_memory(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE memories SET updated_at = ? WHERE id = ?",
        params![format_time(&now), id],
    )?;
    Ok(())
}

/// Hard-delete a memory; task fields cascade
pub fn delete_memory(conn: &Connection, id: &str) -> Result<()> {
    let affected = conn.execute("DELETE FROM memories WHERE id = ?", params![id])?;

    if affected == 0 {
        return Err(MembankError::not_found("memory", id));
    }

    Ok(())
}

/// Translate a filter into WHERE conditions over the `m` alias
fn push_filter_conditions(
    filter: &MemoryFilter,
    conditions: &mut Vec<String>,
    params: &mut Vec<Box<dyn rusqlite::ToSql>>,
) {
    if let Some(ref project_id) = filter.project_id {
        conditions.push("m.project_id = ?".to_string());
        params.push(Box::new(project_id.clone()));
    }

    if !filter.memory_types.is_empty() {
        let placeholders = vec!["?"; filter.memory_types.len()].join(", ");
        conditions.push(format!("m.memory_type IN ({})", placeholders));
        for memory_type in &filter.memory_types {
            params.push(Box::new(memory_type.as_str().to_string()));
        }
    }

    // All tags required
    for tag in &filter.tags {
        conditions.push("EXISTS (SELECT 1 FROM json_each(m.tags) WHERE json_each.value = ?)".to_string());
        params.push(Box::new(tag.clone()));
    }

    if !filter.session_ids.is_empty() {
        let placeholders = vec!["?"; filter.session_ids.len()].join(", ");
        conditions.push(format!("m.session_id IN ({})", placeholders));
        for session_id in &filter.session_ids {
            params.push(Box::new(session_id.clone()));
        }
    }

    if let Some(start) = filter.created.start {
        conditions.push("m.created_at >= ?".to_string());
        params.push(Box::new(format_time(&start)));
    }
    if let Some(end) = filter.created.end {
        conditions.push("m.created_at <= ?".to_string());
        params.push(Box::new(format_time(&end)));
    }

    // length() counts characters for TEXT values
    if let Some(min) = filter.min_content_length {
        conditions.push("length(m.content) >= ?".to_string());
        params.push(Box::new(min as i64));
    }
    if let Some(max) = filter.max_content_length {
        conditions.push("length(m.content) <= ?".to_string());
        params.push(Box::new(max as i64));
    }

    match filter.has_content {
        Some(true) => conditions.push(
            "length(trim(m.content, ' ' || char(9) || char(10) || char(13))) > 0".to_string(),
        ),
        Some(false) => conditions.push(
            "length(trim(m.content, ' ' || char(9) || char(10) || char(13))) = 0".to_string(),
        ),
        None => {}
    }
}

/// List memories matching a filter, newest first
pub fn list_memories(conn: &Connection, filter: &MemoryFilter, limit: usize) -> Result<Vec<Memory>> {
    let mut conditions: Vec<String> = vec![];
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];
    push_filter_conditions(filter, &mut conditions, &mut params);

    let mut sql = format!("SELECT {} {}", MEMORY_COLUMNS, MEMORY_FROM);
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(&format!(" ORDER BY m.created_at DESC, m.id ASC LIMIT {}", limit));

    tracing::debug!(conditions = conditions.len(), limit, "list_memories");

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let memories = stmt
        .query_map(param_refs.as_slice(), memory_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(memories)
}

/// Structured task filter pushed down to SQL
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub project_id: Option<ProjectId>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee: Option<String>,
    pub tags: Vec<String>,
}

/// List task memories matching the structured filter (unordered)
pub fn list_tasks(conn: &Connection, query: &TaskQuery, limit: usize) -> Result<Vec<Memory>> {
    let filter = MemoryFilter {
        project_id: query.project_id.clone(),
        memory_types: vec![MemoryType::Task],
        tags: query.tags.clone(),
        ..Default::default()
    };

    let mut conditions: Vec<String> = vec![];
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];
    push_filter_conditions(&filter, &mut conditions, &mut params);

    if let Some(status) = query.status {
        conditions.push("t.status = ?".to_string());
        params.push(Box::new(status.as_str().to_string()));
    }
    if let Some(priority) = query.priority {
        conditions.push("t.priority = ?".to_string());
        params.push(Box::new(priority.as_str().to_string()));
    }
    if let Some(ref assignee) = query.assignee {
        conditions.push("t.assignee = ?".to_string());
        params.push(Box::new(assignee.clone()));
    }

    let sql = format!(
        "SELECT {} {} WHERE {} LIMIT {}",
        MEMORY_COLUMNS,
        MEMORY_FROM,
        conditions.join(" AND "),
        limit
    );

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let tasks = stmt
        .query_map(param_refs.as_slice(), memory_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(tasks)
}

/// Titles and tags of a project's memories, input for suggestions
pub fn titles_and_tags(
    conn: &Connection,
    project_id: Option<&str>,
    limit: usize,
) -> Result<Vec<(String, Vec<String>)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT title, tags FROM memories
         WHERE (?1 IS NULL OR project_id = ?1)
         ORDER BY created_at DESC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![project_id, limit as i64], |row| {
        let title: String = row.get(0)?;
        let tags: String = row.get(1)?;
        Ok((title, serde_json::from_str(&tags).unwrap_or_default()))
    })?;

    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{projects, Storage};

    fn memory(id: &str, project: &str, memory_type: MemoryType, tags: &[&str]) -> Memory {
        let now = Utc::now();
        Memory {
            id: id.into(),
            project_id: project.into(),
            session_id: None,
            memory_type,
            title: format!("title {}", id),
            content: format!("content of {}", id),
            context: String::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            details: MemoryDetails::empty(memory_type),
            extensions: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn seeded() -> Storage {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                projects::insert_project(conn, &projects::new_project("p1", "/p1", ""))?;
                projects::insert_project(conn, &projects::new_project("p2", "/p2", ""))?;
                Ok(())
            })
            .unwrap();
        storage
    }

    fn project_id(storage: &Storage, path: &str) -> String {
        storage
            .with_connection(|conn| projects::get_project(conn, path))
            .unwrap()
            .id
    }

    #[test]
    fn test_insert_and_get_preserves_tag_order_and_duplicates() {
        let storage = seeded();
        let p1 = project_id(&storage, "/p1");
        storage
            .with_connection(|conn| {
                insert_memory(conn, &memory("m1", &p1, MemoryType::Decision, &["b", "a", "b"]))?;
                let loaded = get_memory(conn, "m1")?;
                assert_eq!(loaded.tags, vec!["b", "a", "b"]);
                assert_eq!(loaded.details, MemoryDetails::empty(MemoryType::Decision));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_task_fields_round_trip() {
        let storage = seeded();
        let p1 = project_id(&storage, "/p1");
        let mut task = memory("t1", &p1, MemoryType::Task, &[]);
        task.details = MemoryDetails::Task(TaskFields {
            status: TaskStatus::Blocked,
            priority: TaskPriority::High,
            assignee: Some("sam".into()),
            estimated_hours: Some(3.5),
            ..Default::default()
        });

        storage
            .with_connection(|conn| {
                insert_memory(conn, &task)?;
                let loaded = get_memory(conn, "t1")?;
                assert_eq!(loaded.details, task.details);

                let blocked = list_tasks(
                    conn,
                    &TaskQuery {
                        status: Some(TaskStatus::Blocked),
                        ..Default::default()
                    },
                    100,
                )?;
                assert_eq!(blocked.len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_list_filter_pushdown() {
        let storage = seeded();
        let p1 = project_id(&storage, "/p1");
        let p2 = project_id(&storage, "/p2");
        storage
            .with_connection(|conn| {
                insert_memory(conn, &memory("a", &p1, MemoryType::Decision, &["auth", "db"]))?;
                insert_memory(conn, &memory("b", &p1, MemoryType::Code, &["auth"]))?;
                insert_memory(conn, &memory("c", &p2, MemoryType::Decision, &["auth", "db"]))?;

                let mut filter = MemoryFilter::for_project(p1.clone());
                filter.tags = vec!["auth".into(), "db".into()];
                let found = list_memories(conn, &filter, 100)?;
                assert_eq!(found.len(), 1);
                assert_eq!(found[0].id, "a");

                let filter = MemoryFilter::default().with_type(MemoryType::Decision);
                assert_eq!(list_memories(conn, &filter, 100)?.len(), 2);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_update_and_delete() {
        let storage = seeded();
        let p1 = project_id(&storage, "/p1");
        storage
            .with_connection(|conn| {
                insert_memory(conn, &memory("m1", &p1, MemoryType::Pattern, &["x"]))?;
                let input = UpdateMemoryInput {
                    title: Some("renamed".into()),
                    ..Default::default()
                };
                let updated = update_memory(conn, "m1", &input, Utc::now())?;
                assert_eq!(updated.title, "renamed");
                assert_eq!(updated.tags, vec!["x"]);

                delete_memory(conn, "m1")?;
                assert!(find_memory(conn, "m1")?.is_none());
                assert!(delete_memory(conn, "m1").is_err());
                Ok(())
            })
            .unwrap();
    }
}
