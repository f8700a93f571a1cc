//! MCP tool definitions for the memory bank

use serde_json::json;

use super::protocol::ToolDefinition;

/// All tool definitions: name, description, JSON schema
pub const TOOL_DEFINITIONS: &[(&str, &str, &str)] = &[
    // Projects
    (
        "project_init",
        "Register a project. Idempotent on path: an existing project at the same path is returned.",
        r#"{
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "path": {"type": "string", "description": "Filesystem path, also usable as a lookup key"},
                "description": {"type": "string"}
            },
            "required": ["name", "path"]
        }"#,
    ),
    (
        "project_get",
        "Get a project by ID or path",
        r#"{
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Project ID or path"}
            },
            "required": ["id"]
        }"#,
    ),
    (
        "project_list",
        "List all projects",
        r#"{"type": "object", "properties": {}}"#,
    ),
    // Memory CRUD
    (
        "memory_create",
        "Store a knowledge unit (decision, pattern, error solution, code, documentation, task, doc mapping, doc template) in a project.",
        r#"{
            "type": "object",
            "properties": {
                "project_id": {"type": "string"},
                "session_id": {"type": "string", "description": "Session the memory was captured in"},
                "type": {"type": "string", "enum": ["decision", "pattern", "error_solution", "code", "documentation", "task", "doc_mapping", "doc_template"]},
                "title": {"type": "string", "maxLength": 500},
                "content": {"type": "string"},
                "context": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "details": {"type": "object", "description": "Typed fields; 'kind' must match the memory type"},
                "extensions": {"type": "object", "additionalProperties": {"type": "string"}}
            },
            "required": ["project_id", "type", "title", "content"]
        }"#,
    ),
    (
        "memory_get",
        "Retrieve a memory by its ID",
        r#"{
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Memory ID"}
            },
            "required": ["id"]
        }"#,
    ),
    (
        "memory_update",
        "Update title, content, context or tags of a memory. Type is fixed at creation.",
        r#"{
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Memory ID"},
                "title": {"type": "string"},
                "content": {"type": "string"},
                "context": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["id"]
        }"#,
    ),
    (
        "memory_delete",
        "Delete a memory and its vector entry",
        r#"{
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Memory ID"}
            },
            "required": ["id"]
        }"#,
    ),
    (
        "memory_list",
        "List memories matching structured filters, newest first",
        r#"{
            "type": "object",
            "properties": {
                "filter": {"type": "object"},
                "limit": {"type": "integer", "minimum": 1}
            }
        }"#,
    ),
    // Search
    (
        "memory_search",
        "Semantic search: results by similarity, all at or above the threshold. An empty query lists matching memories.",
        r#"{
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "filter": {"type": "object"},
                "limit": {"type": "integer", "minimum": 1, "default": 10},
                "offset": {"type": "integer", "minimum": 0, "default": 0},
                "threshold": {"type": "number", "minimum": 0, "maximum": 1, "default": 0.5}
            }
        }"#,
    ),
    (
        "memory_search_faceted",
        "Sortable search with facet counts over the full filtered result set",
        r#"{
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "filter": {"type": "object"},
                "limit": {"type": "integer", "minimum": 1, "default": 10},
                "offset": {"type": "integer", "minimum": 0, "default": 0},
                "threshold": {"type": "number", "minimum": 0, "maximum": 1},
                "include_facets": {"type": "boolean", "default": false},
                "sort_by": {"type": "string", "enum": ["relevance", "created_at", "updated_at", "title", "type"], "default": "relevance"},
                "sort_direction": {"type": "string", "enum": ["asc", "desc"], "default": "desc"}
            }
        }"#,
    ),
    (
        "memory_search_enhanced",
        "Relevance-ranked search combining similarity, term overlap, tag matches and recency, with match reasons and highlights",
        r#"{
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "filter": {"type": "object"},
                "limit": {"type": "integer", "minimum": 1, "default": 10},
                "offset": {"type": "integer", "minimum": 0, "default": 0},
                "threshold": {"type": "number", "minimum": 0, "maximum": 1}
            },
            "required": ["query"]
        }"#,
    ),
    (
        "memory_search_suggest",
        "Autocomplete a partial query from existing titles and tags",
        r#"{
            "type": "object",
            "properties": {
                "partial_query": {"type": "string"},
                "project_id": {"type": "string"},
                "limit": {"type": "integer", "minimum": 0, "default": 10}
            },
            "required": ["partial_query"]
        }"#,
    ),
    // Sessions
    (
        "session_start",
        "Start a development session. Fails with a conflict if the project already has an active session.",
        r#"{
            "type": "object",
            "properties": {
                "project_id": {"type": "string"},
                "task_description": {"type": "string"}
            },
            "required": ["project_id", "task_description"]
        }"#,
    ),
    (
        "session_log_progress",
        "Append a progress entry to a session, addressed by ID or as the active session of a project",
        r#"{
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "project_id": {"type": "string", "description": "Used when session_id is absent"},
                "message": {"type": "string"},
                "type": {"type": "string", "enum": ["info", "milestone", "issue", "decision"], "default": "info"}
            },
            "required": ["message"]
        }"#,
    ),
    (
        "session_complete",
        "Complete an active session, recording the outcome as its summary",
        r#"{
            "type": "object",
            "properties": {
                "session_id": {"type": "string"},
                "project_id": {"type": "string", "description": "Used when session_id is absent"},
                "outcome": {"type": "string"}
            },
            "required": ["outcome"]
        }"#,
    ),
    (
        "session_abort",
        "Abort an active session",
        r#"{
            "type": "object",
            "properties": {
                "session_id": {"type": "string"}
            },
            "required": ["session_id"]
        }"#,
    ),
    (
        "session_abort_active",
        "Abort every active session of a project",
        r#"{
            "type": "object",
            "properties": {
                "project_id": {"type": "string"}
            },
            "required": ["project_id"]
        }"#,
    ),
    (
        "session_get",
        "Get a session with its progress log",
        r#"{
            "type": "object",
            "properties": {
                "session_id": {"type": "string"}
            },
            "required": ["session_id"]
        }"#,
    ),
    (
        "session_get_active",
        "Get the active session of a project",
        r#"{
            "type": "object",
            "properties": {
                "project_id": {"type": "string"}
            },
            "required": ["project_id"]
        }"#,
    ),
    (
        "session_list",
        "List sessions, newest first",
        r#"{
            "type": "object",
            "properties": {
                "project_id": {"type": "string"},
                "status": {"type": "string", "enum": ["active", "completed", "aborted"]},
                "started_after": {"type": "string", "format": "date-time"},
                "limit": {"type": "integer", "minimum": 0, "default": 50}
            }
        }"#,
    ),
    // Tasks
    (
        "task_create",
        "Create a task in a project",
        r#"{
            "type": "object",
            "properties": {
                "project_id": {"type": "string"},
                "session_id": {"type": "string"},
                "title": {"type": "string"},
                "description": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "status": {"type": "string", "enum": ["todo", "in_progress", "done", "blocked", "cancelled"], "default": "todo"},
                "priority": {"type": "string", "enum": ["low", "medium", "high", "urgent"], "default": "medium"},
                "assignee": {"type": "string"},
                "due_date": {"type": "string", "description": "RFC 3339 timestamp or YYYY-MM-DD"},
                "estimated_hours": {"type": "number", "minimum": 0},
                "actual_hours": {"type": "number", "minimum": 0}
            },
            "required": ["project_id", "title"]
        }"#,
    ),
    (
        "task_get",
        "Get a task by ID",
        r#"{
            "type": "object",
            "properties": {
                "id": {"type": "string"}
            },
            "required": ["id"]
        }"#,
    ),
    (
        "task_update",
        "Update a task. Absent fields stay unchanged; clear_due_date and clear_assignee null their field.",
        r#"{
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "title": {"type": "string"},
                "description": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "status": {"type": "string", "enum": ["todo", "in_progress", "done", "blocked", "cancelled"]},
                "priority": {"type": "string", "enum": ["low", "medium", "high", "urgent"]},
                "assignee": {"type": "string"},
                "clear_assignee": {"type": "boolean", "default": false},
                "due_date": {"type": "string"},
                "clear_due_date": {"type": "boolean", "default": false},
                "estimated_hours": {"type": "number", "minimum": 0},
                "actual_hours": {"type": "number", "minimum": 0}
            },
            "required": ["id"]
        }"#,
    ),
    (
        "task_delete",
        "Delete a task",
        r#"{
            "type": "object",
            "properties": {
                "id": {"type": "string"}
            },
            "required": ["id"]
        }"#,
    ),
    (
        "task_list",
        "List tasks: urgent first, then earliest due date, then oldest",
        r#"{
            "type": "object",
            "properties": {
                "project_id": {"type": "string"},
                "status": {"type": "string", "enum": ["todo", "in_progress", "done", "blocked", "cancelled"]},
                "priority": {"type": "string", "enum": ["low", "medium", "high", "urgent"]},
                "assignee": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "overdue": {"type": "boolean", "default": false},
                "limit": {"type": "integer", "minimum": 0}
            }
        }"#,
    ),
    (
        "task_statistics",
        "Task counts by status and priority, plus overdue count",
        r#"{
            "type": "object",
            "properties": {
                "project_id": {"type": "string"}
            },
            "required": ["project_id"]
        }"#,
    ),
    (
        "task_efficiency",
        "Estimated versus actual hours for tasks that have both",
        r#"{
            "type": "object",
            "properties": {
                "project_id": {"type": "string"}
            },
            "required": ["project_id"]
        }"#,
    ),
    (
        "task_add_dependency",
        "Record that a task depends on another (not supported yet)",
        r#"{
            "type": "object",
            "properties": {
                "task_id": {"type": "string"},
                "depends_on": {"type": "string"}
            },
            "required": ["task_id", "depends_on"]
        }"#,
    ),
    (
        "task_add_subtask",
        "Attach a subtask to a task (not supported yet)",
        r#"{
            "type": "object",
            "properties": {
                "parent_id": {"type": "string"},
                "subtask_id": {"type": "string"}
            },
            "required": ["parent_id", "subtask_id"]
        }"#,
    ),
    // Health
    (
        "health_check",
        "Probe the embedding provider, vector index and persistence",
        r#"{
            "type": "object",
            "properties": {
                "verbose": {"type": "boolean", "default": false, "description": "Include active configuration and vector collections"}
            }
        }"#,
    ),
];

/// Schema shared by the `filter` argument of listing and search tools
const FILTER_SCHEMA: &str = r#"{
    "type": "object",
    "properties": {
        "project_id": {"type": "string"},
        "memory_types": {"type": "array", "items": {"type": "string"}},
        "tags": {"type": "array", "items": {"type": "string"}, "description": "All must be present"},
        "session_ids": {"type": "array", "items": {"type": "string"}},
        "created": {"type": "object", "properties": {"start": {"type": "string"}, "end": {"type": "string"}}},
        "min_content_length": {"type": "integer", "minimum": 0},
        "max_content_length": {"type": "integer", "minimum": 0},
        "has_content": {"type": "boolean"}
    }
}"#;

/// Get all tool definitions as ToolDefinition structs
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    let filter: serde_json::Value = serde_json::from_str(FILTER_SCHEMA).unwrap_or(json!({}));

    TOOL_DEFINITIONS
        .iter()
        .map(|(name, description, schema)| {
            let mut input_schema: serde_json::Value =
                serde_json::from_str(schema).unwrap_or(json!({}));
            if let Some(props) = input_schema
                .get_mut("properties")
                .and_then(|p| p.as_object_mut())
            {
                if props.contains_key("filter") {
                    props.insert("filter".to_string(), filter.clone());
                }
            }
            ToolDefinition {
                name: name.to_string(),
                description: description.to_string(),
                input_schema,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_schemas_parse_and_names_unique() {
        let mut names = HashSet::new();
        for (name, _, schema) in TOOL_DEFINITIONS {
            assert!(
                serde_json::from_str::<serde_json::Value>(schema).is_ok(),
                "invalid schema for {}",
                name
            );
            assert!(names.insert(*name), "duplicate tool {}", name);
        }
        serde_json::from_str::<serde_json::Value>(FILTER_SCHEMA).unwrap();
    }

    #[test]
    fn test_filter_schema_inlined() {
        let tools = get_tool_definitions();
        for name in [
            "memory_list",
            "memory_search",
            "memory_search_faceted",
            "memory_search_enhanced",
        ] {
            let tool = tools.iter().find(|t| t.name == name).unwrap();
            let filter = &tool.input_schema["properties"]["filter"];
            assert_eq!(filter["type"], "object", "{}", name);
            assert_eq!(
                filter["properties"]["project_id"]["type"], "string",
                "filter not inlined for {}",
                name
            );
        }
    }
}
