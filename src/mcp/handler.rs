//! Tool dispatch from MCP requests to memory bank operations

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::protocol::{methods, InitializeResult, McpHandler, McpRequest, McpResponse, ToolCallResult};
use super::tools::get_tool_definitions;
use crate::bank::MemoryBank;
use crate::context::RequestContext;
use crate::error::{MembankError, Result};
use crate::search::{
    EnhancedSearchRequest, FacetedSearchRequest, SemanticSearchRequest, SuggestionRequest,
};
use crate::session::SessionRef;
use crate::tasks::{CreateTaskInput, TaskListFilter, UpdateTaskInput};
use crate::types::*;

#[derive(Deserialize)]
struct IdArgs {
    id: String,
}

#[derive(Deserialize)]
struct UpdateMemoryArgs {
    id: String,
    #[serde(flatten)]
    update: UpdateMemoryInput,
}

#[derive(Deserialize)]
struct ListMemoriesArgs {
    #[serde(default)]
    filter: MemoryFilter,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct ProjectArgs {
    project_id: String,
}

#[derive(Deserialize)]
struct SessionIdArgs {
    session_id: String,
}

#[derive(Deserialize)]
struct StartSessionArgs {
    project_id: String,
    task_description: String,
}

#[derive(Deserialize)]
struct LogProgressArgs {
    session_id: Option<String>,
    project_id: Option<String>,
    message: String,
    #[serde(rename = "type")]
    entry_type: Option<String>,
}

#[derive(Deserialize)]
struct CompleteSessionArgs {
    session_id: Option<String>,
    project_id: Option<String>,
    outcome: String,
}

#[derive(Deserialize)]
struct UpdateTaskArgs {
    id: String,
    #[serde(flatten)]
    update: UpdateTaskInput,
}

#[derive(Deserialize)]
struct DependencyArgs {
    task_id: String,
    depends_on: String,
}

#[derive(Deserialize)]
struct SubtaskArgs {
    parent_id: String,
    subtask_id: String,
}

#[derive(Deserialize, Default)]
struct HealthArgs {
    #[serde(default)]
    verbose: bool,
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| MembankError::Validation(e.to_string()))
}

fn to_value(value: &impl Serialize) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// MCP request handler backed by a [`MemoryBank`]
pub struct BankHandler {
    bank: MemoryBank,
    request_timeout: Option<Duration>,
}

impl BankHandler {
    pub fn new(bank: MemoryBank) -> Self {
        Self {
            bank,
            request_timeout: None,
        }
    }

    /// Bound every tool call by a deadline
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn context(&self, cancel: CancellationToken) -> RequestContext {
        let ctx = match self.request_timeout {
            Some(timeout) => RequestContext::with_timeout(timeout),
            None => RequestContext::new(),
        };
        ctx.with_token(cancel)
    }

    /// Run one tool, returning its JSON result
    pub async fn call_tool(&self, ctx: &RequestContext, name: &str, params: Value) -> Result<Value> {
        let bank = &self.bank;
        match name {
            "project_init" => {
                let input: InitProjectInput = parse(params)?;
                to_value(&bank.init_project(ctx, input).await?)
            }
            "project_get" => {
                let args: IdArgs = parse(params)?;
                to_value(&bank.get_project(ctx, &args.id).await?)
            }
            "project_list" => to_value(&bank.list_projects(ctx).await?),

            "memory_create" => {
                let input: CreateMemoryInput = parse(params)?;
                to_value(&bank.create_memory(ctx, input).await?)
            }
            "memory_get" => {
                let args: IdArgs = parse(params)?;
                to_value(&bank.get_memory(ctx, &args.id).await?)
            }
            "memory_update" => {
                let args: UpdateMemoryArgs = parse(params)?;
                to_value(&bank.update_memory(ctx, &args.id, args.update).await?)
            }
            "memory_delete" => {
                let args: IdArgs = parse(params)?;
                bank.delete_memory(ctx, &args.id).await?;
                Ok(json!({"deleted": true, "id": args.id}))
            }
            "memory_list" => {
                let args: ListMemoriesArgs = parse(params)?;
                to_value(&bank.list_memories(ctx, args.filter, args.limit).await?)
            }

            "memory_search" => {
                let request: SemanticSearchRequest = parse(params)?;
                to_value(&bank.semantic_search(ctx, &request).await?)
            }
            "memory_search_faceted" => {
                let request: FacetedSearchRequest = parse(params)?;
                to_value(&bank.faceted_search(ctx, &request).await?)
            }
            "memory_search_enhanced" => {
                let request: EnhancedSearchRequest = parse(params)?;
                to_value(&bank.enhanced_search(ctx, &request).await?)
            }
            "memory_search_suggest" => {
                let request: SuggestionRequest = parse(params)?;
                let suggestions = bank.search_suggestions(ctx, &request).await?;
                Ok(json!({"suggestions": suggestions}))
            }

            "session_start" => {
                let args: StartSessionArgs = parse(params)?;
                to_value(
                    &bank
                        .start_session(ctx, &args.project_id, &args.task_description)
                        .await?,
                )
            }
            "session_log_progress" => {
                let args: LogProgressArgs = parse(params)?;
                let entry_type = args
                    .entry_type
                    .as_deref()
                    .map(str::parse::<ProgressType>)
                    .transpose()
                    .map_err(MembankError::Validation)?;
                let reference = SessionRef::from_parts(args.session_id, args.project_id)?;
                to_value(
                    &bank
                        .log_progress(ctx, reference, &args.message, entry_type)
                        .await?,
                )
            }
            "session_complete" => {
                let args: CompleteSessionArgs = parse(params)?;
                let reference = SessionRef::from_parts(args.session_id, args.project_id)?;
                to_value(&bank.complete_session(ctx, reference, &args.outcome).await?)
            }
            "session_abort" => {
                let args: SessionIdArgs = parse(params)?;
                to_value(&bank.abort_session(ctx, &args.session_id).await?)
            }
            "session_abort_active" => {
                let args: ProjectArgs = parse(params)?;
                let aborted = bank
                    .abort_active_sessions_for_project(ctx, &args.project_id)
                    .await?;
                Ok(json!({"aborted": aborted}))
            }
            "session_get" => {
                let args: SessionIdArgs = parse(params)?;
                to_value(&bank.get_session(ctx, &args.session_id).await?)
            }
            "session_get_active" => {
                let args: ProjectArgs = parse(params)?;
                to_value(&bank.get_active_session(ctx, &args.project_id).await?)
            }
            "session_list" => {
                let filter: SessionListFilter = parse(params)?;
                to_value(&bank.list_sessions(ctx, filter).await?)
            }

            "task_create" => {
                let input: CreateTaskInput = parse(params)?;
                to_value(&bank.create_task(ctx, input).await?)
            }
            "task_get" => {
                let args: IdArgs = parse(params)?;
                to_value(&bank.get_task(ctx, &args.id).await?)
            }
            "task_update" => {
                let args: UpdateTaskArgs = parse(params)?;
                to_value(&bank.update_task(ctx, &args.id, args.update).await?)
            }
            "task_delete" => {
                let args: IdArgs = parse(params)?;
                bank.delete_task(ctx, &args.id).await?;
                Ok(json!({"deleted": true, "id": args.id}))
            }
            "task_list" => {
                let filter: TaskListFilter = parse(params)?;
                to_value(&bank.list_tasks(ctx, filter).await?)
            }
            "task_statistics" => {
                let args: ProjectArgs = parse(params)?;
                to_value(&bank.get_task_statistics(ctx, &args.project_id).await?)
            }
            "task_efficiency" => {
                let args: ProjectArgs = parse(params)?;
                to_value(&bank.get_task_efficiency(ctx, &args.project_id).await?)
            }
            "task_add_dependency" => {
                let args: DependencyArgs = parse(params)?;
                to_value(&bank.add_task_dependency(&args.task_id, &args.depends_on).await?)
            }
            "task_add_subtask" => {
                let args: SubtaskArgs = parse(params)?;
                to_value(&bank.add_subtask(&args.parent_id, &args.subtask_id).await?)
            }

            "health_check" => {
                let args: HealthArgs = if params.is_null() {
                    HealthArgs::default()
                } else {
                    parse(params)?
                };
                to_value(&bank.check_health(args.verbose).await)
            }

            _ => Err(MembankError::Unsupported(format!("Unknown tool: {}", name))),
        }
    }
}

#[async_trait]
impl McpHandler for BankHandler {
    async fn handle_request(&self, request: McpRequest, cancel: CancellationToken) -> McpResponse {
        match request.method.as_str() {
            methods::INITIALIZE => {
                let result = InitializeResult::default();
                McpResponse::success(request.id, json!(result))
            }
            methods::INITIALIZED | methods::PING => McpResponse::success(request.id, json!({})),
            methods::LIST_TOOLS => {
                let tools = get_tool_definitions();
                McpResponse::success(request.id, json!({"tools": tools}))
            }
            methods::CALL_TOOL => {
                let name = request
                    .params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let arguments = request
                    .params
                    .get("arguments")
                    .cloned()
                    .unwrap_or(json!({}));

                let ctx = self.context(cancel);
                match self.call_tool(&ctx, &name, arguments).await {
                    Ok(result) => {
                        let tool_result = ToolCallResult::json(&result);
                        McpResponse::success(request.id, json!(tool_result))
                    }
                    Err(err) => {
                        tracing::debug!(tool = %name, error = %err, "tool call failed");
                        McpResponse::from_error(request.id, err)
                    }
                }
            }
            _ => McpResponse::error(
                request.id,
                -32601,
                format!("Method not found: {}", request.method),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BankConfig;

    fn handler() -> BankHandler {
        BankHandler::new(MemoryBank::open(BankConfig::in_memory()).unwrap())
    }

    async fn call(handler: &BankHandler, name: &str, args: Value) -> McpResponse {
        handler
            .handle_request(
                McpRequest {
                    jsonrpc: "2.0".into(),
                    id: Some(json!(1)),
                    method: methods::CALL_TOOL.into(),
                    params: json!({"name": name, "arguments": args}),
                },
                CancellationToken::new(),
            )
            .await
    }

    fn payload(response: &McpResponse) -> Value {
        let text = response.result.as_ref().unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_session_tools_round_trip() {
        let handler = handler();
        let project = payload(&call(&handler, "project_init", json!({"name": "api", "path": "/api"})).await);
        let project_id = project["id"].as_str().unwrap().to_string();

        let started = call(
            &handler,
            "session_start",
            json!({"project_id": project_id, "task_description": "add auth"}),
        )
        .await;
        assert!(started.error.is_none());

        let again = call(
            &handler,
            "session_start",
            json!({"project_id": project_id, "task_description": "second"}),
        )
        .await;
        assert_eq!(again.error.unwrap().code, -32005);

        let logged = call(
            &handler,
            "session_log_progress",
            json!({"project_id": project_id, "message": "middleware wired", "type": "milestone"}),
        )
        .await;
        assert_eq!(payload(&logged)["progress"][0]["type"], "milestone");
    }

    #[tokio::test]
    async fn test_errors_map_to_codes() {
        let handler = handler();

        let missing = call(&handler, "memory_get", json!({"id": "nope"})).await;
        assert_eq!(missing.error.unwrap().code, -32001);

        let invalid = call(&handler, "memory_search", json!({"query": "x", "threshold": 2.0})).await;
        assert_eq!(invalid.error.unwrap().code, -32602);

        let bad_args = call(&handler, "memory_get", json!({})).await;
        assert_eq!(bad_args.error.unwrap().code, -32602);

        let unknown = call(&handler, "memory_teleport", json!({})).await;
        assert_eq!(unknown.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_health_tool() {
        let handler = handler();
        let health = payload(&call(&handler, "health_check", json!({"verbose": true})).await);
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["config"]["persistence_location"], ":memory:");
    }
}
