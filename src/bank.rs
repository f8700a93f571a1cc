//! The memory bank façade
//!
//! Owns the collaborators and exposes every operation the transport layer
//! calls. Each call takes a [`RequestContext`] so the caller controls
//! cancellation and deadlines.

use std::sync::Arc;

use crate::config::{BankConfig, ConfigReport, CoreConfig};
use crate::context::RequestContext;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::Result;
use crate::health::{HealthMonitor, HealthReport};
use crate::memory::MemoryStore;
use crate::search::{
    EnhancedSearchRequest, FacetedSearchRequest, SearchEngine, SemanticSearchRequest,
    SuggestionRequest,
};
use crate::session::{SessionManager, SessionRef};
use crate::storage::Storage;
use crate::tasks::{
    CreateTaskInput, TaskEfficiency, TaskListFilter, TaskManager, TaskStatistics, UpdateTaskInput,
};
use crate::types::*;
use crate::vector::{SqliteVectorIndex, VectorIndex};

#[derive(Clone)]
pub struct MemoryBank {
    memories: MemoryStore,
    search: SearchEngine,
    sessions: SessionManager,
    tasks: TaskManager,
    health: HealthMonitor,
    list_all_limit: usize,
}

impl MemoryBank {
    /// Assemble from explicit collaborators
    pub fn new(
        storage: Storage,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        config: &CoreConfig,
        report: ConfigReport,
    ) -> Self {
        let memories = MemoryStore::new(storage.clone(), embedder.clone(), index.clone());
        Self {
            search: SearchEngine::new(storage.clone(), embedder.clone(), index.clone(), config),
            sessions: SessionManager::new(storage.clone(), &config.search),
            tasks: TaskManager::new(memories.clone(), &config.search),
            health: HealthMonitor::new(
                embedder,
                index,
                storage,
                report,
                config.health_probe_timeout,
            ),
            memories,
            list_all_limit: config.search.list_all_limit,
        }
    }

    /// Open storage, build the embedder and the SQLite-backed vector index
    pub fn open(config: BankConfig) -> Result<Self> {
        let storage = Storage::open(config.storage.clone())?;
        if let Some(warning) = storage.storage_mode_warning() {
            tracing::warn!("{}", warning);
        }

        let embedder = create_embedder(&config.embedding)?;
        let index: Arc<dyn VectorIndex> = Arc::new(SqliteVectorIndex::new(
            storage.clone(),
            config.vector_index.collection.clone(),
        ));
        let report = ConfigReport::new(
            embedder.endpoint(),
            embedder.model_name(),
            &config.vector_index,
            &config.storage,
        );

        tracing::info!(
            db_path = %config.storage.db_path,
            embedding_model = embedder.model_name(),
            collection = %config.vector_index.collection,
            "memory bank opened"
        );

        Ok(Self::new(storage, embedder, index, &config.core, report))
    }

    // Projects

    pub async fn init_project(&self, ctx: &RequestContext, input: InitProjectInput) -> Result<Project> {
        self.memories.init_project(ctx, input).await
    }

    pub async fn get_project(&self, ctx: &RequestContext, key: &str) -> Result<Project> {
        self.memories.get_project(ctx, key).await
    }

    pub async fn list_projects(&self, ctx: &RequestContext) -> Result<Vec<Project>> {
        self.memories.list_projects(ctx).await
    }

    // Memories

    #[tracing::instrument(skip(self, ctx, input), fields(project_id = %input.project_id, memory_type = %input.memory_type))]
    pub async fn create_memory(&self, ctx: &RequestContext, input: CreateMemoryInput) -> Result<Memory> {
        self.memories.create(ctx, input).await
    }

    pub async fn get_memory(&self, ctx: &RequestContext, id: &str) -> Result<Memory> {
        self.memories.get(ctx, id).await
    }

    #[tracing::instrument(skip(self, ctx, input))]
    pub async fn update_memory(
        &self,
        ctx: &RequestContext,
        id: &str,
        input: UpdateMemoryInput,
    ) -> Result<Memory> {
        self.memories.update(ctx, id, input).await
    }

    #[tracing::instrument(skip(self, ctx))]
    pub async fn delete_memory(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        self.memories.delete(ctx, id).await
    }

    /// Filtered listing, newest first; `limit` defaults to the list-all bound
    pub async fn list_memories(
        &self,
        ctx: &RequestContext,
        filter: MemoryFilter,
        limit: Option<usize>,
    ) -> Result<Vec<Memory>> {
        let limit = limit.unwrap_or(self.list_all_limit);
        self.memories.list(ctx, filter, limit).await
    }

    // Search

    pub async fn semantic_search(
        &self,
        ctx: &RequestContext,
        request: &SemanticSearchRequest,
    ) -> Result<SearchPage<SearchResult>> {
        self.search.semantic_search(ctx, request).await
    }

    pub async fn faceted_search(
        &self,
        ctx: &RequestContext,
        request: &FacetedSearchRequest,
    ) -> Result<FacetedSearchResponse> {
        self.search.faceted_search(ctx, request).await
    }

    pub async fn enhanced_search(
        &self,
        ctx: &RequestContext,
        request: &EnhancedSearchRequest,
    ) -> Result<SearchPage<EnhancedSearchResult>> {
        self.search.enhanced_search(ctx, request).await
    }

    pub async fn search_suggestions(
        &self,
        ctx: &RequestContext,
        request: &SuggestionRequest,
    ) -> Result<Vec<String>> {
        self.search.suggestions(ctx, request).await
    }

    // Sessions

    pub async fn start_session(
        &self,
        ctx: &RequestContext,
        project_id: &str,
        task_description: &str,
    ) -> Result<Session> {
        self.sessions.start(ctx, project_id, task_description).await
    }

    pub async fn log_progress(
        &self,
        ctx: &RequestContext,
        reference: SessionRef,
        message: &str,
        entry_type: Option<ProgressType>,
    ) -> Result<Session> {
        self.sessions
            .log_progress(ctx, reference, message, entry_type)
            .await
    }

    pub async fn complete_session(
        &self,
        ctx: &RequestContext,
        reference: SessionRef,
        outcome: &str,
    ) -> Result<Session> {
        self.sessions.complete(ctx, reference, outcome).await
    }

    pub async fn abort_session(&self, ctx: &RequestContext, session_id: &str) -> Result<Session> {
        self.sessions.abort(ctx, session_id).await
    }

    pub async fn abort_active_sessions_for_project(
        &self,
        ctx: &RequestContext,
        project_id: &str,
    ) -> Result<Vec<Session>> {
        self.sessions.abort_active_for_project(ctx, project_id).await
    }

    pub async fn get_active_session(&self, ctx: &RequestContext, project_id: &str) -> Result<Session> {
        self.sessions.get_active(ctx, project_id).await
    }

    pub async fn get_session(&self, ctx: &RequestContext, session_id: &str) -> Result<Session> {
        self.sessions.get(ctx, session_id).await
    }

    pub async fn list_sessions(
        &self,
        ctx: &RequestContext,
        filter: SessionListFilter,
    ) -> Result<Vec<Session>> {
        self.sessions.list(ctx, filter).await
    }

    // Tasks

    pub async fn create_task(&self, ctx: &RequestContext, input: CreateTaskInput) -> Result<Memory> {
        self.tasks.create(ctx, input).await
    }

    pub async fn get_task(&self, ctx: &RequestContext, id: &str) -> Result<Memory> {
        self.tasks.get(ctx, id).await
    }

    pub async fn update_task(
        &self,
        ctx: &RequestContext,
        id: &str,
        input: UpdateTaskInput,
    ) -> Result<Memory> {
        self.tasks.update(ctx, id, input).await
    }

    pub async fn delete_task(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        self.tasks.delete(ctx, id).await
    }

    pub async fn list_tasks(&self, ctx: &RequestContext, filter: TaskListFilter) -> Result<Vec<Memory>> {
        self.tasks.list(ctx, filter).await
    }

    pub async fn get_task_statistics(
        &self,
        ctx: &RequestContext,
        project_id: &str,
    ) -> Result<TaskStatistics> {
        self.tasks.statistics(ctx, project_id).await
    }

    pub async fn get_task_efficiency(
        &self,
        ctx: &RequestContext,
        project_id: &str,
    ) -> Result<TaskEfficiency> {
        self.tasks.efficiency(ctx, project_id).await
    }

    pub async fn add_task_dependency(&self, task_id: &str, depends_on: &str) -> Result<Memory> {
        self.tasks.add_dependency(task_id, depends_on).await
    }

    pub async fn add_subtask(&self, parent_id: &str, subtask_id: &str) -> Result<Memory> {
        self.tasks.add_subtask(parent_id, subtask_id).await
    }

    // Health

    #[tracing::instrument(skip(self))]
    pub async fn check_health(&self, verbose: bool) -> HealthReport {
        self.health.check(verbose).await
    }
}
