//! Memory store façade
//!
//! CRUD over knowledge units and projects. Persistence owns canonical state;
//! the vector index is kept in step on create, update and delete.

use std::sync::Arc;

use crate::context::RequestContext;
use crate::embedding::EmbeddingProvider;
use crate::error::{ErrorKind, MembankError, Result, Service};
use crate::storage::{projects, queries, sessions, timestamp, Storage};
use crate::types::*;
use crate::vector::VectorIndex;

#[derive(Clone)]
pub struct MemoryStore {
    storage: Storage,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl MemoryStore {
    pub fn new(
        storage: Storage,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            storage,
            embedder,
            index,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Create a project, or return the existing one registered at the same path
    pub async fn init_project(&self, ctx: &RequestContext, input: InitProjectInput) -> Result<Project> {
        if input.name.trim().is_empty() {
            return Err(MembankError::Validation("project name is required".into()));
        }
        if input.path.trim().is_empty() {
            return Err(MembankError::Validation("project path is required".into()));
        }

        let (project, created) = self
            .storage
            .transaction_for(ctx, move |conn| projects::init_project(conn, &input))
            .await?;

        if created {
            tracing::info!(project_id = %project.id, path = %project.path, "project initialized");
        }
        Ok(project)
    }

    /// Look a project up by ID or path
    pub async fn get_project(&self, ctx: &RequestContext, key: &str) -> Result<Project> {
        let key = key.to_string();
        ctx.guard(
            Service::Persistence,
            self.storage.call(move |conn| projects::get_project(conn, &key)),
        )
        .await
    }

    pub async fn list_projects(&self, ctx: &RequestContext) -> Result<Vec<Project>> {
        ctx.guard(Service::Persistence, self.storage.call(projects::list_projects))
            .await
    }

    /// Persist, then index. A record whose indexing fails is removed again.
    pub async fn create(&self, ctx: &RequestContext, input: CreateMemoryInput) -> Result<Memory> {
        input.validate()?;
        ctx.check(Service::Persistence)?;

        let now = timestamp();
        let memory = Memory {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: input.project_id,
            session_id: input.session_id,
            memory_type: input.memory_type,
            title: input.title,
            content: input.content,
            context: input.context,
            tags: input.tags,
            details: input
                .details
                .unwrap_or_else(|| MemoryDetails::empty(input.memory_type)),
            extensions: input.extensions,
            created_at: now,
            updated_at: now,
        };

        // Not raced against cancellation: the outcome of the insert is always known
        let record = memory.clone();
        self.storage
            .transaction_for(ctx, move |conn| {
                projects::ensure_project(conn, &record.project_id)?;
                if let Some(ref session_id) = record.session_id {
                    let session = sessions::get_session(conn, session_id)?;
                    if session.project_id != record.project_id {
                        return Err(MembankError::Validation(format!(
                            "session {} belongs to another project",
                            session_id
                        )));
                    }
                }
                queries::insert_memory(conn, &record)
            })
            .await?;

        if let Err(err) = self.index_memory(ctx, &memory.id, &memory.embedding_text()).await {
            tracing::warn!(memory_id = %memory.id, error = %err, "indexing failed, rolling back record");
            self.discard(&memory.id).await;
            return Err(err);
        }

        tracing::debug!(memory_id = %memory.id, memory_type = %memory.memory_type, "memory created");
        Ok(memory)
    }

    /// Remove a record that never became searchable, along with any vector written for it
    async fn discard(&self, id: &str) {
        if let Err(err) = self.index.delete(id).await {
            tracing::warn!(memory_id = %id, error = %err, "rollback of vector entry failed");
        }
        let owned_id = id.to_string();
        if let Err(err) = self
            .storage
            .call(move |conn| queries::delete_memory(conn, &owned_id))
            .await
        {
            tracing::warn!(memory_id = %id, error = %err, "rollback of unindexed record failed");
        }
    }

    async fn index_memory(&self, ctx: &RequestContext, id: &str, text: &str) -> Result<()> {
        let vector = ctx.guard(Service::Embedding, self.embedder.embed(text)).await?;
        ctx.guard(Service::VectorIndex, self.index.upsert(id, &vector))
            .await
    }

    pub async fn get(&self, ctx: &RequestContext, id: &str) -> Result<Memory> {
        let id = id.to_string();
        ctx.guard(
            Service::Persistence,
            self.storage.call(move |conn| queries::get_memory(conn, &id)),
        )
        .await
    }

    /// Update title, content, context or tags; re-embeds when the embedded text changes
    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: &str,
        input: UpdateMemoryInput,
    ) -> Result<Memory> {
        input.validate()?;
        if input.is_empty() {
            return Err(MembankError::Validation("no fields to update".into()));
        }
        let ((), updated) = self.apply_update(ctx, id, input, |_, _| Ok(())).await?;
        Ok(updated)
    }

    /// Update a task's memory fields and structured fields in one transaction.
    ///
    /// `edit` receives the task fields as stored at write time. Returns the
    /// fields before the edit and the updated record.
    pub(crate) async fn update_task<F>(
        &self,
        ctx: &RequestContext,
        id: &str,
        input: UpdateMemoryInput,
        edit: F,
    ) -> Result<(TaskFields, Memory)>
    where
        F: FnOnce(&TaskFields) -> TaskFields + Send + 'static,
    {
        input.validate()?;
        let task_id = id.to_string();
        self.apply_update(ctx, id, input, move |conn, current| {
            let fields = match current.task_fields() {
                Some(fields) if current.memory_type == MemoryType::Task => fields.clone(),
                _ => return Err(MembankError::not_found("task", task_id.as_str())),
            };
            queries::write_task_fields(conn, &task_id, &edit(&fields))?;
            Ok(fields)
        })
        .await
    }

    /// Embed, then write the row and `edit` atomically, then refresh the index
    async fn apply_update<F, R>(
        &self,
        ctx: &RequestContext,
        id: &str,
        input: UpdateMemoryInput,
        edit: F,
    ) -> Result<(R, Memory)>
    where
        F: FnOnce(&rusqlite::Connection, &Memory) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let current = self.get(ctx, id).await?;

        // Embed before writing so an embedding outage leaves the record untouched
        let vector = if input.touches_embedding() {
            let text = embedding_text(
                input.title.as_deref().unwrap_or(&current.title),
                input.content.as_deref().unwrap_or(&current.content),
                input.tags.as_deref().unwrap_or(&current.tags),
            );
            Some(ctx.guard(Service::Embedding, self.embedder.embed(&text)).await?)
        } else {
            None
        };

        let owned_id = id.to_string();
        let updated = self
            .storage
            .transaction_for(ctx, move |conn| {
                let current = queries::get_memory(conn, &owned_id)?;
                let edited = edit(conn, &current)?;
                let updated = if input.is_empty() {
                    queries::touch_memory(conn, &owned_id, timestamp())?;
                    queries::get_memory(conn, &owned_id)?
                } else {
                    queries::update_memory(conn, &owned_id, &input, timestamp())?
                };
                Ok((edited, updated))
            })
            .await?;

        // The row is committed; finish the refresh even if the request is cancelled
        if let Some(vector) = vector {
            if let Err(err) = self.index.upsert(id, &vector).await {
                tracing::warn!(memory_id = %id, error = %err, "record updated but index refresh failed");
                return Err(err);
            }
        }

        Ok(updated)
    }

    /// Remove the vector entry first, then the record, so a failed delete can be retried
    pub async fn delete(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        self.get(ctx, id).await?;

        if let Err(err) = ctx.guard(Service::VectorIndex, self.index.delete(id)).await {
            tracing::warn!(memory_id = %id, error = %err, "vector delete failed, record kept");
            return Err(match err.kind() {
                ErrorKind::ServiceUnavailable | ErrorKind::Cancelled => err,
                _ => MembankError::unavailable(Service::VectorIndex, err),
            });
        }

        let owned_id = id.to_string();
        self.storage
            .transaction_for(ctx, move |conn| queries::delete_memory(conn, &owned_id))
            .await?;

        tracing::debug!(memory_id = %id, "memory deleted");
        Ok(())
    }

    /// Filtered listing, newest first
    pub async fn list(
        &self,
        ctx: &RequestContext,
        filter: MemoryFilter,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        filter.validate()?;
        ctx.guard(
            Service::Persistence,
            self.storage
                .call(move |conn| queries::list_memories(conn, &filter, limit)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::TfIdfEmbedder;
    use crate::error::ErrorKind;
    use crate::vector::SqliteVectorIndex;
    use std::collections::BTreeMap;

    fn extensions<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn store() -> (MemoryStore, Project) {
        let storage = Storage::open_in_memory().unwrap();
        let store = MemoryStore::new(
            storage.clone(),
            Arc::new(TfIdfEmbedder::new(64)),
            Arc::new(SqliteVectorIndex::new(storage, "memories")),
        );
        let ctx = RequestContext::new();
        let project = store
            .init_project(
                &ctx,
                InitProjectInput {
                    name: "demo".into(),
                    path: "/demo".into(),
                    description: String::new(),
                },
            )
            .await
            .unwrap();
        (store, project)
    }

    #[tokio::test]
    async fn test_create_get_update_delete() {
        let (store, project) = store().await;
        let ctx = RequestContext::new();

        let mut input =
            CreateMemoryInput::new(&project.id, MemoryType::Decision, "Use JWT", "Chose JWT")
                .with_tags(&["auth"]);
        input.extensions = extensions([("owner", "platform")]);
        let created = store.create(&ctx, input).await.unwrap();
        assert_eq!(created.extensions.get("owner").map(String::as_str), Some("platform"));

        let fetched = store.get(&ctx, &created.id).await.unwrap();
        assert_eq!(fetched, created);

        let updated = store
            .update(
                &ctx,
                &created.id,
                UpdateMemoryInput {
                    content: Some("Chose JWT for stateless auth".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.memory_type, MemoryType::Decision);
        assert_eq!(updated.title, "Use JWT");
        assert!(updated.updated_at >= created.updated_at);

        store.delete(&ctx, &created.id).await.unwrap();
        let err = store.get(&ctx, &created.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_create_requires_existing_project() {
        let (store, _) = store().await;
        let ctx = RequestContext::new();
        let err = store
            .create(&ctx, CreateMemoryInput::new("nope", MemoryType::Code, "t", "c"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_empty_update_rejected() {
        let (store, project) = store().await;
        let ctx = RequestContext::new();
        let created = store
            .create(&ctx, CreateMemoryInput::new(&project.id, MemoryType::Code, "t", "c"))
            .await
            .unwrap();
        let err = store
            .update(&ctx, &created.id, UpdateMemoryInput::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_init_project_idempotent() {
        let (store, project) = store().await;
        let ctx = RequestContext::new();
        let again = store
            .init_project(
                &ctx,
                InitProjectInput {
                    name: "renamed".into(),
                    path: "/demo".into(),
                    description: String::new(),
                },
            )
            .await
            .unwrap();
        assert_eq!(again.id, project.id);
        assert_eq!(store.list_projects(&ctx).await.unwrap().len(), 1);
        assert_eq!(store.get_project(&ctx, "/demo").await.unwrap().id, project.id);
    }
}
