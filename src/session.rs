//! Session manager
//!
//! State machine per project: `active -> {completed, aborted}`. The
//! at-most-one-active invariant and every transition are enforced by
//! conditional writes in the storage layer; this module resolves references
//! and turns "nothing changed" into the right error.

use serde::{Deserialize, Serialize};

use crate::config::SearchDefaults;
use crate::context::RequestContext;
use crate::error::{MembankError, Result, Service};
use crate::storage::{projects, sessions, timestamp, Storage};
use crate::types::*;

/// How a caller addresses a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRef {
    /// An explicit session ID
    Id(SessionId),
    /// The active session of a project
    ActiveOf(ProjectId),
}

impl SessionRef {
    /// Explicit ID wins; otherwise fall back to the project's active session
    pub fn from_parts(session_id: Option<String>, project_id: Option<String>) -> Result<Self> {
        match (session_id, project_id) {
            (Some(id), _) if !id.trim().is_empty() => Ok(SessionRef::Id(id)),
            (_, Some(project)) if !project.trim().is_empty() => Ok(SessionRef::ActiveOf(project)),
            _ => Err(MembankError::Validation(
                "either session_id or project_id is required".into(),
            )),
        }
    }
}

/// Resolve a reference to a session ID.
///
/// `ActiveOf` fails with NotFound when the project has no active session and
/// with Ambiguous when it has several, which only a corrupted store allows.
pub fn resolve_session(conn: &rusqlite::Connection, reference: &SessionRef) -> Result<SessionId> {
    match reference {
        SessionRef::Id(id) => {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?)",
                [id],
                |row| row.get(0),
            )?;
            if exists {
                Ok(id.clone())
            } else {
                Err(MembankError::not_found("session", id))
            }
        }
        SessionRef::ActiveOf(project_id) => {
            let mut ids = sessions::active_session_ids(conn, project_id)?;
            match ids.len() {
                0 => Err(MembankError::not_found(
                    "active session",
                    project_id.as_str(),
                )),
                1 => Ok(ids.remove(0)),
                n => Err(MembankError::Ambiguous(format!(
                    "project {} has {} active sessions",
                    project_id, n
                ))),
            }
        }
    }
}

/// After a conditional write matched nothing, decide between NotFound and InvalidState
fn not_active(conn: &rusqlite::Connection, id: &str, action: &str) -> MembankError {
    match sessions::find_session(conn, id) {
        Ok(Some(session)) => MembankError::InvalidState(format!(
            "cannot {} session {}: it is {}",
            action, id, session.status
        )),
        Ok(None) => MembankError::not_found("session", id),
        Err(e) => e,
    }
}

#[derive(Clone)]
pub struct SessionManager {
    storage: Storage,
    list_limit: usize,
}

impl SessionManager {
    pub fn new(storage: Storage, defaults: &SearchDefaults) -> Self {
        Self {
            storage,
            list_limit: defaults.session_list_limit,
        }
    }

    /// Start an active session; Conflict when the project already has one
    #[tracing::instrument(skip(self, ctx, task_description))]
    pub async fn start(
        &self,
        ctx: &RequestContext,
        project_id: &str,
        task_description: &str,
    ) -> Result<Session> {
        if task_description.trim().is_empty() {
            return Err(MembankError::Validation("task description is required".into()));
        }

        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            task_description: task_description.to_string(),
            summary: None,
            status: SessionStatus::Active,
            started_at: timestamp(),
            ended_at: None,
            progress: vec![],
        };

        let record = session.clone();
        self.storage
            .transaction_for(ctx, move |conn| {
                projects::ensure_project(conn, &record.project_id)?;
                sessions::insert_active_session(conn, &record)
            })
            .await?;

        tracing::info!(session_id = %session.id, project_id, "session started");
        Ok(session)
    }

    /// Append to the progress log of an active session
    #[tracing::instrument(skip(self, ctx, message))]
    pub async fn log_progress(
        &self,
        ctx: &RequestContext,
        reference: SessionRef,
        message: &str,
        entry_type: Option<ProgressType>,
    ) -> Result<Session> {
        if message.trim().is_empty() {
            return Err(MembankError::Validation("progress message is required".into()));
        }

        let entry = ProgressEntry {
            timestamp: timestamp(),
            entry_type: entry_type.unwrap_or_default(),
            message: message.to_string(),
        };

        self.storage
            .transaction_for(ctx, move |conn| {
                let id = resolve_session(conn, &reference)?;
                if !sessions::append_progress(conn, &id, &entry)? {
                    return Err(not_active(conn, &id, "log progress to"));
                }
                sessions::get_session(conn, &id)
            })
            .await
    }

    /// Complete an active session, recording the outcome as its summary
    #[tracing::instrument(skip(self, ctx, outcome))]
    pub async fn complete(
        &self,
        ctx: &RequestContext,
        reference: SessionRef,
        outcome: &str,
    ) -> Result<Session> {
        let outcome = outcome.to_string();
        let session = self
            .storage
            .transaction_for(ctx, move |conn| {
                let id = resolve_session(conn, &reference)?;
                let changed = sessions::finish_session(
                    conn,
                    &id,
                    SessionStatus::Completed,
                    Some(&outcome),
                    timestamp(),
                )?;
                if !changed {
                    return Err(not_active(conn, &id, "complete"));
                }
                sessions::get_session(conn, &id)
            })
            .await?;

        tracing::info!(session_id = %session.id, "session completed");
        Ok(session)
    }

    /// Abort one active session
    #[tracing::instrument(skip(self, ctx))]
    pub async fn abort(&self, ctx: &RequestContext, session_id: &str) -> Result<Session> {
        let id = session_id.to_string();
        let session = self
            .storage
            .transaction_for(ctx, move |conn| {
                let changed =
                    sessions::finish_session(conn, &id, SessionStatus::Aborted, None, timestamp())?;
                if !changed {
                    return Err(not_active(conn, &id, "abort"));
                }
                sessions::get_session(conn, &id)
            })
            .await?;

        tracing::info!(session_id = %session.id, "session aborted");
        Ok(session)
    }

    /// Abort every active session of a project; aborting nothing is not an error
    #[tracing::instrument(skip(self, ctx))]
    pub async fn abort_active_for_project(
        &self,
        ctx: &RequestContext,
        project_id: &str,
    ) -> Result<Vec<Session>> {
        let project_id = project_id.to_string();
        let aborted = self
            .storage
            .transaction_for(ctx, move |conn| {
                projects::ensure_project(conn, &project_id)?;
                let ids = sessions::abort_active_for_project(conn, &project_id, timestamp())?;
                ids.iter()
                    .map(|id| sessions::get_session(conn, id))
                    .collect::<Result<Vec<_>>>()
            })
            .await?;

        if !aborted.is_empty() {
            tracing::info!(count = aborted.len(), "aborted active sessions");
        }
        Ok(aborted)
    }

    /// The project's active session; NotFound when there is none
    pub async fn get_active(&self, ctx: &RequestContext, project_id: &str) -> Result<Session> {
        let reference = SessionRef::ActiveOf(project_id.to_string());
        ctx.guard(
            Service::Persistence,
            self.storage.call(move |conn| {
                let id = resolve_session(conn, &reference)?;
                sessions::get_session(conn, &id)
            }),
        )
        .await
    }

    pub async fn get(&self, ctx: &RequestContext, session_id: &str) -> Result<Session> {
        let id = session_id.to_string();
        ctx.guard(
            Service::Persistence,
            self.storage.call(move |conn| sessions::get_session(conn, &id)),
        )
        .await
    }

    /// Sessions newest first
    pub async fn list(&self, ctx: &RequestContext, filter: SessionListFilter) -> Result<Vec<Session>> {
        let limit = filter.limit.unwrap_or(self.list_limit);
        if limit == 0 {
            return Ok(vec![]);
        }
        ctx.guard(
            Service::Persistence,
            self.storage
                .call(move |conn| sessions::list_sessions(conn, &filter, limit)),
        )
        .await
    }
}
