//! Session rows and the progress log
//!
//! Every state change here is a conditional write against
//! `status = 'active'`, so concurrent transitions have exactly one winner.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::format_time;
use crate::error::{MembankError, Result};
use crate::types::{
    parse_stored_time, ProgressEntry, Session, SessionId, SessionListFilter, SessionStatus,
};

const SESSION_COLUMNS: &str =
    "id, project_id, task_description, summary, status, started_at, ended_at";

fn session_from_row(row: &Row) -> rusqlite::Result<Session> {
    let status: String = row.get("status")?;
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;

    let status = status.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(Session {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        task_description: row.get("task_description")?,
        summary: row.get("summary")?,
        status,
        started_at: parse_stored_time(&started_at),
        ended_at: ended_at.map(|s| parse_stored_time(&s)),
        progress: vec![],
    })
}

/// Insert a session as active unless the project already has one.
///
/// Returns Conflict when another active session exists; the partial unique
/// index backs the `NOT EXISTS` guard.
pub fn insert_active_session(conn: &Connection, session: &Session) -> Result<()> {
    let inserted = conn.execute(
        "INSERT INTO sessions (id, project_id, task_description, summary, status, started_at, ended_at)
         SELECT ?1, ?2, ?3, NULL, 'active', ?4, NULL
         WHERE NOT EXISTS (
             SELECT 1 FROM sessions WHERE project_id = ?2 AND status = 'active'
         )",
        params![
            session.id,
            session.project_id,
            session.task_description,
            format_time(&session.started_at),
        ],
    );

    match inserted {
        Ok(1) => Ok(()),
        Ok(_) => Err(active_conflict(&session.project_id)),
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
            Err(active_conflict(&session.project_id))
        }
        Err(e) => Err(e.into()),
    }
}

fn active_conflict(project_id: &str) -> MembankError {
    MembankError::Conflict(format!(
        "project {} already has an active session",
        project_id
    ))
}

pub fn find_session(conn: &Connection, id: &str) -> Result<Option<Session>> {
    let sql = format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;
    let session = stmt.query_row(params![id], session_from_row).optional()?;

    match session {
        Some(mut session) => {
            session.progress = load_progress(conn, &session.id)?;
            Ok(Some(session))
        }
        None => Ok(None),
    }
}

pub fn get_session(conn: &Connection, id: &str) -> Result<Session> {
    find_session(conn, id)?.ok_or_else(|| MembankError::not_found("session", id))
}

/// IDs of the project's active sessions; more than one means a corrupted store
pub fn active_session_ids(conn: &Connection, project_id: &str) -> Result<Vec<SessionId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id FROM sessions WHERE project_id = ? AND status = 'active' ORDER BY started_at ASC",
    )?;
    let ids = stmt
        .query_map(params![project_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

fn load_progress(conn: &Connection, session_id: &str) -> Result<Vec<ProgressEntry>> {
    let mut stmt = conn.prepare_cached(
        "SELECT recorded_at, entry_type, message FROM session_progress
         WHERE session_id = ? ORDER BY id ASC",
    )?;

    let entries = stmt
        .query_map(params![session_id], |row| {
            let recorded_at: String = row.get(0)?;
            let entry_type: String = row.get(1)?;
            Ok(ProgressEntry {
                timestamp: parse_stored_time(&recorded_at),
                entry_type: entry_type.parse().unwrap_or_default(),
                message: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries)
}

/// Append a log entry only while the session is active; false when it is not
pub fn append_progress(conn: &Connection, session_id: &str, entry: &ProgressEntry) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO session_progress (session_id, recorded_at, entry_type, message)
         SELECT ?1, ?2, ?3, ?4
         WHERE EXISTS (SELECT 1 FROM sessions WHERE id = ?1 AND status = 'active')",
        params![
            session_id,
            format_time(&entry.timestamp),
            entry.entry_type.as_str(),
            entry.message,
        ],
    )?;
    Ok(inserted == 1)
}

/// Move an active session into a terminal state; false when it was not active
pub fn finish_session(
    conn: &Connection,
    session_id: &str,
    status: SessionStatus,
    summary: Option<&str>,
    ended_at: DateTime<Utc>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE sessions
         SET status = ?2, summary = COALESCE(?3, summary), ended_at = ?4
         WHERE id = ?1 AND status = 'active'",
        params![session_id, status.as_str(), summary, format_time(&ended_at)],
    )?;
    Ok(updated == 1)
}

/// Abort every active session of a project, returning the IDs that changed
pub fn abort_active_for_project(
    conn: &Connection,
    project_id: &str,
    ended_at: DateTime<Utc>,
) -> Result<Vec<SessionId>> {
    let ids = active_session_ids(conn, project_id)?;
    let mut aborted = Vec::with_capacity(ids.len());
    for id in ids {
        if finish_session(conn, &id, SessionStatus::Aborted, None, ended_at)? {
            aborted.push(id);
        }
    }
    Ok(aborted)
}

/// List sessions newest first
pub fn list_sessions(conn: &Connection, filter: &SessionListFilter, limit: usize) -> Result<Vec<Session>> {
    let mut conditions: Vec<String> = vec![];
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![];

    if let Some(ref project_id) = filter.project_id {
        conditions.push("project_id = ?".to_string());
        values.push(Box::new(project_id.clone()));
    }
    if let Some(status) = filter.status {
        conditions.push("status = ?".to_string());
        values.push(Box::new(status.as_str().to_string()));
    }
    if let Some(after) = filter.started_after {
        conditions.push("started_at >= ?".to_string());
        values.push(Box::new(format_time(&after)));
    }

    let mut sql = format!("SELECT {} FROM sessions", SESSION_COLUMNS);
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(&format!(" ORDER BY started_at DESC, id ASC LIMIT {}", limit));

    let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let mut sessions = stmt
        .query_map(params.as_slice(), session_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for session in &mut sessions {
        session.progress = load_progress(conn, &session.id)?;
    }

    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::{projects, Storage};
    use crate::types::ProgressType;

    fn setup() -> (Storage, String) {
        let storage = Storage::open_in_memory().unwrap();
        let project = projects::new_project("demo", "/demo", "");
        let id = project.id.clone();
        storage
            .with_connection(|conn| projects::insert_project(conn, &project))
            .unwrap();
        (storage, id)
    }

    fn active(project_id: &str) -> Session {
        Session {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            task_description: "refactor".into(),
            summary: None,
            status: SessionStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            progress: vec![],
        }
    }

    #[test]
    fn test_second_active_session_conflicts() {
        let (storage, project_id) = setup();
        storage
            .with_connection(|conn| {
                insert_active_session(conn, &active(&project_id))?;
                let err = insert_active_session(conn, &active(&project_id)).unwrap_err();
                assert_eq!(err.kind(), ErrorKind::Conflict);
                assert_eq!(active_session_ids(conn, &project_id)?.len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_progress_only_while_active() {
        let (storage, project_id) = setup();
        let session = active(&project_id);
        storage
            .with_connection(|conn| {
                insert_active_session(conn, &session)?;
                let entry = ProgressEntry {
                    timestamp: Utc::now(),
                    entry_type: ProgressType::Milestone,
                    message: "tests green".into(),
                };
                assert!(append_progress(conn, &session.id, &entry)?);

                assert!(finish_session(conn, &session.id, SessionStatus::Completed, Some("done"), Utc::now())?);
                assert!(!finish_session(conn, &session.id, SessionStatus::Aborted, None, Utc::now())?);
                assert!(!append_progress(conn, &session.id, &entry)?);

                let loaded = get_session(conn, &session.id)?;
                assert_eq!(loaded.status, SessionStatus::Completed);
                assert_eq!(loaded.summary.as_deref(), Some("done"));
                assert_eq!(loaded.progress.len(), 1);
                assert_eq!(loaded.progress[0].entry_type, ProgressType::Milestone);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_abort_active_for_project() {
        let (storage, project_id) = setup();
        storage
            .with_connection(|conn| {
                assert!(abort_active_for_project(conn, &project_id, Utc::now())?.is_empty());
                let session = active(&project_id);
                insert_active_session(conn, &session)?;
                let aborted = abort_active_for_project(conn, &project_id, Utc::now())?;
                assert_eq!(aborted, vec![session.id.clone()]);

                let filter = SessionListFilter {
                    status: Some(SessionStatus::Aborted),
                    ..Default::default()
                };
                assert_eq!(list_sessions(conn, &filter, 50)?.len(), 1);
                Ok(())
            })
            .unwrap();
    }
}
