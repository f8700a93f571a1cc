//! Project rows

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_time, timestamp};
use crate::error::{MembankError, Result};
use crate::types::{parse_stored_time, InitProjectInput, Project};

fn project_from_row(row: &Row) -> rusqlite::Result<Project> {
    let created_at: String = row.get("created_at")?;
    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
        path: row.get("path")?,
        description: row.get("description")?,
        created_at: parse_stored_time(&created_at),
    })
}

/// Build a new project with a fresh ID
pub fn new_project(name: &str, path: &str, description: &str) -> Project {
    Project {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        path: path.to_string(),
        description: description.to_string(),
        created_at: timestamp(),
    }
}

pub fn insert_project(conn: &Connection, project: &Project) -> Result<()> {
    conn.execute(
        "INSERT INTO projects (id, name, path, description, created_at) VALUES (?, ?, ?, ?, ?)",
        params![
            project.id,
            project.name,
            project.path,
            project.description,
            format_time(&project.created_at),
        ],
    )?;
    Ok(())
}

/// Create the project unless one already exists at the same path
pub fn init_project(conn: &Connection, input: &InitProjectInput) -> Result<(Project, bool)> {
    if let Some(existing) = find_project(conn, &input.path)? {
        return Ok((existing, false));
    }

    let project = new_project(&input.name, &input.path, &input.description);
    insert_project(conn, &project)?;
    Ok((project, true))
}

/// Look a project up by ID, falling back to its path
pub fn find_project(conn: &Connection, key: &str) -> Result<Option<Project>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, path, description, created_at FROM projects
         WHERE id = ?1 OR path = ?1
         ORDER BY CASE WHEN id = ?1 THEN 0 ELSE 1 END
         LIMIT 1",
    )?;
    Ok(stmt.query_row(params![key], project_from_row).optional()?)
}

pub fn get_project(conn: &Connection, key: &str) -> Result<Project> {
    find_project(conn, key)?.ok_or_else(|| MembankError::not_found("project", key))
}

/// Fail with NotFound unless the project ID exists
pub fn ensure_project(conn: &Connection, project_id: &str) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM projects WHERE id = ?)",
        params![project_id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(MembankError::not_found("project", project_id))
    }
}

pub fn list_projects(conn: &Connection) -> Result<Vec<Project>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, path, description, created_at FROM projects ORDER BY name ASC, id ASC",
    )?;
    let projects = stmt
        .query_map([], project_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(projects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    #[test]
    fn test_init_is_idempotent_on_path() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let input = InitProjectInput {
                    name: "api".into(),
                    path: "/src/api".into(),
                    description: String::new(),
                };
                let (first, created) = init_project(conn, &input)?;
                assert!(created);
                let (second, created) = init_project(conn, &input)?;
                assert!(!created);
                assert_eq!(first.id, second.id);

                assert_eq!(get_project(conn, "/src/api")?.id, first.id);
                assert_eq!(get_project(conn, &first.id)?.path, "/src/api");
                assert_eq!(list_projects(conn)?.len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_unknown_project() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                assert!(get_project(conn, "missing").is_err());
                assert!(ensure_project(conn, "missing").is_err());
                Ok(())
            })
            .unwrap();
    }
}
