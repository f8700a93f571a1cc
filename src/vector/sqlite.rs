//! Brute-force cosine index stored alongside the records in SQLite

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;

use super::{decode_vector, encode_vector, sort_matches, VectorIndex, VectorMatch};
use crate::embedding::cosine_similarity;
use crate::error::{MembankError, Result, Service};
use crate::storage::Storage;

/// Vector index over the `vector_entries` table, scoped to one collection
#[derive(Clone)]
pub struct SqliteVectorIndex {
    storage: Storage,
    collection: String,
}

impl SqliteVectorIndex {
    pub fn new(storage: Storage, collection: impl Into<String>) -> Self {
        Self {
            storage,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

/// Dimension of some other entry in the collection that differs from `dimensions`
fn foreign_dimension(
    conn: &rusqlite::Connection,
    collection: &str,
    exclude_id: Option<&str>,
    dimensions: usize,
) -> Result<Option<i64>> {
    use rusqlite::OptionalExtension;

    let found = conn
        .prepare_cached(
            "SELECT dimensions FROM vector_entries
             WHERE collection = ?1 AND dimensions != ?2 AND (?3 IS NULL OR id != ?3)
             LIMIT 1",
        )?
        .query_row(params![collection, dimensions as i64, exclude_id], |row| row.get(0))
        .optional()?;
    Ok(found)
}

fn dimension_mismatch(collection: &str, stored: i64, given: usize) -> MembankError {
    MembankError::unavailable(
        Service::VectorIndex,
        format!(
            "collection '{}' holds {}-dimension vectors, got {}",
            collection, stored, given
        ),
    )
}

/// Attribute low-level failures to the vector index rather than persistence
fn attribute(err: MembankError) -> MembankError {
    match err {
        MembankError::Database(e) => MembankError::unavailable(Service::VectorIndex, e),
        MembankError::ServiceUnavailable {
            service: Service::Persistence,
            message,
        } => MembankError::ServiceUnavailable {
            service: Service::VectorIndex,
            message,
        },
        other => other,
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, id: &str, vector: &[f32]) -> Result<()> {
        let collection = self.collection.clone();
        let id = id.to_string();
        let blob = encode_vector(vector);
        let dimensions = vector.len();

        self.storage
            .call(move |conn| {
                if let Some(stored) = foreign_dimension(conn, &collection, Some(&id), dimensions)? {
                    return Err(dimension_mismatch(&collection, stored, dimensions));
                }
                conn.execute(
                    "INSERT OR REPLACE INTO vector_entries (collection, id, embedding, dimensions, updated_at)
                     VALUES (?, ?, ?, ?, ?)",
                    params![collection, id, blob, dimensions as i64, Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await
            .map_err(attribute)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let collection = self.collection.clone();
        let id = id.to_string();

        self.storage
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM vector_entries WHERE collection = ? AND id = ?",
                    params![collection, id],
                )?;
                Ok(())
            })
            .await
            .map_err(attribute)
    }

    async fn query(&self, vector: &[f32], top_k: usize, min_score: f32) -> Result<Vec<VectorMatch>> {
        if top_k == 0 {
            return Ok(vec![]);
        }

        let collection = self.collection.clone();
        let query = vector.to_vec();

        self.storage
            .call(move |conn| {
                // Vectors of another model are not comparable; refuse rather than skip them
                if let Some(stored) = foreign_dimension(conn, &collection, None, query.len())? {
                    return Err(dimension_mismatch(&collection, stored, query.len()));
                }

                let mut stmt = conn
                    .prepare_cached("SELECT id, embedding FROM vector_entries WHERE collection = ?")?;
                let rows = stmt.query_map(params![collection], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?;

                let mut matches = Vec::new();
                for row in rows {
                    let (id, blob) = row?;
                    let score = cosine_similarity(&query, &decode_vector(&blob)).clamp(0.0, 1.0);
                    if score >= min_score {
                        matches.push(VectorMatch { id, score });
                    }
                }

                sort_matches(&mut matches);
                matches.truncate(top_k);
                Ok(matches)
            })
            .await
            .map_err(attribute)
    }

    async fn health_check(&self) -> Result<()> {
        self.storage.ping().await.map_err(attribute)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let own = self.collection.clone();
        self.storage
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT DISTINCT collection FROM vector_entries ORDER BY collection",
                )?;
                let mut collections = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                if !collections.contains(&own) {
                    collections.push(own);
                    collections.sort();
                }
                Ok(collections)
            })
            .await
            .map_err(attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SqliteVectorIndex {
        SqliteVectorIndex::new(Storage::open_in_memory().unwrap(), "memories")
    }

    #[tokio::test]
    async fn test_query_orders_and_thresholds() {
        let index = index();
        index.upsert("exact", &[1.0, 0.0]).await.unwrap();
        index.upsert("close", &[0.9, 0.1]).await.unwrap();
        index.upsert("opposite", &[-1.0, 0.0]).await.unwrap();

        let matches = index.query(&[1.0, 0.0], 10, 0.0).await.unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "close", "opposite"]);
        assert!(matches.iter().all(|m| (0.0..=1.0).contains(&m.score)));

        let strict = index.query(&[1.0, 0.0], 10, 0.999).await.unwrap();
        assert_eq!(strict.len(), 1);

        let top1 = index.query(&[1.0, 0.0], 1, 0.0).await.unwrap();
        assert_eq!(top1[0].id, "exact");
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_is_idempotent() {
        let index = index();
        index.upsert("m", &[1.0, 0.0]).await.unwrap();
        index.upsert("m", &[0.0, 1.0]).await.unwrap();
        let matches = index.query(&[0.0, 1.0], 10, 0.5).await.unwrap();
        assert_eq!(matches.len(), 1);

        index.delete("m").await.unwrap();
        index.delete("m").await.unwrap();
        assert!(index.query(&[0.0, 1.0], 10, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let storage = Storage::open_in_memory().unwrap();
        let a = SqliteVectorIndex::new(storage.clone(), "a");
        let b = SqliteVectorIndex::new(storage, "b");
        a.upsert("m", &[1.0]).await.unwrap();
        assert!(b.query(&[1.0], 10, 0.0).await.unwrap().is_empty());
        assert_eq!(b.list_collections().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_dimension_change_is_an_outage() {
        let index = index();
        index.upsert("m", &[1.0, 0.0]).await.unwrap();

        let err = index.query(&[1.0, 0.0, 0.0], 10, 0.0).await.unwrap_err();
        assert_eq!(err.service(), Some(Service::VectorIndex));
        assert!(err.is_retryable());

        let err = index.upsert("n", &[1.0, 0.0, 0.0]).await.unwrap_err();
        assert_eq!(err.service(), Some(Service::VectorIndex));

        // Re-embedding the only entry with the new model is allowed
        index.upsert("m", &[0.0, 0.0, 1.0]).await.unwrap();
        let matches = index.query(&[0.0, 0.0, 1.0], 10, 0.5).await.unwrap();
        assert_eq!(matches.len(), 1);
    }
}
