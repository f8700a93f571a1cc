//! Database connection management with WAL mode support
//!
//! A single SQLite connection guarded by a mutex is the write serialization
//! point for the whole store; async callers reach it through tokio's
//! blocking pool.

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;

use super::migrations::run_migrations;
use crate::config::{StorageConfig, StorageMode};
use crate::context::RequestContext;
use crate::error::{MembankError, Result, Service};

/// Storage engine wrapping SQLite
pub struct Storage {
    config: StorageConfig,
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open or create a database with the given configuration
    pub fn open(config: StorageConfig) -> Result<Self> {
        let conn = Self::create_connection(&config)?;

        run_migrations(&conn)?;

        Ok(Self {
            config,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::open(StorageConfig::in_memory())
    }

    /// Create a new connection with appropriate pragmas
    fn create_connection(config: &StorageConfig) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if config.db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(&config.db_path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open_with_flags(&config.db_path, flags)?
        };

        Self::configure_pragmas(&conn, config.storage_mode)?;

        Ok(conn)
    }

    /// Configure SQLite pragmas based on storage mode
    ///
    /// Local mode: WAL for performance and crash recovery
    /// Cloud-safe mode: DELETE journal for cloud sync compatibility
    fn configure_pragmas(conn: &Connection, mode: StorageMode) -> Result<()> {
        match mode {
            StorageMode::Local => {
                conn.execute_batch(
                    r#"
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=30000;
                    PRAGMA cache_size=-64000;
                    PRAGMA temp_store=MEMORY;
                    PRAGMA foreign_keys=ON;
                    "#,
                )?;
            }
            StorageMode::CloudSafe => {
                conn.execute_batch(
                    r#"
                    PRAGMA journal_mode=DELETE;
                    PRAGMA synchronous=FULL;
                    PRAGMA busy_timeout=30000;
                    PRAGMA cache_size=-32000;
                    PRAGMA temp_store=MEMORY;
                    PRAGMA foreign_keys=ON;
                    "#,
                )?;
            }
        }
        Ok(())
    }

    /// Execute a function with the connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run a closure against the connection on the blocking thread-pool
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| MembankError::unavailable(Service::Persistence, format!("task join error: {e}")))?
    }

    /// Transaction that honours the request's cancellation and deadline up to commit
    ///
    /// The outcome is not raced: once this returns `Ok` the write is durable, and
    /// once it returns `Cancelled` nothing was written.
    pub async fn transaction_for<F, T>(&self, ctx: &RequestContext, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        ctx.check(Service::Persistence)?;
        let ctx = ctx.clone();
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            ctx.check(Service::Persistence)?;
            let tx = conn.transaction()?;
            let result = f(&tx)?;
            ctx.check(Service::Persistence)?;
            tx.commit()?;
            Ok(result)
        })
        .await
        .map_err(|e| MembankError::unavailable(Service::Persistence, format!("task join error: {e}")))?
    }

    /// Cheap liveness probe used by the health monitor
    pub async fn ping(&self) -> Result<()> {
        self.call(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    /// Get current storage mode
    pub fn storage_mode(&self) -> StorageMode {
        self.config.storage_mode
    }

    /// Get database path
    pub fn db_path(&self) -> &str {
        &self.config.db_path
    }

    /// Check if database is in a cloud-synced folder
    pub fn is_in_cloud_folder(&self) -> bool {
        let path = self.config.db_path.to_lowercase();
        path.contains("dropbox")
            || path.contains("onedrive")
            || path.contains("icloud")
            || path.contains("google drive")
    }

    /// Get warning if storage mode doesn't match folder type
    pub fn storage_mode_warning(&self) -> Option<String> {
        if self.is_in_cloud_folder() && self.config.storage_mode == StorageMode::Local {
            Some(format!(
                "Database '{}' appears to be in a cloud-synced folder. \
                WAL mode may cause corruption; set MEMBANK_STORAGE_MODE=cloud-safe \
                or move the database to a local folder",
                self.config.db_path
            ))
        } else {
            None
        }
    }

    /// Get configuration
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }
}

impl Clone for Storage {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            conn: self.conn.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let storage = Storage::open_in_memory().unwrap();
        assert_eq!(storage.db_path(), ":memory:");
    }

    #[test]
    fn test_open_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("membank.db");
        let config = StorageConfig {
            db_path: path.to_string_lossy().to_string(),
            storage_mode: StorageMode::CloudSafe,
        };
        let storage = Storage::open(config).unwrap();
        assert_eq!(storage.storage_mode(), StorageMode::CloudSafe);
        assert!(path.exists());
    }

    #[test]
    fn test_cloud_folder_warning() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(storage.storage_mode_warning().is_none());

        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("Dropbox").join("membank.db");
        let local = Storage::open(StorageConfig {
            db_path: db_path.to_string_lossy().to_string(),
            storage_mode: StorageMode::Local,
        })
        .unwrap();
        assert!(local.is_in_cloud_folder());
        let warning = local.storage_mode_warning().unwrap();
        assert!(warning.contains("cloud-safe"));

        let safe = Storage::open(StorageConfig {
            db_path: dir.path().join("Dropbox").join("safe.db").to_string_lossy().to_string(),
            storage_mode: StorageMode::CloudSafe,
        })
        .unwrap();
        assert!(safe.storage_mode_warning().is_none());
    }

    #[tokio::test]
    async fn test_ping_on_blocking_pool() {
        let storage = Storage::open_in_memory().unwrap();
        storage.ping().await.unwrap();
    }

    fn count_projects(storage: &Storage) -> i64 {
        storage
            .with_connection(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM projects", [], |r| r.get(0))?))
            .unwrap()
    }

    const INSERT_PROJECT: &str = "INSERT INTO projects (id, name, path, description, created_at)
         VALUES ('p', 'n', '/p', '', '2024-01-01T00:00:00+00:00')";

    #[tokio::test]
    async fn test_cancelled_while_waiting_for_lock_writes_nothing() {
        let storage = Storage::open_in_memory().unwrap();
        let ctx = RequestContext::new();

        let held = storage.conn.lock();
        let pending = {
            let storage = storage.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                storage
                    .transaction_for(&ctx, |conn| {
                        conn.execute(INSERT_PROJECT, [])?;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        ctx.cancel();
        drop(held);

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
        assert_eq!(count_projects(&storage), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_commit_rolls_back() {
        let storage = Storage::open_in_memory().unwrap();
        let ctx = RequestContext::new();
        let inner = ctx.clone();
        let err = storage
            .transaction_for(&ctx, move |conn| {
                conn.execute(INSERT_PROJECT, [])?;
                inner.cancel();
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
        assert_eq!(count_projects(&storage), 0);

        storage
            .transaction_for(&RequestContext::new(), |conn| {
                conn.execute(INSERT_PROJECT, [])?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(count_projects(&storage), 1);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let storage = Storage::open_in_memory().unwrap();
        let result: Result<()> = storage
            .transaction_for(&RequestContext::new(), |conn| {
                conn.execute(
                    "INSERT INTO projects (id, name, path, description, created_at)
                     VALUES ('p', 'n', '/p', '', '2024-01-01T00:00:00+00:00')",
                    [],
                )?;
                Err(MembankError::Internal("boom".into()))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = storage
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM projects", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
