//! SQLite-backed [`TodoStore`]
//!
//! A single connection guarded by a mutex; every call runs on the blocking
//! pool so the async runtime never waits on disk I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::error::{ForgeError, Result};
use crate::store::{NewTodo, TodoItem, TodoStore};

/// To-do store in a SQLite database file, or in memory for `:memory:`.
#[derive(Clone)]
pub struct SqliteTodoStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTodoStore {
    /// Opens (and if needed creates) the database at `database_url`.
    pub fn open(database_url: &str) -> Result<Self> {
        let conn = if database_url == ":memory:" {
            Connection::open_in_memory().storage_context("Failed to open in-memory database")?
        } else {
            let path = Path::new(database_url);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .storage_context("Failed to create parent directory for database")?;
            }
            Connection::open(path).storage_context("Failed to open database")?
        };

        Self::init(&conn)?;
        tracing::debug!(database = %database_url, "Opened to-do store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS todos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                is_done INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
            [],
        )
        .storage_context("Failed to create tables")?;

        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| ForgeError::Storage("database connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| ForgeError::Storage(format!("store task failed: {e}")))?
    }
}

/// Attaches a context message and files the failure as a storage error.
trait StorageResultExt<T> {
    fn storage_context(self, context: &'static str) -> Result<T>;
}

impl<T, E> StorageResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn storage_context(self, context: &'static str) -> Result<T> {
        self.map_err(|e| ForgeError::Storage(format!("{context}: {e}")).into())
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<TodoItem> {
    let created_at: String = row.get(3)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);

    Ok(TodoItem {
        id: row.get(0)?,
        title: row.get(1)?,
        is_done: row.get(2)?,
        created_at,
    })
}

#[async_trait]
impl TodoStore for SqliteTodoStore {
    async fn list(&self) -> Result<Vec<TodoItem>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, is_done, created_at
                    FROM todos
                    ORDER BY id DESC",
                )
                .storage_context("Failed to prepare statement")?;

            let items = stmt
                .query_map([], row_to_item)
                .storage_context("Failed to query todos")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .storage_context("Failed to read todo row")?;

            Ok(items)
        })
        .await
    }

    async fn create(&self, new: NewTodo) -> Result<TodoItem> {
        new.validate()?;

        self.with_conn(move |conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO todos (title, is_done, created_at) VALUES (?, ?, ?)",
                params![new.title, new.is_done, created_at.to_rfc3339()],
            )
                .storage_context("Failed to insert todo")?;

            Ok(TodoItem {
                id: conn.last_insert_rowid(),
                title: new.title,
                is_done: new.is_done,
                created_at,
            })
        })
        .await
    }

    async fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM todos", [], |row| row.get(0))
                .storage_context("Failed to count todos")?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
        .await
    }
}
