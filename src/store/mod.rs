//! To-do persistence
//!
//! The gateway only talks to [`TodoStore`]; [`SqliteTodoStore`] is the
//! shipped implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

pub mod sqlite;

pub use sqlite::SqliteTodoStore;

/// A stored to-do item, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    /// Server-assigned, strictly increasing.
    pub id: i64,
    pub title: String,
    pub is_done: bool,
    /// Server-assigned creation time (UTC).
    pub created_at: DateTime<Utc>,
}

/// Body of a create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTodo {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub is_done: bool,
}

impl NewTodo {
    /// Rejects empty and whitespace-only titles.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(ForgeError::InvalidInput("title must not be empty".to_string()).into());
        }
        Ok(())
    }
}

/// Storage for to-do items.
#[async_trait]
pub trait TodoStore: Send + Sync {
    /// All items, highest id first.
    async fn list(&self) -> Result<Vec<TodoItem>>;

    /// Persists `new` and returns the stored record.
    ///
    /// Invalid input is rejected before anything is written.
    async fn create(&self, new: NewTodo) -> Result<TodoItem>;

    /// Number of stored items.
    async fn count(&self) -> Result<u64>;
}
