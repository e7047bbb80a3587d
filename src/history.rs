use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Key the serialized history is stored under.
pub const HISTORY_KEY: &str = "omnigenius_history_v2";

/// Most entries kept, newest first.
pub const HISTORY_CAPACITY: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Text,
    Image,
}

impl QueryKind {
    pub fn as_str(&self) -> &str {
        match self {
            QueryKind::Text => "text",
            QueryKind::Image => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: QueryKind,
    pub question: String,
    pub answer: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Data URL of the image sent with the question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Durable key-value shelf the history is persisted to.
pub trait Storage {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(SqliteStorage { conn })
    }
}

impl Storage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }
}

/// Non-durable backend, used when the database cannot be opened.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: HashMap<String, String>,
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Capacity-bounded, newest-first log of past exchanges mirrored to a [`Storage`].
pub struct HistoryStore {
    storage: Box<dyn Storage>,
    items: Vec<HistoryItem>,
}

impl HistoryStore {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        HistoryStore {
            storage,
            items: Vec::new(),
        }
    }

    /// Rehydrates from storage. Missing or malformed data yields an empty history.
    pub fn load(&mut self) -> &[HistoryItem] {
        self.items = match self.storage.get(HISTORY_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<HistoryItem>>(&raw) {
                Ok(mut items) => {
                    items.truncate(HISTORY_CAPACITY);
                    items
                }
                Err(e) => {
                    tracing::warn!("Failed to parse history: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to read history: {}", e);
                Vec::new()
            }
        };
        &self.items
    }

    /// Prepends `item`, drops whatever falls past the capacity, then persists the list.
    /// If the write fails the in-memory list is rolled back, so both copies stay identical.
    pub fn append(&mut self, item: HistoryItem) -> Result<()> {
        let previous = self.items.clone();
        self.items.insert(0, item);
        self.items.truncate(HISTORY_CAPACITY);

        if let Err(e) = self.persist() {
            self.items = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn select(&self, id: &str) -> Option<&HistoryItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn items(&self) -> &[HistoryItem] {
        &self.items
    }

    pub fn clear(&mut self) -> Result<()> {
        self.items.clear();
        self.storage.remove(HISTORY_KEY)
    }

    fn persist(&mut self) -> Result<()> {
        let serialized = serde_json::to_string(&self.items)?;
        self.storage.set(HISTORY_KEY, &serialized)
    }
}
