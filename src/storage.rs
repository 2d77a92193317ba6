use chrono::Utc;
use directories::ProjectDirs;
use log::debug;
use rusqlite::{Connection, params};
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::models::Conversation;
use crate::error::StorageError;

pub fn default_cache_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("ma", "doit", "Mousaada")?;
    Some(proj.data_dir().join("cache.sqlite"))
}

/// Conversation summaries from the last successful fetch, shown while the
/// next one is in flight. The backend stays the source of truth.
pub struct ConversationCache {
    conn: Connection,
}

impl ConversationCache {
    pub fn open_default() -> Result<Self, StorageError> {
        let path = default_cache_path().ok_or(StorageError::NoDataDir)?;
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                code TEXT,
                activity_at INTEGER,
                cached_at INTEGER NOT NULL,
                raw_json TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn upsert_conversations(&mut self, conversations: &[Conversation]) -> Result<(), StorageError> {
        let now = Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        for c in conversations {
            let raw = serde_json::to_string(c)?;
            tx.execute(
                r#"
                INSERT INTO conversations (id, code, activity_at, cached_at, raw_json)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    code=excluded.code,
                    activity_at=excluded.activity_at,
                    cached_at=excluded.cached_at,
                    raw_json=excluded.raw_json
                "#,
                params![c.id, c.conversation_code, c.activity_at().map(|t| t.timestamp_millis()), now, raw],
            )?;
        }
        tx.commit()?;
        debug!("cached {} conversations", conversations.len());
        Ok(())
    }

    /// Most recently active first.
    pub fn conversations(&self, limit: Option<usize>) -> Result<Vec<Conversation>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT raw_json FROM conversations ORDER BY activity_at DESC, id ASC LIMIT ?1",
        )?;
        let lim = limit.unwrap_or(500) as i64;
        let rows = stmt.query_map(params![lim], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(serde_json::from_str(&raw?)?);
        }
        Ok(out)
    }
}
