//! Tagboard Storage
//!
//! SQLite-backed mention counters with atomic upsert increments

mod identity;

pub use identity::IdentityHint;

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_LEADERBOARD_LIMIT: u32 = 50;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open mention database at {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("mention store query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardRow {
    pub display: String,
    pub count: i64,
}

pub struct MentionStore {
    conn: rusqlite::Connection,
}

impl MentionStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open(db_path.as_ref()).map_err(|source| {
            StoreError::Open {
                path: db_path.as_ref().to_path_buf(),
                source,
            }
        })?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS mention_counts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                target_id INTEGER,
                target_handle TEXT,
                target_display TEXT NOT NULL,
                identity TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_mention_counts_chat_identity
            ON mention_counts(chat_id, identity);
            ",
        )?;

        Ok(Self { conn })
    }

    /// Count one mention of `hint` in `chat_id`.
    ///
    /// A single upsert statement: the increment happens inside SQLite, never
    /// as a read-then-write pair, so concurrent callers cannot lose updates.
    /// `display` is last-write-wins; a renamed user shows their new name on
    /// the next mention.
    pub fn record(
        &self,
        chat_id: i64,
        hint: &IdentityHint,
        display: &str,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO mention_counts (chat_id, target_id, target_handle, target_display, identity, count)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)
             ON CONFLICT(chat_id, identity)
             DO UPDATE SET count = count + 1,
                           target_display = excluded.target_display,
                           target_id = excluded.target_id,
                           target_handle = excluded.target_handle,
                           updated_at = CURRENT_TIMESTAMP",
            (
                chat_id,
                hint.account_id(),
                hint.handle_lower(),
                display,
                hint.canonical(),
            ),
        )?;
        Ok(())
    }

    /// Top mentioned identities for a chat, count descending with a
    /// deterministic display-name tie-break. Unknown chats yield an empty
    /// list, not an error.
    pub fn leaderboard(&self, chat_id: i64, limit: u32) -> Result<Vec<LeaderboardRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT target_display, count
             FROM mention_counts
             WHERE chat_id = ?1
             ORDER BY count DESC, target_display ASC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map((chat_id, limit), |row| {
            Ok(LeaderboardRow {
                display: row.get(0)?,
                count: row.get(1)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}
