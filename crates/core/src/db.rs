// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed message store.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;

use crate::error::{Error, Result};
use crate::message::{Message, MessagePatch};
use crate::store::MessageStore;

/// SQL schema for the message store.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    sequence_number INTEGER NOT NULL DEFAULT -1,
    role TEXT NOT NULL,
    contents TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    local_id TEXT,
    server_id TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    previous_id TEXT
);

-- Dedup keys
CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_server_id ON messages(server_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_local_id ON messages(conversation_id, local_id);
CREATE INDEX IF NOT EXISTS idx_messages_fingerprint ON messages(conversation_id, fingerprint);
CREATE INDEX IF NOT EXISTS idx_messages_status ON messages(conversation_id, sync_status);
"#;

const COLUMNS: &str = "id, conversation_id, sequence_number, role, contents, created_at, \
                       updated_at, local_id, server_id, sync_status, previous_id";

/// Parse a string value from the database, returning a rusqlite error on parse failure.
fn parse_db<T: std::str::FromStr>(
    value: &str,
    column: &str,
) -> std::result::Result<T, rusqlite::Error> {
    value.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(Error::CorruptedData(format!(
                "invalid value '{value}' in column '{column}'"
            ))),
        )
    })
}

/// Parse an RFC3339 timestamp from the database.
fn parse_timestamp(
    value: &str,
    column: &str,
) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(Error::CorruptedData(format!(
                    "invalid timestamp '{value}' in column '{column}'"
                ))),
            )
        })
}

fn row_to_message(row: &Row<'_>) -> std::result::Result<Message, rusqlite::Error> {
    let role: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    let sync_status: String = row.get(9)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sequence_number: row.get(2)?,
        role: parse_db(&role, "role")?,
        contents: row.get(4)?,
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
        local_id: row.get(7)?,
        server_id: row.get(8)?,
        sync_status: parse_db(&sync_status, "sync_status")?,
        previous_id: row.get(10)?,
    })
}

/// Map unique-index violations onto [`Error::DuplicateMessage`].
fn map_constraint(err: rusqlite::Error, id: &str) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            Error::DuplicateMessage(id.to_string())
        }
        _ => Error::Database(err),
    }
}

/// Schema revision recorded in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Create the schema and stamp the schema revision.
///
/// Databases written by a newer revision are refused rather than opened
/// with a schema this build does not understand.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(Error::CorruptedData(format!(
            "database schema version {version} is newer than supported version {SCHEMA_VERSION}"
        )));
    }
    conn.execute_batch(SCHEMA)?;
    if version < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

/// SQLite connection implementing [`MessageStore`].
pub struct SqliteStore {
    /// The underlying SQLite connection.
    pub conn: Connection,
}

impl SqliteStore {
    /// Open a store at the given path, creating and migrating if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL mode for concurrent readers
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        run_migrations(&conn)?;

        tracing::debug!(path = %path.display(), "opened message store");
        Ok(SqliteStore { conn })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(SqliteStore { conn })
    }

    fn query_one(&self, filter: &str, params: impl rusqlite::Params) -> Result<Option<Message>> {
        let sql = format!("SELECT {COLUMNS} FROM messages WHERE {filter}");
        let message = self
            .conn
            .query_row(&sql, params, row_to_message)
            .optional()?;
        Ok(message)
    }

    fn query_many(&self, filter_and_order: &str, conversation_id: &str) -> Result<Vec<Message>> {
        let sql = format!("SELECT {COLUMNS} FROM messages WHERE {filter_and_order}");
        let mut stmt = self.conn.prepare(&sql)?;
        let messages = stmt
            .query_map([conversation_id], row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }
}

fn write_row(conn: &Connection, sql: &str, message: &Message) -> rusqlite::Result<usize> {
    conn.execute(
        sql,
        params![
            message.id,
            message.conversation_id,
            message.sequence_number,
            message.role.as_str(),
            message.contents,
            message.fingerprint(),
            message.created_at.to_rfc3339(),
            message.updated_at.to_rfc3339(),
            message.local_id,
            message.server_id,
            message.sync_status.as_str(),
            message.previous_id,
        ],
    )
}

const INSERT_SQL: &str = "INSERT INTO messages
    (id, conversation_id, sequence_number, role, contents, fingerprint, created_at,
     updated_at, local_id, server_id, sync_status, previous_id)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

const UPSERT_SQL: &str = "INSERT INTO messages
    (id, conversation_id, sequence_number, role, contents, fingerprint, created_at,
     updated_at, local_id, server_id, sync_status, previous_id)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
    ON CONFLICT(id) DO UPDATE SET
        conversation_id = excluded.conversation_id,
        sequence_number = excluded.sequence_number,
        role = excluded.role,
        contents = excluded.contents,
        fingerprint = excluded.fingerprint,
        created_at = excluded.created_at,
        updated_at = excluded.updated_at,
        local_id = excluded.local_id,
        server_id = excluded.server_id,
        sync_status = excluded.sync_status,
        previous_id = excluded.previous_id";

/// Rewrite every column of the row currently keyed by `old_id`.
const REWRITE_SQL: &str = "UPDATE messages SET
        id = ?1, conversation_id = ?2, sequence_number = ?3, role = ?4, contents = ?5,
        fingerprint = ?6, created_at = ?7, updated_at = ?8, local_id = ?9, server_id = ?10,
        sync_status = ?11, previous_id = ?12
    WHERE id = ?13";

fn rewrite_row(conn: &Connection, old_id: &str, message: &Message) -> rusqlite::Result<usize> {
    conn.execute(
        REWRITE_SQL,
        params![
            message.id,
            message.conversation_id,
            message.sequence_number,
            message.role.as_str(),
            message.contents,
            message.fingerprint(),
            message.created_at.to_rfc3339(),
            message.updated_at.to_rfc3339(),
            message.local_id,
            message.server_id,
            message.sync_status.as_str(),
            message.previous_id,
            old_id,
        ],
    )
}

fn load(conn: &Connection, id: &str) -> Result<Message> {
    let sql = format!("SELECT {COLUMNS} FROM messages WHERE id = ?1");
    conn.query_row(&sql, [id], row_to_message)
        .optional()?
        .ok_or_else(|| Error::MessageNotFound(id.to_string()))
}

impl MessageStore for SqliteStore {
    fn insert(&mut self, message: &Message) -> Result<()> {
        write_row(&self.conn, INSERT_SQL, message).map_err(|e| map_constraint(e, &message.id))?;
        Ok(())
    }

    fn update(&mut self, id: &str, patch: &MessagePatch) -> Result<Message> {
        let mut message = load(&self.conn, id)?;
        patch.apply(&mut message);
        rewrite_row(&self.conn, id, &message).map_err(|e| map_constraint(e, id))?;
        Ok(message)
    }

    fn upsert(&mut self, message: &Message) -> Result<()> {
        write_row(&self.conn, UPSERT_SQL, message).map_err(|e| map_constraint(e, &message.id))?;
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Message>> {
        self.query_one("id = ?1", [id])
    }

    fn find_by_local_id(&self, conversation_id: &str, local_id: &str) -> Result<Option<Message>> {
        self.query_one(
            "conversation_id = ?1 AND local_id = ?2",
            [conversation_id, local_id],
        )
    }

    fn find_by_server_id(&self, server_id: &str) -> Result<Option<Message>> {
        self.query_one("server_id = ?1", [server_id])
    }

    fn find_by_conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.query_many(
            "conversation_id = ?1
             ORDER BY CASE WHEN sequence_number < 0 THEN 1 ELSE 0 END,
                      sequence_number, created_at, id",
            conversation_id,
        )
    }

    fn replace_id(&mut self, old_id: &str, new_id: &str, patch: &MessagePatch) -> Result<Message> {
        let tx = self.conn.transaction()?;

        let mut message = load(&tx, old_id)?;
        if new_id != old_id {
            let taken: bool = tx.query_row(
                "SELECT COUNT(*) > 0 FROM messages WHERE id = ?1",
                [new_id],
                |row| row.get(0),
            )?;
            if taken {
                return Err(Error::DuplicateMessage(new_id.to_string()));
            }
        }

        patch.apply(&mut message);
        message.id = new_id.to_string();
        rewrite_row(&tx, old_id, &message).map_err(|e| map_constraint(e, new_id))?;
        tx.execute(
            "UPDATE messages SET previous_id = ?1 WHERE previous_id = ?2",
            params![new_id, old_id],
        )?;

        tx.commit()?;
        Ok(message)
    }

    fn get_pending(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.query_many(
            "conversation_id = ?1 AND sync_status = 'pending' ORDER BY created_at, id",
            conversation_id,
        )
    }

    fn absorb(&mut self, duplicate_id: &str, canonical_id: &str) -> Result<Message> {
        if duplicate_id == canonical_id {
            return Err(Error::InvalidInput(format!(
                "cannot absorb message {duplicate_id} into itself"
            )));
        }

        let tx = self.conn.transaction()?;

        let duplicate = load(&tx, duplicate_id)?;
        let mut canonical = load(&tx, canonical_id)?;

        tx.execute("DELETE FROM messages WHERE id = ?1", [duplicate_id])?;
        if canonical.local_id.is_none() && duplicate.conversation_id == canonical.conversation_id {
            canonical.local_id = duplicate.local_id;
            rewrite_row(&tx, canonical_id, &canonical)
                .map_err(|e| map_constraint(e, canonical_id))?;
        }
        tx.execute(
            "UPDATE messages SET previous_id = ?1 WHERE previous_id = ?2",
            params![canonical_id, duplicate_id],
        )?;

        tx.commit()?;
        Ok(canonical)
    }

    fn count(&self, conversation_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            [conversation_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
