// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for chatsync-core operations.

use thiserror::Error;

use crate::envelope::CodecError;

/// All possible errors that can occur in chatsync-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("duplicate message: {0}\n  hint: a record with this id, server id, or local id already exists")]
    DuplicateMessage(String),

    #[error("invalid role: '{0}'\n  hint: valid roles are: user, assistant, system")]
    InvalidRole(String),

    #[error("invalid sync status: '{0}'\n  hint: valid statuses are: pending, synced, conflict")]
    InvalidSyncStatus(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("corrupted data: {0}")]
    CorruptedData(String),
}

/// Result type alias for chatsync-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
