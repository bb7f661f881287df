// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the chatsync client and CLI.

use thiserror::Error;

use crate::sync::{EngineError, SubscribeError, SyncError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("no data directory available\n  hint: set [store] path in the config file")]
    NoDataDir,

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error(transparent)]
    Core(#[from] chatsync_core::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("subscribe failed: {0}")]
    Subscribe(#[from] SubscribeError),

    #[error("sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for chatsync client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
