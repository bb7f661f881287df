// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! chatsync - a local-first message sync client.
//!
//! This crate hosts the sync engine that keeps per-conversation message logs
//! consistent between a server connection and a local SQLite store, plus
//! the `chatsync` binary built on it.
//!
//! # Main Components
//!
//! - [`sync::SyncEngine`] - The engine actor; drive it with [`sync::SyncEngine::run`]
//! - [`sync::EngineHandle`] - Cloneable API for connect, subscribe, send and sync
//! - [`sync::EventBus`] - Listener registry for message and conversation updates
//! - [`Config`] - TOML configuration
//!
//! ```rust,ignore
//! use chatsync::{Config, sync::{SyncEngine, WebSocketTransport}};
//! use chatsync_core::SqliteStore;
//!
//! let config = Config::default();
//! let store = SqliteStore::open(&config.store_path()?)?;
//! let (engine, handle) = SyncEngine::new(&config, WebSocketTransport::new(), store)?;
//! tokio::spawn(engine.run());
//!
//! handle.connect()?;
//! handle.wait_connected().await;
//! handle.subscribe("conv-1").await?;
//! handle.send_message("conv-1", "Hello").await?;
//! ```

pub mod cli;
mod commands;
pub mod config;
pub mod error;
pub mod sync;

pub use cli::{Cli, Command};
pub use commands::run;
pub use config::Config;
pub use error::{Error, Result};
