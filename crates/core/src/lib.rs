// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! chatsync-core: Shared library for the chatsync message-sync client
//!
//! This crate provides the wire envelope and codec, payload classification,
//! typed protocol bodies, the message model, the SQLite message store, and
//! reconciliation of server records into local state.

pub mod classify;
pub mod db;
pub mod envelope;
pub mod error;
pub mod message;
pub mod protocol;
pub mod reconcile;
pub mod store;

pub use classify::classify;
pub use db::SqliteStore;
pub use envelope::{decode, decode_frame, encode, Body, CodecError, Envelope, MessageType, Origin};
pub use error::{Error, Result};
pub use message::{fingerprint, generate_local_id, Message, MessagePatch, Role, SyncStatus};
pub use reconcile::{Outcome, Reconcile, ReconcileOptions};
pub use store::MessageStore;
