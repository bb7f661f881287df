// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Message sync engine.
//!
//! Keeps per-conversation message logs consistent between a multiplexed
//! server connection and the local store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  commands   ┌──────────────┐  frames   ┌─────────────┐
//! │ EngineHandle │────────────►│  SyncEngine  │──────────►│  Transport  │
//! │   (clones)   │◄────────────│   (actor)    │◄──────────│   (trait)   │
//! └──────────────┘  replies,   └──────────────┘           └─────────────┘
//!        ▲          status            │
//!        │                            ▼
//! ┌──────────────┐            ┌──────────────┐
//! │   EventBus   │◄───────────│ MessageStore │
//! │  (listeners) │   changes  │  (reconcile) │
//! └──────────────┘            └──────────────┘
//! ```
//!
//! The actor combines four owned state machines:
//!
//! - [`ConnectionMachine`]: connect, reconnect with backoff, teardown
//! - [`SubscriptionRegistry`]: pending and active subscriptions
//! - [`SyncCoordinator`]: adaptive per-conversation sync schedule
//! - [`StanzaTracker`]: client and server stanza counters

mod connection;
mod coordinator;
mod engine;
mod events;
mod subscription;
mod transport;

pub use connection::{
    Backoff, ConnectionEffect, ConnectionInput, ConnectionMachine, ConnectionState, EngineStatus,
    SharedStatus, StanzaTracker,
};
pub use coordinator::{SyncCoordinator, SyncError, SyncPolicy, SyncReply, SyncSummary};
pub use engine::{EngineError, EngineHandle, SyncEngine};
pub use events::{ConversationUpdate, EventBus, ListenerId};
pub use subscription::{AckOutcome, AckReply, SubscribeError, SubscriptionRegistry};
pub use transport::{Transport, TransportError, TransportResult, WebSocketTransport};

#[cfg(test)]
mod test_helpers;
