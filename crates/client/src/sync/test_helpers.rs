// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for sync module tests.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use chatsync_core::protocol::{CanonicalMessage, ChatMessage, Disposition, SyncResponse, SyncResult};
use chatsync_core::{Envelope, Message, MessageStore, MessageType, Role, SqliteStore};
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;

use super::engine::{EngineHandle, SyncEngine};
use super::transport_tests::{MockRemote, MockTransport};
use crate::config::Config;

/// A running engine wired to a mock server.
pub struct Harness {
    pub handle: EngineHandle,
    pub remote: MockRemote,
    pub task: JoinHandle<()>,
}

pub fn start() -> Harness {
    start_with(Config::default(), SqliteStore::open_in_memory().unwrap())
}

pub fn start_with<S: MessageStore + 'static>(config: Config, store: S) -> Harness {
    let (transport, remote) = MockTransport::new();
    let (engine, handle) = SyncEngine::new(&config, transport, store).unwrap();
    let task = tokio::spawn(engine.run());
    Harness {
        handle,
        remote,
        task,
    }
}

/// Connect and wait for the handshake to go out.
pub async fn connect(harness: &Harness) {
    let remote = harness.remote.clone();
    let handshakes = remote.sent_of(MessageType::Configuration).len();
    harness.handle.connect().unwrap();
    harness.handle.wait_connected().await;
    assert!(eventually(|| remote.sent_of(MessageType::Configuration).len() > handshakes).await);
}

/// Poll `check` until it holds, letting the engine run in between.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Poll the stored records of a conversation until `done` holds for them.
pub async fn wait_for_messages(
    handle: &EngineHandle,
    conversation_id: &str,
    done: impl Fn(&[Message]) -> bool,
) -> Vec<Message> {
    for _ in 0..500 {
        let messages = handle.messages(conversation_id).await.unwrap();
        if done(&messages) {
            return messages;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.messages(conversation_id).await.unwrap()
}

/// A server-originated envelope.
pub fn server<B: Serialize>(
    stanza: i64,
    conversation_id: &str,
    message_type: MessageType,
    body: &B,
) -> Envelope {
    Envelope::new(conversation_id, message_type, body)
        .unwrap()
        .with_stanza(-stanza)
}

pub fn chat(id: &str, conversation_id: &str, content: &str) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        content: content.to_string(),
        role: None,
        local_id: None,
        sequence_number: None,
        previous_id: None,
        created_at: None,
        updated_at: None,
    }
}

pub fn canonical(id: &str, conversation_id: &str, sequence: i64, contents: &str) -> CanonicalMessage {
    let now = Utc::now();
    CanonicalMessage {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sequence_number: sequence,
        role: Role::User,
        contents: contents.to_string(),
        created_at: now,
        updated_at: now,
        previous_id: None,
    }
}

pub fn result(local_id: &str, status: Disposition, message: CanonicalMessage) -> SyncResult {
    SyncResult {
        local_id: local_id.to_string(),
        status,
        message,
        resolution: None,
    }
}

pub fn sync_response(stanza: i64, conversation_id: &str, results: Vec<SyncResult>) -> Envelope {
    let body = SyncResponse {
        conversation_id: conversation_id.to_string(),
        results,
        synced_at: Some(Utc::now()),
    };
    server(stanza, conversation_id, MessageType::SyncResponse, &body)
}
