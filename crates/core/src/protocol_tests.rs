// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::envelope::{Envelope, MessageType};
use chrono::TimeZone;
use serde_json::json;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

#[test]
fn subscribe_ack_omits_absent_fields() {
    let ack = SubscribeAck {
        conversation_id: "c1".into(),
        success: true,
        error: None,
        missed_messages: None,
    };
    assert_eq!(
        serde_json::to_value(&ack).unwrap(),
        json!({"conversationId": "c1", "success": true})
    );
}

#[test]
fn configuration_wire_shape() {
    let config = Configuration {
        supported_features: vec!["sync".into()],
        last_seen_stanza_id: 12,
        client_version: "0.1.0".into(),
    };
    assert_eq!(
        serde_json::to_value(&config).unwrap(),
        json!({"supportedFeatures": ["sync"], "lastSeenStanzaId": 12, "clientVersion": "0.1.0"})
    );
}

#[test]
fn chat_message_into_message_fills_defaults() {
    let chat: ChatMessage = serde_json::from_value(json!({
        "id": "m1",
        "conversationId": "c1",
        "content": "Hi"
    }))
    .unwrap();
    let message = chat.into_message(Role::User, at(0));
    assert_eq!(message.id, "m1");
    assert_eq!(message.server_id.as_deref(), Some("m1"));
    assert_eq!(message.role, Role::User);
    assert_eq!(message.sequence_number, UNSEQUENCED);
    assert_eq!(message.created_at, at(0));
    assert_eq!(message.sync_status, SyncStatus::Synced);
}

#[test]
fn chat_message_role_overrides_envelope_default() {
    let chat: ChatMessage = serde_json::from_value(json!({
        "id": "m1", "conversationId": "c1", "content": "note", "role": "system", "sequenceNumber": 3
    }))
    .unwrap();
    let message = chat.into_message(Role::User, at(0));
    assert_eq!(message.role, Role::System);
    assert_eq!(message.sequence_number, 3);
}

#[test]
fn chat_message_from_local_record() {
    let local = Message::new_local("c1", Role::User, "Hi", at(0)).with_previous("m0");
    let chat = ChatMessage::from_message(&local);
    assert_eq!(chat.local_id, local.local_id);
    assert_eq!(chat.sequence_number, None);
    assert_eq!(chat.previous_id.as_deref(), Some("m0"));
    assert_eq!(chat.content, "Hi");
}

#[test]
fn sync_request_from_pending() {
    let a = Message::new_local("c1", Role::User, "one", at(0));
    let b = Message::new_local("c1", Role::User, "two", at(1));
    let request = SyncRequest::from_pending("c1", &[a.clone(), b.clone()]);
    let ids: Vec<_> = request.local_ids().collect();
    assert_eq!(ids, vec![a.id.as_str(), b.id.as_str()]);
    assert_eq!(request.messages[1].contents, "two");
}

#[test]
fn sync_response_parses_dispositions() {
    let envelope = Envelope::from_value(
        "c1",
        MessageType::SyncResponse,
        json!({
            "conversationId": "c1",
            "results": [
                {
                    "localId": "l1",
                    "status": "synced",
                    "message": {
                        "id": "m1", "conversationId": "c1", "sequenceNumber": 1, "role": "user",
                        "contents": "Hi", "createdAt": "2024-01-01T00:00:00Z",
                        "updatedAt": "2024-01-01T00:00:00Z"
                    }
                },
                {
                    "localId": "l2",
                    "status": "conflict",
                    "resolution": "server_wins",
                    "message": {
                        "id": "m2", "conversationId": "c1", "sequenceNumber": 2, "role": "user",
                        "contents": "edited", "createdAt": "2024-01-01T00:00:01Z",
                        "updatedAt": "2024-01-01T00:00:05Z"
                    }
                }
            ]
        }),
    );
    let response: SyncResponse = envelope.body_as().unwrap();
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].status, Disposition::Synced);
    assert_eq!(response.results[1].status, Disposition::Conflict);
    assert_eq!(response.results[1].resolution, Some(Resolution::ServerWins));

    let conflict = response.results[1]
        .message
        .clone()
        .into_message("l2", SyncStatus::Conflict);
    assert_eq!(conflict.local_id.as_deref(), Some("l2"));
    assert_eq!(conflict.server_id.as_deref(), Some("m2"));
    assert_eq!(conflict.sync_status, SyncStatus::Conflict);
}

#[test]
fn error_body_optional_fields() {
    let body: ErrorBody =
        serde_json::from_value(json!({"code": "bad_request", "message": "nope"})).unwrap();
    assert_eq!(body.message_id, None);
    assert_eq!(body.conversation_id, None);
}
