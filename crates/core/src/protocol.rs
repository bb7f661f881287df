// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Typed envelope bodies.
//!
//! Bodies are MessagePack maps with camelCase keys. Each struct here is the
//! body of one or more [`MessageType`](crate::MessageType)s; convert with
//! [`Envelope::new`](crate::Envelope::new) and
//! [`Envelope::body_as`](crate::Envelope::body_as).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Message, Role, SyncStatus, UNSEQUENCED};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscribe {
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeAck {
    #[serde(default)]
    pub conversation_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missed_messages: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unsubscribe {
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeAck {
    #[serde(default)]
    pub conversation_id: String,
    pub success: bool,
}

/// Handshake sent on every transport open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub supported_features: Vec<String>,
    /// Magnitude of the highest server stanza seen, 0 when none.
    pub last_seen_stanza_id: i64,
    #[serde(default)]
    pub client_version: String,
}

/// Body of `UserMessage` and `AssistantMessage` envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    #[serde(default)]
    pub conversation_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// The outbound form of a locally authored record.
    pub fn from_message(message: &Message) -> Self {
        ChatMessage {
            id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            content: message.contents.clone(),
            role: Some(message.role),
            local_id: message.local_id.clone(),
            sequence_number: (message.sequence_number != UNSEQUENCED)
                .then_some(message.sequence_number),
            previous_id: message.previous_id.clone(),
            created_at: Some(message.created_at),
            updated_at: Some(message.updated_at),
        }
    }

    /// Convert a server push into a canonical record.
    ///
    /// `default_role` comes from the envelope type; `received_at` stands in
    /// for missing timestamps.
    pub fn into_message(self, default_role: Role, received_at: DateTime<Utc>) -> Message {
        let created_at = self.created_at.unwrap_or(received_at);
        Message {
            server_id: Some(self.id.clone()),
            id: self.id,
            conversation_id: self.conversation_id,
            sequence_number: self.sequence_number.unwrap_or(UNSEQUENCED),
            role: self.role.unwrap_or(default_role),
            contents: self.content,
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
            local_id: self.local_id,
            sync_status: SyncStatus::Synced,
            previous_id: self.previous_id,
        }
    }
}

/// One pending local write submitted for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    pub local_id: String,
    pub role: Role,
    pub contents: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
}

impl From<&Message> for PendingMessage {
    fn from(message: &Message) -> Self {
        PendingMessage {
            local_id: message.local_id.clone().unwrap_or_else(|| message.id.clone()),
            role: message.role,
            contents: message.contents.clone(),
            created_at: message.created_at,
            updated_at: message.updated_at,
            previous_id: message.previous_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub conversation_id: String,
    pub messages: Vec<PendingMessage>,
}

impl SyncRequest {
    pub fn from_pending(conversation_id: impl Into<String>, pending: &[Message]) -> Self {
        SyncRequest {
            conversation_id: conversation_id.into(),
            messages: pending.iter().map(PendingMessage::from).collect(),
        }
    }

    pub fn local_ids(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(|m| m.local_id.as_str())
    }
}

/// Server disposition for one submitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Synced,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    ServerWins,
}

/// The server's record for a submitted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalMessage {
    pub id: String,
    pub conversation_id: String,
    pub sequence_number: i64,
    pub role: Role,
    pub contents: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
}

impl CanonicalMessage {
    pub fn into_message(self, local_id: &str, sync_status: SyncStatus) -> Message {
        Message {
            server_id: Some(self.id.clone()),
            id: self.id,
            conversation_id: self.conversation_id,
            sequence_number: self.sequence_number,
            role: self.role,
            contents: self.contents,
            created_at: self.created_at,
            updated_at: self.updated_at,
            local_id: Some(local_id.to_string()),
            sync_status,
            previous_id: self.previous_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub local_id: String,
    pub status: Disposition,
    pub message: CanonicalMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub conversation_id: String,
    pub results: Vec<SyncResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

/// Push hint that the server holds newer messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAvailable {
    pub conversation_id: String,
    pub latest_sequence: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleUpdate {
    pub conversation_id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationComplete {
    pub message_id: String,
    pub conversation_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
