// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Chat message records and their dedup keys.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Sequence number carried by records the server has not ordered yet.
pub const UNSEQUENCED: i64 = -1;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(Error::InvalidRole(s.to_string())),
        }
    }
}

/// Where a record stands relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Written locally, not yet acknowledged.
    Pending,
    /// Matches the server's canonical record.
    Synced,
    /// The server held a divergent version, which replaced the local one.
    Conflict,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "conflict" => Ok(SyncStatus::Conflict),
            _ => Err(Error::InvalidSyncStatus(s.to_string())),
        }
    }
}

/// A message in a conversation log.
///
/// Locally authored records start out with `id == local_id`, a
/// [`UNSEQUENCED`] sequence number, and [`SyncStatus::Pending`]. Once the
/// server acknowledges them they adopt the server id and sequence number,
/// keeping the local id as an alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sequence_number: i64,
    pub role: Role,
    pub contents: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    pub sync_status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
}

impl Message {
    /// Creates an optimistic record for a message authored on this device.
    pub fn new_local(
        conversation_id: impl Into<String>,
        role: Role,
        contents: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let conversation_id = conversation_id.into();
        let contents = contents.into();
        let local_id = generate_local_id(&conversation_id, &contents, &created_at);
        Message {
            id: local_id.clone(),
            conversation_id,
            sequence_number: UNSEQUENCED,
            role,
            contents,
            created_at,
            updated_at: created_at,
            local_id: Some(local_id),
            server_id: None,
            sync_status: SyncStatus::Pending,
            previous_id: None,
        }
    }

    /// Creates a record for a message the server has already ordered.
    pub fn canonical(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        sequence_number: i64,
        role: Role,
        contents: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        Message {
            server_id: Some(id.clone()),
            id,
            conversation_id: conversation_id.into(),
            sequence_number,
            role,
            contents: contents.into(),
            created_at,
            updated_at: created_at,
            local_id: None,
            sync_status: SyncStatus::Synced,
            previous_id: None,
        }
    }

    pub fn with_local_id(mut self, local_id: impl Into<String>) -> Self {
        self.local_id = Some(local_id.into());
        self
    }

    pub fn with_previous(mut self, previous_id: impl Into<String>) -> Self {
        self.previous_id = Some(previous_id.into());
        self
    }

    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }

    /// The id the server knows this record by.
    pub fn server_key(&self) -> &str {
        self.server_id.as_deref().unwrap_or(&self.id)
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(self.role, &self.contents)
    }
}

/// Partial update applied by [`crate::MessageStore::update`] and
/// [`crate::MessageStore::replace_id`]. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub sequence_number: Option<i64>,
    pub role: Option<Role>,
    pub contents: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub local_id: Option<String>,
    pub server_id: Option<String>,
    pub sync_status: Option<SyncStatus>,
    pub previous_id: Option<String>,
}

impl MessagePatch {
    /// A patch that makes a record mirror the server's version of it.
    pub fn adopt(canonical: &Message) -> Self {
        MessagePatch {
            sequence_number: Some(canonical.sequence_number),
            role: Some(canonical.role),
            contents: Some(canonical.contents.clone()),
            updated_at: Some(canonical.updated_at),
            local_id: canonical.local_id.clone(),
            server_id: Some(canonical.server_key().to_string()),
            sync_status: Some(canonical.sync_status),
            previous_id: canonical.previous_id.clone(),
        }
    }

    pub fn status(sync_status: SyncStatus) -> Self {
        MessagePatch {
            sync_status: Some(sync_status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == MessagePatch::default()
    }

    pub fn apply(&self, message: &mut Message) {
        if let Some(sequence_number) = self.sequence_number {
            message.sequence_number = sequence_number;
        }
        if let Some(role) = self.role {
            message.role = role;
        }
        if let Some(contents) = &self.contents {
            message.contents = contents.clone();
        }
        if let Some(updated_at) = self.updated_at {
            message.updated_at = updated_at;
        }
        if let Some(local_id) = &self.local_id {
            message.local_id = Some(local_id.clone());
        }
        if let Some(server_id) = &self.server_id {
            message.server_id = Some(server_id.clone());
        }
        if let Some(sync_status) = self.sync_status {
            message.sync_status = sync_status;
        }
        if let Some(previous_id) = &self.previous_id {
            message.previous_id = Some(previous_id.clone());
        }
    }
}

/// SHA-256 of role and contents, hex encoded.
pub fn fingerprint(role: Role, contents: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(role.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(contents.as_bytes());
    hex::encode(hasher.finalize())
}

static LOCAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a local id for an optimistic record.
///
/// Format: `local-{16 hex chars}`, hashed from the conversation, contents,
/// creation time, and a process-wide counter so identical messages written
/// in the same instant still get distinct ids.
pub fn generate_local_id(
    conversation_id: &str,
    contents: &str,
    created_at: &DateTime<Utc>,
) -> String {
    let counter = LOCAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let input = format!(
        "{}|{}|{}|{}",
        conversation_id,
        contents,
        created_at.timestamp_nanos_opt().unwrap_or_default(),
        counter
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("local-{}", hex::encode(&hash[..8]))
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
