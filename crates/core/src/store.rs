// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Persistence interface for conversation logs.

use crate::error::Result;
use crate::message::{Message, MessagePatch};

/// Durable per-conversation message storage.
///
/// Implementations enforce at most one record per server id and one per
/// `(conversation_id, local_id)`. All mutation of stored records goes
/// through these operations.
pub trait MessageStore: Send {
    /// Insert a new record. Fails with
    /// [`Error::DuplicateMessage`](crate::Error::DuplicateMessage) if any
    /// dedup key is taken.
    fn insert(&mut self, message: &Message) -> Result<()>;

    /// Apply a partial update and return the updated record.
    fn update(&mut self, id: &str, patch: &MessagePatch) -> Result<Message>;

    /// Insert or fully overwrite the record with the same id.
    fn upsert(&mut self, message: &Message) -> Result<()>;

    fn find_by_id(&self, id: &str) -> Result<Option<Message>>;

    fn find_by_local_id(&self, conversation_id: &str, local_id: &str) -> Result<Option<Message>>;

    fn find_by_server_id(&self, server_id: &str) -> Result<Option<Message>>;

    /// All records of a conversation: server-ordered records by sequence
    /// number, then unsequenced ones by creation time.
    fn find_by_conversation(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Atomically move a record to a new primary key while applying
    /// `patch`. References through `previous_id` follow the move.
    fn replace_id(&mut self, old_id: &str, new_id: &str, patch: &MessagePatch) -> Result<Message>;

    /// Pending records of a conversation, oldest first.
    fn get_pending(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Merge `duplicate_id` into `canonical_id`: the duplicate is removed
    /// and its local id carried over when the canonical record has none.
    fn absorb(&mut self, duplicate_id: &str, canonical_id: &str) -> Result<Message>;

    fn count(&self, conversation_id: &str) -> Result<usize>;
}
