// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Reconcile canonical server records into the local store.
//!
//! Dedup rules, tried in order:
//! - Server id already stored: skip (absorbing a separate record that
//!   carries the incoming local id)
//! - Incoming local id matches a stored record: adopt the server id in place
//! - User-authored and a pending record has the same fingerprint within the
//!   window: treat the incoming record as its echo
//! - Otherwise insert
//!
//! Reconciling the same canonical record any number of times leaves exactly
//! one stored copy.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::Result;
use crate::message::{Message, MessagePatch, Role, SyncStatus};
use crate::store::MessageStore;

/// Default window for matching echoes of pending writes by content.
pub const DEFAULT_FINGERPRINT_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub fingerprint_window: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            fingerprint_window: Duration::seconds(DEFAULT_FINGERPRINT_WINDOW_SECS),
        }
    }
}

/// What reconciling one record did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The server id was already stored. `absorbed` is the id of a separate
    /// local record that was merged into it.
    Duplicate { id: String, absorbed: Option<String> },
    /// A record found by local id adopted the server id.
    AdoptedLocal { previous_id: String, id: String },
    /// A pending record with matching content was taken as the echo.
    MatchedEcho { previous_id: String, id: String },
    Inserted { id: String },
}

impl Outcome {
    /// Id of the stored canonical record.
    pub fn id(&self) -> &str {
        match self {
            Outcome::Duplicate { id, .. }
            | Outcome::AdoptedLocal { id, .. }
            | Outcome::MatchedEcho { id, .. }
            | Outcome::Inserted { id } => id,
        }
    }

    /// Whether the store's visible state changed.
    pub fn changed(&self) -> bool {
        !matches!(
            self,
            Outcome::Duplicate {
                absorbed: None,
                ..
            }
        )
    }
}

/// Trait for merging canonical records under the dedup contract.
pub trait Reconcile {
    /// Reconciles one canonical record. Its `sync_status` is the status the
    /// stored record ends up with (`Synced`, or `Conflict` when the server
    /// replaced a divergent local version).
    fn reconcile_with(&mut self, incoming: &Message, options: &ReconcileOptions)
        -> Result<Outcome>;

    fn reconcile(&mut self, incoming: &Message) -> Result<Outcome> {
        self.reconcile_with(incoming, &ReconcileOptions::default())
    }
}

impl<S: MessageStore + ?Sized> Reconcile for S {
    fn reconcile_with(
        &mut self,
        incoming: &Message,
        options: &ReconcileOptions,
    ) -> Result<Outcome> {
        let server_id = incoming.server_key().to_string();
        let conversation = incoming.conversation_id.as_str();
        let status = match incoming.sync_status {
            SyncStatus::Pending => SyncStatus::Synced,
            other => other,
        };
        let mut patch = MessagePatch::adopt(incoming);
        patch.sync_status = Some(status);

        // Server id already stored
        let existing = match self.find_by_server_id(&server_id)? {
            Some(found) => Some(found),
            None => self.find_by_id(&server_id)?,
        };
        if let Some(existing) = existing {
            let mut absorbed = None;
            if let Some(local_id) = &incoming.local_id {
                if let Some(local) = self.find_by_local_id(conversation, local_id)? {
                    if local.id != existing.id {
                        self.absorb(&local.id, &existing.id)?;
                        if existing.sync_status != status {
                            self.update(&existing.id, &MessagePatch::status(status))?;
                        }
                        debug!(conversation, id = %existing.id, absorbed = %local.id, "absorbed duplicate");
                        absorbed = Some(local.id);
                    }
                }
            }
            return Ok(Outcome::Duplicate {
                id: existing.id,
                absorbed,
            });
        }

        // Incoming names the local record it acknowledges
        if let Some(local_id) = &incoming.local_id {
            if let Some(local) = self.find_by_local_id(conversation, local_id)? {
                patch.local_id = Some(local_id.clone());
                self.replace_id(&local.id, &server_id, &patch)?;
                debug!(conversation, local_id = %local_id, id = %server_id, "adopted server id");
                return Ok(Outcome::AdoptedLocal {
                    previous_id: local.id,
                    id: server_id,
                });
            }
        }

        // Echo of a pending write
        if incoming.role == Role::User {
            if let Some(pending) = find_echo(self, incoming, options)? {
                patch.local_id = pending.local_id.clone();
                self.replace_id(&pending.id, &server_id, &patch)?;
                debug!(conversation, pending = %pending.id, id = %server_id, "matched echo by fingerprint");
                return Ok(Outcome::MatchedEcho {
                    previous_id: pending.id,
                    id: server_id,
                });
            }
        }

        let mut message = incoming.clone();
        message.id = server_id.clone();
        message.server_id = Some(server_id.clone());
        message.sync_status = status;
        self.insert(&message)?;
        debug!(conversation, id = %server_id, "inserted message");
        Ok(Outcome::Inserted { id: server_id })
    }
}

/// Oldest pending record with the same role and contents within the window.
fn find_echo<S: MessageStore + ?Sized>(
    store: &S,
    incoming: &Message,
    options: &ReconcileOptions,
) -> Result<Option<Message>> {
    let pending = store.get_pending(&incoming.conversation_id)?;
    Ok(pending.into_iter().find(|candidate| {
        candidate.role == incoming.role
            && candidate.contents == incoming.contents
            && within(candidate.created_at, incoming.created_at, options.fingerprint_window)
    }))
}

fn within(a: DateTime<Utc>, b: DateTime<Utc>, window: Duration) -> bool {
    let delta = if a > b { a - b } else { b - a };
    delta <= window
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
