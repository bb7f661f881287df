// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-conversation subscribe/unsubscribe bookkeeping.
//!
//! The registry tracks pending subscribes awaiting a `SubscribeAck` (each
//! with a deadline and the callers to answer) and the active conversations.
//! Subscribes cut off by a connection loss are kept as interrupted. Active
//! and interrupted conversations together form the retained set that is
//! replayed after every reconnect.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chatsync_core::protocol::SubscribeAck;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    #[error("not connected")]
    NotConnected,

    #[error("subscription rejected: {0}")]
    Rejected(String),

    #[error("no subscribe ack within {0:?}")]
    Timeout(Duration),

    #[error("connection lost before the subscribe was acknowledged")]
    ConnectionLost,

    #[error("subscribe cancelled by unsubscribe")]
    Cancelled,

    #[error("sync engine has stopped")]
    EngineStopped,
}

/// Reply channel for one `subscribe()` caller.
pub type AckReply = oneshot::Sender<Result<SubscribeAck, SubscribeError>>;

struct Pending {
    deadline: Instant,
    waiters: Vec<AckReply>,
}

impl Pending {
    fn finish(self, result: Result<SubscribeAck, SubscribeError>) {
        for waiter in self.waiters {
            // Caller may have given up waiting
            let _ = waiter.send(result.clone());
        }
    }
}

/// What an inbound `SubscribeAck` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Activated,
    Rejected(String),
    /// Confirmation of a replayed subscribe; state unchanged.
    Confirmed,
    /// The server refused a replayed subscribe; the conversation was dropped.
    Revoked(String),
    /// No pending or active entry; ignored.
    Ignored,
}

pub struct SubscriptionRegistry {
    active: BTreeSet<String>,
    interrupted: BTreeSet<String>,
    pending: HashMap<String, Pending>,
    timeout: Duration,
}

impl SubscriptionRegistry {
    pub fn new(timeout: Duration) -> Self {
        SubscriptionRegistry {
            active: BTreeSet::new(),
            interrupted: BTreeSet::new(),
            pending: HashMap::new(),
            timeout,
        }
    }

    /// Record a subscribe request.
    ///
    /// Returns `true` when a `Subscribe` envelope must be sent; `false`
    /// when the caller joined an already pending request.
    pub fn begin(&mut self, conversation_id: &str, reply: AckReply, now: Instant) -> bool {
        if let Some(pending) = self.pending.get_mut(conversation_id) {
            pending.waiters.push(reply);
            return false;
        }
        self.pending.insert(
            conversation_id.to_string(),
            Pending {
                deadline: now + self.timeout,
                waiters: vec![reply],
            },
        );
        true
    }

    pub fn acknowledge(&mut self, ack: &SubscribeAck, now: Instant) -> AckOutcome {
        let conversation = ack.conversation_id.as_str();
        let rejection = || {
            ack.error
                .clone()
                .unwrap_or_else(|| "subscribe refused".to_string())
        };

        if let Some(pending) = self.pending.remove(conversation) {
            self.interrupted.remove(conversation);
            if pending.deadline <= now {
                debug!(conversation, "late subscribe ack for expired request");
                pending.finish(Err(SubscribeError::Timeout(self.timeout)));
                return AckOutcome::Ignored;
            }
            if ack.success {
                self.active.insert(conversation.to_string());
                pending.finish(Ok(ack.clone()));
                return AckOutcome::Activated;
            }
            let reason = rejection();
            pending.finish(Err(SubscribeError::Rejected(reason.clone())));
            return AckOutcome::Rejected(reason);
        }

        if self.interrupted.remove(conversation) {
            if ack.success {
                self.active.insert(conversation.to_string());
                return AckOutcome::Activated;
            }
            return AckOutcome::Rejected(rejection());
        }

        if !self.active.contains(conversation) {
            return AckOutcome::Ignored;
        }
        if ack.success {
            AckOutcome::Confirmed
        } else {
            self.active.remove(conversation);
            let reason = rejection();
            warn!(conversation, reason = %reason, "server revoked subscription");
            AckOutcome::Revoked(reason)
        }
    }

    /// Remove a conversation from the active set. A pending subscribe for it
    /// is rejected with [`SubscribeError::Cancelled`]. Returns whether
    /// anything changed.
    pub fn unsubscribe(&mut self, conversation_id: &str) -> bool {
        let was_active = self.active.remove(conversation_id);
        let was_interrupted = self.interrupted.remove(conversation_id);
        let was_pending = match self.pending.remove(conversation_id) {
            Some(pending) => {
                pending.finish(Err(SubscribeError::Cancelled));
                true
            }
            None => false,
        };
        was_active || was_interrupted || was_pending
    }

    /// Reject and remove every pending entry whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for conversation in &expired {
            if let Some(pending) = self.pending.remove(conversation) {
                warn!(conversation = %conversation, timeout = ?self.timeout, "subscribe timed out");
                pending.finish(Err(SubscribeError::Timeout(self.timeout)));
            }
        }
        expired
    }

    /// Reject every pending entry. The conversations stay retained as
    /// interrupted and are subscribed again on the next replay.
    pub fn abandon_pending(&mut self, error: SubscribeError) {
        for (conversation, pending) in self.pending.drain() {
            pending.finish(Err(error.clone()));
            self.interrupted.insert(conversation);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    pub fn is_subscribed(&self, conversation_id: &str) -> bool {
        self.active.contains(conversation_id)
    }

    /// Active and interrupted conversations in replay order.
    pub fn retained(&self) -> Vec<String> {
        self.active.union(&self.interrupted).cloned().collect()
    }
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
