// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Listener registry for UI notifications.
//!
//! Handlers run on the engine task, in registration order, after the store
//! has been updated. They must not block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chatsync_core::Message;

use super::coordinator::SyncSummary;

/// Handle returned by every `on_*` registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Conversation-level changes that are not message records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationUpdate {
    Title {
        conversation_id: String,
        title: String,
    },
    GenerationComplete {
        conversation_id: String,
        message_id: String,
        success: bool,
        error: Option<String>,
    },
    /// The server refused or revoked a subscription.
    SubscriptionLost {
        conversation_id: String,
        reason: String,
    },
}

type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;
type SyncHandler = Arc<dyn Fn(&SyncSummary) + Send + Sync>;
type UpdateHandler = Arc<dyn Fn(&ConversationUpdate) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    messages: HashMap<String, Vec<(ListenerId, MessageHandler)>>,
    sync_complete: HashMap<String, Vec<(ListenerId, SyncHandler)>>,
    updates: Vec<(ListenerId, UpdateHandler)>,
}

#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Listeners>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called for every record of `conversation_id` that is created or changed.
    pub fn on_message(
        &self,
        conversation_id: &str,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.allocate();
        self.lock()
            .messages
            .entry(conversation_id.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn on_sync_complete(
        &self,
        conversation_id: &str,
        handler: impl Fn(&SyncSummary) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.allocate();
        self.lock()
            .sync_complete
            .entry(conversation_id.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn on_conversation_update(
        &self,
        handler: impl Fn(&ConversationUpdate) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.allocate();
        self.lock().updates.push((id, Arc::new(handler)));
        id
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let mut removed = false;
        for handlers in listeners.messages.values_mut() {
            let before = handlers.len();
            handlers.retain(|(l, _)| *l != id);
            removed |= handlers.len() != before;
        }
        for handlers in listeners.sync_complete.values_mut() {
            let before = handlers.len();
            handlers.retain(|(l, _)| *l != id);
            removed |= handlers.len() != before;
        }
        let before = listeners.updates.len();
        listeners.updates.retain(|(l, _)| *l != id);
        removed |= listeners.updates.len() != before;

        listeners.messages.retain(|_, h| !h.is_empty());
        listeners.sync_complete.retain(|_, h| !h.is_empty());
        removed
    }

    pub fn clear(&self) {
        *self.lock() = Listeners::default();
    }

    // Handlers are cloned out so they may register or remove listeners.

    pub(crate) fn emit_message(&self, message: &Message) {
        let handlers: Vec<MessageHandler> = self
            .lock()
            .messages
            .get(&message.conversation_id)
            .map(|h| h.iter().map(|(_, f)| Arc::clone(f)).collect())
            .unwrap_or_default();
        for handler in handlers {
            handler(message);
        }
    }

    pub(crate) fn emit_sync_complete(&self, summary: &SyncSummary) {
        let handlers: Vec<SyncHandler> = self
            .lock()
            .sync_complete
            .get(&summary.conversation_id)
            .map(|h| h.iter().map(|(_, f)| Arc::clone(f)).collect())
            .unwrap_or_default();
        for handler in handlers {
            handler(summary);
        }
    }

    pub(crate) fn emit_update(&self, update: &ConversationUpdate) {
        let handlers: Vec<UpdateHandler> = self
            .lock()
            .updates
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect();
        for handler in handlers {
            handler(update);
        }
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
