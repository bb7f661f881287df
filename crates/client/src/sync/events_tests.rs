// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use chatsync_core::Role;
use chrono::Utc;

fn message(conversation: &str) -> Message {
    Message::new_local(conversation, Role::User, "Hi", Utc::now())
}

#[test]
fn message_listeners_are_scoped_to_conversation() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        bus.on_message("c1", move |m| seen.lock().unwrap().push(m.id.clone()));
    }

    let first = message("c1");
    bus.emit_message(&first);
    bus.emit_message(&message("c2"));

    assert_eq!(*seen.lock().unwrap(), vec![first.id]);
}

#[test]
fn handlers_run_in_registration_order() {
    let bus = EventBus::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for label in ["a", "b", "c"] {
        let order = Arc::clone(&order);
        bus.on_message("c1", move |_| order.lock().unwrap().push(label));
    }
    bus.emit_message(&message("c1"));
    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
}

#[test]
fn remove_unregisters_listener() {
    let bus = EventBus::new();
    let count = Arc::new(AtomicU64::new(0));
    let id = {
        let count = Arc::clone(&count);
        bus.on_sync_complete("c1", move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    };

    bus.emit_sync_complete(&SyncSummary::new("c1"));
    assert!(bus.remove(id));
    assert!(!bus.remove(id));
    bus.emit_sync_complete(&SyncSummary::new("c1"));

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn conversation_updates_reach_every_listener() {
    let bus = EventBus::new();
    let titles = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..2 {
        let titles = Arc::clone(&titles);
        bus.on_conversation_update(move |update| {
            if let ConversationUpdate::Title { title, .. } = update {
                titles.lock().unwrap().push(title.clone());
            }
        });
    }

    bus.emit_update(&ConversationUpdate::Title {
        conversation_id: "c1".into(),
        title: "Trip".into(),
    });
    assert_eq!(*titles.lock().unwrap(), vec!["Trip", "Trip"]);
}

#[test]
fn handler_may_register_listeners() {
    let bus = Arc::new(EventBus::new());
    {
        let inner = Arc::clone(&bus);
        bus.on_message("c1", move |_| {
            inner.on_message("c2", |_| {});
        });
    }
    bus.emit_message(&message("c1"));
    bus.clear();
    bus.emit_message(&message("c1"));
}

#[test]
fn listener_ids_are_unique() {
    let bus = EventBus::new();
    let a = bus.on_message("c1", |_| {});
    let b = bus.on_conversation_update(|_| {});
    assert_ne!(a, b);
}
