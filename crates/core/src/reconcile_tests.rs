// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::db::SqliteStore;
use chrono::TimeZone;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn store() -> SqliteStore {
    SqliteStore::open_in_memory().unwrap()
}

fn canonical(id: &str, contents: &str, secs: i64) -> Message {
    Message::canonical(id, "c1", 1, Role::User, contents, at(secs))
}

#[test]
fn same_canonical_twice_is_one_record() {
    let mut store = store();
    let message = canonical("m1", "Hello", 0);

    assert_eq!(
        store.reconcile(&message).unwrap(),
        Outcome::Inserted { id: "m1".into() }
    );
    let again = store.reconcile(&message).unwrap();
    assert_eq!(
        again,
        Outcome::Duplicate {
            id: "m1".into(),
            absorbed: None
        }
    );
    assert!(!again.changed());
    assert_eq!(store.count("c1").unwrap(), 1);
}

#[test]
fn local_id_match_adopts_server_id() {
    let mut store = store();
    let local = Message::new_local("c1", Role::User, "Hi", at(0));
    let local_id = local.local_id.clone().unwrap();
    store.insert(&local).unwrap();

    let incoming = canonical("m1", "Hi", 1).with_local_id(local_id.clone());
    let outcome = store.reconcile(&incoming).unwrap();
    assert_eq!(
        outcome,
        Outcome::AdoptedLocal {
            previous_id: local_id.clone(),
            id: "m1".into()
        }
    );

    let records = store.find_by_conversation("c1").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "m1");
    assert_eq!(records[0].sync_status, SyncStatus::Synced);
    assert_eq!(records[0].sequence_number, 1);
    assert_eq!(records[0].local_id.as_deref(), Some(local_id.as_str()));
    assert!(store.get_pending("c1").unwrap().is_empty());
}

#[test]
fn fingerprint_match_treats_push_as_echo() {
    let mut store = store();
    let local = Message::new_local("c1", Role::User, "Hi", at(0));
    store.insert(&local).unwrap();

    let outcome = store.reconcile(&canonical("m9", "Hi", 20)).unwrap();
    assert_eq!(
        outcome,
        Outcome::MatchedEcho {
            previous_id: local.id.clone(),
            id: "m9".into()
        }
    );
    let records = store.find_by_conversation("c1").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "m9");
    assert_eq!(records[0].local_id, local.local_id);
}

#[test]
fn fingerprint_match_outside_window_inserts() {
    let mut store = store();
    store
        .insert(&Message::new_local("c1", Role::User, "Hi", at(0)))
        .unwrap();

    let outcome = store.reconcile(&canonical("m9", "Hi", 61)).unwrap();
    assert_eq!(outcome, Outcome::Inserted { id: "m9".into() });
    assert_eq!(store.count("c1").unwrap(), 2);
}

#[test]
fn custom_window_is_honored() {
    let mut store = store();
    store
        .insert(&Message::new_local("c1", Role::User, "Hi", at(0)))
        .unwrap();
    let options = ReconcileOptions {
        fingerprint_window: Duration::seconds(5),
    };

    let outcome = store
        .reconcile_with(&canonical("m9", "Hi", 10), &options)
        .unwrap();
    assert!(matches!(outcome, Outcome::Inserted { .. }));
}

#[test]
fn assistant_messages_never_match_by_fingerprint() {
    let mut store = store();
    store
        .insert(&Message::new_local("c1", Role::User, "Hi", at(0)))
        .unwrap();

    let reply = Message::canonical("m2", "c1", 2, Role::Assistant, "Hi", at(1));
    assert!(matches!(
        store.reconcile(&reply).unwrap(),
        Outcome::Inserted { .. }
    ));
    assert_eq!(store.get_pending("c1").unwrap().len(), 1);
}

#[test]
fn oldest_pending_echo_is_matched() {
    let mut store = store();
    let first = Message::new_local("c1", Role::User, "Hi", at(0));
    let second = Message::new_local("c1", Role::User, "Hi", at(2));
    store.insert(&second).unwrap();
    store.insert(&first).unwrap();

    let outcome = store.reconcile(&canonical("m1", "Hi", 3)).unwrap();
    assert_eq!(
        outcome,
        Outcome::MatchedEcho {
            previous_id: first.id.clone(),
            id: "m1".into()
        }
    );
}

#[test]
fn record_found_by_both_keys_is_absorbed() {
    let mut store = store();
    let tab_a = Message::new_local("c1", Role::User, "Hi", at(0));
    let tab_b = Message::new_local("c1", Role::User, "Hi", at(0));
    store.insert(&tab_a).unwrap();
    store.insert(&tab_b).unwrap();

    let for_a = canonical("m1", "Hi", 1).with_local_id(tab_a.local_id.clone().unwrap());
    let for_b = canonical("m1", "Hi", 1).with_local_id(tab_b.local_id.clone().unwrap());
    store.reconcile(&for_a).unwrap();
    let outcome = store.reconcile(&for_b).unwrap();

    assert_eq!(
        outcome,
        Outcome::Duplicate {
            id: "m1".into(),
            absorbed: Some(tab_b.id.clone())
        }
    );
    assert!(outcome.changed());
    let records = store.find_by_conversation("c1").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "m1");
    assert!(store.get_pending("c1").unwrap().is_empty());
}

#[test]
fn conflict_replaces_local_content() {
    let mut store = store();
    let local = Message::new_local("c1", Role::User, "draft", at(0));
    store.insert(&local).unwrap();

    let mut server = canonical("m1", "server version", 1).with_local_id(local.id.clone());
    server.sync_status = SyncStatus::Conflict;
    store.reconcile(&server).unwrap();

    let stored = store.find_by_id("m1").unwrap().unwrap();
    assert_eq!(stored.contents, "server version");
    assert_eq!(stored.sync_status, SyncStatus::Conflict);
    assert_eq!(store.count("c1").unwrap(), 1);
}

#[test]
fn pending_incoming_is_stored_as_synced() {
    let mut store = store();
    let mut message = canonical("m1", "Hi", 0);
    message.sync_status = SyncStatus::Pending;
    store.reconcile(&message).unwrap();
    assert_eq!(
        store.find_by_id("m1").unwrap().unwrap().sync_status,
        SyncStatus::Synced
    );
}

#[test]
fn other_conversations_are_untouched() {
    let mut store = store();
    store
        .insert(&Message::new_local("c2", Role::User, "Hi", at(0)))
        .unwrap();
    store.reconcile(&canonical("m1", "Hi", 0)).unwrap();
    assert_eq!(store.get_pending("c2").unwrap().len(), 1);
    assert_eq!(store.count("c1").unwrap(), 1);
}
