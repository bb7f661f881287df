// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use chrono::TimeZone;
use yare::parameterized;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

#[test]
fn new_local_is_pending_and_unsequenced() {
    let message = Message::new_local("c1", Role::User, "Hi", at(0));
    assert_eq!(message.sync_status, SyncStatus::Pending);
    assert_eq!(message.sequence_number, UNSEQUENCED);
    assert_eq!(message.local_id.as_deref(), Some(message.id.as_str()));
    assert_eq!(message.server_id, None);
    assert!(message.id.starts_with("local-"));
    assert_eq!(message.created_at, message.updated_at);
}

#[test]
fn local_ids_are_distinct_for_identical_writes() {
    let first = Message::new_local("c1", Role::User, "Hi", at(0));
    let second = Message::new_local("c1", Role::User, "Hi", at(0));
    assert_ne!(first.id, second.id);
    assert_eq!(first.fingerprint(), second.fingerprint());
}

#[test]
fn local_id_format() {
    let id = generate_local_id("c1", "Hi", &at(0));
    let hash = id.strip_prefix("local-").unwrap();
    assert_eq!(hash.len(), 16);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn canonical_record_is_synced() {
    let message = Message::canonical("m1", "c1", 4, Role::Assistant, "Hello", at(0));
    assert_eq!(message.sync_status, SyncStatus::Synced);
    assert_eq!(message.server_key(), "m1");
    assert!(!message.is_pending());
}

#[test]
fn fingerprint_depends_on_role_and_contents() {
    assert_eq!(fingerprint(Role::User, "Hi"), fingerprint(Role::User, "Hi"));
    assert_ne!(fingerprint(Role::User, "Hi"), fingerprint(Role::Assistant, "Hi"));
    assert_ne!(fingerprint(Role::User, "Hi"), fingerprint(Role::User, "Hi!"));
    assert_eq!(fingerprint(Role::User, "Hi").len(), 64);
}

#[parameterized(
    user = { "user", Role::User },
    assistant = { "assistant", Role::Assistant },
    system = { "SYSTEM", Role::System },
)]
fn role_from_str(input: &str, expected: Role) {
    assert_eq!(input.parse::<Role>().unwrap(), expected);
}

#[test]
fn role_from_str_rejects_unknown() {
    assert!(matches!("bot".parse::<Role>(), Err(Error::InvalidRole(_))));
}

#[parameterized(
    pending = { SyncStatus::Pending, "pending" },
    synced = { SyncStatus::Synced, "synced" },
    conflict = { SyncStatus::Conflict, "conflict" },
)]
fn sync_status_round_trips_through_str(status: SyncStatus, text: &str) {
    assert_eq!(status.to_string(), text);
    assert_eq!(text.parse::<SyncStatus>().unwrap(), status);
}

#[test]
fn patch_applies_only_set_fields() {
    let mut message = Message::new_local("c1", Role::User, "Hi", at(0));
    let original = message.clone();

    MessagePatch::default().apply(&mut message);
    assert_eq!(message, original);

    let patch = MessagePatch {
        sequence_number: Some(3),
        server_id: Some("m1".into()),
        sync_status: Some(SyncStatus::Synced),
        ..Default::default()
    };
    patch.apply(&mut message);
    assert_eq!(message.sequence_number, 3);
    assert_eq!(message.server_id.as_deref(), Some("m1"));
    assert_eq!(message.sync_status, SyncStatus::Synced);
    assert_eq!(message.contents, "Hi");
    assert_eq!(message.local_id, original.local_id);
}

#[test]
fn adopt_patch_mirrors_canonical() {
    let canonical = Message::canonical("m1", "c1", 2, Role::User, "Hi", at(5)).with_local_id("l1");
    let patch = MessagePatch::adopt(&canonical);
    assert_eq!(patch.server_id.as_deref(), Some("m1"));
    assert_eq!(patch.local_id.as_deref(), Some("l1"));
    assert_eq!(patch.sequence_number, Some(2));
    assert!(!patch.is_empty());
    assert!(MessagePatch::default().is_empty());
}
