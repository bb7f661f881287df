// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use yare::parameterized;

fn ids(values: &[&str]) -> HashSet<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[parameterized(
    push_live = { 0, true, 30 },
    push_live_idle = { 600, true, 30 },
    active = { 0, false, 5 },
    at_threshold = { 30, false, 5 },
    one_threshold_over = { 31, false, 10 },
    two_thresholds = { 61, false, 20 },
    three_thresholds = { 91, false, 40 },
    capped = { 121, false, 60 },
    long_idle = { 100_000, false, 60 },
)]
fn interval_policy(idle_secs: u64, push_live: bool, expected_secs: u64) {
    let policy = SyncPolicy::default();
    assert_eq!(
        policy.interval(Duration::from_secs(idle_secs), push_live),
        Duration::from_secs(expected_secs)
    );
}

#[test]
fn tracked_conversation_is_due_after_base_interval() {
    let mut coordinator = SyncCoordinator::new(SyncPolicy::default());
    let now = Instant::now();
    coordinator.track("c1", now);

    assert!(coordinator.due(now).is_empty());
    assert_eq!(coordinator.next_wakeup(), Some(now + Duration::from_secs(5)));
    assert_eq!(coordinator.due(now + Duration::from_secs(5)), vec!["c1"]);
}

#[test]
fn trigger_makes_due_now() {
    let mut coordinator = SyncCoordinator::new(SyncPolicy::default());
    let now = Instant::now();
    coordinator.trigger("c1", now);
    assert!(coordinator.is_tracked("c1"));
    assert_eq!(coordinator.due(now), vec!["c1"]);
}

#[test]
fn single_flight_per_conversation() {
    let mut coordinator = SyncCoordinator::new(SyncPolicy::default());
    let now = Instant::now();
    coordinator.trigger("c1", now);

    assert!(coordinator.begin("c1", ids(&["l1"]), now));
    assert!(!coordinator.begin("c1", ids(&["l2"]), now));
    assert!(coordinator.due(now + Duration::from_secs(10)).is_empty());
    assert_eq!(
        coordinator.next_wakeup(),
        Some(now + Duration::from_secs(15))
    );
}

#[test]
fn response_deadline_times_out() {
    let mut coordinator = SyncCoordinator::new(SyncPolicy::default());
    let now = Instant::now();
    coordinator.trigger("c1", now);
    coordinator.begin("c1", ids(&["l1"]), now);

    assert!(coordinator.timed_out(now + Duration::from_secs(14)).is_empty());
    assert_eq!(coordinator.timed_out(now + Duration::from_secs(15)), vec!["c1"]);
}

#[test]
fn take_in_flight_returns_submitted_ids_once() {
    let mut coordinator = SyncCoordinator::new(SyncPolicy::default());
    let now = Instant::now();
    coordinator.trigger("c1", now);
    coordinator.begin("c1", ids(&["l1", "l2"]), now);

    assert_eq!(coordinator.take_in_flight("c1"), Some(ids(&["l1", "l2"])));
    assert_eq!(coordinator.take_in_flight("c1"), None);
    assert_eq!(coordinator.take_in_flight("untracked"), None);
}

#[test]
fn errors_back_off_and_reset_on_success() {
    let mut coordinator = SyncCoordinator::new(SyncPolicy::default());
    let mut now = Instant::now();
    coordinator.trigger("c1", now);

    let mut delays = Vec::new();
    for _ in 0..7 {
        coordinator.fail("c1", SyncError::Send("broken pipe".into()), now);
        let next = coordinator.next_wakeup().unwrap();
        delays.push((next - now).as_secs());
        now = next;
    }
    assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60]);
    assert_eq!(
        coordinator.last_error("c1"),
        Some(&SyncError::Send("broken pipe".into()))
    );

    coordinator.succeed(SyncSummary::new("c1"), now, false);
    assert_eq!(coordinator.last_error("c1"), None);
    coordinator.fail("c1", SyncError::NotConnected, now);
    assert_eq!(
        coordinator.next_wakeup(),
        Some(now + Duration::from_secs(2))
    );
}

#[test]
fn success_reschedules_by_activity() {
    let mut coordinator = SyncCoordinator::new(SyncPolicy::default());
    let start = Instant::now();
    coordinator.track("c1", start);

    let later = start + Duration::from_secs(45);
    coordinator.succeed(SyncSummary::new("c1"), later, false);
    assert_eq!(
        coordinator.next_wakeup(),
        Some(later + Duration::from_secs(10))
    );

    coordinator.note_activity("c1", later);
    coordinator.succeed(SyncSummary::new("c1"), later, false);
    assert_eq!(
        coordinator.next_wakeup(),
        Some(later + Duration::from_secs(5))
    );

    coordinator.succeed(SyncSummary::new("c1"), later, true);
    assert_eq!(
        coordinator.next_wakeup(),
        Some(later + Duration::from_secs(30))
    );
}

#[test]
fn count_change_counts_as_activity() {
    let mut coordinator = SyncCoordinator::new(SyncPolicy::default());
    let start = Instant::now();
    coordinator.track("c1", start);
    coordinator.note_count("c1", 3, start);

    let later = start + Duration::from_secs(100);
    coordinator.note_count("c1", 3, later);
    coordinator.skip("c1", later, false);
    assert_eq!(
        coordinator.next_wakeup(),
        Some(later + Duration::from_secs(40))
    );

    coordinator.note_count("c1", 4, later);
    coordinator.skip("c1", later, false);
    assert_eq!(
        coordinator.next_wakeup(),
        Some(later + Duration::from_secs(5))
    );
}

#[test]
fn waiters_are_answered_by_next_run() {
    let mut coordinator = SyncCoordinator::new(SyncPolicy::default());
    let now = Instant::now();
    coordinator.trigger("c1", now);
    let (tx, mut rx) = oneshot::channel();
    coordinator.add_waiter("c1", tx);

    let mut summary = SyncSummary::new("c1");
    summary.synced = 2;
    coordinator.succeed(summary.clone(), now, false);
    assert_eq!(rx.try_recv().unwrap(), Ok(summary));
}

#[test]
fn waiter_for_untracked_conversation_is_rejected() {
    let mut coordinator = SyncCoordinator::new(SyncPolicy::default());
    let (tx, mut rx) = oneshot::channel();
    coordinator.add_waiter("c1", tx);
    assert_eq!(rx.try_recv().unwrap(), Err(SyncError::NotConnected));
}

#[test]
fn abandon_in_flight_fails_only_running_syncs() {
    let mut coordinator = SyncCoordinator::new(SyncPolicy::default());
    let now = Instant::now();
    coordinator.trigger("c1", now);
    coordinator.trigger("c2", now);
    coordinator.begin("c1", ids(&["l1"]), now);

    coordinator.abandon_in_flight(SyncError::NotConnected, now);
    assert!(!coordinator.is_in_flight("c1"));
    assert_eq!(coordinator.last_error("c1"), Some(&SyncError::NotConnected));
    assert_eq!(coordinator.last_error("c2"), None);
}

#[test]
fn untrack_drops_state() {
    let mut coordinator = SyncCoordinator::new(SyncPolicy::default());
    let now = Instant::now();
    coordinator.trigger("c1", now);
    let (tx, mut rx) = oneshot::channel();
    coordinator.add_waiter("c1", tx);
    coordinator.begin("c1", ids(&["l1"]), now);
    coordinator.untrack("c1");
    assert_eq!(rx.try_recv().unwrap(), Err(SyncError::Cancelled));
    assert!(!coordinator.is_tracked("c1"));
    assert_eq!(coordinator.take_in_flight("c1"), None);
    assert_eq!(coordinator.next_wakeup(), None);
}
