// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-conversation sync scheduling.
//!
//! The coordinator decides *when* each tracked conversation syncs and keeps
//! at most one request in flight per conversation; the engine builds and
//! sends the requests and feeds responses back.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("not connected")]
    NotConnected,

    #[error("failed to send sync request: {0}")]
    Send(String),

    #[error("no sync response within {0:?}")]
    Timeout(Duration),

    #[error("server error: {0}")]
    Server(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("conversation is no longer synced")]
    Cancelled,

    #[error("sync engine has stopped")]
    EngineStopped,
}

/// Result of one completed sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub conversation_id: String,
    /// Items reconciled as `synced`.
    pub synced: usize,
    /// Items where the server version replaced the local one.
    pub conflicts: usize,
    /// Items not part of the submitted request.
    pub ignored: usize,
}

impl SyncSummary {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        SyncSummary {
            conversation_id: conversation_id.into(),
            ..Default::default()
        }
    }
}

pub type SyncReply = oneshot::Sender<Result<SyncSummary, SyncError>>;

/// Timing policy for sync runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Interval while the conversation is active and has no push channel.
    pub base_interval: Duration,
    /// Interval while a live push channel covers the conversation.
    pub push_interval: Duration,
    /// Idle time after which the interval starts doubling.
    pub idle_threshold: Duration,
    pub max_interval: Duration,
    pub error_backoff_base: Duration,
    pub error_backoff_max: Duration,
    pub response_timeout: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy {
            base_interval: Duration::from_secs(5),
            push_interval: Duration::from_secs(30),
            idle_threshold: Duration::from_secs(30),
            max_interval: Duration::from_secs(60),
            error_backoff_base: Duration::from_secs(2),
            error_backoff_max: Duration::from_secs(60),
            response_timeout: Duration::from_secs(15),
        }
    }
}

impl SyncPolicy {
    /// Interval until the next timer-driven sync.
    pub fn interval(&self, idle: Duration, push_live: bool) -> Duration {
        if push_live {
            return self.push_interval;
        }
        if idle <= self.idle_threshold {
            return self.base_interval;
        }
        let threshold_ms = self.idle_threshold.as_millis().max(1);
        let elapsed = (idle - self.idle_threshold).as_millis() / threshold_ms + 1;
        let doublings = u32::try_from(elapsed).unwrap_or(u32::MAX);
        let factor = 1u32.checked_shl(doublings).unwrap_or(u32::MAX);
        self.base_interval.saturating_mul(factor).min(self.max_interval)
    }
}

struct InFlight {
    deadline: Instant,
    local_ids: HashSet<String>,
}

struct ConversationSync {
    next_due: Instant,
    last_activity: Instant,
    last_count: Option<usize>,
    error_backoff: Duration,
    last_error: Option<SyncError>,
    in_flight: Option<InFlight>,
    waiters: Vec<SyncReply>,
}

impl ConversationSync {
    fn new(now: Instant, policy: &SyncPolicy) -> Self {
        ConversationSync {
            next_due: now + policy.base_interval,
            last_activity: now,
            last_count: None,
            error_backoff: policy.error_backoff_base,
            last_error: None,
            in_flight: None,
            waiters: Vec::new(),
        }
    }

    fn answer(&mut self, result: Result<SyncSummary, SyncError>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }
}

pub struct SyncCoordinator {
    policy: SyncPolicy,
    conversations: HashMap<String, ConversationSync>,
}

impl SyncCoordinator {
    pub fn new(policy: SyncPolicy) -> Self {
        SyncCoordinator {
            policy,
            conversations: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Start tracking a conversation. Tracking an already tracked
    /// conversation is a no-op.
    pub fn track(&mut self, conversation_id: &str, now: Instant) {
        let policy = self.policy;
        self.conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationSync::new(now, &policy));
    }

    /// Stop tracking; waiters get [`SyncError::Cancelled`] and a response
    /// arriving afterwards is ignored.
    pub fn untrack(&mut self, conversation_id: &str) {
        if let Some(mut state) = self.conversations.remove(conversation_id) {
            state.answer(Err(SyncError::Cancelled));
        }
    }

    pub fn is_tracked(&self, conversation_id: &str) -> bool {
        self.conversations.contains_key(conversation_id)
    }

    /// Make a conversation due immediately.
    pub fn trigger(&mut self, conversation_id: &str, now: Instant) {
        self.track(conversation_id, now);
        if let Some(state) = self.conversations.get_mut(conversation_id) {
            state.next_due = now;
        }
    }

    pub fn trigger_all(&mut self, now: Instant) {
        for state in self.conversations.values_mut() {
            state.next_due = now;
        }
    }

    /// Register a `sync_now` caller, answered when the next run finishes.
    pub fn add_waiter(&mut self, conversation_id: &str, reply: SyncReply) {
        match self.conversations.get_mut(conversation_id) {
            Some(state) => state.waiters.push(reply),
            None => {
                let _ = reply.send(Err(SyncError::NotConnected));
            }
        }
    }

    pub fn note_activity(&mut self, conversation_id: &str, now: Instant) {
        if let Some(state) = self.conversations.get_mut(conversation_id) {
            state.last_activity = now;
        }
    }

    /// Record the current message count; a change counts as activity.
    pub fn note_count(&mut self, conversation_id: &str, count: usize, now: Instant) {
        if let Some(state) = self.conversations.get_mut(conversation_id) {
            if state.last_count.is_some_and(|last| last != count) {
                state.last_activity = now;
            }
            state.last_count = Some(count);
        }
    }

    /// Conversations whose timer has fired and that have nothing in flight.
    pub fn due(&self, now: Instant) -> Vec<String> {
        let mut due: Vec<String> = self
            .conversations
            .iter()
            .filter(|(_, s)| s.in_flight.is_none() && s.next_due <= now)
            .map(|(id, _)| id.clone())
            .collect();
        due.sort();
        due
    }

    pub fn next_wakeup(&self) -> Option<Instant> {
        self.conversations
            .values()
            .map(|s| match &s.in_flight {
                Some(flight) => flight.deadline,
                None => s.next_due,
            })
            .min()
    }

    pub fn is_in_flight(&self, conversation_id: &str) -> bool {
        self.conversations
            .get(conversation_id)
            .is_some_and(|s| s.in_flight.is_some())
    }

    /// Mark a request as sent. Returns `false` if one is already in flight.
    pub fn begin(
        &mut self,
        conversation_id: &str,
        local_ids: HashSet<String>,
        now: Instant,
    ) -> bool {
        let timeout = self.policy.response_timeout;
        let Some(state) = self.conversations.get_mut(conversation_id) else {
            return false;
        };
        if state.in_flight.is_some() {
            return false;
        }
        state.in_flight = Some(InFlight {
            deadline: now + timeout,
            local_ids,
        });
        true
    }

    /// Take the in-flight request for a response. `None` means the response
    /// is unsolicited or the conversation is no longer tracked.
    pub fn take_in_flight(&mut self, conversation_id: &str) -> Option<HashSet<String>> {
        self.conversations
            .get_mut(conversation_id)
            .and_then(|s| s.in_flight.take())
            .map(|flight| flight.local_ids)
    }

    /// Reschedule without running: the tick fired while disconnected.
    pub fn skip(&mut self, conversation_id: &str, now: Instant, push_live: bool) {
        let policy = self.policy;
        if let Some(state) = self.conversations.get_mut(conversation_id) {
            let idle = now.saturating_duration_since(state.last_activity);
            state.next_due = now + policy.interval(idle, push_live);
        }
    }

    /// Finish a run successfully, resetting the error backoff.
    pub fn succeed(&mut self, summary: SyncSummary, now: Instant, push_live: bool) {
        let policy = self.policy;
        let Some(state) = self.conversations.get_mut(&summary.conversation_id) else {
            return;
        };
        state.in_flight = None;
        state.last_error = None;
        state.error_backoff = policy.error_backoff_base;
        let idle = now.saturating_duration_since(state.last_activity);
        let interval = policy.interval(idle, push_live);
        state.next_due = now + interval;
        debug!(
            conversation = %summary.conversation_id,
            synced = summary.synced,
            conflicts = summary.conflicts,
            next_in = ?interval,
            "sync complete"
        );
        state.answer(Ok(summary));
    }

    /// Finish a run with an error and delay the next attempt.
    pub fn fail(&mut self, conversation_id: &str, error: SyncError, now: Instant) {
        let max = self.policy.error_backoff_max;
        let Some(state) = self.conversations.get_mut(conversation_id) else {
            return;
        };
        state.in_flight = None;
        let delay = state.error_backoff;
        state.next_due = now + delay;
        state.error_backoff = state.error_backoff.saturating_mul(2).min(max);
        warn!(conversation = conversation_id, error = %error, retry_in = ?delay, "sync failed");
        state.last_error = Some(error.clone());
        state.answer(Err(error));
    }

    /// In-flight requests whose response deadline has passed.
    pub fn timed_out(&self, now: Instant) -> Vec<String> {
        let mut ids: Vec<String> = self
            .conversations
            .iter()
            .filter(|(_, s)| s.in_flight.as_ref().is_some_and(|f| f.deadline <= now))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Fail every in-flight request, e.g. after the connection dropped.
    /// Returns the conversations that were failed.
    pub fn abandon_in_flight(&mut self, error: SyncError, now: Instant) -> Vec<String> {
        let mut in_flight: Vec<String> = self
            .conversations
            .iter()
            .filter(|(_, s)| s.in_flight.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        in_flight.sort();
        for conversation in &in_flight {
            self.fail(conversation, error.clone(), now);
        }
        in_flight
    }

    /// Answer every waiter with `error` without touching schedules.
    pub fn reject_waiters(&mut self, error: SyncError) {
        for state in self.conversations.values_mut() {
            state.answer(Err(error.clone()));
        }
    }

    /// Error of the most recent run, cleared by the next success.
    pub fn last_error(&self, conversation_id: &str) -> Option<&SyncError> {
        self.conversations
            .get(conversation_id)
            .and_then(|s| s.last_error.as_ref())
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
