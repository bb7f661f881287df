// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection lifecycle.
//!
//! [`ConnectionMachine`] is a pure transition function from
//! [`ConnectionInput`] to a list of [`ConnectionEffect`]s; the engine
//! performs the effects against the transport. [`StanzaTracker`] owns the
//! per-connection stanza counters and [`SharedStatus`] publishes state to
//! handles without locking the engine.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chatsync_core::{Envelope, Origin};
use tokio::sync::Notify;

/// Connection state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting for, or performing, reconnect attempt `attempt`.
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting { .. } => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Reconnecting { attempt } => {
                write!(f, "reconnecting (attempt {attempt})")
            }
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Exponential reconnect backoff: `min(initial * 2^attempt, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            initial: Duration::from_millis(1000),
            max: Duration::from_millis(30_000),
        }
    }
}

/// Events fed to the connection machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionInput {
    ConnectRequested,
    DisconnectRequested,
    /// The transport finished opening.
    Opened,
    /// An open attempt failed or timed out.
    OpenFailed(String),
    /// An established transport closed or errored.
    Closed,
    /// The scheduled reconnect delay elapsed.
    RetryDue,
    /// The platform reported that the network came back.
    NetworkOnline,
}

/// Work the driver performs in response to an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEffect {
    /// Open the transport.
    Open,
    /// Close the transport and clear per-connection counters.
    Close,
    ScheduleRetry(Duration),
    CancelRetry,
    /// Send the `Configuration` handshake.
    Handshake,
    /// Re-issue `Subscribe` for every retained conversation.
    Resubscribe,
    /// Reject in-flight subscribes and syncs.
    AbandonPending,
    /// Trigger a sync for every tracked conversation.
    SyncAll,
}

/// Pure connection state machine.
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempt: u32,
    epoch: u64,
    retry_scheduled: bool,
    backoff: Backoff,
}

impl ConnectionMachine {
    pub fn new(backoff: Backoff) -> Self {
        ConnectionMachine {
            state: ConnectionState::Disconnected,
            attempt: 0,
            epoch: 0,
            retry_scheduled: false,
            backoff,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Number of the next reconnect attempt.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Incremented on every successful open.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn handle(&mut self, input: ConnectionInput) -> Vec<ConnectionEffect> {
        use ConnectionEffect as E;
        use ConnectionState as S;

        match (input, self.state) {
            (ConnectionInput::ConnectRequested, S::Disconnected) => {
                self.state = S::Connecting;
                vec![E::Open]
            }
            // A live or pending connection already exists
            (ConnectionInput::ConnectRequested, _) => vec![],

            (ConnectionInput::DisconnectRequested, S::Disconnected) => vec![],
            (ConnectionInput::DisconnectRequested, _) => {
                self.state = S::Disconnected;
                self.attempt = 0;
                self.retry_scheduled = false;
                vec![E::CancelRetry, E::AbandonPending, E::Close]
            }

            (ConnectionInput::Opened, S::Connecting | S::Reconnecting { .. }) => {
                self.state = S::Connected;
                self.attempt = 0;
                self.retry_scheduled = false;
                self.epoch += 1;
                vec![E::Handshake, E::Resubscribe, E::SyncAll]
            }
            // Opened after a teardown raced the open
            (ConnectionInput::Opened, S::Disconnected) => vec![E::Close],
            (ConnectionInput::Opened, S::Connected) => vec![],

            (ConnectionInput::Closed, S::Connected) => {
                let mut effects = vec![E::AbandonPending];
                effects.push(self.schedule_retry());
                effects
            }
            (
                ConnectionInput::Closed | ConnectionInput::OpenFailed(_),
                S::Connecting | S::Reconnecting { .. },
            ) if !self.retry_scheduled => vec![self.schedule_retry()],
            (ConnectionInput::Closed | ConnectionInput::OpenFailed(_), _) => vec![],

            (ConnectionInput::RetryDue, S::Reconnecting { .. }) if self.retry_scheduled => {
                self.retry_scheduled = false;
                vec![E::Open]
            }
            (ConnectionInput::RetryDue, _) => vec![],

            (ConnectionInput::NetworkOnline, S::Reconnecting { .. }) if self.retry_scheduled => {
                self.attempt = 0;
                self.retry_scheduled = false;
                self.state = S::Reconnecting { attempt: 0 };
                vec![E::CancelRetry, E::Open]
            }
            (ConnectionInput::NetworkOnline, _) => vec![],
        }
    }

    fn schedule_retry(&mut self) -> ConnectionEffect {
        let delay = self.backoff.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.state = ConnectionState::Reconnecting {
            attempt: self.attempt,
        };
        self.retry_scheduled = true;
        ConnectionEffect::ScheduleRetry(delay)
    }
}

/// Stanza id bookkeeping for one logical session.
///
/// Client stanzas are positive and increase from 1. Server stanzas arrive
/// negative; the highest magnitude seen is replayed in the handshake so the
/// server can resume from there. Both counters survive reconnects and are
/// cleared by an explicit disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StanzaTracker {
    next_client: i64,
    last_server: i64,
}

impl StanzaTracker {
    pub fn new() -> Self {
        StanzaTracker {
            next_client: 1,
            last_server: 0,
        }
    }

    /// Allocate the next client stanza id.
    pub fn next_client(&mut self) -> i64 {
        let id = self.next_client;
        self.next_client = self.next_client.saturating_add(1);
        id
    }

    /// Record the stanza of an inbound envelope. Client stanzas are ignored.
    pub fn observe(&mut self, envelope: &Envelope) {
        if envelope.origin() == Origin::Server {
            let magnitude = envelope.stanza_id.checked_abs().unwrap_or(i64::MAX);
            self.last_server = self.last_server.max(magnitude);
        }
    }

    /// Magnitude of the highest server stanza seen, 0 if none.
    pub fn last_server(&self) -> i64 {
        self.last_server
    }

    pub fn reset(&mut self) {
        *self = StanzaTracker::new();
    }
}

impl Default for StanzaTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection state values for the atomic state field.
const STATE_DISCONNECTED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_CONNECTED: u8 = 2;
const STATE_RECONNECTING: u8 = 3;

/// Point-in-time view of the engine's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub state: ConnectionState,
    pub epoch: u64,
    pub last_error: Option<String>,
    /// Last sync error per conversation, cleared by a successful sync.
    pub sync_errors: HashMap<String, String>,
}

/// Status visible to both the engine task and its handles.
///
/// Uses atomic fields for lock-free reads of the connection state.
pub struct SharedStatus {
    state: AtomicU8,
    attempt: AtomicU32,
    epoch: AtomicU64,
    last_error: Mutex<Option<String>>,
    sync_errors: Mutex<HashMap<String, String>>,
    changed: Notify,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_DISCONNECTED),
            attempt: AtomicU32::new(0),
            epoch: AtomicU64::new(0),
            last_error: Mutex::new(None),
            sync_errors: Mutex::new(HashMap::new()),
            changed: Notify::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            STATE_CONNECTING => ConnectionState::Connecting,
            STATE_CONNECTED => ConnectionState::Connected,
            STATE_RECONNECTING => ConnectionState::Reconnecting {
                attempt: self.attempt.load(Ordering::Acquire),
            },
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_CONNECTED
    }

    pub(crate) fn set_state(&self, state: ConnectionState, epoch: u64) {
        let (value, attempt) = match state {
            ConnectionState::Disconnected => (STATE_DISCONNECTED, 0),
            ConnectionState::Connecting => (STATE_CONNECTING, 0),
            ConnectionState::Connected => (STATE_CONNECTED, 0),
            ConnectionState::Reconnecting { attempt } => (STATE_RECONNECTING, attempt),
        };
        self.attempt.store(attempt, Ordering::Release);
        self.epoch.store(epoch, Ordering::Release);
        let previous = self.state.swap(value, Ordering::AcqRel);
        if previous != value || value == STATE_RECONNECTING {
            self.changed.notify_waiters();
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_last_error(&self, error: Option<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    pub fn sync_error(&self, conversation_id: &str) -> Option<String> {
        self.sync_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
            .cloned()
    }

    pub(crate) fn set_sync_error(&self, conversation_id: &str, error: Option<String>) {
        let mut errors = self.sync_errors.lock().unwrap_or_else(PoisonError::into_inner);
        match error {
            Some(error) => {
                errors.insert(conversation_id.to_string(), error);
            }
            None => {
                errors.remove(conversation_id);
            }
        }
    }

    pub fn snapshot(&self) -> EngineStatus {
        EngineStatus {
            state: self.state(),
            epoch: self.epoch.load(Ordering::Acquire),
            last_error: self.last_error(),
            sync_errors: self
                .sync_errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Wait until the state satisfies `done`.
    pub async fn wait_for(&self, done: impl Fn(ConnectionState) -> bool) -> ConnectionState {
        loop {
            let changed = self.changed.notified();
            let state = self.state();
            if done(state) {
                return state;
            }
            changed.await;
        }
    }
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
