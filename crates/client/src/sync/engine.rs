// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The sync engine actor.
//!
//! [`SyncEngine::run`] is a single task that owns the transport, the store
//! and every piece of mutable sync state. [`EngineHandle`]s talk to it over a
//! command channel; the only state they read directly is the
//! [`SharedStatus`] snapshot and the [`EventBus`].

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chatsync_core::protocol::{
    ChatMessage, Configuration, Disposition, ErrorBody, GenerationComplete, Subscribe,
    SubscribeAck, SyncAvailable, SyncRequest, SyncResponse, TitleUpdate, Unsubscribe,
};
use chatsync_core::{
    decode_frame, CodecError, Envelope, Message, MessageStore, MessageType, Reconcile,
    ReconcileOptions, Role, SyncStatus,
};

use super::connection::{
    ConnectionEffect, ConnectionInput, ConnectionMachine, ConnectionState, EngineStatus,
    SharedStatus, StanzaTracker,
};
use super::coordinator::{SyncCoordinator, SyncError, SyncReply, SyncSummary};
use super::events::{ConversationUpdate, EventBus};
use super::subscription::{AckOutcome, AckReply, SubscribeError, SubscriptionRegistry};
use super::transport::{Transport, TransportError};
use crate::config::Config;

/// Error code carried by envelopes synthesized for unclassifiable payloads.
const UNCLASSIFIED: &str = "unclassified";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("sync engine has stopped")]
    Stopped,

    #[error("not connected")]
    NotConnected,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid engine config: {0}")]
    Config(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] chatsync_core::Error),
}

pub(crate) enum Command {
    Connect,
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        conversation_id: String,
        reply: AckReply,
    },
    Unsubscribe {
        conversation_id: String,
        reply: oneshot::Sender<bool>,
    },
    IsSubscribed {
        conversation_id: String,
        reply: oneshot::Sender<bool>,
    },
    Send {
        envelope: Envelope,
        reply: oneshot::Sender<Result<i64, EngineError>>,
    },
    SendMessage {
        conversation_id: String,
        contents: String,
        reply: oneshot::Sender<Result<Message, EngineError>>,
    },
    SyncNow {
        conversation_id: String,
        reply: SyncReply,
    },
    Messages {
        conversation_id: String,
        reply: oneshot::Sender<Result<Vec<Message>, EngineError>>,
    },
    NetworkOnline,
}

/// Cloneable front end to a running [`SyncEngine`].
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: Arc<SharedStatus>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
}

impl EngineHandle {
    fn command(&self, command: Command) -> Result<(), EngineError> {
        self.commands.send(command).map_err(|_| EngineError::Stopped)
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.command(make(tx))?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Start connecting. A no-op while a live or pending connection exists.
    pub fn connect(&self) -> Result<(), EngineError> {
        self.command(Command::Connect)
    }

    /// Close the connection and stop reconnecting. Active subscriptions are
    /// retained and replayed by the next `connect`.
    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Subscribe to push updates for a conversation and wait for the ack.
    pub async fn subscribe(&self, conversation_id: &str) -> Result<SubscribeAck, SubscribeError> {
        let conversation_id = conversation_id.to_string();
        match self
            .request(|reply| Command::Subscribe {
                conversation_id,
                reply,
            })
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SubscribeError::EngineStopped),
        }
    }

    /// Drop a subscription. Returns whether the conversation was active or
    /// pending.
    pub async fn unsubscribe(&self, conversation_id: &str) -> Result<bool, EngineError> {
        let conversation_id = conversation_id.to_string();
        self.request(|reply| Command::Unsubscribe {
            conversation_id,
            reply,
        })
        .await
    }

    pub async fn is_subscribed(&self, conversation_id: &str) -> Result<bool, EngineError> {
        let conversation_id = conversation_id.to_string();
        self.request(|reply| Command::IsSubscribed {
            conversation_id,
            reply,
        })
        .await
    }

    /// Send a raw envelope. Returns the stanza id it was sent with.
    pub async fn send(&self, envelope: Envelope) -> Result<i64, EngineError> {
        self.request(|reply| Command::Send { envelope, reply })
            .await?
    }

    /// Store a user message optimistically and send it when connected.
    ///
    /// The returned record is `pending`; it becomes `synced` once the server
    /// echoes it or a sync run reconciles it.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        contents: &str,
    ) -> Result<Message, EngineError> {
        let conversation_id = conversation_id.to_string();
        let contents = contents.to_string();
        self.request(|reply| Command::SendMessage {
            conversation_id,
            contents,
            reply,
        })
        .await?
    }

    /// Run a sync for the conversation now and wait for it to finish.
    pub async fn sync_now(&self, conversation_id: &str) -> Result<SyncSummary, SyncError> {
        let conversation_id = conversation_id.to_string();
        match self
            .request(|reply| Command::SyncNow {
                conversation_id,
                reply,
            })
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::EngineStopped),
        }
    }

    /// Stored records of a conversation in display order.
    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, EngineError> {
        let conversation_id = conversation_id.to_string();
        self.request(|reply| Command::Messages {
            conversation_id,
            reply,
        })
        .await?
    }

    /// The network came back: skip any pending reconnect delay.
    pub fn network_online(&self) -> Result<(), EngineError> {
        self.command(Command::NetworkOnline)
    }

    pub fn status(&self) -> EngineStatus {
        self.status.snapshot()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.state()
    }

    pub fn sync_error(&self, conversation_id: &str) -> Option<String> {
        self.status.sync_error(conversation_id)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Wait until the engine reports `connected`.
    pub async fn wait_connected(&self) {
        self.status.wait_for(|state| state == ConnectionState::Connected).await;
    }

    /// Stop the engine task. Outstanding requests fail with a stopped error.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

enum Step {
    Command(Command),
    Frame(Result<Option<Vec<u8>>, TransportError>),
    Timer,
    Stop,
}

pub struct SyncEngine<T: Transport, S: MessageStore> {
    url: String,
    features: Vec<String>,
    fallback_conversation: String,
    connect_timeout: Duration,
    reconcile: ReconcileOptions,
    transport: T,
    store: S,
    machine: ConnectionMachine,
    stanzas: StanzaTracker,
    registry: SubscriptionRegistry,
    coordinator: SyncCoordinator,
    retry_at: Option<Instant>,
    status: Arc<SharedStatus>,
    events: Arc<EventBus>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
}

impl<T: Transport, S: MessageStore> SyncEngine<T, S> {
    pub fn new(
        config: &Config,
        transport: T,
        store: S,
    ) -> Result<(Self, EngineHandle), EngineError> {
        config
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(SharedStatus::new());
        let events = Arc::new(EventBus::new());
        let cancel = CancellationToken::new();

        let engine = SyncEngine {
            url: config.connection.url.clone(),
            features: config.connection.features.clone(),
            fallback_conversation: config
                .connection
                .default_conversation
                .clone()
                .unwrap_or_default(),
            connect_timeout: config.connection.connect_timeout(),
            reconcile: config.sync.reconcile_options(),
            transport,
            store,
            machine: ConnectionMachine::new(config.connection.backoff()),
            stanzas: StanzaTracker::new(),
            registry: SubscriptionRegistry::new(config.connection.subscribe_timeout()),
            coordinator: SyncCoordinator::new(config.sync.policy()),
            retry_at: None,
            status: Arc::clone(&status),
            events: Arc::clone(&events),
            commands: rx,
            cancel: cancel.clone(),
        };
        let handle = EngineHandle {
            commands: tx,
            status,
            events,
            cancel,
        };
        Ok((engine, handle))
    }

    /// Drive the engine until [`EngineHandle::shutdown`] or until every
    /// handle is dropped.
    pub async fn run(mut self) {
        loop {
            let wake = self.next_wake();
            let link_up = self.transport.is_connected();
            let step = tokio::select! {
                _ = self.cancel.cancelled() => Step::Stop,
                command = self.commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => Step::Stop,
                },
                frame = self.transport.recv(), if link_up => Step::Frame(frame),
                _ = sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => Step::Timer,
            };

            match step {
                Step::Stop => break,
                Step::Command(command) => self.handle_command(command).await,
                Step::Frame(Ok(Some(frame))) => self.route_frame(&frame),
                Step::Frame(Ok(None)) => {
                    info!(epoch = self.machine.epoch(), "connection closed by server");
                    self.apply(ConnectionInput::Closed).await;
                }
                Step::Frame(Err(e)) => {
                    warn!(epoch = self.machine.epoch(), error = %e, "connection lost");
                    self.status.set_last_error(Some(e.to_string()));
                    self.apply(ConnectionInput::Closed).await;
                }
                Step::Timer => self.on_timer().await,
            }

            // A failed send tears the link down without a close frame
            if self.machine.is_connected() && !self.transport.is_connected() {
                self.apply(ConnectionInput::Closed).await;
            }
        }
        self.teardown().await;
    }

    fn next_wake(&self) -> Option<Instant> {
        [
            self.retry_at,
            self.registry.next_deadline(),
            self.coordinator.next_wakeup(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    async fn teardown(&mut self) {
        debug!("sync engine stopping");
        self.commands.close();
        while self.commands.try_recv().is_ok() {}
        self.registry.abandon_pending(SubscribeError::EngineStopped);
        self.coordinator.reject_waiters(SyncError::EngineStopped);
        self.events.clear();
        if let Err(e) = self.transport.disconnect().await {
            debug!(error = %e, "disconnect during shutdown failed");
        }
        self.status
            .set_state(ConnectionState::Disconnected, self.machine.epoch());
    }

    fn publish(&self) {
        self.status.set_state(self.machine.state(), self.machine.epoch());
    }

    /// Feed an input to the connection machine and execute the resulting
    /// effects, including any inputs those effects produce.
    async fn apply(&mut self, input: ConnectionInput) {
        let mut inputs = VecDeque::from([input]);
        while let Some(input) = inputs.pop_front() {
            let before = self.machine.state();
            let effects = self.machine.handle(input);
            if before != self.machine.state() {
                debug!(from = %before, to = %self.machine.state(), "connection state changed");
            }
            self.publish();
            for effect in effects {
                if let Some(next) = self.execute(effect).await {
                    inputs.push_back(next);
                }
            }
        }
    }

    async fn execute(&mut self, effect: ConnectionEffect) -> Option<ConnectionInput> {
        match effect {
            ConnectionEffect::Open => Some(self.open().await),
            ConnectionEffect::Close => {
                if let Err(e) = self.transport.disconnect().await {
                    debug!(error = %e, "transport disconnect failed");
                }
                self.stanzas.reset();
                None
            }
            ConnectionEffect::ScheduleRetry(delay) => {
                info!(attempt = self.machine.attempt(), delay = ?delay, "scheduling reconnect");
                self.retry_at = Some(Instant::now() + delay);
                None
            }
            ConnectionEffect::CancelRetry => {
                self.retry_at = None;
                None
            }
            ConnectionEffect::Handshake => {
                info!(epoch = self.machine.epoch(), url = %self.url, "connected");
                let handshake = Configuration {
                    supported_features: self.features.clone(),
                    last_seen_stanza_id: self.stanzas.last_server(),
                    client_version: env!("CARGO_PKG_VERSION").to_string(),
                };
                self.send_body("", MessageType::Configuration, &handshake)
                    .await;
                None
            }
            ConnectionEffect::Resubscribe => {
                for conversation_id in self.registry.retained() {
                    debug!(conversation = %conversation_id, "replaying subscribe");
                    let body = Subscribe {
                        conversation_id: conversation_id.clone(),
                    };
                    self.send_body(&conversation_id, MessageType::Subscribe, &body)
                        .await;
                }
                None
            }
            ConnectionEffect::AbandonPending => {
                self.registry
                    .abandon_pending(SubscribeError::ConnectionLost);
                for conversation_id in self
                    .coordinator
                    .abandon_in_flight(SyncError::NotConnected, Instant::now())
                {
                    self.publish_sync_error(&conversation_id);
                }
                None
            }
            ConnectionEffect::SyncAll => {
                self.coordinator.trigger_all(Instant::now());
                None
            }
        }
    }

    async fn open(&mut self) -> ConnectionInput {
        debug!(url = %self.url, attempt = self.machine.attempt(), "opening transport");
        let result = tokio::time::timeout(self.connect_timeout, self.transport.connect(&self.url)).await;
        match result {
            Ok(Ok(())) => {
                self.status.set_last_error(None);
                ConnectionInput::Opened
            }
            Ok(Err(e)) => {
                warn!(attempt = self.machine.attempt(), error = %e, "connect failed");
                self.status.set_last_error(Some(e.to_string()));
                ConnectionInput::OpenFailed(e.to_string())
            }
            Err(_) => {
                let reason = format!("connect timed out after {:?}", self.connect_timeout);
                warn!(attempt = self.machine.attempt(), "{reason}");
                if let Err(e) = self.transport.disconnect().await {
                    debug!(error = %e, "transport disconnect failed");
                }
                self.status.set_last_error(Some(reason.clone()));
                ConnectionInput::OpenFailed(reason)
            }
        }
    }

    /// Assign the next client stanza and send the envelope.
    async fn dispatch(&mut self, envelope: Envelope) -> Result<i64, EngineError> {
        if !self.machine.is_connected() || !self.transport.is_connected() {
            return Err(EngineError::NotConnected);
        }
        envelope.validate()?;
        let stanza = self.stanzas.next_client();
        let envelope = envelope.with_stanza(stanza);
        let frame = envelope.encode()?;
        self.transport.send(frame).await?;
        debug!(
            stanza,
            message_type = %envelope.message_type,
            conversation = %envelope.conversation_id,
            "sent envelope"
        );
        Ok(stanza)
    }

    /// Fire-and-forget send of a typed body; failures are logged.
    async fn send_body<B: serde::Serialize>(
        &mut self,
        conversation_id: &str,
        message_type: MessageType,
        body: &B,
    ) {
        let result = match Envelope::new(conversation_id, message_type, body) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(message_type = %message_type, conversation = conversation_id, error = %e, "send failed");
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.apply(ConnectionInput::ConnectRequested).await,
            Command::Disconnect { reply } => {
                self.apply(ConnectionInput::DisconnectRequested).await;
                let _ = reply.send(());
            }
            Command::NetworkOnline => {
                debug!("network online");
                self.apply(ConnectionInput::NetworkOnline).await;
            }
            Command::Subscribe {
                conversation_id,
                reply,
            } => self.subscribe(conversation_id, reply).await,
            Command::Unsubscribe {
                conversation_id,
                reply,
            } => {
                let changed = self.unsubscribe(&conversation_id).await;
                let _ = reply.send(changed);
            }
            Command::IsSubscribed {
                conversation_id,
                reply,
            } => {
                let _ = reply.send(self.registry.is_subscribed(&conversation_id));
            }
            Command::Send { envelope, reply } => {
                let _ = reply.send(self.dispatch(envelope).await);
            }
            Command::SendMessage {
                conversation_id,
                contents,
                reply,
            } => {
                let _ = reply.send(self.send_message(conversation_id, contents).await);
            }
            Command::SyncNow {
                conversation_id,
                reply,
            } => self.sync_now(conversation_id, reply),
            Command::Messages {
                conversation_id,
                reply,
            } => {
                let result = self
                    .store
                    .find_by_conversation(&conversation_id)
                    .map_err(EngineError::from);
                let _ = reply.send(result);
            }
        }
    }

    async fn subscribe(&mut self, conversation_id: String, reply: AckReply) {
        if conversation_id.is_empty() {
            let _ = reply.send(Err(SubscribeError::Rejected(
                "conversation id is empty".to_string(),
            )));
            return;
        }
        if !self.machine.is_connected() {
            let _ = reply.send(Err(SubscribeError::NotConnected));
            return;
        }
        let now = Instant::now();
        self.coordinator.track(&conversation_id, now);
        if self.registry.begin(&conversation_id, reply, now) {
            debug!(conversation = %conversation_id, "subscribing");
            let body = Subscribe {
                conversation_id: conversation_id.clone(),
            };
            self.send_body(&conversation_id, MessageType::Subscribe, &body)
                .await;
        }
    }

    async fn unsubscribe(&mut self, conversation_id: &str) -> bool {
        let changed = self.registry.unsubscribe(conversation_id);
        if changed && self.machine.is_connected() {
            let body = Unsubscribe {
                conversation_id: conversation_id.to_string(),
            };
            self.send_body(conversation_id, MessageType::Unsubscribe, &body)
                .await;
        }
        if changed {
            self.release(conversation_id);
        }
        changed
    }

    /// Stop periodic syncs for a conversation nobody watches once it has
    /// nothing left to push.
    fn release(&mut self, conversation_id: &str) {
        if self.coordinator.is_in_flight(conversation_id) {
            return;
        }
        match self.store.get_pending(conversation_id) {
            Ok(pending) if pending.is_empty() => {
                debug!(conversation = conversation_id, "no longer syncing");
                self.coordinator.untrack(conversation_id);
                self.status.set_sync_error(conversation_id, None);
            }
            Ok(_) => {}
            Err(e) => warn!(conversation = conversation_id, error = %e, "failed to read pending messages"),
        }
    }

    async fn send_message(
        &mut self,
        conversation_id: String,
        contents: String,
    ) -> Result<Message, EngineError> {
        if conversation_id.is_empty() {
            return Err(EngineError::InvalidInput(
                "conversation id is empty".to_string(),
            ));
        }
        let now = Instant::now();
        let message = Message::new_local(&conversation_id, Role::User, contents, Utc::now());
        self.store.insert(&message)?;
        self.coordinator.track(&conversation_id, now);
        self.coordinator.note_activity(&conversation_id, now);
        self.events.emit_message(&message);

        if self.machine.is_connected() {
            let envelope = Envelope::new(
                &conversation_id,
                MessageType::UserMessage,
                &ChatMessage::from_message(&message),
            )?;
            if let Err(e) = self.dispatch(envelope).await {
                debug!(conversation = %conversation_id, error = %e, "message stays pending");
            }
        }
        Ok(message)
    }

    fn sync_now(&mut self, conversation_id: String, reply: SyncReply) {
        let now = Instant::now();
        self.coordinator.track(&conversation_id, now);
        if !self.machine.is_connected() {
            self.fail_sync(&conversation_id, SyncError::NotConnected, now);
            let _ = reply.send(Err(SyncError::NotConnected));
            return;
        }
        self.coordinator.add_waiter(&conversation_id, reply);
        if !self.coordinator.is_in_flight(&conversation_id) {
            self.coordinator.trigger(&conversation_id, now);
        }
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();
        if self.retry_at.is_some_and(|at| at <= now) {
            self.retry_at = None;
            self.apply(ConnectionInput::RetryDue).await;
        }

        self.registry.expire(now);

        let timeout = self.coordinator.policy().response_timeout;
        for conversation_id in self.coordinator.timed_out(now) {
            self.fail_sync(&conversation_id, SyncError::Timeout(timeout), now);
        }

        self.run_due().await;
    }

    fn push_live(&self, conversation_id: &str) -> bool {
        self.machine.is_connected() && self.registry.is_subscribed(conversation_id)
    }

    async fn run_due(&mut self) {
        let now = Instant::now();
        for conversation_id in self.coordinator.due(now) {
            if !self.machine.is_connected() {
                let push_live = self.push_live(&conversation_id);
                self.coordinator.skip(&conversation_id, now, push_live);
                continue;
            }
            if let Err(e) = self.start_sync(&conversation_id, now).await {
                self.fail_sync(&conversation_id, e, now);
            }
        }
    }

    async fn start_sync(&mut self, conversation_id: &str, now: Instant) -> Result<(), SyncError> {
        let store_error = |e: chatsync_core::Error| SyncError::Store(e.to_string());
        let count = self.store.count(conversation_id).map_err(store_error)?;
        self.coordinator.note_count(conversation_id, count, now);

        let pending = self.store.get_pending(conversation_id).map_err(store_error)?;
        if pending.is_empty() {
            self.complete_sync(SyncSummary::new(conversation_id), now);
            return Ok(());
        }

        let request = SyncRequest::from_pending(conversation_id, &pending);
        let local_ids: HashSet<String> = request.local_ids().map(str::to_string).collect();
        let envelope = Envelope::new(conversation_id, MessageType::SyncRequest, &request)
            .map_err(|e| SyncError::Send(e.to_string()))?;
        if !self.coordinator.begin(conversation_id, local_ids, now) {
            return Ok(());
        }
        debug!(conversation = conversation_id, pending = pending.len(), "sync request");
        self.dispatch(envelope)
            .await
            .map_err(|e| SyncError::Send(e.to_string()))?;
        Ok(())
    }

    fn complete_sync(&mut self, summary: SyncSummary, now: Instant) {
        let conversation_id = summary.conversation_id.clone();
        let push_live = self.push_live(&conversation_id);
        self.events.emit_sync_complete(&summary);
        self.coordinator.succeed(summary, now, push_live);
        self.publish_sync_error(&conversation_id);
    }

    fn fail_sync(&mut self, conversation_id: &str, error: SyncError, now: Instant) {
        self.coordinator.fail(conversation_id, error, now);
        self.publish_sync_error(conversation_id);
    }

    /// Mirror the coordinator's last error into the shared status.
    fn publish_sync_error(&self, conversation_id: &str) {
        let error = self
            .coordinator
            .last_error(conversation_id)
            .map(ToString::to_string);
        self.status.set_sync_error(conversation_id, error);
    }

    fn route_frame(&mut self, frame: &[u8]) {
        let envelope = match decode_frame(frame, &self.fallback_conversation) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(epoch = self.machine.epoch(), error = %e, len = frame.len(), "dropping undecodable frame");
                return;
            }
        };
        self.stanzas.observe(&envelope);
        debug!(
            epoch = self.machine.epoch(),
            stanza = envelope.stanza_id,
            message_type = %envelope.message_type,
            conversation = %envelope.conversation_id,
            traceparent = ?envelope.traceparent(),
            "received envelope"
        );
        if let Err(e) = self.route(&envelope) {
            warn!(message_type = %envelope.message_type, error = %e, "dropping malformed envelope");
        }
    }

    fn route(&mut self, envelope: &Envelope) -> Result<(), CodecError> {
        let now = Instant::now();
        match envelope.message_type {
            MessageType::SubscribeAck => {
                let mut ack: SubscribeAck = envelope.body_as()?;
                if ack.conversation_id.is_empty() {
                    ack.conversation_id = envelope.conversation_id.clone();
                }
                match self.registry.acknowledge(&ack, now) {
                    AckOutcome::Activated => {
                        info!(conversation = %ack.conversation_id, "subscribed");
                    }
                    AckOutcome::Rejected(reason) | AckOutcome::Revoked(reason) => {
                        self.events.emit_update(&ConversationUpdate::SubscriptionLost {
                            conversation_id: ack.conversation_id.clone(),
                            reason,
                        });
                    }
                    AckOutcome::Confirmed | AckOutcome::Ignored => {}
                }
            }
            MessageType::UnsubscribeAck => {
                debug!(conversation = %envelope.conversation_id, "unsubscribe confirmed");
            }
            MessageType::UserMessage | MessageType::AssistantMessage => {
                let role = if envelope.message_type == MessageType::UserMessage {
                    Role::User
                } else {
                    Role::Assistant
                };
                let mut chat: ChatMessage = envelope.body_as()?;
                if chat.conversation_id.is_empty() {
                    chat.conversation_id = envelope.conversation().unwrap_or_default().to_string();
                }
                if chat.conversation_id.is_empty() {
                    warn!(id = %chat.id, "dropping message without a conversation");
                    return Ok(());
                }
                let record = chat.into_message(role, Utc::now());
                self.coordinator.note_activity(&record.conversation_id, now);
                if let Err(e) = self.ingest(&record) {
                    warn!(conversation = %record.conversation_id, id = %record.id, error = %e, "reconcile failed");
                }
            }
            MessageType::SyncResponse => {
                let response: SyncResponse = envelope.body_as()?;
                self.apply_sync_response(response, now);
            }
            MessageType::SyncAvailable => {
                let available: SyncAvailable = envelope.body_as()?;
                if self.coordinator.is_tracked(&available.conversation_id) {
                    debug!(
                        conversation = %available.conversation_id,
                        latest = available.latest_sequence,
                        "sync available"
                    );
                    self.coordinator.trigger(&available.conversation_id, now);
                }
            }
            MessageType::TitleUpdate => {
                let update: TitleUpdate = envelope.body_as()?;
                self.events.emit_update(&ConversationUpdate::Title {
                    conversation_id: update.conversation_id,
                    title: update.title,
                });
            }
            MessageType::GenerationComplete => {
                let done: GenerationComplete = envelope.body_as()?;
                self.events.emit_update(&ConversationUpdate::GenerationComplete {
                    conversation_id: done.conversation_id,
                    message_id: done.message_id,
                    success: done.success,
                    error: done.error,
                });
            }
            MessageType::Error => {
                let error: ErrorBody = envelope.body_as()?;
                self.server_error(envelope, error, now);
            }
            other => {
                debug!(message_type = %other, "no handler for envelope type");
            }
        }
        Ok(())
    }

    fn server_error(&mut self, envelope: &Envelope, error: ErrorBody, now: Instant) {
        if error.code == UNCLASSIFIED {
            warn!(detail = %error.message, "dropping unclassified payload");
            return;
        }
        let conversation = error
            .conversation_id
            .clone()
            .or_else(|| envelope.conversation().map(str::to_string));
        warn!(code = %error.code, detail = %error.message, conversation = ?conversation, "server error");
        self.status
            .set_last_error(Some(format!("{}: {}", error.code, error.message)));
        if let Some(conversation_id) = conversation {
            if self.coordinator.is_in_flight(&conversation_id) {
                self.fail_sync(&conversation_id, SyncError::Server(error.message), now);
            }
        }
    }

    /// Reconcile one record and notify listeners if the store changed.
    fn ingest(&mut self, record: &Message) -> chatsync_core::Result<bool> {
        let outcome = self.store.reconcile_with(record, &self.reconcile)?;
        debug!(conversation = %record.conversation_id, outcome = ?outcome, "reconciled");
        if outcome.changed() {
            self.emit_stored(outcome.id());
        }
        Ok(outcome.changed())
    }

    fn emit_stored(&self, id: &str) {
        match self.store.find_by_id(id) {
            Ok(Some(message)) => self.events.emit_message(&message),
            Ok(None) => debug!(id, "reconciled record vanished"),
            Err(e) => warn!(id, error = %e, "failed to load reconciled record"),
        }
    }

    fn apply_sync_response(&mut self, response: SyncResponse, now: Instant) {
        let conversation_id = response.conversation_id;
        let Some(submitted) = self.coordinator.take_in_flight(&conversation_id) else {
            debug!(conversation = %conversation_id, "ignoring unsolicited sync response");
            return;
        };

        let mut summary = SyncSummary::new(conversation_id.clone());
        let mut applied = HashSet::new();
        for result in response.results {
            if !submitted.contains(&result.local_id) || !applied.insert(result.local_id.clone()) {
                summary.ignored += 1;
                continue;
            }
            let status = match result.status {
                Disposition::Synced => SyncStatus::Synced,
                Disposition::Conflict => {
                    warn!(
                        conversation = %conversation_id,
                        local_id = %result.local_id,
                        id = %result.message.id,
                        resolution = ?result.resolution,
                        "sync conflict, keeping server version"
                    );
                    SyncStatus::Conflict
                }
            };
            let record = result.message.into_message(&result.local_id, status);
            if let Err(e) = self.ingest(&record) {
                warn!(conversation = %conversation_id, id = %record.id, error = %e, "reconcile failed");
                self.fail_sync(&conversation_id, SyncError::Store(e.to_string()), now);
                return;
            }
            match status {
                SyncStatus::Conflict => summary.conflicts += 1,
                _ => summary.synced += 1,
            }
        }
        self.complete_sync(summary, now);
    }
}
