// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Wire envelope and MessagePack codec.
//!
//! Every frame exchanged with the server is an [`Envelope`]: a numeric
//! [`MessageType`] tag, the conversation it belongs to, a stanza id, and a
//! [`Body`]. Structured bodies are kept as [`serde_json::Value`] so that
//! frames can be routed and classified before their concrete shape is known;
//! binary bodies carry a nested MessagePack document. [`Envelope::body_as`]
//! converts either to a typed body from [`crate::protocol`].
//!
//! Stanza ids carry their origin in the sign: client stanzas are positive,
//! server stanzas negative. [`Envelope::origin`] is the only place that
//! convention is interpreted.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use serde_json::Value;
use thiserror::Error;

use crate::classify::classify;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("invalid {message_type} body: {source}")]
    Body {
        message_type: MessageType,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {message_type} binary body: {source}")]
    PackedBody {
        message_type: MessageType,
        #[source]
        source: rmp_serde::decode::Error,
    },

    #[error("{0} envelope requires a conversation id")]
    MissingConversation(MessageType),

    #[error("frame is not a map (got {0})")]
    NotAMap(&'static str),
}

/// Numeric envelope type tags.
///
/// Codes outside the known table decode as [`MessageType::Unknown`] so
/// that frames from newer servers still round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum MessageType {
    Error,
    UserMessage,
    AssistantMessage,
    AudioChunk,
    ReasoningStep,
    ToolUseRequest,
    ToolUseResult,
    Ack,
    Transcription,
    ControlStop,
    ControlVariation,
    Configuration,
    StartAnswer,
    MemoryTrace,
    Commentary,
    AssistantSentence,
    SyncRequest,
    SyncResponse,
    SyncAvailable,
    GenerationRequest,
    ThinkingSummary,
    TitleUpdate,
    Subscribe,
    Unsubscribe,
    SubscribeAck,
    UnsubscribeAck,
    BranchUpdate,
    VoiceJoinRequest,
    VoiceJoinAck,
    VoiceLeaveRequest,
    VoiceLeaveAck,
    VoiceStatus,
    VoiceSpeaking,
    PreferencesUpdate,
    AssistantToolsRegister,
    AssistantToolsAck,
    AssistantHeartbeat,
    GenerationComplete,
    Unknown(u16),
}

impl MessageType {
    /// Every known type, in code order.
    pub const ALL: [MessageType; 38] = [
        MessageType::Error,
        MessageType::UserMessage,
        MessageType::AssistantMessage,
        MessageType::AudioChunk,
        MessageType::ReasoningStep,
        MessageType::ToolUseRequest,
        MessageType::ToolUseResult,
        MessageType::Ack,
        MessageType::Transcription,
        MessageType::ControlStop,
        MessageType::ControlVariation,
        MessageType::Configuration,
        MessageType::StartAnswer,
        MessageType::MemoryTrace,
        MessageType::Commentary,
        MessageType::AssistantSentence,
        MessageType::SyncRequest,
        MessageType::SyncResponse,
        MessageType::SyncAvailable,
        MessageType::GenerationRequest,
        MessageType::ThinkingSummary,
        MessageType::TitleUpdate,
        MessageType::Subscribe,
        MessageType::Unsubscribe,
        MessageType::SubscribeAck,
        MessageType::UnsubscribeAck,
        MessageType::BranchUpdate,
        MessageType::VoiceJoinRequest,
        MessageType::VoiceJoinAck,
        MessageType::VoiceLeaveRequest,
        MessageType::VoiceLeaveAck,
        MessageType::VoiceStatus,
        MessageType::VoiceSpeaking,
        MessageType::PreferencesUpdate,
        MessageType::AssistantToolsRegister,
        MessageType::AssistantToolsAck,
        MessageType::AssistantHeartbeat,
        MessageType::GenerationComplete,
    ];

    pub fn code(self) -> u16 {
        match self {
            MessageType::Error => 1,
            MessageType::UserMessage => 2,
            MessageType::AssistantMessage => 3,
            MessageType::AudioChunk => 4,
            MessageType::ReasoningStep => 5,
            MessageType::ToolUseRequest => 6,
            MessageType::ToolUseResult => 7,
            MessageType::Ack => 8,
            MessageType::Transcription => 9,
            MessageType::ControlStop => 10,
            MessageType::ControlVariation => 11,
            MessageType::Configuration => 12,
            MessageType::StartAnswer => 13,
            MessageType::MemoryTrace => 14,
            MessageType::Commentary => 15,
            MessageType::AssistantSentence => 16,
            MessageType::SyncRequest => 17,
            MessageType::SyncResponse => 18,
            MessageType::SyncAvailable => 19,
            MessageType::GenerationRequest => 33,
            MessageType::ThinkingSummary => 34,
            MessageType::TitleUpdate => 35,
            MessageType::Subscribe => 40,
            MessageType::Unsubscribe => 41,
            MessageType::SubscribeAck => 42,
            MessageType::UnsubscribeAck => 43,
            MessageType::BranchUpdate => 50,
            MessageType::VoiceJoinRequest => 51,
            MessageType::VoiceJoinAck => 52,
            MessageType::VoiceLeaveRequest => 53,
            MessageType::VoiceLeaveAck => 54,
            MessageType::VoiceStatus => 55,
            MessageType::VoiceSpeaking => 56,
            MessageType::PreferencesUpdate => 60,
            MessageType::AssistantToolsRegister => 70,
            MessageType::AssistantToolsAck => 71,
            MessageType::AssistantHeartbeat => 72,
            MessageType::GenerationComplete => 80,
            MessageType::Unknown(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1 => MessageType::Error,
            2 => MessageType::UserMessage,
            3 => MessageType::AssistantMessage,
            4 => MessageType::AudioChunk,
            5 => MessageType::ReasoningStep,
            6 => MessageType::ToolUseRequest,
            7 => MessageType::ToolUseResult,
            8 => MessageType::Ack,
            9 => MessageType::Transcription,
            10 => MessageType::ControlStop,
            11 => MessageType::ControlVariation,
            12 => MessageType::Configuration,
            13 => MessageType::StartAnswer,
            14 => MessageType::MemoryTrace,
            15 => MessageType::Commentary,
            16 => MessageType::AssistantSentence,
            17 => MessageType::SyncRequest,
            18 => MessageType::SyncResponse,
            19 => MessageType::SyncAvailable,
            33 => MessageType::GenerationRequest,
            34 => MessageType::ThinkingSummary,
            35 => MessageType::TitleUpdate,
            40 => MessageType::Subscribe,
            41 => MessageType::Unsubscribe,
            42 => MessageType::SubscribeAck,
            43 => MessageType::UnsubscribeAck,
            50 => MessageType::BranchUpdate,
            51 => MessageType::VoiceJoinRequest,
            52 => MessageType::VoiceJoinAck,
            53 => MessageType::VoiceLeaveRequest,
            54 => MessageType::VoiceLeaveAck,
            55 => MessageType::VoiceStatus,
            56 => MessageType::VoiceSpeaking,
            60 => MessageType::PreferencesUpdate,
            70 => MessageType::AssistantToolsRegister,
            71 => MessageType::AssistantToolsAck,
            72 => MessageType::AssistantHeartbeat,
            80 => MessageType::GenerationComplete,
            other => MessageType::Unknown(other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Error => "error",
            MessageType::UserMessage => "user_message",
            MessageType::AssistantMessage => "assistant_message",
            MessageType::AudioChunk => "audio_chunk",
            MessageType::ReasoningStep => "reasoning_step",
            MessageType::ToolUseRequest => "tool_use_request",
            MessageType::ToolUseResult => "tool_use_result",
            MessageType::Ack => "ack",
            MessageType::Transcription => "transcription",
            MessageType::ControlStop => "control_stop",
            MessageType::ControlVariation => "control_variation",
            MessageType::Configuration => "configuration",
            MessageType::StartAnswer => "start_answer",
            MessageType::MemoryTrace => "memory_trace",
            MessageType::Commentary => "commentary",
            MessageType::AssistantSentence => "assistant_sentence",
            MessageType::SyncRequest => "sync_request",
            MessageType::SyncResponse => "sync_response",
            MessageType::SyncAvailable => "sync_available",
            MessageType::GenerationRequest => "generation_request",
            MessageType::ThinkingSummary => "thinking_summary",
            MessageType::TitleUpdate => "title_update",
            MessageType::Subscribe => "subscribe",
            MessageType::Unsubscribe => "unsubscribe",
            MessageType::SubscribeAck => "subscribe_ack",
            MessageType::UnsubscribeAck => "unsubscribe_ack",
            MessageType::BranchUpdate => "branch_update",
            MessageType::VoiceJoinRequest => "voice_join_request",
            MessageType::VoiceJoinAck => "voice_join_ack",
            MessageType::VoiceLeaveRequest => "voice_leave_request",
            MessageType::VoiceLeaveAck => "voice_leave_ack",
            MessageType::VoiceStatus => "voice_status",
            MessageType::VoiceSpeaking => "voice_speaking",
            MessageType::PreferencesUpdate => "preferences_update",
            MessageType::AssistantToolsRegister => "assistant_tools_register",
            MessageType::AssistantToolsAck => "assistant_tools_ack",
            MessageType::AssistantHeartbeat => "assistant_heartbeat",
            MessageType::GenerationComplete => "generation_complete",
            MessageType::Unknown(_) => "unknown",
        }
    }

    /// Whether envelopes of this type must name a conversation.
    pub fn is_conversation_scoped(self) -> bool {
        matches!(
            self,
            MessageType::UserMessage
                | MessageType::AssistantMessage
                | MessageType::ReasoningStep
                | MessageType::ToolUseRequest
                | MessageType::ToolUseResult
                | MessageType::StartAnswer
                | MessageType::MemoryTrace
                | MessageType::AssistantSentence
                | MessageType::SyncRequest
                | MessageType::SyncResponse
                | MessageType::SyncAvailable
                | MessageType::GenerationRequest
                | MessageType::ThinkingSummary
                | MessageType::TitleUpdate
                | MessageType::Subscribe
                | MessageType::Unsubscribe
                | MessageType::SubscribeAck
                | MessageType::UnsubscribeAck
                | MessageType::BranchUpdate
                | MessageType::GenerationComplete
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Unknown(code) => write!(f, "unknown({code})"),
            known => write!(f, "{}", known.as_str()),
        }
    }
}

impl From<MessageType> for u16 {
    fn from(message_type: MessageType) -> Self {
        message_type.code()
    }
}

impl From<u16> for MessageType {
    fn from(code: u16) -> Self {
        MessageType::from_code(code)
    }
}

/// Which side of the connection assigned a stanza id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Client,
    Server,
}

/// Envelope payload: a structured map (or any other value) or raw bytes.
///
/// `Struct` is tried first so that arrays and strings never turn into bytes;
/// only a MessagePack `bin` lands in `Bytes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body {
    Struct(Value),
    Bytes(ByteBuf),
}

impl Body {
    pub fn as_struct(&self) -> Option<&Value> {
        match self {
            Body::Struct(value) => Some(value),
            Body::Bytes(_) => None,
        }
    }

    /// Field lookup on a structured body.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_struct()?.get(key)
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Struct(Value::Null)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Struct(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(ByteBuf::from(bytes))
    }
}

impl PartialEq<Value> for Body {
    fn eq(&self, other: &Value) -> bool {
        self.as_struct() == Some(other)
    }
}

/// A tagged protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub stanza_id: i64,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub body: Body,
    #[serde(rename = "trace_id", default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(rename = "span_id", default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(rename = "trace_flags", default, skip_serializing_if = "Option::is_none")]
    pub trace_flags: Option<u8>,
}

impl Envelope {
    /// Build an envelope around a typed body. The stanza id is assigned at
    /// dispatch time.
    pub fn new<B: Serialize>(
        conversation_id: impl Into<String>,
        message_type: MessageType,
        body: &B,
    ) -> Result<Self, CodecError> {
        let body = serde_json::to_value(body).map_err(|source| CodecError::Body {
            message_type,
            source,
        })?;
        Ok(Self::from_value(conversation_id, message_type, body))
    }

    pub fn from_value(
        conversation_id: impl Into<String>,
        message_type: MessageType,
        body: impl Into<Body>,
    ) -> Self {
        Envelope {
            stanza_id: 0,
            conversation_id: conversation_id.into(),
            message_type,
            body: body.into(),
            trace_id: None,
            span_id: None,
            trace_flags: None,
        }
    }

    pub fn with_stanza(mut self, stanza_id: i64) -> Self {
        self.stanza_id = stanza_id;
        self
    }

    pub fn origin(&self) -> Origin {
        if self.stanza_id < 0 {
            Origin::Server
        } else {
            Origin::Client
        }
    }

    /// The conversation this frame refers to, falling back to the body's
    /// `conversationId` when the envelope field is empty.
    pub fn conversation(&self) -> Option<&str> {
        if !self.conversation_id.is_empty() {
            return Some(&self.conversation_id);
        }
        self.body
            .get("conversationId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// W3C `traceparent` header value, when trace context is present.
    pub fn traceparent(&self) -> Option<String> {
        match (&self.trace_id, &self.span_id) {
            (Some(trace), Some(span)) if !trace.is_empty() && !span.is_empty() => Some(format!(
                "00-{trace}-{span}-{:02x}",
                self.trace_flags.unwrap_or(0)
            )),
            _ => None,
        }
    }

    /// Deserialize the body into a concrete wire type.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        let message_type = self.message_type;
        match &self.body {
            Body::Struct(value) => {
                T::deserialize(value).map_err(|source| CodecError::Body {
                    message_type,
                    source,
                })
            }
            Body::Bytes(bytes) => rmp_serde::from_slice(bytes)
                .map_err(|source| CodecError::PackedBody {
                    message_type,
                    source,
                }),
        }
    }

    /// Reject envelopes that cannot be sent as-is.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.message_type.is_conversation_scoped() && self.conversation_id.is_empty() {
            return Err(CodecError::MissingConversation(self.message_type));
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }
}

/// Serialize an envelope to MessagePack with named map keys.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    envelope.validate()?;
    Ok(rmp_serde::to_vec_named(envelope)?)
}

/// Strictly decode a MessagePack frame as an envelope.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Decode an inbound frame, classifying untagged payloads by shape.
///
/// Frames that decode as envelopes are returned unchanged. Any other
/// MessagePack map is handed to [`classify`] with `fallback_conversation`.
/// Everything else is a decode error.
pub fn decode_frame(bytes: &[u8], fallback_conversation: &str) -> Result<Envelope, CodecError> {
    let strict = match decode(bytes) {
        Ok(envelope) => return Ok(envelope),
        Err(e) => e,
    };
    let value: Value = match rmp_serde::from_slice(bytes) {
        Ok(value) => value,
        Err(_) => return Err(strict),
    };
    match value {
        Value::Object(_) => Ok(classify(&value, fallback_conversation)),
        other => Err(CodecError::NotAMap(value_kind(&other))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
