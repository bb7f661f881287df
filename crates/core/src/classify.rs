// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shape-based classification of untagged payloads.
//!
//! Some producers hand the client bare bodies without an envelope. The
//! [`RULES`] table maps each body shape to the envelope type it belongs to.
//! Rules are tried in order and the first match wins, so more specific
//! shapes must come before the generic ones they overlap with (a
//! `SubscribeAck` carrying `error` before the bare `success` ack).

use serde_json::{json, Map, Value};

use crate::envelope::{Envelope, MessageType};

/// A single classification rule.
pub struct Rule {
    pub name: &'static str,
    pub matches: fn(&Map<String, Value>) -> bool,
    pub message_type: MessageType,
}

/// Ordered classification rules. The first matching rule wins.
pub const RULES: &[Rule] = &[
    Rule {
        name: "error",
        matches: |m| is_str(m, "code") && is_str(m, "message"),
        message_type: MessageType::Error,
    },
    Rule {
        name: "sync_response",
        matches: |m| m.get("results").is_some_and(Value::is_array),
        message_type: MessageType::SyncResponse,
    },
    Rule {
        name: "tool_use_result",
        matches: |m| is_str(m, "requestId") && is_bool(m, "success"),
        message_type: MessageType::ToolUseResult,
    },
    Rule {
        name: "generation_complete",
        matches: |m| is_str(m, "messageId") && is_bool(m, "success"),
        message_type: MessageType::GenerationComplete,
    },
    Rule {
        name: "subscribe_ack",
        matches: |m| {
            is_bool(m, "success")
                && m.contains_key("conversationId")
                && (m.contains_key("error") || m.contains_key("missedMessages"))
        },
        message_type: MessageType::SubscribeAck,
    },
    Rule {
        name: "unsubscribe_ack",
        matches: |m| is_bool(m, "success") && m.contains_key("conversationId"),
        message_type: MessageType::UnsubscribeAck,
    },
    Rule {
        name: "assistant_sentence",
        matches: |m| m.contains_key("messageId") && is_number(m, "sequence") && is_str(m, "text"),
        message_type: MessageType::AssistantSentence,
    },
    Rule {
        name: "reasoning_step",
        matches: |m| {
            m.contains_key("messageId") && is_number(m, "sequence") && is_str(m, "content")
        },
        message_type: MessageType::ReasoningStep,
    },
    Rule {
        name: "tool_use_request",
        matches: |m| is_str(m, "toolName"),
        message_type: MessageType::ToolUseRequest,
    },
    Rule {
        name: "memory_trace",
        matches: |m| is_str(m, "memoryId"),
        message_type: MessageType::MemoryTrace,
    },
    Rule {
        name: "thinking_summary",
        matches: |m| m.contains_key("messageId") && is_str(m, "content"),
        message_type: MessageType::ThinkingSummary,
    },
    Rule {
        name: "start_answer",
        matches: |m| is_str(m, "messageId"),
        message_type: MessageType::StartAnswer,
    },
    Rule {
        name: "branch_update",
        matches: |m| m.contains_key("parentMessageId") && m.contains_key("newSibling"),
        message_type: MessageType::BranchUpdate,
    },
    Rule {
        name: "title_update",
        matches: |m| is_str(m, "title") && m.contains_key("conversationId"),
        message_type: MessageType::TitleUpdate,
    },
    Rule {
        name: "sync_available",
        matches: |m| is_number(m, "latestSequence") && m.contains_key("conversationId"),
        message_type: MessageType::SyncAvailable,
    },
    Rule {
        name: "configuration",
        matches: |m| m.get("supportedFeatures").is_some_and(Value::is_array),
        message_type: MessageType::Configuration,
    },
    Rule {
        name: "assistant_message",
        matches: |m| {
            is_str(m, "id")
                && is_str(m, "content")
                && (m.get("role").and_then(Value::as_str) == Some("assistant")
                    || m.contains_key("reasoning"))
        },
        message_type: MessageType::AssistantMessage,
    },
    Rule {
        name: "user_message",
        matches: |m| is_str(m, "id") && is_str(m, "content"),
        message_type: MessageType::UserMessage,
    },
];

fn is_str(m: &Map<String, Value>, key: &str) -> bool {
    m.get(key).is_some_and(Value::is_string)
}

fn is_bool(m: &Map<String, Value>, key: &str) -> bool {
    m.get(key).is_some_and(Value::is_boolean)
}

fn is_number(m: &Map<String, Value>, key: &str) -> bool {
    m.get(key).is_some_and(Value::is_number)
}

/// Whether a value already has the full envelope shape. Unknown type codes
/// still count; they decode as [`MessageType::Unknown`].
fn is_envelope(m: &Map<String, Value>) -> bool {
    is_number(m, "stanzaId")
        && is_number(m, "type")
        && m.contains_key("body")
        && is_str(m, "conversationId")
}

/// Returns the first rule matching `dto`, if any.
pub fn matching_rule(dto: &Map<String, Value>) -> Option<&'static Rule> {
    RULES.iter().find(|rule| (rule.matches)(dto))
}

/// Wrap an arbitrary value in an envelope according to its shape.
///
/// Total: values that are already envelopes come back unchanged, values no
/// rule recognizes become an `Error` envelope with code `unclassified`.
pub fn classify(dto: &Value, fallback_conversation: &str) -> Envelope {
    let Some(map) = dto.as_object() else {
        return unclassified(dto, fallback_conversation);
    };

    if is_envelope(map) {
        if let Ok(envelope) = serde_json::from_value::<Envelope>(dto.clone()) {
            return envelope;
        }
    }

    match matching_rule(map) {
        Some(rule) => {
            tracing::trace!(rule = rule.name, "classified payload");
            Envelope::from_value(
                conversation_of(map, fallback_conversation),
                rule.message_type,
                dto.clone(),
            )
        }
        None => unclassified(dto, fallback_conversation),
    }
}

fn conversation_of(map: &Map<String, Value>, fallback: &str) -> String {
    map.get("conversationId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn unclassified(dto: &Value, fallback_conversation: &str) -> Envelope {
    let conversation = dto
        .as_object()
        .map(|m| conversation_of(m, fallback_conversation))
        .unwrap_or_else(|| fallback_conversation.to_string());
    Envelope::from_value(
        conversation,
        MessageType::Error,
        json!({
            "code": "unclassified",
            "message": "payload did not match any known shape",
            "payload": dto,
        }),
    )
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
