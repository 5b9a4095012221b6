/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Normal,
    Chat,
    Groupchat,
    Error,
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Normal
    }
}

/// Decoded message-like stanza as handed over by the stream layer.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MessageStanza {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub extensions: Vec<Extension>,
}

/// Encrypted body as it travels on the wire. Both blobs are base64.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub sender_device: u32,
    #[serde(default)]
    pub key_b64: Option<String>,
    pub payload_b64: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Extension {
    Body {
        text: String,
    },
    Correction {
        id: String,
    },
    Reactions {
        id: String,
        #[serde(default)]
        emojis: Vec<String>,
    },
    Retraction {
        id: String,
    },
    Reply {
        id: String,
        #[serde(default)]
        to: Option<String>,
    },
    Receipt {
        id: String,
    },
    Displayed {
        id: String,
    },
    OutOfBandData {
        url: String,
        #[serde(default)]
        description: Option<String>,
    },
    MucUser {
        #[serde(default)]
        jid: Option<String>,
    },
    Encrypted(EncryptedPayload),
    Error {
        condition: String,
        #[serde(default)]
        text: Option<String>,
    },
    StanzaId {
        id: String,
        by: String,
    },
    OccupantId {
        id: String,
    },
    ChatState {
        state: String,
    },
    Unknown {
        namespace: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum EventSource {
    Live,
    Carbon,
    Archive { archive: String, result_id: String },
}

impl Default for EventSource {
    fn default() -> Self {
        Self::Live
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InboundEvent {
    pub stanza: MessageStanza,
    pub received_at_ms: i64,
    #[serde(default)]
    pub source: EventSource,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Order {
    /// Older than the anchor.
    Reverse,
    /// Newer than the anchor.
    Normal,
}

/// Directive to fetch one sweep of archive history.
///
/// A `Reverse` range with no anchor starts from the newest archived message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct Range {
    pub order: Order,
    pub anchor: Option<String>,
}

impl Range {
    pub fn reverse(anchor: Option<String>) -> Self {
        Self {
            order: Order::Reverse,
            anchor,
        }
    }

    pub fn normal(anchor: impl Into<String>) -> Self {
        Self {
            order: Order::Normal,
            anchor: Some(anchor.into()),
        }
    }
}

/// Bounds of one fetched archive page. `first`/`last` are absent for an empty page.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct QueryResult {
    #[serde(default)]
    pub first: Option<String>,
    #[serde(default)]
    pub last: Option<String>,
    #[serde(default)]
    pub complete: bool,
}

impl QueryResult {
    pub fn page(first: impl Into<String>, last: impl Into<String>, complete: bool) -> Self {
        Self {
            first: Some(first.into()),
            last: Some(last.into()),
            complete,
        }
    }

    pub fn empty(complete: bool) -> Self {
        Self {
            first: None,
            last: None,
            complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_json_is_tagged() {
        let ext: Extension =
            serde_json::from_str(r#"{"kind":"reactions","id":"m1","emojis":["Y"]}"#).unwrap();
        assert_eq!(
            ext,
            Extension::Reactions {
                id: "m1".to_string(),
                emojis: vec!["Y".to_string()]
            }
        );
    }

    #[test]
    fn inbound_event_defaults_to_live() {
        let ev: InboundEvent = serde_json::from_str(
            r#"{"stanza":{"from":"juliet@example.com/balcony","type":"chat"},"received_at_ms":1000}"#,
        )
        .unwrap();
        assert_eq!(ev.source, EventSource::Live);
        assert_eq!(ev.stanza.message_type, MessageType::Chat);
        assert!(ev.stanza.extensions.is_empty());
    }
}
