/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Turns a decoded inbound stanza into the canonical, read-only
//! [`Transformation`] every later stage works from.

use crate::address::{BareJid, Jid};
use crate::error::TransformError;
use crate::lookup::{AddressLookup, FEATURE_MAM, FEATURE_MUC, FEATURE_OCCUPANT_ID};
use stanzasync_protocol::{EncryptedPayload, EventSource, Extension, InboundEvent, MessageType};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Individual,
    Group,
    GroupPrivate,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Group => "group",
            Self::GroupPrivate => "group_private",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "individual" => Some(Self::Individual),
            "group" => Some(Self::Group),
            "group_private" => Some(Self::GroupPrivate),
            _ => None,
        }
    }
}

/// Conversation identity within one account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatAddress {
    pub address: String,
    pub kind: ChatKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StanzaId {
    pub id: String,
    pub verified: bool,
}

#[derive(Debug, Clone)]
pub struct Transformation {
    pub account: BareJid,
    pub received_at_ms: i64,
    pub to: Option<Jid>,
    pub from: Option<Jid>,
    /// Counterpart of the conversation. Full address so group-private
    /// chats keep the occupant nick; compare with `.bare()` otherwise.
    pub remote: Jid,
    pub outgoing: bool,
    pub message_type: MessageType,
    pub message_id: Option<String>,
    pub stanza_id: Option<StanzaId>,
    pub occupant_id: Option<String>,
    pub sender_identity: Option<BareJid>,
    pub source: EventSource,
    pub chat: ChatAddress,
    /// Owner of the archive this event's stanza id belongs to.
    pub archive: BareJid,
    extensions: Vec<Extension>,
}

fn is_allowed(ext: &Extension) -> bool {
    match ext {
        Extension::Body { .. }
        | Extension::Correction { .. }
        | Extension::Reactions { .. }
        | Extension::Retraction { .. }
        | Extension::Reply { .. }
        | Extension::Receipt { .. }
        | Extension::Displayed { .. }
        | Extension::OutOfBandData { .. }
        | Extension::MucUser { .. }
        | Extension::Encrypted(_) => true,
        Extension::Error { .. }
        | Extension::StanzaId { .. }
        | Extension::OccupantId { .. }
        | Extension::ChatState { .. }
        | Extension::Unknown { .. } => false,
    }
}

impl Transformation {
    pub fn is_group(&self) -> bool {
        self.chat.kind == ChatKind::Group
    }

    pub fn is_live(&self) -> bool {
        !matches!(self.source, EventSource::Archive { .. })
    }

    pub fn verified_stanza_id(&self) -> Option<&str> {
        self.stanza_id
            .as_ref()
            .filter(|s| s.verified)
            .map(|s| s.id.as_str())
    }

    pub fn from_bare(&self) -> Option<&BareJid> {
        self.from.as_ref().map(Jid::bare)
    }

    pub fn body(&self) -> Option<&str> {
        self.extensions.iter().find_map(|e| match e {
            Extension::Body { text } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn correction(&self) -> Option<&str> {
        self.extensions.iter().find_map(|e| match e {
            Extension::Correction { id } => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn reactions(&self) -> Option<(&str, &[String])> {
        self.extensions.iter().find_map(|e| match e {
            Extension::Reactions { id, emojis } => Some((id.as_str(), emojis.as_slice())),
            _ => None,
        })
    }

    pub fn retraction(&self) -> Option<&str> {
        self.extensions.iter().find_map(|e| match e {
            Extension::Retraction { id } => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn reply(&self) -> Option<(&str, Option<&str>)> {
        self.extensions.iter().find_map(|e| match e {
            Extension::Reply { id, to } => Some((id.as_str(), to.as_deref())),
            _ => None,
        })
    }

    pub fn receipt(&self) -> Option<&str> {
        self.extensions.iter().find_map(|e| match e {
            Extension::Receipt { id } => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn displayed(&self) -> Option<&str> {
        self.extensions.iter().find_map(|e| match e {
            Extension::Displayed { id } => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn out_of_band(&self) -> Option<(&str, Option<&str>)> {
        self.extensions.iter().find_map(|e| match e {
            Extension::OutOfBandData { url, description } => {
                Some((url.as_str(), description.as_deref()))
            }
            _ => None,
        })
    }

    pub fn muc_user_jid(&self) -> Option<&str> {
        self.extensions.iter().find_map(|e| match e {
            Extension::MucUser { jid } => jid.as_deref(),
            _ => None,
        })
    }

    pub fn encrypted(&self) -> Option<&EncryptedPayload> {
        self.extensions.iter().find_map(|e| match e {
            Extension::Encrypted(p) => Some(p),
            _ => None,
        })
    }

    pub fn error(&self) -> Option<(&str, Option<&str>)> {
        self.extensions.iter().find_map(|e| match e {
            Extension::Error { condition, text } => Some((condition.as_str(), text.as_deref())),
            _ => None,
        })
    }

    pub fn has_content(&self) -> bool {
        self.body().is_some() || self.out_of_band().is_some() || self.encrypted().is_some()
    }
}

#[derive(Clone)]
pub struct Normalizer {
    account: BareJid,
    lookup: Arc<dyn AddressLookup>,
}

impl Normalizer {
    pub fn new(account: BareJid, lookup: Arc<dyn AddressLookup>) -> Self {
        Self { account, lookup }
    }

    pub fn account(&self) -> &BareJid {
        &self.account
    }

    pub fn normalize(&self, event: &InboundEvent) -> Result<Transformation, TransformError> {
        let stanza = &event.stanza;
        let parse = |v: &Option<String>| -> Result<Option<Jid>, TransformError> {
            v.as_deref()
                .map(Jid::parse)
                .transpose()
                .map_err(|e| TransformError::ProtocolShape(format!("{e:#}")))
        };
        let from = parse(&stanza.from)?;
        let to = parse(&stanza.to)?;

        let from_bare = from
            .as_ref()
            .map(|j| j.bare().clone())
            .unwrap_or_else(|| self.account.clone());
        let remote = if from_bare == self.account {
            to.clone()
                .unwrap_or_else(|| Jid::from(self.account.clone()))
        } else {
            from.clone()
                .unwrap_or_else(|| Jid::from(self.account.clone()))
        };
        let outgoing = to
            .as_ref()
            .is_some_and(|t| t.bare() == remote.bare());

        let remote_bare = remote.bare().clone();
        let chat = match stanza.message_type {
            MessageType::Groupchat => ChatAddress {
                address: remote_bare.to_string(),
                kind: ChatKind::Group,
            },
            _ if self.lookup.supports_feature(&remote_bare, FEATURE_MUC) => ChatAddress {
                address: remote.to_string(),
                kind: ChatKind::GroupPrivate,
            },
            _ => ChatAddress {
                address: remote_bare.to_string(),
                kind: ChatKind::Individual,
            },
        };
        let archive = if chat.kind == ChatKind::Group {
            remote_bare.clone()
        } else {
            self.account.clone()
        };

        let in_room = chat.kind != ChatKind::Individual;
        let occupant_id = if in_room && self.lookup.supports_feature(&remote_bare, FEATURE_OCCUPANT_ID)
        {
            stanza.extensions.iter().find_map(|e| match e {
                Extension::OccupantId { id } if !id.trim().is_empty() => Some(id.clone()),
                _ => None,
            })
        } else {
            None
        };

        let stanza_id = match &event.source {
            EventSource::Archive { result_id, .. } => Some(StanzaId {
                id: result_id.clone(),
                verified: true,
            }),
            _ => stanza.extensions.iter().find_map(|e| match e {
                Extension::StanzaId { id, by } => {
                    let by_owner = BareJid::parse(by).is_ok_and(|b| b == archive);
                    Some(StanzaId {
                        id: id.clone(),
                        verified: by_owner && self.lookup.supports_feature(&archive, FEATURE_MAM),
                    })
                }
                _ => None,
            }),
        };

        let extensions = if stanza.message_type == MessageType::Error {
            stanza
                .extensions
                .iter()
                .filter(|e| matches!(e, Extension::Error { .. }))
                .cloned()
                .collect()
        } else {
            stanza
                .extensions
                .iter()
                .filter(|e| is_allowed(e))
                .cloned()
                .collect::<Vec<_>>()
        };

        let mut t = Transformation {
            account: self.account.clone(),
            received_at_ms: event.received_at_ms,
            to,
            from,
            remote,
            outgoing,
            message_type: stanza.message_type,
            message_id: stanza.id.clone().filter(|id| !id.trim().is_empty()),
            stanza_id,
            occupant_id,
            sender_identity: None,
            source: event.source.clone(),
            chat,
            archive,
            extensions,
        };
        t.sender_identity = if from_bare == self.account || !in_room {
            Some(from_bare)
        } else {
            self.resolve_room_sender(&t)
        };
        Ok(t)
    }

    fn resolve_room_sender(&self, t: &Transformation) -> Option<BareJid> {
        let room = t.remote.bare();
        if let Some(real) = t
            .occupant_id
            .as_deref()
            .and_then(|occ| self.lookup.resolve_occupant(room, occ))
        {
            return Some(real);
        }
        t.muc_user_jid().and_then(|j| BareJid::parse(j).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::StaticLookup;
    use stanzasync_protocol::MessageStanza;

    fn bare(s: &str) -> BareJid {
        BareJid::parse(s).unwrap()
    }

    fn normalizer(lookup: StaticLookup) -> Normalizer {
        Normalizer::new(bare("romeo@example.com"), Arc::new(lookup))
    }

    fn event(from: &str, to: &str, ty: MessageType, extensions: Vec<Extension>) -> InboundEvent {
        InboundEvent {
            stanza: MessageStanza {
                from: Some(from.to_string()),
                to: Some(to.to_string()),
                id: Some("m1".to_string()),
                message_type: ty,
                extensions,
            },
            received_at_ms: 1000,
            source: EventSource::Live,
        }
    }

    #[test]
    fn incoming_chat_uses_sender_as_remote() {
        let t = normalizer(StaticLookup::new())
            .normalize(&event(
                "Juliet@example.com/balcony",
                "romeo@example.com/orchard",
                MessageType::Chat,
                vec![Extension::Body { text: "hi".into() }],
            ))
            .unwrap();
        assert_eq!(t.remote.bare().as_str(), "juliet@example.com");
        assert!(!t.outgoing);
        assert_eq!(t.chat.kind, ChatKind::Individual);
        assert_eq!(t.chat.address, "juliet@example.com");
        assert_eq!(t.sender_identity.as_ref().unwrap().as_str(), "juliet@example.com");
        assert_eq!(t.body(), Some("hi"));
    }

    #[test]
    fn sent_carbon_is_outgoing() {
        let mut ev = event(
            "romeo@example.com/phone",
            "juliet@example.com",
            MessageType::Chat,
            vec![Extension::Body { text: "hi".into() }],
        );
        ev.source = EventSource::Carbon;
        let t = normalizer(StaticLookup::new()).normalize(&ev).unwrap();
        assert_eq!(t.remote.bare().as_str(), "juliet@example.com");
        assert!(t.outgoing);
        assert_eq!(t.sender_identity.unwrap().as_str(), "romeo@example.com");
    }

    #[test]
    fn error_events_keep_only_the_error() {
        let t = normalizer(StaticLookup::new())
            .normalize(&event(
                "juliet@example.com",
                "romeo@example.com",
                MessageType::Error,
                vec![
                    Extension::Body { text: "bounced".into() },
                    Extension::Error {
                        condition: "service-unavailable".into(),
                        text: None,
                    },
                ],
            ))
            .unwrap();
        assert_eq!(t.body(), None);
        assert_eq!(t.error(), Some(("service-unavailable", None)));
    }

    #[test]
    fn unlisted_extensions_are_dropped() {
        let t = normalizer(StaticLookup::new())
            .normalize(&event(
                "juliet@example.com",
                "romeo@example.com",
                MessageType::Chat,
                vec![
                    Extension::ChatState { state: "composing".into() },
                    Extension::Unknown { namespace: "urn:example".into() },
                ],
            ))
            .unwrap();
        assert!(t.extensions.is_empty());
        assert!(!t.has_content());
    }

    #[test]
    fn stanza_id_needs_matching_archive_with_mam() {
        let exts = vec![Extension::StanzaId {
            id: "s1".into(),
            by: "romeo@example.com".into(),
        }];
        let unverified = normalizer(StaticLookup::new())
            .normalize(&event("juliet@example.com", "romeo@example.com", MessageType::Chat, exts.clone()))
            .unwrap();
        assert_eq!(unverified.verified_stanza_id(), None);

        let lookup = StaticLookup::new().with_feature(bare("romeo@example.com"), FEATURE_MAM);
        let verified = normalizer(lookup)
            .normalize(&event("juliet@example.com", "romeo@example.com", MessageType::Chat, exts))
            .unwrap();
        assert_eq!(verified.verified_stanza_id(), Some("s1"));
    }

    #[test]
    fn group_message_trusts_occupant_id_only_when_advertised() {
        let exts = vec![
            Extension::OccupantId { id: "occ-1".into() },
            Extension::StanzaId {
                id: "s9".into(),
                by: "room@muc.example.com".into(),
            },
            Extension::Body { text: "hello".into() },
        ];
        let ev = event(
            "room@muc.example.com/juliet",
            "romeo@example.com/orchard",
            MessageType::Groupchat,
            exts,
        );

        let t = normalizer(StaticLookup::new()).normalize(&ev).unwrap();
        assert_eq!(t.occupant_id, None);
        assert_eq!(t.sender_identity, None);
        assert_eq!(t.verified_stanza_id(), None);

        let mut lookup = StaticLookup::new()
            .with_feature(bare("room@muc.example.com"), FEATURE_OCCUPANT_ID)
            .with_feature(bare("room@muc.example.com"), FEATURE_MAM);
        lookup.add_occupant(bare("room@muc.example.com"), "occ-1", bare("juliet@example.com"));
        let t = normalizer(lookup).normalize(&ev).unwrap();
        assert_eq!(t.chat.kind, ChatKind::Group);
        assert_eq!(t.chat.address, "room@muc.example.com");
        assert_eq!(t.occupant_id.as_deref(), Some("occ-1"));
        assert_eq!(t.sender_identity.as_ref().unwrap().as_str(), "juliet@example.com");
        assert_eq!(t.verified_stanza_id(), Some("s9"));
        assert_eq!(t.archive.as_str(), "room@muc.example.com");
    }

    #[test]
    fn private_message_through_room_keeps_full_address() {
        let lookup = StaticLookup::new().with_feature(bare("room@muc.example.com"), FEATURE_MUC);
        let t = normalizer(lookup)
            .normalize(&event(
                "room@muc.example.com/juliet",
                "romeo@example.com",
                MessageType::Chat,
                vec![Extension::Body { text: "psst".into() }],
            ))
            .unwrap();
        assert_eq!(t.chat.kind, ChatKind::GroupPrivate);
        assert_eq!(t.chat.address, "room@muc.example.com/juliet");
        assert_eq!(t.archive.as_str(), "romeo@example.com");
    }

    #[test]
    fn archive_result_id_is_verified() {
        let mut ev = event(
            "juliet@example.com",
            "romeo@example.com",
            MessageType::Chat,
            vec![Extension::Body { text: "old".into() }],
        );
        ev.source = EventSource::Archive {
            archive: "romeo@example.com".into(),
            result_id: "a7".into(),
        };
        let t = normalizer(StaticLookup::new()).normalize(&ev).unwrap();
        assert_eq!(t.verified_stanza_id(), Some("a7"));
        assert!(!t.is_live());
    }
}
