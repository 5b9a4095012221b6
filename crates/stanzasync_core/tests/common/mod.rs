/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

#![allow(dead_code)]

use stanzasync_core::address::BareJid;
use stanzasync_core::content::{cleartext_parts, Encryption, ResolvedContent};
use stanzasync_core::error::TransformError;
use stanzasync_core::lookup::{StaticLookup, FEATURE_MAM, FEATURE_MUC, FEATURE_OCCUPANT_ID};
use stanzasync_core::message_db::{MessageDb, MessageView};
use stanzasync_core::normalizer::{ChatAddress, ChatKind, Normalizer};
use stanzasync_core::transformer::Transformer;
use stanzasync_protocol::{EventSource, Extension, InboundEvent, MessageStanza, MessageType};
use std::sync::Arc;
use tempfile::TempDir;

pub const ACCOUNT: &str = "romeo@example.com";
pub const ROMEO: &str = "romeo@example.com/orchard";
pub const JULIET: &str = "juliet@example.com/balcony";
pub const ROOM: &str = "room@muc.example.com";

pub fn bare(s: &str) -> BareJid {
    BareJid::parse(s).unwrap()
}

pub fn lookup() -> StaticLookup {
    let mut lookup = StaticLookup::new()
        .with_feature(bare(ACCOUNT), FEATURE_MAM)
        .with_feature(bare(ROOM), FEATURE_MAM)
        .with_feature(bare(ROOM), FEATURE_MUC)
        .with_feature(bare(ROOM), FEATURE_OCCUPANT_ID);
    lookup.add_occupant(bare(ROOM), "occ-juliet", bare("juliet@example.com"));
    lookup.add_occupant(bare(ROOM), "occ-nurse", bare("nurse@example.com"));
    lookup
}

/// Store in a temp dir plus the synchronous half of the pipeline.
pub struct Harness {
    _dir: TempDir,
    pub db: MessageDb,
    pub normalizer: Normalizer,
    pub transformer: Transformer,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db = MessageDb::open(dir.path().join("messages.sqlite3")).unwrap();
        Self {
            _dir: dir,
            normalizer: Normalizer::new(bare(ACCOUNT), Arc::new(lookup())),
            transformer: Transformer::new(db.clone()),
            db,
        }
    }

    pub fn try_apply(&self, event: &InboundEvent) -> Result<bool, TransformError> {
        let t = self.normalizer.normalize(event)?;
        let parts = cleartext_parts(&t);
        let content = (!parts.is_empty()).then_some(ResolvedContent {
            parts,
            encryption: Encryption::Cleartext,
        });
        self.transformer.apply(&t, content)
    }

    pub fn apply(&self, event: &InboundEvent) -> bool {
        let t = self.normalizer.normalize(event).unwrap();
        let parts = cleartext_parts(&t);
        let content = (!parts.is_empty()).then_some(ResolvedContent {
            parts,
            encryption: Encryption::Cleartext,
        });
        self.transformer.transform(&t, content).unwrap()
    }

    pub fn chat_id(&self, address: &str, kind: ChatKind) -> i64 {
        let chat = ChatAddress {
            address: address.to_string(),
            kind,
        };
        self.db.find_chat(&bare(ACCOUNT), &chat).unwrap().unwrap()
    }

    pub fn messages(&self, address: &str, kind: ChatKind) -> Vec<MessageView> {
        self.db.list_messages(self.chat_id(address, kind)).unwrap()
    }

    pub fn rows(&self, address: &str, kind: ChatKind) -> u64 {
        self.db.count_message_rows(self.chat_id(address, kind)).unwrap()
    }

    pub fn version_count(&self) -> i64 {
        let conn = rusqlite::Connection::open(self.db.path()).unwrap();
        conn.query_row("SELECT COUNT(*) FROM message_versions", [], |r| r.get(0))
            .unwrap()
    }
}

pub fn event(
    message_type: MessageType,
    from: &str,
    to: &str,
    id: &str,
    at: i64,
    extensions: Vec<Extension>,
) -> InboundEvent {
    InboundEvent {
        stanza: MessageStanza {
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            id: Some(id.to_string()),
            message_type,
            extensions,
        },
        received_at_ms: at,
        source: EventSource::Live,
    }
}

pub fn chat(from: &str, to: &str, id: &str, at: i64, extensions: Vec<Extension>) -> InboundEvent {
    event(MessageType::Chat, from, to, id, at, extensions)
}

/// Group message from `nick`, carrying an occupant id.
pub fn groupchat(nick: &str, occupant: &str, id: &str, at: i64, mut extensions: Vec<Extension>) -> InboundEvent {
    extensions.push(Extension::OccupantId {
        id: occupant.to_string(),
    });
    event(
        MessageType::Groupchat,
        &format!("{ROOM}/{nick}"),
        ROMEO,
        id,
        at,
        extensions,
    )
}

pub fn body(text: &str) -> Extension {
    Extension::Body {
        text: text.to_string(),
    }
}

pub fn stanza_id(id: &str, by: &str) -> Extension {
    Extension::StanzaId {
        id: id.to_string(),
        by: by.to_string(),
    }
}

pub fn reactions(id: &str, emojis: &[&str]) -> Extension {
    Extension::Reactions {
        id: id.to_string(),
        emojis: emojis.iter().map(|e| e.to_string()).collect(),
    }
}

pub fn correction(id: &str) -> Extension {
    Extension::Correction { id: id.to_string() }
}

pub fn retraction(id: &str) -> Extension {
    Extension::Retraction { id: id.to_string() }
}

pub fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for p in permutations(n - 1) {
        for slot in 0..=p.len() {
            let mut next = p.clone();
            next.insert(slot, n - 1);
            out.push(next);
        }
    }
    out
}
