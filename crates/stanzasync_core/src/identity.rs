/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Maps events onto logical message rows.
//!
//! Lookups are expressed as an [`IdentityQuery`] (a partial key plus lenient
//! author/occupant filters) and matched in Rust against candidate rows, so the
//! rules can be tested without a database. SQL only narrows candidates down by
//! chat and id.

use crate::address::BareJid;
use crate::error::TransformError;
use crate::normalizer::{ChatKind, Transformation};
use crate::reactions::merge_reactions;
use anyhow::Result;
use rusqlite::{params, Connection};
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRow {
    pub id: i64,
    pub author: Option<String>,
    pub occupant_id: Option<String>,
    pub message_id: Option<String>,
    pub stanza_id: Option<String>,
    pub latest_version_id: Option<i64>,
}

impl IdentityRow {
    pub fn is_stub(&self) -> bool {
        self.latest_version_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityKey {
    ByStanzaId(String),
    ByMessageId(String),
    /// Arrival of original content. A verified stanza id takes precedence;
    /// rows that never learned a stanza id still match on message id.
    Original {
        stanza_id: Option<String>,
        message_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityQuery {
    pub author: Option<String>,
    pub occupant_id: Option<String>,
    pub key: IdentityKey,
}

/// A value missing on either side does not exclude the row.
fn lenient(filter: Option<&str>, value: Option<&str>) -> bool {
    match (filter, value) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

impl IdentityQuery {
    pub fn matches(&self, row: &IdentityRow) -> bool {
        if !lenient(self.author.as_deref(), row.author.as_deref())
            || !lenient(self.occupant_id.as_deref(), row.occupant_id.as_deref())
        {
            return false;
        }
        match &self.key {
            IdentityKey::ByStanzaId(sid) => row.stanza_id.as_deref() == Some(sid.as_str()),
            IdentityKey::ByMessageId(mid) => row.message_id.as_deref() == Some(mid.as_str()),
            IdentityKey::Original {
                stanza_id: Some(sid),
                message_id,
            } => {
                row.stanza_id.as_deref() == Some(sid.as_str())
                    || (row.stanza_id.is_none()
                        && message_id.is_some()
                        && row.message_id == *message_id)
            }
            IdentityKey::Original {
                stanza_id: None,
                message_id: Some(mid),
            } => row.message_id.as_deref() == Some(mid.as_str()),
            IdentityKey::Original {
                stanza_id: None,
                message_id: None,
            } => false,
        }
    }

    fn lookup_ids(&self) -> (Option<&str>, Option<&str>) {
        match &self.key {
            IdentityKey::ByStanzaId(sid) => (Some(sid), None),
            IdentityKey::ByMessageId(mid) => (None, Some(mid)),
            IdentityKey::Original {
                stanza_id,
                message_id,
            } => (stanza_id.as_deref(), message_id.as_deref()),
        }
    }

    fn describe(&self) -> String {
        match &self.key {
            IdentityKey::ByStanzaId(sid) => format!("stanza-id {sid}"),
            IdentityKey::ByMessageId(mid) => format!("message-id {mid}"),
            IdentityKey::Original {
                stanza_id,
                message_id,
            } => format!("stanza-id {stanza_id:?} / message-id {message_id:?}"),
        }
    }
}

/// What a modification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    Correction,
    Retraction,
    Reaction,
    Reply,
}

fn author_of(t: &Transformation) -> Option<String> {
    t.sender_identity.as_ref().map(|a| a.to_string())
}

/// Lookup key for the target of a modification, reaction or reply.
///
/// Group chats address reactions, retractions and replies by stanza id and
/// corrections by message id. Elsewhere everything is addressed by message id;
/// corrections and retractions are scoped to their own author.
pub fn reference_query(t: &Transformation, reference: Reference, target: &str) -> IdentityQuery {
    let own_author = || IdentityQuery {
        author: author_of(t),
        occupant_id: t.occupant_id.clone(),
        key: IdentityKey::ByMessageId(target.to_string()),
    };
    if t.chat.kind == ChatKind::Group {
        return match reference {
            Reference::Correction => own_author(),
            Reference::Retraction => IdentityQuery {
                author: author_of(t),
                occupant_id: t.occupant_id.clone(),
                key: IdentityKey::ByStanzaId(target.to_string()),
            },
            Reference::Reaction | Reference::Reply => IdentityQuery {
                author: None,
                occupant_id: None,
                key: IdentityKey::ByStanzaId(target.to_string()),
            },
        };
    }
    match reference {
        Reference::Correction | Reference::Retraction => own_author(),
        Reference::Reaction => IdentityQuery {
            author: None,
            occupant_id: None,
            key: IdentityKey::ByMessageId(target.to_string()),
        },
        Reference::Reply => IdentityQuery {
            author: t
                .reply()
                .and_then(|(_, to)| to)
                .and_then(|to| BareJid::parse(to).ok())
                .map(|b| b.to_string()),
            occupant_id: None,
            key: IdentityKey::ByMessageId(target.to_string()),
        },
    }
}

pub fn original_query(t: &Transformation) -> IdentityQuery {
    IdentityQuery {
        author: author_of(t),
        occupant_id: t.occupant_id.clone(),
        key: IdentityKey::Original {
            stanza_id: t.verified_stanza_id().map(str::to_string),
            message_id: t.message_id.clone(),
        },
    }
}

fn candidates(conn: &Connection, chat_id: i64, q: &IdentityQuery) -> Result<Vec<IdentityRow>> {
    let (sid, mid) = q.lookup_ids();
    if sid.is_none() && mid.is_none() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        r#"
        SELECT id, sender_identity, occupant_id, message_id, stanza_id, latest_version_id
        FROM messages
        WHERE chat_id=?1 AND ((?2 IS NOT NULL AND stanza_id=?2) OR (?3 IS NOT NULL AND message_id=?3))
        ORDER BY id
        "#,
    )?;
    let rows = stmt.query_map(params![chat_id, sid, mid], |r| {
        Ok(IdentityRow {
            id: r.get(0)?,
            author: r.get(1)?,
            occupant_id: r.get(2)?,
            message_id: r.get(3)?,
            stanza_id: r.get(4)?,
            latest_version_id: r.get(5)?,
        })
    })?;
    let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows.into_iter().filter(|r| q.matches(r)).collect())
}

/// Finds the row a modification targets, creating a stub when the target has
/// not arrived yet. Materialized rows are preferred over stubs.
pub(crate) fn get_or_create_stub(
    conn: &Connection,
    chat_id: i64,
    q: &IdentityQuery,
) -> Result<IdentityRow> {
    let found = candidates(conn, chat_id, q)?;
    let best = found
        .iter()
        .rev()
        .find(|r| !r.is_stub())
        .or_else(|| found.last())
        .cloned();
    if let Some(mut row) = best {
        if row.is_stub()
            && ((row.author.is_none() && q.author.is_some())
                || (row.occupant_id.is_none() && q.occupant_id.is_some()))
        {
            conn.execute(
                "UPDATE messages SET sender_identity=COALESCE(sender_identity, ?2), occupant_id=COALESCE(occupant_id, ?3) WHERE id=?1",
                params![row.id, q.author, q.occupant_id],
            )?;
            row.author = row.author.or_else(|| q.author.clone());
            row.occupant_id = row.occupant_id.or_else(|| q.occupant_id.clone());
        }
        return Ok(row);
    }

    let (stanza_id, message_id) = match &q.key {
        IdentityKey::ByStanzaId(sid) => (Some(sid.clone()), None),
        IdentityKey::ByMessageId(mid) => (None, Some(mid.clone())),
        IdentityKey::Original {
            stanza_id,
            message_id,
        } => (stanza_id.clone(), message_id.clone()),
    };
    conn.execute(
        "INSERT INTO messages (chat_id, sender_identity, occupant_id, message_id, stanza_id) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![chat_id, q.author, q.occupant_id, message_id, stanza_id],
    )?;
    let id = conn.last_insert_rowid();
    debug!(chat = chat_id, row = id, key = %q.describe(), "created stub");
    Ok(IdentityRow {
        id,
        author: q.author.clone(),
        occupant_id: q.occupant_id.clone(),
        message_id,
        stanza_id,
        latest_version_id: None,
    })
}

fn conflicts(a: &IdentityRow, b: &IdentityRow) -> bool {
    let differ = |x: &Option<String>, y: &Option<String>| matches!((x, y), (Some(x), Some(y)) if x != y);
    differ(&a.author, &b.author) || differ(&a.occupant_id, &b.occupant_id)
}

/// Resolves the row that original content lands on: a fresh row, or the stub
/// that was waiting for it. Other stubs for the same logical message are merged
/// into the surviving row. Any materialized match is a duplicate delivery.
pub(crate) fn resolve_original(
    conn: &Connection,
    chat_id: i64,
    t: &Transformation,
) -> Result<i64, TransformError> {
    let q = original_query(t);
    let found = candidates(conn, chat_id, &q)?;
    if found.iter().any(|r| !r.is_stub()) {
        return Err(TransformError::DuplicateMessageIdentity {
            chat: chat_id,
            key: q.describe(),
        });
    }

    // The stub keyed by the verified stanza id survives, else the newest one.
    let verified = t.verified_stanza_id();
    let survivor = found
        .iter()
        .rev()
        .find(|r| verified.is_some() && r.stanza_id.as_deref() == verified)
        .or_else(|| found.last());
    let row_id = match survivor {
        None => {
            conn.execute(
                "INSERT INTO messages (chat_id) VALUES (?1)",
                params![chat_id],
            )?;
            conn.last_insert_rowid()
        }
        Some(survivor) => {
            for stub in found.iter().filter(|r| r.id != survivor.id) {
                if conflicts(stub, survivor) {
                    error!(
                        chat = chat_id,
                        kept = stub.id,
                        upgraded = survivor.id,
                        "stub merge conflict: author or occupant differ, not merging"
                    );
                    continue;
                }
                merge_stub(conn, stub, survivor.id)?;
            }
            survivor.id
        }
    };

    conn.execute(
        r#"
        UPDATE messages SET
          received_at_ms=?2,
          from_address=?3,
          to_address=?4,
          outgoing=?5,
          sender_identity=COALESCE(?6, sender_identity),
          occupant_id=COALESCE(?7, occupant_id),
          message_id=COALESCE(?8, message_id),
          stanza_id=COALESCE(?9, stanza_id)
        WHERE id=?1
        "#,
        params![
            row_id,
            t.received_at_ms,
            t.from.as_ref().map(|j| j.to_string()),
            t.to.as_ref().map(|j| j.to_string()),
            if t.outgoing { 1 } else { 0 },
            author_of(t),
            t.occupant_id,
            t.message_id,
            t.verified_stanza_id(),
        ],
    )?;
    Ok(row_id)
}

/// Re-parents everything hanging off `stub` onto `into` and drops the stub.
fn merge_stub(conn: &Connection, stub: &IdentityRow, into: i64) -> Result<()> {
    debug!(from = stub.id, into, "merging stub");
    conn.execute(
        "UPDATE message_versions SET message_row=?2 WHERE message_row=?1",
        params![stub.id, into],
    )?;
    merge_reactions(conn, stub.id, into)?;
    conn.execute(
        "UPDATE messages SET in_reply_to=?2 WHERE in_reply_to=?1",
        params![stub.id, into],
    )?;
    conn.execute(
        r#"
        UPDATE messages SET
          sender_identity=COALESCE(sender_identity, ?2),
          occupant_id=COALESCE(occupant_id, ?3),
          message_id=COALESCE(message_id, ?4),
          stanza_id=COALESCE(stanza_id, ?5)
        WHERE id=?1
        "#,
        params![into, stub.author, stub.occupant_id, stub.message_id, stub.stanza_id],
    )?;
    conn.execute("DELETE FROM messages WHERE id=?1", params![stub.id])?;
    Ok(())
}
