/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Applies one normalized event to the store.
//!
//! Everything from chat creation to the latest-version pointer happens in a
//! single transaction. A failed event rolls back completely and never affects
//! the next one.

use crate::archive::set_live_page_stanza_id_in;
use crate::content::ResolvedContent;
use crate::error::TransformError;
use crate::identity::{get_or_create_stub, reference_query, resolve_original, Reference};
use crate::message_db::{get_or_create_chat, now_ms, MessageDb, StateKind};
use crate::normalizer::Transformation;
use crate::reactions::replace_reactions;
use crate::versions::{has_version, insert_version, recompute_latest, Modification};
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use stanzasync_protocol::MessageType;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Transformer {
    db: MessageDb,
}

impl Transformer {
    pub fn new(db: MessageDb) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &MessageDb {
        &self.db
    }

    /// Returns `true` when the event produced or changed a user-visible
    /// message. Duplicates and malformed events are logged and dropped;
    /// only storage failures surface as errors.
    pub fn transform(&self, t: &Transformation, content: Option<ResolvedContent>) -> Result<bool> {
        match self.apply(t, content) {
            Ok(visible) => Ok(visible),
            Err(TransformError::DuplicateMessageIdentity { chat, key }) => {
                warn!(chat, %key, remote=%t.remote, "dropping duplicate message");
                self.advance_live_edge(t)?;
                Ok(false)
            }
            Err(TransformError::ProtocolShape(reason)) => {
                debug!(remote=%t.remote, id=?t.message_id, %reason, "dropping malformed event");
                self.advance_live_edge(t)?;
                Ok(false)
            }
            Err(TransformError::Storage(e)) => Err(e),
        }
    }

    /// A dropped live event was still seen by the archive, so its stanza id
    /// moves the live edge in a transaction of its own.
    fn advance_live_edge(&self, t: &Transformation) -> Result<()> {
        let Some(sid) = t.verified_stanza_id().filter(|_| t.is_live()) else {
            return Ok(());
        };
        let mut conn = self.db.connect()?;
        let tx = conn.transaction()?;
        set_live_page_stanza_id_in(&tx, &t.account, &t.archive, sid)?;
        tx.commit()?;
        Ok(())
    }

    /// Like [`Transformer::transform`] but hands back every failure.
    pub fn apply(
        &self,
        t: &Transformation,
        content: Option<ResolvedContent>,
    ) -> Result<bool, TransformError> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction()?;
        let visible = apply_in(&tx, t, content)?;
        tx.commit()?;
        Ok(visible)
    }
}

fn apply_in(
    conn: &Connection,
    t: &Transformation,
    content: Option<ResolvedContent>,
) -> Result<bool, TransformError> {
    let chat_id = get_or_create_chat(conn, &t.account, &t.chat, now_ms())?;

    if t.message_type == MessageType::Error {
        apply_error(conn, chat_id, t)?;
        return Ok(false);
    }

    if t.is_live() {
        if let Some(sid) = t.verified_stanza_id() {
            set_live_page_stanza_id_in(conn, &t.account, &t.archive, sid)?;
        }
    }

    if let Some(id) = t.receipt() {
        apply_state(conn, chat_id, t, id, StateKind::Delivered, None)?;
    }
    if let Some(id) = t.displayed() {
        apply_state(conn, chat_id, t, id, StateKind::Displayed, None)?;
    }

    if let Some(target) = t.retraction() {
        return apply_retraction(conn, chat_id, t, target);
    }
    if let Some(target) = t.correction() {
        let Some(content) = content else {
            return Err(TransformError::ProtocolShape(format!(
                "correction of {target} carries no content"
            )));
        };
        return apply_correction(conn, chat_id, t, target, &content);
    }
    if let Some((target, emojis)) = t.reactions() {
        return apply_reactions(conn, chat_id, t, target, emojis);
    }
    match content {
        Some(content) => apply_original(conn, chat_id, t, &content),
        None => Ok(false),
    }
}

fn apply_original(
    conn: &Connection,
    chat_id: i64,
    t: &Transformation,
    content: &ResolvedContent,
) -> Result<bool, TransformError> {
    let row = resolve_original(conn, chat_id, t)?;
    insert_version(
        conn,
        row,
        Modification::Original,
        t.received_at_ms,
        t.message_id.as_deref(),
        content,
    )?;
    recompute_latest(conn, row)?;

    if let Some((target, _)) = t.reply() {
        let q = reference_query(t, Reference::Reply, target);
        let parent = get_or_create_stub(conn, chat_id, &q)?;
        if parent.id != row {
            conn.execute(
                "UPDATE messages SET in_reply_to=?2 WHERE id=?1",
                params![row, parent.id],
            )?;
        }
    }
    debug!(chat = chat_id, row, id=?t.message_id, "stored message");
    Ok(true)
}

fn apply_correction(
    conn: &Connection,
    chat_id: i64,
    t: &Transformation,
    target: &str,
    content: &ResolvedContent,
) -> Result<bool, TransformError> {
    if t.message_id.as_deref() == Some(target) {
        return Err(TransformError::ProtocolShape(format!(
            "message {target} corrects itself"
        )));
    }
    let q = reference_query(t, Reference::Correction, target);
    let row = get_or_create_stub(conn, chat_id, &q)?;
    insert_modification(conn, chat_id, t, row.id, Modification::Correction, content)?;
    if !row.is_stub() {
        recompute_latest(conn, row.id)?;
    }
    debug!(chat = chat_id, row = row.id, target_id = target, stub = row.is_stub(), "stored correction");
    Ok(true)
}

fn apply_retraction(
    conn: &Connection,
    chat_id: i64,
    t: &Transformation,
    target: &str,
) -> Result<bool, TransformError> {
    let q = reference_query(t, Reference::Retraction, target);
    let row = get_or_create_stub(conn, chat_id, &q)?;
    insert_modification(
        conn,
        chat_id,
        t,
        row.id,
        Modification::Retraction,
        &ResolvedContent::retraction(),
    )?;
    if !row.is_stub() {
        recompute_latest(conn, row.id)?;
    }
    info!(chat = chat_id, row = row.id, target_id = target, "message retracted");
    Ok(true)
}

fn insert_modification(
    conn: &Connection,
    chat_id: i64,
    t: &Transformation,
    row: i64,
    modification: Modification,
    content: &ResolvedContent,
) -> Result<(), TransformError> {
    if let Some(mid) = t.message_id.as_deref() {
        if has_version(conn, row, modification, mid)? {
            return Err(TransformError::DuplicateMessageIdentity {
                chat: chat_id,
                key: format!("{} {mid}", modification.as_str()),
            });
        }
    }
    insert_version(
        conn,
        row,
        modification,
        t.received_at_ms,
        t.message_id.as_deref(),
        content,
    )?;
    Ok(())
}

fn apply_reactions(
    conn: &Connection,
    chat_id: i64,
    t: &Transformation,
    target: &str,
    emojis: &[String],
) -> Result<bool, TransformError> {
    let q = reference_query(t, Reference::Reaction, target);
    let row = get_or_create_stub(conn, chat_id, &q)?;
    let by = t
        .sender_identity
        .as_ref()
        .map(|b| b.to_string())
        .or_else(|| t.from.as_ref().map(|j| j.to_string()));
    let applied = replace_reactions(
        conn,
        row.id,
        by.as_deref(),
        t.occupant_id.as_deref(),
        emojis,
        t.received_at_ms,
        t.message_id.as_deref(),
    )?;
    if !applied {
        debug!(chat = chat_id, row = row.id, target_id = target, "ignoring stale reactions");
    }
    Ok(applied)
}

/// Newest version of an own message carrying `message_id`.
fn find_outgoing_version(conn: &Connection, chat_id: i64, message_id: &str) -> Result<Option<i64>> {
    conn.query_row(
        r#"
        SELECT v.id FROM message_versions v JOIN messages m ON v.message_row = m.id
        WHERE m.chat_id=?1 AND m.outgoing=1 AND v.message_id=?2
        ORDER BY v.id DESC LIMIT 1
        "#,
        params![chat_id, message_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map_err(Into::into)
}

fn apply_state(
    conn: &Connection,
    chat_id: i64,
    t: &Transformation,
    message_id: &str,
    kind: StateKind,
    error: Option<(&str, Option<&str>)>,
) -> Result<(), TransformError> {
    // Markers we send ourselves say nothing about our messages.
    if t.outgoing {
        return Ok(());
    }
    let Some(version_id) = find_outgoing_version(conn, chat_id, message_id)? else {
        debug!(chat = chat_id, message_id, kind = kind.as_str(), "state for unknown message");
        return Ok(());
    };
    conn.execute(
        r#"
        INSERT OR IGNORE INTO message_states (version_id, from_address, kind, error_condition, error_text, received_at_ms)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            version_id,
            t.remote.to_string(),
            kind.as_str(),
            error.map(|(c, _)| c),
            error.and_then(|(_, text)| text),
            t.received_at_ms
        ],
    )?;
    Ok(())
}

fn apply_error(conn: &Connection, chat_id: i64, t: &Transformation) -> Result<(), TransformError> {
    let Some(message_id) = t.message_id.as_deref() else {
        return Err(TransformError::ProtocolShape("error without message id".to_string()));
    };
    let error = t.error().unwrap_or(("undefined-condition", None));
    apply_state(conn, chat_id, t, message_id, StateKind::Error, Some(error))
}
