/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

/// Who a reaction slot belongs to. In rooms with occupant ids the slot is
/// keyed by occupant id, otherwise by the reacting address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reactor {
    Occupant(String),
    Address(String),
}

impl Reactor {
    pub fn new(reaction_by: Option<&str>, occupant_id: Option<&str>) -> Option<Self> {
        match (occupant_id, reaction_by) {
            (Some(occ), _) => Some(Self::Occupant(occ.to_string())),
            (None, Some(by)) => Some(Self::Address(by.to_string())),
            (None, None) => None,
        }
    }

    fn key(&self) -> String {
        match self {
            Self::Occupant(id) => format!("occ:{id}"),
            Self::Address(addr) => format!("addr:{addr}"),
        }
    }
}

/// Orders reaction sets of one reactor: newer `received_at` wins and the
/// reaction's message id breaks ties.
type SlotMark = (i64, Option<String>);

fn load_mark(conn: &Connection, message_row: i64, key: &str) -> Result<Option<SlotMark>> {
    conn.query_row(
        "SELECT received_at_ms, message_id FROM reaction_slots WHERE message_row=?1 AND reactor_key=?2",
        params![message_row, key],
        |r| Ok((r.get::<_, i64>(0)?, r.get::<_, Option<String>>(1)?)),
    )
    .optional()
    .map_err(Into::into)
}

fn load_marks(conn: &Connection, message_row: i64) -> Result<HashMap<String, SlotMark>> {
    let mut stmt = conn.prepare(
        "SELECT reactor_key, received_at_ms, message_id FROM reaction_slots WHERE message_row=?1",
    )?;
    let rows = stmt.query_map(params![message_row], |r| {
        let mark: SlotMark = (r.get(1)?, r.get(2)?);
        Ok((r.get::<_, String>(0)?, mark))
    })?;
    rows.collect::<rusqlite::Result<HashMap<_, _>>>().map_err(Into::into)
}

fn drop_slot(conn: &Connection, message_row: i64, key: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM reactions WHERE message_row=?1 AND reactor_key=?2",
        params![message_row, key],
    )?;
    conn.execute(
        "DELETE FROM reaction_slots WHERE message_row=?1 AND reactor_key=?2",
        params![message_row, key],
    )?;
    Ok(())
}

/// Replaces the reactor's emoji set on a message. Returns `false` when the
/// slot already holds a newer set, including a newer empty one.
pub(crate) fn replace_reactions(
    conn: &Connection,
    message_row: i64,
    reaction_by: Option<&str>,
    occupant_id: Option<&str>,
    emojis: &[String],
    received_at_ms: i64,
    message_id: Option<&str>,
) -> Result<bool> {
    let Some(reactor) = Reactor::new(reaction_by, occupant_id) else {
        return Ok(false);
    };
    let key = reactor.key();
    let mark: SlotMark = (received_at_ms, message_id.map(str::to_string));
    if load_mark(conn, message_row, &key)?.is_some_and(|stored| stored > mark) {
        return Ok(false);
    }
    drop_slot(conn, message_row, &key)?;
    conn.execute(
        "INSERT INTO reaction_slots (message_row, reactor_key, received_at_ms, message_id) VALUES (?1, ?2, ?3, ?4)",
        params![message_row, key, received_at_ms, message_id],
    )?;
    let mut seen = Vec::new();
    for emoji in emojis {
        let emoji = emoji.trim();
        if emoji.is_empty() || seen.contains(&emoji) {
            continue;
        }
        seen.push(emoji);
        conn.execute(
            "INSERT INTO reactions (message_row, reactor_key, reaction_by, occupant_id, emoji, received_at_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![message_row, key, reaction_by, occupant_id, emoji, received_at_ms],
        )?;
    }
    Ok(true)
}

/// Moves reaction slots of `from` onto `into`; where both rows hold a slot
/// for the same reactor the newer one survives, cleared slots included.
pub(crate) fn merge_reactions(conn: &Connection, from: i64, into: i64) -> Result<()> {
    let kept = load_marks(conn, into)?;
    for (key, mark) in load_marks(conn, from)? {
        match kept.get(&key) {
            Some(existing) if *existing >= mark => drop_slot(conn, from, &key)?,
            Some(_) => drop_slot(conn, into, &key)?,
            None => {}
        }
    }
    conn.execute(
        "UPDATE reactions SET message_row=?2 WHERE message_row=?1",
        params![from, into],
    )?;
    conn.execute(
        "UPDATE reaction_slots SET message_row=?2 WHERE message_row=?1",
        params![from, into],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_db::MessageDb;
    use tempfile::TempDir;

    fn store() -> (TempDir, Connection, i64, i64) {
        let dir = TempDir::new().unwrap();
        let db = MessageDb::open(dir.path().join("messages.sqlite3")).unwrap();
        let conn = db.connect().unwrap();
        conn.execute(
            "INSERT INTO chats (account, address, kind, created_at_ms) VALUES ('a', 'b', 'individual', 0)",
            [],
        )
        .unwrap();
        let chat = conn.last_insert_rowid();
        conn.execute("INSERT INTO messages (chat_id) VALUES (?1)", params![chat]).unwrap();
        let a = conn.last_insert_rowid();
        conn.execute("INSERT INTO messages (chat_id) VALUES (?1)", params![chat]).unwrap();
        let b = conn.last_insert_rowid();
        (dir, conn, a, b)
    }

    fn emojis(conn: &Connection, message_row: i64) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT emoji FROM reactions WHERE message_row=?1 ORDER BY id")
            .unwrap();
        let rows = stmt
            .query_map(params![message_row], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        rows
    }

    #[test]
    fn merge_keeps_newer_cleared_slot() {
        for clear_on_survivor in [true, false] {
            let (_dir, conn, a, b) = store();
            let (set_row, clear_row) = if clear_on_survivor { (a, b) } else { (b, a) };
            let y = vec!["Y".to_string()];
            assert!(replace_reactions(&conn, set_row, Some("romeo@example.com"), None, &y, 2000, Some("r1")).unwrap());
            assert!(replace_reactions(&conn, clear_row, Some("romeo@example.com"), None, &[], 3000, Some("r2")).unwrap());

            merge_reactions(&conn, a, b).unwrap();
            assert!(emojis(&conn, a).is_empty());
            assert!(emojis(&conn, b).is_empty());
            // The clear's mark moved along and still rejects the older set.
            assert!(!replace_reactions(&conn, b, Some("romeo@example.com"), None, &y, 2000, Some("r1")).unwrap());
        }
    }

    #[test]
    fn merge_keeps_newer_set_over_older_clear() {
        let (_dir, conn, a, b) = store();
        let n = vec!["N".to_string()];
        replace_reactions(&conn, a, None, Some("occ-1"), &n, 3000, Some("r2")).unwrap();
        replace_reactions(&conn, b, None, Some("occ-1"), &[], 2000, Some("r1")).unwrap();
        merge_reactions(&conn, a, b).unwrap();
        assert_eq!(emojis(&conn, b), vec!["N".to_string()]);
    }

    #[test]
    fn equal_timestamps_fall_back_to_message_id() {
        let (_dir, conn, a, _) = store();
        let y = vec!["Y".to_string()];
        let n = vec!["N".to_string()];
        assert!(replace_reactions(&conn, a, Some("romeo@example.com"), None, &n, 2000, Some("r2")).unwrap());
        assert!(!replace_reactions(&conn, a, Some("romeo@example.com"), None, &y, 2000, Some("r1")).unwrap());
        assert_eq!(emojis(&conn, a), vec!["N".to_string()]);
    }

    #[test]
    fn occupant_id_takes_precedence() {
        assert_eq!(
            Reactor::new(Some("juliet@example.com"), Some("occ-1")),
            Some(Reactor::Occupant("occ-1".into()))
        );
        assert_eq!(
            Reactor::new(Some("juliet@example.com"), None),
            Some(Reactor::Address("juliet@example.com".into()))
        );
        assert_eq!(Reactor::new(None, None), None);
    }

    #[test]
    fn slot_keys_do_not_collide_across_kinds() {
        assert_ne!(
            Reactor::Occupant("juliet".into()).key(),
            Reactor::Address("juliet".into()).key()
        );
    }
}
