/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::address::BareJid;
use crate::archive::{load_pages, ArchivePages};
use crate::content::{ContentPart, Encryption};
use crate::normalizer::{ChatAddress, ChatKind};
use crate::versions::Modification;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone)]
pub struct MessageDb {
    path: PathBuf,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatRow {
    pub id: i64,
    pub account: String,
    pub address: String,
    pub kind: ChatKind,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateKind {
    Delivered,
    Displayed,
    Error,
}

impl StateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "DELIVERED",
            Self::Displayed => "DISPLAYED",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "DELIVERED" => Some(Self::Delivered),
            "DISPLAYED" => Some(Self::Displayed),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReactionView {
    pub reaction_by: Option<String>,
    pub occupant_id: Option<String>,
    pub emoji: String,
    pub received_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StateView {
    pub version_id: i64,
    pub from_address: String,
    pub kind: StateKind,
    pub error_condition: Option<String>,
    pub error_text: Option<String>,
}

/// A materialized message with its latest content.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MessageView {
    pub id: i64,
    pub message_id: Option<String>,
    pub stanza_id: Option<String>,
    pub author: Option<String>,
    pub occupant_id: Option<String>,
    pub outgoing: bool,
    pub received_at_ms: Option<i64>,
    pub latest_version_id: i64,
    pub modification: Modification,
    pub encryption: Encryption,
    pub parts: Vec<ContentPart>,
    pub reactions: Vec<ReactionView>,
    pub states: Vec<StateView>,
    pub in_reply_to: Option<i64>,
}

impl MessageView {
    pub fn text(&self) -> Option<&str> {
        self.parts.iter().find_map(|p| match p {
            ContentPart::Text { body } => Some(body.as_str()),
            _ => None,
        })
    }
}

impl MessageDb {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let conn = Connection::open(&path).with_context(|| format!("open db: {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS chats (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              account TEXT NOT NULL,
              address TEXT NOT NULL,
              kind TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              UNIQUE(account, address, kind)
            );

            CREATE TABLE IF NOT EXISTS messages (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              chat_id INTEGER NOT NULL REFERENCES chats(id),
              received_at_ms INTEGER NULL,
              from_address TEXT NULL,
              to_address TEXT NULL,
              outgoing INTEGER NOT NULL DEFAULT 0,
              sender_identity TEXT NULL,
              occupant_id TEXT NULL,
              message_id TEXT NULL,
              stanza_id TEXT NULL,
              latest_version_id INTEGER NULL REFERENCES message_versions(id),
              in_reply_to INTEGER NULL REFERENCES messages(id)
            );
            CREATE INDEX IF NOT EXISTS idx_messages_chat_mid ON messages(chat_id, message_id);
            CREATE INDEX IF NOT EXISTS idx_messages_chat_sid ON messages(chat_id, stanza_id);

            CREATE TABLE IF NOT EXISTS message_versions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              message_row INTEGER NOT NULL REFERENCES messages(id),
              modification TEXT NOT NULL,
              received_at_ms INTEGER NOT NULL,
              message_id TEXT NULL,
              encryption TEXT NOT NULL,
              identity_key TEXT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_versions_row ON message_versions(message_row);
            CREATE INDEX IF NOT EXISTS idx_versions_mid ON message_versions(message_id);

            CREATE TABLE IF NOT EXISTS message_parts (
              version_id INTEGER NOT NULL REFERENCES message_versions(id),
              position INTEGER NOT NULL,
              kind TEXT NOT NULL,
              body TEXT NULL,
              url TEXT NULL,
              PRIMARY KEY(version_id, position)
            );

            CREATE TABLE IF NOT EXISTS reactions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              message_row INTEGER NOT NULL REFERENCES messages(id),
              reactor_key TEXT NOT NULL,
              reaction_by TEXT NULL,
              occupant_id TEXT NULL,
              emoji TEXT NOT NULL,
              received_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_reactions_row ON reactions(message_row, reactor_key);

            -- Last applied reaction set per reactor, kept when the set is empty.
            CREATE TABLE IF NOT EXISTS reaction_slots (
              message_row INTEGER NOT NULL REFERENCES messages(id),
              reactor_key TEXT NOT NULL,
              received_at_ms INTEGER NOT NULL,
              message_id TEXT NULL,
              PRIMARY KEY(message_row, reactor_key)
            );

            CREATE TABLE IF NOT EXISTS message_states (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              version_id INTEGER NOT NULL REFERENCES message_versions(id),
              from_address TEXT NOT NULL,
              kind TEXT NOT NULL,
              error_condition TEXT NULL,
              error_text TEXT NULL,
              received_at_ms INTEGER NOT NULL,
              UNIQUE(version_id, from_address, kind)
            );

            CREATE TABLE IF NOT EXISTS archive_pages (
              account TEXT NOT NULL,
              archive TEXT NOT NULL,
              slot TEXT NOT NULL CHECK (slot IN ('history', 'live')),
              kind TEXT NOT NULL CHECK (kind IN ('START', 'MIDDLE', 'LIVE')),
              start_id TEXT NOT NULL,
              end_id TEXT NOT NULL,
              reached_history_start INTEGER NOT NULL DEFAULT 0,
              PRIMARY KEY(account, archive, slot),
              CHECK ((slot = 'live') = (kind = 'LIVE'))
            );
            "#,
        )?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("open db: {}", self.path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(conn)
    }

    pub fn find_chat(&self, account: &BareJid, chat: &ChatAddress) -> Result<Option<i64>> {
        let conn = self.connect()?;
        find_chat(&conn, account, chat)
    }

    pub fn list_chats(&self, account: &BareJid) -> Result<Vec<ChatRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, account, address, kind, created_at_ms FROM chats WHERE account=?1 ORDER BY id",
        )?;
        let mut rows = stmt.query(params![account.as_str()])?;
        let mut items = Vec::new();
        while let Some(r) = rows.next()? {
            let kind: String = r.get(3)?;
            items.push(ChatRow {
                id: r.get(0)?,
                account: r.get(1)?,
                address: r.get(2)?,
                kind: ChatKind::parse(&kind).with_context(|| format!("unknown chat kind {kind}"))?,
                created_at_ms: r.get(4)?,
            });
        }
        Ok(items)
    }

    /// Number of message rows in a chat, stubs included.
    pub fn count_message_rows(&self, chat_id: i64) -> Result<u64> {
        let conn = self.connect()?;
        let n: u64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id=?1",
            params![chat_id],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    pub fn archive_pages(&self, account: &BareJid, archive: &BareJid) -> Result<ArchivePages> {
        let conn = self.connect()?;
        load_pages(&conn, account, archive)
    }

    /// Materialized messages of a chat in arrival order. Stubs are skipped.
    pub fn list_messages(&self, chat_id: i64) -> Result<Vec<MessageView>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT m.id, m.message_id, m.stanza_id, m.sender_identity, m.occupant_id, m.outgoing,
                   m.received_at_ms, m.latest_version_id, v.modification, v.encryption, v.identity_key,
                   m.in_reply_to
            FROM messages m JOIN message_versions v ON v.id = m.latest_version_id
            WHERE m.chat_id=?1
            ORDER BY m.received_at_ms, m.id
            "#,
        )?;
        let mut rows = stmt.query(params![chat_id])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let latest_version_id: i64 = row.get(7)?;
            let modification: String = row.get(8)?;
            let encryption: String = row.get(9)?;
            let identity_key: Option<String> = row.get(10)?;
            items.push(MessageView {
                id,
                message_id: row.get(1)?,
                stanza_id: row.get(2)?,
                author: row.get(3)?,
                occupant_id: row.get(4)?,
                outgoing: row.get::<_, i64>(5)? != 0,
                received_at_ms: row.get(6)?,
                latest_version_id,
                modification: Modification::parse(&modification)
                    .with_context(|| format!("unknown modification {modification}"))?,
                encryption: decode_encryption(&encryption, identity_key),
                parts: load_parts(&conn, latest_version_id)?,
                reactions: load_reactions(&conn, id)?,
                states: load_states(&conn, id)?,
                in_reply_to: row.get(11)?,
            });
        }
        Ok(items)
    }
}

pub(crate) fn find_chat(conn: &Connection, account: &BareJid, chat: &ChatAddress) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM chats WHERE account=?1 AND address=?2 AND kind=?3",
        params![account.as_str(), chat.address, chat.kind.as_str()],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map_err(Into::into)
}

pub(crate) fn get_or_create_chat(
    conn: &Connection,
    account: &BareJid,
    chat: &ChatAddress,
    now_ms: i64,
) -> Result<i64> {
    if let Some(id) = find_chat(conn, account, chat)? {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO chats (account, address, kind, created_at_ms) VALUES (?1, ?2, ?3, ?4)",
        params![account.as_str(), chat.address, chat.kind.as_str(), now_ms],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn encode_encryption(e: &Encryption) -> (&'static str, Option<&str>) {
    match e {
        Encryption::Cleartext => ("cleartext", None),
        Encryption::EndToEnd { identity_key } => ("e2e", Some(identity_key.as_str())),
        Encryption::DecryptionFailed => ("failed", None),
    }
}

fn decode_encryption(kind: &str, identity_key: Option<String>) -> Encryption {
    match (kind, identity_key) {
        ("e2e", Some(identity_key)) => Encryption::EndToEnd { identity_key },
        ("failed", _) => Encryption::DecryptionFailed,
        _ => Encryption::Cleartext,
    }
}

pub(crate) fn insert_parts(conn: &Connection, version_id: i64, parts: &[ContentPart]) -> Result<()> {
    for (position, part) in parts.iter().enumerate() {
        let (body, url) = match part {
            ContentPart::Text { body } => (Some(body.as_str()), None),
            ContentPart::File { url, description } => (description.as_deref(), Some(url.as_str())),
            ContentPart::DecryptionFailure { cause } => (Some(cause.as_str()), None),
            ContentPart::Retraction | ContentPart::NotForThisDevice => (None, None),
        };
        conn.execute(
            "INSERT INTO message_parts (version_id, position, kind, body, url) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![version_id, position as i64, part.kind_str(), body, url],
        )?;
    }
    Ok(())
}

fn load_parts(conn: &Connection, version_id: i64) -> Result<Vec<ContentPart>> {
    let mut stmt = conn.prepare(
        "SELECT kind, body, url FROM message_parts WHERE version_id=?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![version_id], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, Option<String>>(1)?,
            r.get::<_, Option<String>>(2)?,
        ))
    })?;
    let mut parts = Vec::new();
    for row in rows {
        let (kind, body, url) = row?;
        let part = match kind.as_str() {
            "text" => ContentPart::Text {
                body: body.unwrap_or_default(),
            },
            "file" => ContentPart::File {
                url: url.unwrap_or_default(),
                description: body,
            },
            "retraction" => ContentPart::Retraction,
            "not_for_this_device" => ContentPart::NotForThisDevice,
            "decryption_failure" => ContentPart::DecryptionFailure {
                cause: body.unwrap_or_default(),
            },
            other => anyhow::bail!("unknown content part kind {other}"),
        };
        parts.push(part);
    }
    Ok(parts)
}

fn load_reactions(conn: &Connection, message_row: i64) -> Result<Vec<ReactionView>> {
    let mut stmt = conn.prepare(
        "SELECT reaction_by, occupant_id, emoji, received_at_ms FROM reactions WHERE message_row=?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![message_row], |r| {
        Ok(ReactionView {
            reaction_by: r.get(0)?,
            occupant_id: r.get(1)?,
            emoji: r.get(2)?,
            received_at_ms: r.get(3)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

fn load_states(conn: &Connection, message_row: i64) -> Result<Vec<StateView>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT s.version_id, s.from_address, s.kind, s.error_condition, s.error_text
        FROM message_states s JOIN message_versions v ON v.id = s.version_id
        WHERE v.message_row=?1
        ORDER BY s.id
        "#,
    )?;
    let mut rows = stmt.query(params![message_row])?;
    let mut items = Vec::new();
    while let Some(r) = rows.next()? {
        let kind: String = r.get(2)?;
        items.push(StateView {
            version_id: r.get(0)?,
            from_address: r.get(1)?,
            kind: StateKind::parse(&kind).with_context(|| format!("unknown state {kind}"))?,
            error_condition: r.get(3)?,
            error_text: r.get(4)?,
        });
    }
    Ok(items)
}

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn list_chats_rejects_corrupt_kind() {
        let dir = TempDir::new().unwrap();
        let db = MessageDb::open(dir.path().join("messages.sqlite3")).unwrap();
        let account = BareJid::parse("romeo@example.com").unwrap();
        let conn = db.connect().unwrap();
        conn.execute(
            "INSERT INTO chats (account, address, kind, created_at_ms) VALUES (?1, 'juliet@example.com', 'individual', 0)",
            params![account.as_str()],
        )
        .unwrap();
        assert_eq!(db.list_chats(&account).unwrap()[0].kind, ChatKind::Individual);

        conn.execute("UPDATE chats SET kind='broadcast'", []).unwrap();
        let err = db.list_chats(&account).unwrap_err();
        assert!(err.to_string().contains("unknown chat kind broadcast"));
    }
}
