/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::content::ResolvedContent;
use crate::message_db::{encode_encryption, insert_parts};
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modification {
    Original,
    Correction,
    Retraction,
}

impl Modification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "ORIGINAL",
            Self::Correction => "CORRECTION",
            Self::Retraction => "RETRACTION",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "ORIGINAL" => Some(Self::Original),
            "CORRECTION" => Some(Self::Correction),
            "RETRACTION" => Some(Self::Retraction),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRow {
    pub id: i64,
    pub modification: Modification,
    pub received_at_ms: i64,
    pub message_id: Option<String>,
}

/// Chooses the version the message should display.
///
/// Any modification outranks the original; among modifications the newest
/// `received_at_ms` wins. Remaining ties fall back to retraction first, then
/// the modifying message id and finally the row id, so the outcome does not
/// depend on the order versions were inserted in.
pub fn pick_latest(versions: &[VersionRow]) -> Option<&VersionRow> {
    versions.iter().min_by(|a, b| rank(a, b))
}

fn rank(a: &VersionRow, b: &VersionRow) -> Ordering {
    let is_original = |v: &VersionRow| v.modification == Modification::Original;
    let is_correction = |v: &VersionRow| v.modification == Modification::Correction;
    is_original(a)
        .cmp(&is_original(b))
        .then_with(|| b.received_at_ms.cmp(&a.received_at_ms))
        .then_with(|| is_correction(a).cmp(&is_correction(b)))
        .then_with(|| a.message_id.cmp(&b.message_id))
        .then_with(|| a.id.cmp(&b.id))
}

pub(crate) fn insert_version(
    conn: &Connection,
    message_row: i64,
    modification: Modification,
    received_at_ms: i64,
    message_id: Option<&str>,
    content: &ResolvedContent,
) -> Result<i64> {
    let (encryption, identity_key) = encode_encryption(&content.encryption);
    conn.execute(
        r#"
        INSERT INTO message_versions (message_row, modification, received_at_ms, message_id, encryption, identity_key)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            message_row,
            modification.as_str(),
            received_at_ms,
            message_id,
            encryption,
            identity_key
        ],
    )?;
    let version_id = conn.last_insert_rowid();
    insert_parts(conn, version_id, &content.parts)?;
    Ok(version_id)
}

pub(crate) fn has_version(
    conn: &Connection,
    message_row: i64,
    modification: Modification,
    message_id: &str,
) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM message_versions WHERE message_row=?1 AND modification=?2 AND message_id=?3",
            params![message_row, modification.as_str(), message_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn load_versions(conn: &Connection, message_row: i64) -> Result<Vec<VersionRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, modification, received_at_ms, message_id FROM message_versions WHERE message_row=?1",
    )?;
    let mut rows = stmt.query(params![message_row])?;
    let mut out = Vec::new();
    while let Some(r) = rows.next()? {
        let modification: String = r.get(1)?;
        let Some(modification) = Modification::parse(&modification) else {
            anyhow::bail!("unknown modification {modification}");
        };
        out.push(VersionRow {
            id: r.get(0)?,
            modification,
            received_at_ms: r.get(2)?,
            message_id: r.get(3)?,
        });
    }
    Ok(out)
}

/// Points `latest_version_id` at [`pick_latest`] over all stored versions.
pub(crate) fn recompute_latest(conn: &Connection, message_row: i64) -> Result<Option<i64>> {
    let versions = load_versions(conn, message_row)?;
    let latest = pick_latest(&versions).map(|v| v.id);
    conn.execute(
        "UPDATE messages SET latest_version_id=?2 WHERE id=?1",
        params![message_row, latest],
    )?;
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(id: i64, modification: Modification, at: i64, mid: &str) -> VersionRow {
        VersionRow {
            id,
            modification,
            received_at_ms: at,
            message_id: Some(mid.to_string()),
        }
    }

    #[test]
    fn original_alone_wins() {
        let versions = [v(1, Modification::Original, 1000, "m1")];
        assert_eq!(pick_latest(&versions).unwrap().id, 1);
        assert!(pick_latest(&[]).is_none());
    }

    #[test]
    fn newest_correction_wins_regardless_of_insert_order() {
        let a = v(1, Modification::Original, 1000, "m1");
        let b = v(2, Modification::Correction, 2000, "c1");
        let c = v(3, Modification::Correction, 3000, "c2");
        for order in [
            vec![a.clone(), b.clone(), c.clone()],
            vec![c.clone(), a.clone(), b.clone()],
            vec![b.clone(), c.clone(), a.clone()],
        ] {
            assert_eq!(pick_latest(&order).unwrap().message_id.as_deref(), Some("c2"));
        }
    }

    #[test]
    fn original_never_outranks_a_correction() {
        // Original carries a later timestamp (e.g. archive delay) but still loses.
        let versions = [
            v(1, Modification::Correction, 2000, "c1"),
            v(2, Modification::Original, 5000, "m1"),
        ];
        assert_eq!(pick_latest(&versions).unwrap().id, 1);
    }

    #[test]
    fn retraction_wins_tie_and_competes_on_time() {
        let tie = [
            v(1, Modification::Correction, 3000, "c1"),
            v(2, Modification::Retraction, 3000, "r1"),
        ];
        assert_eq!(pick_latest(&tie).unwrap().modification, Modification::Retraction);

        let later_correction = [
            v(1, Modification::Retraction, 2000, "r1"),
            v(2, Modification::Correction, 3000, "c1"),
        ];
        assert_eq!(
            pick_latest(&later_correction).unwrap().modification,
            Modification::Correction
        );
    }
}
