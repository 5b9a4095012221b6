/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Archive range bookkeeping.
//!
//! Per (account, archive) at most two pages are stored: the settled history
//! page (`START` or `MIDDLE`) and the open `LIVE` edge. Page arithmetic lives
//! on [`ArchivePages`] and is pure; [`ArchivePaging`] loads, mutates and stores
//! the pair inside one transaction.

use crate::address::BareJid;
use crate::error::ArchiveError;
use crate::message_db::MessageDb;
use anyhow::Result;
use rusqlite::{params, Connection};
use stanzasync_protocol::{Order, QueryResult, Range};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PageKind {
    Start,
    Middle,
    Live,
}

impl PageKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Middle => "MIDDLE",
            Self::Live => "LIVE",
        }
    }

    fn parse(input: &str) -> Option<Self> {
        match input {
            "START" => Some(Self::Start),
            "MIDDLE" => Some(Self::Middle),
            "LIVE" => Some(Self::Live),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ArchivePage {
    pub kind: PageKind,
    pub start_id: String,
    pub end_id: String,
    pub reached_history_start: bool,
}

impl ArchivePage {
    fn live(start_id: &str, end_id: &str) -> Self {
        Self {
            kind: PageKind::Live,
            start_id: start_id.to_string(),
            end_id: end_id.to_string(),
            reached_history_start: false,
        }
    }

    fn history_complete(&self) -> bool {
        self.reached_history_start || self.kind == PageKind::Start
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ArchivePages {
    pub history: Option<ArchivePage>,
    pub live: Option<ArchivePage>,
}

fn ranges_for(history: &ArchivePage) -> Vec<Range> {
    let mut out = Vec::with_capacity(2);
    if !history.history_complete() {
        out.push(Range::reverse(Some(history.start_id.clone())));
    }
    out.push(Range::normal(history.end_id.clone()));
    out
}

impl ArchivePages {
    /// Settles the live edge into history and returns the queries to issue
    /// after a stream (re)bind. The live page never survives a reset.
    pub fn reset(&mut self) -> Vec<Range> {
        match (self.history.take(), self.live.take()) {
            (None, None) => vec![Range::reverse(None)],
            (Some(mut history), Some(live)) if history.end_id == live.start_id => {
                history.end_id = live.end_id;
                let ranges = ranges_for(&history);
                self.history = Some(history);
                ranges
            }
            (Some(history), _) => {
                let ranges = ranges_for(&history);
                self.history = Some(history);
                ranges
            }
            (None, Some(live)) => {
                let history = ArchivePage {
                    kind: PageKind::Middle,
                    start_id: live.start_id,
                    end_id: live.end_id,
                    reached_history_start: false,
                };
                let ranges = ranges_for(&history);
                self.history = Some(history);
                ranges
            }
        }
    }

    /// Folds one fetched page into history. Returns the follow-up range when
    /// the sweep has more pages to fetch.
    pub fn submit(
        &mut self,
        range: &Range,
        result: &QueryResult,
        reached_history_start: bool,
    ) -> Result<Option<Range>, ArchiveError> {
        if reached_history_start && range.order != Order::Reverse {
            return Err(ArchiveError::ReachedStartOnForwardQuery);
        }
        let bounds = match (&result.first, &result.last) {
            (Some(first), Some(last)) => Some((first.as_str(), last.as_str())),
            (None, None) => None,
            _ => return Err(ArchiveError::IncompleteBounds),
        };
        let reached_start =
            range.order == Order::Reverse && (reached_history_start || result.complete);

        match self.history.as_mut() {
            None => {
                if let Some((first, last)) = bounds {
                    self.history = Some(ArchivePage {
                        kind: if reached_start {
                            PageKind::Start
                        } else {
                            PageKind::Middle
                        },
                        start_id: first.to_string(),
                        end_id: last.to_string(),
                        reached_history_start: reached_start,
                    });
                }
            }
            Some(page) => match range.order {
                Order::Reverse => {
                    if range.anchor.as_deref() != Some(page.start_id.as_str()) {
                        return Err(ArchiveError::AnchorMismatch {
                            order: range.order,
                            expected: Some(page.start_id.clone()),
                            actual: range.anchor.clone(),
                        });
                    }
                    if let Some((first, _)) = bounds {
                        page.start_id = first.to_string();
                    }
                    if reached_start {
                        page.kind = PageKind::Start;
                        page.reached_history_start = true;
                    }
                }
                Order::Normal => {
                    if range.anchor.as_deref() != Some(page.end_id.as_str()) {
                        return Err(ArchiveError::AnchorMismatch {
                            order: range.order,
                            expected: Some(page.end_id.clone()),
                            actual: range.anchor.clone(),
                        });
                    }
                    if let Some((_, last)) = bounds {
                        page.end_id = last.to_string();
                    }
                }
            },
        }

        let reached_live_edge = match range.order {
            Order::Reverse => range.anchor.is_none(),
            Order::Normal => result.complete,
        };
        if reached_live_edge {
            if let Some(edge) = self.history.as_ref().map(|h| h.end_id.clone()) {
                self.fold_live_edge(&edge);
            }
        }

        let next = match (range.order, bounds) {
            (Order::Reverse, Some((first, _))) if !reached_start => {
                Some(Range::reverse(Some(first.to_string())))
            }
            (Order::Normal, Some((_, last))) if !result.complete => Some(Range::normal(last)),
            _ => None,
        };
        Ok(next)
    }

    /// Moves the live page's start onto the settled history boundary.
    fn fold_live_edge(&mut self, edge: &str) {
        match self.live.as_mut() {
            Some(live) => live.start_id = edge.to_string(),
            None => self.live = Some(ArchivePage::live(edge, edge)),
        }
    }

    pub fn advance_live(&mut self, stanza_id: &str) {
        match self.live.as_mut() {
            Some(live) => live.end_id = stanza_id.to_string(),
            None => self.live = Some(ArchivePage::live(stanza_id, stanza_id)),
        }
    }
}

pub(crate) fn load_pages(conn: &Connection, account: &BareJid, archive: &BareJid) -> Result<ArchivePages> {
    let mut stmt = conn.prepare(
        "SELECT slot, kind, start_id, end_id, reached_history_start FROM archive_pages WHERE account=?1 AND archive=?2",
    )?;
    let mut rows = stmt.query(params![account.as_str(), archive.as_str()])?;
    let mut pages = ArchivePages::default();
    while let Some(r) = rows.next()? {
        let slot: String = r.get(0)?;
        let kind: String = r.get(1)?;
        let Some(kind) = PageKind::parse(&kind) else {
            anyhow::bail!("unknown archive page kind {kind}");
        };
        let page = ArchivePage {
            kind,
            start_id: r.get(2)?,
            end_id: r.get(3)?,
            reached_history_start: r.get::<_, i64>(4)? != 0,
        };
        if slot == "live" {
            pages.live = Some(page);
        } else {
            pages.history = Some(page);
        }
    }
    Ok(pages)
}

pub(crate) fn store_pages(
    conn: &Connection,
    account: &BareJid,
    archive: &BareJid,
    pages: &ArchivePages,
) -> Result<()> {
    conn.execute(
        "DELETE FROM archive_pages WHERE account=?1 AND archive=?2",
        params![account.as_str(), archive.as_str()],
    )?;
    let slots = [("history", pages.history.as_ref()), ("live", pages.live.as_ref())];
    for (slot, page) in slots {
        let Some(page) = page else {
            continue;
        };
        conn.execute(
            r#"
            INSERT INTO archive_pages (account, archive, slot, kind, start_id, end_id, reached_history_start)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                account.as_str(),
                archive.as_str(),
                slot,
                page.kind.as_str(),
                page.start_id,
                page.end_id,
                if page.reached_history_start { 1 } else { 0 }
            ],
        )?;
    }
    Ok(())
}

pub(crate) fn set_live_page_stanza_id_in(
    conn: &Connection,
    account: &BareJid,
    archive: &BareJid,
    stanza_id: &str,
) -> Result<()> {
    let mut pages = load_pages(conn, account, archive)?;
    pages.advance_live(stanza_id);
    store_pages(conn, account, archive, &pages)
}

/// Entry points driven by the bind / history-fetch controller. Callers must
/// serialize them per (account, archive); the account worker does.
#[derive(Clone)]
pub struct ArchivePaging {
    db: MessageDb,
}

impl ArchivePaging {
    pub fn new(db: MessageDb) -> Self {
        Self { db }
    }

    pub fn reset_live_page(&self, account: &BareJid, archive: &BareJid) -> Result<Vec<Range>, ArchiveError> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction()?;
        let mut pages = load_pages(&tx, account, archive)?;
        let ranges = pages.reset();
        store_pages(&tx, account, archive, &pages)?;
        tx.commit()?;
        info!(account=%account, archive=%archive, ?ranges, "archive ranges after reset");
        Ok(ranges)
    }

    pub fn submit_page(
        &self,
        account: &BareJid,
        archive: &BareJid,
        range: &Range,
        result: &QueryResult,
        reached_history_start: bool,
    ) -> Result<Option<Range>, ArchiveError> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction()?;
        let mut pages = load_pages(&tx, account, archive)?;
        let next = pages.submit(range, result, reached_history_start)?;
        store_pages(&tx, account, archive, &pages)?;
        tx.commit()?;
        debug!(account=%account, archive=%archive, ?range, ?next, "archive page submitted");
        Ok(next)
    }

    /// Live edge of the account's own archive.
    pub fn set_live_page_stanza_id(&self, account: &BareJid, stanza_id: &str) -> Result<()> {
        self.set_live_page_stanza_id_for(account, account, stanza_id)
    }

    pub fn set_live_page_stanza_id_for(
        &self,
        account: &BareJid,
        archive: &BareJid,
        stanza_id: &str,
    ) -> Result<()> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction()?;
        set_live_page_stanza_id_in(&tx, account, archive, stanza_id)?;
        tx.commit()?;
        Ok(())
    }
}
