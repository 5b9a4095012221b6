/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use stanzasync_protocol::Order;

/// Failure of one event's transactional step. Never aborts later events.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("duplicate message identity in chat {chat}: {key}")]
    DuplicateMessageIdentity { chat: i64, key: String },
    #[error("malformed event: {0}")]
    ProtocolShape(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for TransformError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.into())
    }
}

/// Failure of one archive sync attempt. The attempt is abandoned and
/// restarted from `reset_live_page` on the next bind.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("{order:?} range anchor {actual:?} does not match stored boundary {expected:?}")]
    AnchorMismatch {
        order: Order,
        expected: Option<String>,
        actual: Option<String>,
    },
    #[error("history start can only be reached by a reverse query")]
    ReachedStartOnForwardQuery,
    #[error("query result must carry both first and last id, or neither")]
    IncompleteBounds,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for ArchiveError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.into())
    }
}
