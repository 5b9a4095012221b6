/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::address::BareJid;
use crate::archive::ArchivePaging;
use crate::content::{ContentResolver, Decryptor};
use crate::error::{ArchiveError, TransformError};
use crate::lookup::AddressLookup;
use crate::message_db::MessageDb;
use crate::normalizer::Normalizer;
use crate::transformer::Transformer;
use anyhow::{Context, Result};
use stanzasync_protocol::{InboundEvent, QueryResult, Range};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Normalize, decrypt, then apply. Decryption is awaited before the
/// transaction is opened; the transactional step runs on the blocking pool.
#[derive(Clone)]
pub struct Pipeline {
    normalizer: Normalizer,
    resolver: ContentResolver,
    transformer: Transformer,
}

impl Pipeline {
    pub fn new(
        db: MessageDb,
        account: BareJid,
        lookup: Arc<dyn AddressLookup>,
        decryptor: Arc<dyn Decryptor>,
    ) -> Self {
        Self {
            normalizer: Normalizer::new(account, lookup),
            resolver: ContentResolver::new(decryptor),
            transformer: Transformer::new(db),
        }
    }

    pub fn account(&self) -> &BareJid {
        self.normalizer.account()
    }

    pub async fn transform(&self, event: &InboundEvent) -> Result<bool> {
        let t = match self.normalizer.normalize(event) {
            Ok(t) => t,
            Err(TransformError::ProtocolShape(reason)) => {
                debug!(account=%self.account(), %reason, "dropping unparseable event");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        let content = self.resolver.resolve(&t).await;
        let transformer = self.transformer.clone();
        tokio::task::spawn_blocking(move || transformer.transform(&t, content))
            .await
            .context("transform task")?
    }
}

pub enum WorkerCommand {
    Inbound {
        event: Box<InboundEvent>,
        reply: oneshot::Sender<Result<bool>>,
    },
    ResetLivePage {
        archive: BareJid,
        reply: oneshot::Sender<Result<Vec<Range>, ArchiveError>>,
    },
    SubmitPage {
        archive: BareJid,
        range: Range,
        result: QueryResult,
        reached_history_start: bool,
        reply: oneshot::Sender<Result<Option<Range>, ArchiveError>>,
    },
}

/// Sending side of one account's worker.
#[derive(Clone)]
pub struct AccountHandle {
    account: BareJid,
    tx: mpsc::Sender<WorkerCommand>,
}

impl AccountHandle {
    pub fn account(&self) -> &BareJid {
        &self.account
    }

    pub async fn transform(&self, event: InboundEvent) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerCommand::Inbound {
                event: Box::new(event),
                reply,
            })
            .await
            .context("worker send inbound")?;
        rx.await.context("worker reply dropped")?
    }

    pub async fn reset_live_page(&self, archive: &BareJid) -> Result<Vec<Range>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerCommand::ResetLivePage {
                archive: archive.clone(),
                reply,
            })
            .await
            .context("worker send reset")?;
        Ok(rx.await.context("worker reply dropped")??)
    }

    pub async fn submit_page(
        &self,
        archive: &BareJid,
        range: Range,
        result: QueryResult,
        reached_history_start: bool,
    ) -> Result<Option<Range>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerCommand::SubmitPage {
                archive: archive.clone(),
                range,
                result,
                reached_history_start,
                reply,
            })
            .await
            .context("worker send submit")?;
        Ok(rx.await.context("worker reply dropped")??)
    }
}

/// One sequential worker per account. Inbound events and archive paging for
/// the account all go through the same queue.
pub struct AccountWorker {
    pipeline: Pipeline,
    paging: ArchivePaging,
}

impl AccountWorker {
    pub fn spawn(
        db: MessageDb,
        account: BareJid,
        lookup: Arc<dyn AddressLookup>,
        decryptor: Arc<dyn Decryptor>,
        queue_depth: usize,
        shutdown: watch::Receiver<bool>,
    ) -> (AccountHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let worker = Self {
            pipeline: Pipeline::new(db.clone(), account.clone(), lookup, decryptor),
            paging: ArchivePaging::new(db),
        };
        let handle = AccountHandle {
            account: account.clone(),
            tx,
        };
        let task = tokio::spawn(async move {
            worker.run_loop(rx, shutdown).await;
            info!(account=%account, "account worker stopped");
        });
        (handle, task)
    }

    async fn run_loop(&self, mut rx: mpsc::Receiver<WorkerCommand>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn handle(&self, cmd: WorkerCommand) {
        match cmd {
            WorkerCommand::Inbound { event, reply } => {
                let out = self.pipeline.transform(&event).await;
                if let Err(e) = &out {
                    warn!(account=%self.pipeline.account(), "inbound event failed: {e:#}");
                }
                let _ = reply.send(out);
            }
            WorkerCommand::ResetLivePage { archive, reply } => {
                let paging = self.paging.clone();
                let account = self.pipeline.account().clone();
                let out = tokio::task::spawn_blocking(move || paging.reset_live_page(&account, &archive))
                    .await
                    .unwrap_or_else(|e| Err(ArchiveError::Storage(e.into())));
                let _ = reply.send(out);
            }
            WorkerCommand::SubmitPage {
                archive,
                range,
                result,
                reached_history_start,
                reply,
            } => {
                let paging = self.paging.clone();
                let account = self.pipeline.account().clone();
                let out = tokio::task::spawn_blocking(move || {
                    paging.submit_page(&account, &archive, &range, &result, reached_history_start)
                })
                .await
                .unwrap_or_else(|e| Err(ArchiveError::Storage(e.into())));
                if let Err(e) = &out {
                    warn!(account=%self.pipeline.account(), "archive sync attempt aborted: {e}");
                }
                let _ = reply.send(out);
            }
        }
    }
}
