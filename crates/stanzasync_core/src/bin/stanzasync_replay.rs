/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use serde_json::json;
use stanzasync_core::address::BareJid;
use stanzasync_core::config::{init_logging, SyncConfig};
use stanzasync_core::content::NoDecryptor;
use stanzasync_core::message_db::MessageDb;
use stanzasync_core::worker::AccountWorker;
use stanzasync_protocol::InboundEvent;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

struct Args {
    config: PathBuf,
    events: PathBuf,
    archive: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let usage = "usage: stanzasync_replay <config.json> <events.jsonl> [archive-address]";
    let config = args.next().context(usage)?;
    let events = args.next().context(usage)?;
    Ok(Args {
        config: PathBuf::from(config),
        events: PathBuf::from(events),
        archive: args.next(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    let cfg = SyncConfig::load(&args.config)?;
    init_logging(&cfg.log_filter);

    let account = cfg.account()?;
    let db_path = cfg.db_path()?;
    info!("replaying for {account}");
    info!("db: {}", db_path.display());
    let db = MessageDb::open(&db_path)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, task) = AccountWorker::spawn(
        db.clone(),
        account.clone(),
        Arc::new(cfg.build_lookup()?),
        Arc::new(NoDecryptor),
        cfg.queue_depth(),
        shutdown_rx,
    );

    let raw = std::fs::read_to_string(&args.events)
        .with_context(|| format!("read events: {}", args.events.display()))?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut visible = 0u64;
    for (n, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: InboundEvent = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(line = n + 1, "skipping unparseable event: {e}");
                continue;
            }
        };
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("shutdown requested");
                break;
            }
            out = handle.transform(event) => {
                if out? {
                    visible += 1;
                }
            }
        }
    }

    let archive = match args.archive.as_deref() {
        Some(a) => BareJid::parse(a)?,
        None => account.clone(),
    };
    let ranges = handle.reset_live_page(&archive).await?;

    let mut chats = Vec::new();
    for chat in db.list_chats(&account)? {
        let messages = db.list_messages(chat.id)?;
        let rows = db.count_message_rows(chat.id)?;
        chats.push(json!({ "chat": chat, "rows": rows, "messages": messages }));
    }
    let report = json!({
        "account": account,
        "visible": visible,
        "chats": chats,
        "archive": archive,
        "ranges": ranges,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    let _ = shutdown_tx.send(true);
    task.await.context("worker task")?;
    Ok(())
}
