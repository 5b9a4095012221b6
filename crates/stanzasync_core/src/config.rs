/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::address::BareJid;
use crate::lookup::StaticLookup;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, serde::Deserialize)]
pub struct SyncConfig {
    pub account: String,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default = "default_db_file")]
    pub db_file: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub worker_queue_depth: Option<usize>,
    #[serde(default)]
    pub lookup: LookupConfig,
}

/// Seed for the static discovery cache.
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct LookupConfig {
    /// address -> advertised features
    #[serde(default)]
    pub features: HashMap<String, Vec<String>>,
    /// "room|occupant-id" -> real bare address
    #[serde(default)]
    pub occupants: HashMap<String, String>,
}

fn default_db_file() -> String {
    "messages.sqlite3".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("STANZASYNC_DATA_DIR") {
        return Ok(PathBuf::from(v));
    }
    let proj = ProjectDirs::from("im", "stanzasync", "Stanzasync")
        .context("unable to determine platform data dir")?;
    Ok(proj.data_local_dir().to_path_buf())
}

impl SyncConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse config: {}", path.display()))?;
        cfg.account()?;
        Ok(cfg)
    }

    pub fn account(&self) -> Result<BareJid> {
        BareJid::parse(&self.account).context("invalid account address")
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        let dir = match self.data_dir.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => PathBuf::from(d),
            _ => default_data_dir()?,
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create data dir: {}", dir.display()))?;
        Ok(dir.join(&self.db_file))
    }

    pub fn queue_depth(&self) -> usize {
        self.worker_queue_depth.unwrap_or(256).clamp(1, 4096)
    }

    pub fn build_lookup(&self) -> Result<StaticLookup> {
        let mut lookup = StaticLookup::new();
        for (address, features) in &self.lookup.features {
            let address = BareJid::parse(address)
                .with_context(|| format!("invalid lookup address: {address}"))?;
            for f in features {
                lookup.add_feature(address.clone(), f.trim());
            }
        }
        for (key, real) in &self.lookup.occupants {
            let Some((room, occupant_id)) = key.split_once('|') else {
                anyhow::bail!("occupant key must be \"room|occupant-id\": {key}");
            };
            lookup.add_occupant(BareJid::parse(room)?, occupant_id, BareJid::parse(real)?);
        }
        Ok(lookup)
    }
}

pub fn init_logging(filter: &str) {
    let directive: tracing_subscriber::filter::Directive = filter
        .parse()
        .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .try_init()
        .ok();
}
