/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod address;
pub mod archive;
pub mod config;
pub mod content;
pub mod error;
pub mod identity;
pub mod lookup;
pub mod message_db;
pub mod normalizer;
pub mod reactions;
pub mod transformer;
pub mod versions;
pub mod worker;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
