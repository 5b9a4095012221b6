/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::address::BareJid;
use std::collections::{HashMap, HashSet};

pub const FEATURE_MAM: &str = "urn:xmpp:mam:2";
pub const FEATURE_OCCUPANT_ID: &str = "urn:xmpp:occupant-id:0";
pub const FEATURE_MUC: &str = "http://jabber.org/protocol/muc";

/// Synchronous lookups against already-cached discovery state.
pub trait AddressLookup: Send + Sync {
    fn supports_feature(&self, address: &BareJid, feature: &str) -> bool;

    /// Real address behind an anonymous occupant id, when the room exposes it.
    fn resolve_occupant(&self, room: &BareJid, occupant_id: &str) -> Option<BareJid>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticLookup {
    features: HashMap<BareJid, HashSet<String>>,
    occupants: HashMap<(BareJid, String), BareJid>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feature(mut self, address: BareJid, feature: &str) -> Self {
        self.add_feature(address, feature);
        self
    }

    pub fn add_feature(&mut self, address: BareJid, feature: &str) {
        self.features
            .entry(address)
            .or_default()
            .insert(feature.to_string());
    }

    pub fn add_occupant(&mut self, room: BareJid, occupant_id: &str, real: BareJid) {
        self.occupants.insert((room, occupant_id.to_string()), real);
    }
}

impl AddressLookup for StaticLookup {
    fn supports_feature(&self, address: &BareJid, feature: &str) -> bool {
        self.features
            .get(address)
            .is_some_and(|set| set.contains(feature))
    }

    fn resolve_occupant(&self, room: &BareJid, occupant_id: &str) -> Option<BareJid> {
        self.occupants
            .get(&(room.clone(), occupant_id.to_string()))
            .cloned()
    }
}
