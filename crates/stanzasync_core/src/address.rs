/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{bail, Result};
use std::fmt;

/// `local@domain` with both parts lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct BareJid(String);

/// Full address: bare part plus optional resource (kept verbatim).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Jid {
    bare: BareJid,
    resource: Option<String>,
}

impl BareJid {
    pub fn parse(input: &str) -> Result<Self> {
        Ok(Jid::parse(input)?.bare)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn domain(&self) -> &str {
        match self.0.split_once('@') {
            Some((_, d)) => d,
            None => &self.0,
        }
    }
}

impl Jid {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            bail!("empty address");
        }
        let (bare, resource) = match input.split_once('/') {
            Some((b, r)) => (b, Some(r.to_string())),
            None => (input, None),
        };
        let (local, domain) = match bare.split_once('@') {
            Some((l, d)) => (Some(l), d),
            None => (None, bare),
        };
        if domain.is_empty() {
            bail!("address without domain: {input}");
        }
        if local.is_some_and(|l| l.is_empty()) {
            bail!("address with empty local part: {input}");
        }
        let bare = match local {
            Some(l) => format!("{}@{}", l.to_lowercase(), domain.to_lowercase()),
            None => domain.to_lowercase(),
        };
        Ok(Self {
            bare: BareJid(bare),
            resource: resource.filter(|r| !r.is_empty()),
        })
    }

    pub fn bare(&self) -> &BareJid {
        &self.bare
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }
}

impl From<BareJid> for Jid {
    fn from(bare: BareJid) -> Self {
        Self {
            bare,
            resource: None,
        }
    }
}

impl fmt::Display for BareJid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(r) => write!(f, "{}/{}", self.bare, r),
            None => write!(f, "{}", self.bare),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_bare_part_only() {
        let jid = Jid::parse("Juliet@Example.COM/Balcony").unwrap();
        assert_eq!(jid.bare().as_str(), "juliet@example.com");
        assert_eq!(jid.resource(), Some("Balcony"));
        assert_eq!(jid.to_string(), "juliet@example.com/Balcony");
    }

    #[test]
    fn parse_domain_only() {
        let jid = Jid::parse("conference.example.com").unwrap();
        assert_eq!(jid.bare().domain(), "conference.example.com");
        assert_eq!(jid.resource(), None);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Jid::parse("").is_err());
        assert!(Jid::parse("@example.com").is_err());
        assert!(Jid::parse("juliet@").is_err());
    }
}
