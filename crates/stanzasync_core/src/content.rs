/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::address::BareJid;
use crate::normalizer::Transformation;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use stanzasync_protocol::EncryptedPayload;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text { body: String },
    File { url: String, description: Option<String> },
    Retraction,
    NotForThisDevice,
    DecryptionFailure { cause: String },
}

impl ContentPart {
    pub(crate) fn kind_str(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::File { .. } => "file",
            Self::Retraction => "retraction",
            Self::NotForThisDevice => "not_for_this_device",
            Self::DecryptionFailure { .. } => "decryption_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Encryption {
    Cleartext,
    EndToEnd { identity_key: String },
    DecryptionFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContent {
    pub parts: Vec<ContentPart>,
    pub encryption: Encryption,
}

impl ResolvedContent {
    pub fn retraction() -> Self {
        Self {
            parts: vec![ContentPart::Retraction],
            encryption: Encryption::Cleartext,
        }
    }
}

/// Encrypted blob after transport decoding.
#[derive(Debug, Clone)]
pub struct EncryptedBlob {
    pub sender_device: u32,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DecryptedPayload {
    pub cleartext: Vec<u8>,
    pub identity_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptionFailure {
    NotForThisDevice,
    Other(String),
}

/// End-to-end decryption boundary. May be slow; never called inside a
/// database transaction.
#[async_trait]
pub trait Decryptor: Send + Sync {
    async fn decrypt(
        &self,
        sender: &BareJid,
        blob: &EncryptedBlob,
    ) -> Result<DecryptedPayload, DecryptionFailure>;
}

/// Used when no encryption backend is wired in.
pub struct NoDecryptor;

#[async_trait]
impl Decryptor for NoDecryptor {
    async fn decrypt(
        &self,
        _sender: &BareJid,
        _blob: &EncryptedBlob,
    ) -> Result<DecryptedPayload, DecryptionFailure> {
        Err(DecryptionFailure::Other(
            "no decryption backend configured".to_string(),
        ))
    }
}

fn decode_blob(p: &EncryptedPayload) -> Result<EncryptedBlob, String> {
    let payload = B64
        .decode(p.payload_b64.trim().as_bytes())
        .map_err(|e| format!("malformed payload: {e}"))?;
    let key = p
        .key_b64
        .as_deref()
        .map(|k| B64.decode(k.trim().as_bytes()))
        .transpose()
        .map_err(|e| format!("malformed key: {e}"))?;
    Ok(EncryptedBlob {
        sender_device: p.sender_device,
        key,
        payload,
    })
}

pub fn cleartext_parts(t: &Transformation) -> Vec<ContentPart> {
    let oob = t.out_of_band();
    let mut parts = Vec::new();
    if let Some(body) = t.body() {
        let duplicates_oob = oob.is_some_and(|(url, _)| url.trim() == body.trim());
        if !duplicates_oob {
            parts.push(ContentPart::Text {
                body: body.to_string(),
            });
        }
    }
    if let Some((url, description)) = oob {
        parts.push(ContentPart::File {
            url: url.to_string(),
            description: description.map(str::to_string),
        });
    }
    parts
}

#[derive(Clone)]
pub struct ContentResolver {
    decryptor: Arc<dyn Decryptor>,
}

impl ContentResolver {
    pub fn new(decryptor: Arc<dyn Decryptor>) -> Self {
        Self { decryptor }
    }

    /// Content of a body-bearing event, or `None` when the event carries no
    /// content (reactions, receipts, retractions, errors).
    pub async fn resolve(&self, t: &Transformation) -> Option<ResolvedContent> {
        if let Some(payload) = t.encrypted() {
            return Some(self.resolve_encrypted(t, payload).await);
        }
        let parts = cleartext_parts(t);
        if parts.is_empty() {
            return None;
        }
        Some(ResolvedContent {
            parts,
            encryption: Encryption::Cleartext,
        })
    }

    async fn resolve_encrypted(&self, t: &Transformation, payload: &EncryptedPayload) -> ResolvedContent {
        let failed = |part: ContentPart| ResolvedContent {
            parts: vec![part],
            encryption: Encryption::DecryptionFailed,
        };
        let Some(sender) = t.sender_identity.as_ref().or(t.from_bare()) else {
            return failed(ContentPart::DecryptionFailure {
                cause: "unknown sender".to_string(),
            });
        };
        let blob = match decode_blob(payload) {
            Ok(v) => v,
            Err(cause) => return failed(ContentPart::DecryptionFailure { cause }),
        };
        match self.decryptor.decrypt(sender, &blob).await {
            Ok(decrypted) => {
                let mut parts = vec![ContentPart::Text {
                    body: String::from_utf8_lossy(&decrypted.cleartext).into_owned(),
                }];
                if let Some((url, description)) = t.out_of_band() {
                    parts.push(ContentPart::File {
                        url: url.to_string(),
                        description: description.map(str::to_string),
                    });
                }
                ResolvedContent {
                    parts,
                    encryption: Encryption::EndToEnd {
                        identity_key: decrypted.identity_key,
                    },
                }
            }
            Err(DecryptionFailure::NotForThisDevice) => {
                debug!(sender=%sender, device=blob.sender_device, "message not encrypted for this device");
                failed(ContentPart::NotForThisDevice)
            }
            Err(DecryptionFailure::Other(cause)) => {
                debug!(sender=%sender, "decryption failed: {cause}");
                failed(ContentPart::DecryptionFailure { cause })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::StaticLookup;
    use crate::normalizer::Normalizer;
    use stanzasync_protocol::{EventSource, Extension, InboundEvent, MessageStanza, MessageType};

    struct FixtureDecryptor;

    #[async_trait]
    impl Decryptor for FixtureDecryptor {
        async fn decrypt(
            &self,
            _sender: &BareJid,
            blob: &EncryptedBlob,
        ) -> Result<DecryptedPayload, DecryptionFailure> {
            match blob.sender_device {
                1 => Ok(DecryptedPayload {
                    cleartext: blob.payload.clone(),
                    identity_key: "05abcdef".to_string(),
                }),
                2 => Err(DecryptionFailure::NotForThisDevice),
                _ => Err(DecryptionFailure::Other("no session".to_string())),
            }
        }
    }

    fn transform(extensions: Vec<Extension>) -> Transformation {
        let normalizer = Normalizer::new(
            BareJid::parse("romeo@example.com").unwrap(),
            Arc::new(StaticLookup::new()),
        );
        normalizer
            .normalize(&InboundEvent {
                stanza: MessageStanza {
                    from: Some("juliet@example.com/balcony".into()),
                    to: Some("romeo@example.com".into()),
                    id: Some("m1".into()),
                    message_type: MessageType::Chat,
                    extensions,
                },
                received_at_ms: 1000,
                source: EventSource::Live,
            })
            .unwrap()
    }

    fn encrypted(device: u32, payload_b64: &str) -> Extension {
        Extension::Encrypted(EncryptedPayload {
            sender_device: device,
            key_b64: None,
            payload_b64: payload_b64.to_string(),
        })
    }

    #[test]
    fn body_equal_to_oob_url_keeps_only_the_file() {
        let t = transform(vec![
            Extension::Body {
                text: "https://upload.example.com/cat.jpg".into(),
            },
            Extension::OutOfBandData {
                url: "https://upload.example.com/cat.jpg".into(),
                description: None,
            },
        ]);
        assert_eq!(
            cleartext_parts(&t),
            vec![ContentPart::File {
                url: "https://upload.example.com/cat.jpg".into(),
                description: None
            }]
        );
    }

    #[tokio::test]
    async fn resolves_cleartext_and_nothing() {
        let resolver = ContentResolver::new(Arc::new(NoDecryptor));
        let c = resolver
            .resolve(&transform(vec![Extension::Body { text: "hi".into() }]))
            .await
            .unwrap();
        assert_eq!(c.encryption, Encryption::Cleartext);
        assert_eq!(c.parts, vec![ContentPart::Text { body: "hi".into() }]);

        let none = resolver
            .resolve(&transform(vec![Extension::Receipt { id: "x".into() }]))
            .await;
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn decryption_outcomes_become_parts() {
        let resolver = ContentResolver::new(Arc::new(FixtureDecryptor));

        let ok = resolver
            .resolve(&transform(vec![encrypted(1, &B64.encode("secret"))]))
            .await
            .unwrap();
        assert_eq!(ok.parts, vec![ContentPart::Text { body: "secret".into() }]);
        assert_eq!(
            ok.encryption,
            Encryption::EndToEnd {
                identity_key: "05abcdef".into()
            }
        );

        let other_device = resolver
            .resolve(&transform(vec![encrypted(2, &B64.encode("x"))]))
            .await
            .unwrap();
        assert_eq!(other_device.parts, vec![ContentPart::NotForThisDevice]);
        assert_eq!(other_device.encryption, Encryption::DecryptionFailed);

        let failed = resolver
            .resolve(&transform(vec![encrypted(3, &B64.encode("x"))]))
            .await
            .unwrap();
        assert_eq!(
            failed.parts,
            vec![ContentPart::DecryptionFailure {
                cause: "no session".into()
            }]
        );

        let garbage = resolver
            .resolve(&transform(vec![encrypted(1, "***")]))
            .await
            .unwrap();
        assert!(matches!(
            garbage.parts.as_slice(),
            [ContentPart::DecryptionFailure { .. }]
        ));
    }
}
