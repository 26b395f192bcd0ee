use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Topic length on the wire.
pub const TOPIC_LENGTH: usize = 4;

/// Byte length of key and subscription identifiers.
pub const KEY_ID_LENGTH: usize = 32;

/// Byte length of a symmetric key.
pub const SYM_KEY_LENGTH: usize = 32;

/// PBKDF2 iteration count for password-derived symmetric keys.
///
/// Fixed, with an empty salt, so that every node derives identical key
/// bytes from the same password. Changing either breaks interop.
pub const PBKDF2_ITERATIONS: u32 = 65_356;

/// Default envelope lifetime in seconds when the caller passes `ttl = 0`.
pub const DEFAULT_TTL_SECS: u64 = 50;

/// Current unix time in seconds.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before epoch")
        .as_secs()
}

fn decode_fixed<const N: usize>(s: &str) -> Option<[u8; N]> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

// ── Topic ─────────────────────────────────────────────────────────────

/// 4-byte coarse routing tag. Not a decryption key — only a filter input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic(pub [u8; TOPIC_LENGTH]);

impl Topic {
    pub fn as_bytes(&self) -> &[u8; TOPIC_LENGTH] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Topic {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Error> {
        let arr: [u8; TOPIC_LENGTH] =
            bytes.try_into().map_err(|_| Error::MalformedEnvelope {
                reason: format!("topic must be {TOPIC_LENGTH} bytes, got {}", bytes.len()),
            })?;
        Ok(Topic(arr))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        decode_fixed::<TOPIC_LENGTH>(s)
            .map(Topic)
            .ok_or_else(|| Error::MalformedEnvelope {
                reason: format!("topic must be {TOPIC_LENGTH} hex-encoded bytes"),
            })
    }
}

// ── Envelope identifier ───────────────────────────────────────────────

/// Content-derived envelope identifier: Keccak-256 over the five wire
/// fields. Two envelopes with identical fields share one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvelopeId(pub [u8; 32]);

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// ── Key / subscription identifiers ────────────────────────────────────

/// Opaque identifier for a key store entry. Random, unique across both
/// the symmetric and asymmetric variants of one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(pub [u8; KEY_ID_LENGTH]);

impl KeyId {
    /// Fresh random identifier.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; KEY_ID_LENGTH];
        rand::rng().fill_bytes(&mut bytes);
        KeyId(bytes)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for KeyId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        decode_fixed::<KEY_ID_LENGTH>(s).map(KeyId).ok_or(Error::InvalidId)
    }
}

/// Identifier handed back by `subscribe`, used to route deliveries and to
/// cancel the subscription later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub [u8; KEY_ID_LENGTH]);

impl SubscriptionId {
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; KEY_ID_LENGTH];
        rand::rng().fill_bytes(&mut bytes);
        SubscriptionId(bytes)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for SubscriptionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        decode_fixed::<KEY_ID_LENGTH>(s)
            .map(SubscriptionId)
            .ok_or(Error::InvalidId)
    }
}
