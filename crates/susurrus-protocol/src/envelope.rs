use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::bloom::BloomFilter;
use crate::error::Error;
use crate::types::{EnvelopeId, Topic};

/// The wire-level unit of gossip — an immutable five-field value.
///
/// Serialized as MessagePack, which encodes the struct as the ordered
/// tuple `[expiry, ttl, topic, data, nonce]`. The identifier and bloom
/// filter are derived, never carried on the wire: a peer-supplied bloom is
/// worthless, recompute it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Absolute unix time (seconds) after which the envelope must not be
    /// relayed.
    pub expiry: u64,
    /// Seconds the envelope remains valid from creation;
    /// `expiry - ttl` is the creation time.
    pub ttl: u64,
    /// 4-byte routing tag.
    pub topic: Topic,
    /// Opaque ciphertext plus protocol padding.
    pub data: Vec<u8>,
    /// Reserved for the proof-of-work search. Zero on locally built
    /// envelopes.
    pub nonce: u64,
}

impl Envelope {
    pub fn new(expiry: u64, ttl: u64, topic: Topic, data: Vec<u8>, nonce: u64) -> Self {
        Self {
            expiry,
            ttl,
            topic,
            data,
            nonce,
        }
    }

    /// Content-derived identifier: Keccak-256 over the canonical
    /// concatenation of the five fields in wire order.
    ///
    /// Pure function of the fields — envelopes with identical tuples are
    /// the same message and deduplicate as one.
    pub fn id(&self) -> EnvelopeId {
        let mut hasher = Keccak256::new();
        hasher.update(self.expiry.to_be_bytes());
        hasher.update(self.ttl.to_be_bytes());
        hasher.update(self.topic.as_bytes());
        hasher.update(&self.data);
        hasher.update(self.nonce.to_be_bytes());
        EnvelopeId(hasher.finalize().into())
    }

    /// Interest filter for this envelope's topic. Derived locally.
    pub fn bloom(&self) -> BloomFilter {
        BloomFilter::from_topic(&self.topic)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiry
    }

    /// Creation time implied by `expiry - ttl`.
    pub fn created_at(&self) -> u64 {
        self.expiry.saturating_sub(self.ttl)
    }

    /// Serialize to the MessagePack wire tuple.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from the MessagePack wire tuple.
    ///
    /// Any structural fault — wrong arity, wrong topic length, truncated
    /// bytes — is a `MalformedEnvelope`; the caller drops the envelope and
    /// moves on.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        rmp_serde::from_slice(data).map_err(|e| Error::MalformedEnvelope {
            reason: e.to_string(),
        })
    }
}
