/// Topic bloom filters.
///
/// A 512-bit vector summarizing a set of topics. Each topic contributes
/// exactly three bit positions derived from a Keccak-256 hash of its four
/// bytes, so the mapping is deterministic across nodes. Filters are used
/// two ways: to skip decrypt attempts for topics nobody subscribes to, and
/// to decide whether an envelope is worth forwarding toward a peer that
/// advertised its interests.
use sha3::{Digest, Keccak256};

use crate::types::Topic;

/// Filter size in bytes (512 bits).
pub const BLOOM_SIZE: usize = 64;

/// Bit positions contributed per topic.
const HASH_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomFilter([u8; BLOOM_SIZE]);

impl BloomFilter {
    /// Filter with no bits set. Matches nothing except itself.
    pub fn empty() -> Self {
        BloomFilter([0u8; BLOOM_SIZE])
    }

    /// Accept-all filter (all bits set) — what a full node advertises.
    pub fn all() -> Self {
        BloomFilter([0xFF; BLOOM_SIZE])
    }

    /// Derive the filter for a single topic.
    ///
    /// Three positions, each taken from two consecutive bytes of
    /// `Keccak256(topic)` modulo 512. Same topic, same vector — always.
    pub fn from_topic(topic: &Topic) -> Self {
        let digest = Keccak256::digest(topic.as_bytes());
        let mut filter = BloomFilter::empty();
        for i in 0..HASH_COUNT {
            let position =
                ((digest[2 * i] as usize) << 8 | digest[2 * i + 1] as usize) % (BLOOM_SIZE * 8);
            filter.set_bit(position);
        }
        filter
    }

    /// Bitwise OR of two filters.
    pub fn union(&self, other: &BloomFilter) -> BloomFilter {
        let mut merged = *self;
        merged.merge(other);
        merged
    }

    /// OR `other` into this filter in place.
    pub fn merge(&mut self, other: &BloomFilter) {
        for (byte, other_byte) in self.0.iter_mut().zip(other.0.iter()) {
            *byte |= other_byte;
        }
    }

    /// Subset test: every set bit of `other` is also set in `self`.
    ///
    /// `interests.contains(&envelope.bloom())` answers "could anything
    /// behind this filter want that envelope".
    pub fn contains(&self, other: &BloomFilter) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(ours, theirs)| ours & theirs == *theirs)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; BLOOM_SIZE] {
        &self.0
    }

    fn set_bit(&mut self, position: usize) {
        self.0[position / 8] |= 1 << (position % 8);
    }
}
