//! Susurrus protocol core.
//!
//! A relay node for an encrypted, topic-addressed publish/subscribe
//! protocol: peers gossip opaque, bloom-indexed envelopes over one or two
//! transport stacks; the node opens the ones addressed to keys it holds,
//! forwards the rest unchanged, and hands matches to local subscribers.
//!
//! Wire format: MessagePack (compact binary tuples).
//! Crypto: XChaCha20-Poly1305 over X25519 (asymmetric) or HKDF-bound
//! shared keys (symmetric), with optional Ed25519 signatures inside the
//! ciphertext.

pub mod bloom;
pub mod crypto;
pub mod dedup;
pub mod envelope;
pub mod error;
pub mod keystore;
pub mod runtime;
pub mod subscription;
pub mod transport;
pub mod types;

pub use bloom::BloomFilter;
pub use crypto::CipherPayload;
pub use dedup::DedupTracker;
pub use envelope::Envelope;
pub use error::Error;
pub use keystore::{DecryptedMessage, KeyStore};
pub use runtime::{
    PostRequest, RelayChannels, RelayConfig, RelayEvent, RelayHandle, RelayManager,
};
pub use subscription::{
    SubscriptionFilter, SubscriptionMessage, SubscriptionRegistry,
};
pub use transport::{PeerId, Transport, TransportEvent, TransportId};
pub use types::{now_secs, EnvelopeId, KeyId, SubscriptionId, Topic};
