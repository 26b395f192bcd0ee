/// Protocol-level errors.
///
/// Faults are always isolated to the envelope or API request that produced
/// them — nothing here is fatal to the relay. A failed trial decryption is
/// not an error at all: `KeyStore::try_decrypt` returns `None` for the
/// (common) case where no held key opens an envelope.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad field length or wire encoding. The envelope is dropped and never
    /// propagated to peers.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    /// A freshly generated random identifier collided with an existing one.
    /// Retried internally; surfaces only after repeated collisions.
    #[error("generated key id is not unique")]
    DuplicateKeyId,

    /// Caller-supplied identifier has the wrong byte length.
    #[error("invalid id")]
    InvalidId,

    /// Lookup miss — also returned when an id exists but holds the other
    /// key variant than the one requested.
    #[error("key not found")]
    NotFound,

    /// Key import with the wrong number of bytes.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// A publish/subscribe request that cannot be acted on as given.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Internal seal/open failure (never a trial-decrypt miss).
    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Transport failed to start.
    #[error("transport error: {0}")]
    Transport(String),

    /// Command sent to a relay runtime that has shut down.
    #[error("relay shut down")]
    Shutdown,
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Deserialization(e.to_string())
    }
}
