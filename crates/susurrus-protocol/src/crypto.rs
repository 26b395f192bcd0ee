/// Envelope payload encryption.
///
/// Two schemes share one AEAD (XChaCha20-Poly1305) and one wire shape:
///
/// * asymmetric — ephemeral X25519 Diffie-Hellman against the recipient's
///   Ed25519 identity (converted via the standard Edwards→Montgomery map,
///   same as libsodium), HKDF-SHA256 key derivation. Fresh ephemeral
///   keypair per envelope.
/// * symmetric — HKDF-SHA256 over the 32-byte shared key with the topic
///   folded into the info string, so a key is bound to the routing tag it
///   was published under.
///
/// Trial decryption is the protocol's addressing mechanism: an AEAD
/// authentication failure means "not for this key" and is reported as
/// `None`, never as an error.
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{Signer, Verifier};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519Secret};

use crate::error::Error;
use crate::types::{Topic, PBKDF2_ITERATIONS, SYM_KEY_LENGTH};

/// HKDF info prefix for asymmetric envelopes.
const HKDF_INFO_ASYM: &[u8] = b"susurrus-asym-xchacha20poly1305-v1";

/// HKDF info prefix for symmetric envelopes; the topic bytes are appended.
const HKDF_INFO_SYM: &[u8] = b"susurrus-sym-xchacha20poly1305-v1";

/// Padding granularity for sealed plaintexts.
const PAD_BOUNDARY: usize = 256;

// ── Wire shapes ───────────────────────────────────────────────────────

/// What `Envelope.data` carries: ciphertext plus the metadata needed to
/// open it. `ephemeral_pk` is present exactly when the asymmetric scheme
/// produced the ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CipherPayload {
    /// XChaCha20-Poly1305 ciphertext (includes the 16-byte auth tag).
    pub ciphertext: Vec<u8>,
    /// 24-byte extended nonce — safe to generate randomly.
    pub nonce: [u8; 24],
    /// Sender's ephemeral X25519 public key, asymmetric scheme only.
    pub ephemeral_pk: Option<[u8; 32]>,
}

impl CipherPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }

    pub fn is_asymmetric(&self) -> bool {
        self.ephemeral_pk.is_some()
    }
}

/// The structure inside the ciphertext: application payload, protocol
/// padding, and an optional Ed25519 signature with its verifying key.
///
/// The signature covers `topic ‖ payload ‖ padding`, so a decrypted
/// message cannot be replayed under a different routing tag with the
/// original signer attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedPlaintext {
    pub payload: Vec<u8>,
    pub padding: Vec<u8>,
    pub signer: Option<[u8; 32]>,
    pub signature: Option<Vec<u8>>,
}

impl SealedPlaintext {
    fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    fn from_bytes(data: &[u8]) -> Option<Self> {
        rmp_serde::from_slice(data).ok()
    }

    fn signed_bytes(topic: &Topic, payload: &[u8], padding: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + payload.len() + padding.len());
        bytes.extend_from_slice(topic.as_bytes());
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(padding);
        bytes
    }
}

// ── Plaintext seal / open ─────────────────────────────────────────────

/// Assemble the plaintext structure, padding to a 256-byte boundary when
/// the caller supplied no padding, signing when a signer seed is given.
pub fn seal_plaintext(
    topic: &Topic,
    payload: Vec<u8>,
    padding: Option<Vec<u8>>,
    signer_seed: Option<&[u8; 32]>,
) -> Result<Vec<u8>, Error> {
    let padding = padding.unwrap_or_else(|| {
        use rand::RngCore;
        let mut pad = vec![0u8; PAD_BOUNDARY - payload.len() % PAD_BOUNDARY];
        rand::rng().fill_bytes(&mut pad);
        pad
    });

    let (signer, signature) = match signer_seed {
        Some(seed) => {
            let signing_key = ed25519_dalek::SigningKey::from_bytes(seed);
            let message = SealedPlaintext::signed_bytes(topic, &payload, &padding);
            let sig = signing_key.sign(&message);
            (
                Some(signing_key.verifying_key().to_bytes()),
                Some(sig.to_bytes().to_vec()),
            )
        }
        None => (None, None),
    };

    SealedPlaintext {
        payload,
        padding,
        signer,
        signature,
    }
    .to_bytes()
}

/// Parse and authenticate a decrypted plaintext structure.
///
/// An envelope carrying a signature that does not verify is treated like
/// any other failed trial decryption — `None`, drop, move on. A forged
/// signer must not surface to subscribers.
pub fn open_plaintext(topic: &Topic, plaintext: &[u8]) -> Option<SealedPlaintext> {
    let sealed = SealedPlaintext::from_bytes(plaintext)?;

    match (&sealed.signer, &sealed.signature) {
        (None, None) => Some(sealed),
        (Some(signer), Some(signature)) => {
            let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(signer).ok()?;
            let sig_bytes: [u8; 64] = signature.as_slice().try_into().ok()?;
            let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
            let message =
                SealedPlaintext::signed_bytes(topic, &sealed.payload, &sealed.padding);
            verifying_key.verify(&message, &sig).ok()?;
            Some(sealed)
        }
        // A signer without a signature (or the reverse) is malformed.
        _ => None,
    }
}

// ── Key conversion (Ed25519 identity → X25519 encryption) ─────────────

/// Convert an Ed25519 public key to X25519 via the birational map from
/// the Edwards curve to Montgomery form. Equivalent to libsodium's
/// `crypto_sign_ed25519_pk_to_curve25519`.
pub fn ed25519_to_x25519_public(ed25519_pk: &[u8; 32]) -> Result<[u8; 32], Error> {
    let compressed = CompressedEdwardsY(*ed25519_pk);
    let edwards = compressed
        .decompress()
        .ok_or_else(|| Error::Crypto("invalid Ed25519 public key: decompression failed".into()))?;
    Ok(edwards.to_montgomery().to_bytes())
}

/// Convert an Ed25519 secret seed to an X25519 secret: SHA-512(seed),
/// first 32 bytes, clamped. Mirrors `crypto_sign_ed25519_sk_to_curve25519`.
pub fn ed25519_to_x25519_secret(ed25519_seed: &[u8; 32]) -> [u8; 32] {
    let hash = Sha512::digest(ed25519_seed);
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&hash[..32]);
    secret[0] &= 248;
    secret[31] &= 127;
    secret[31] |= 64;
    secret
}

// ── Key derivation ────────────────────────────────────────────────────

fn derive_key(ikm: &[u8], info: &[u8]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut key = [0u8; 32];
    hkdf.expand(info, &mut key)
        .expect("HKDF-SHA256 expand to 32 bytes always succeeds");
    key
}

/// AEAD key for a symmetric envelope: the shared key bound to its topic.
fn derive_topic_key(sym_key: &[u8; SYM_KEY_LENGTH], topic: &Topic) -> [u8; 32] {
    let mut info = Vec::with_capacity(HKDF_INFO_SYM.len() + 4);
    info.extend_from_slice(HKDF_INFO_SYM);
    info.extend_from_slice(topic.as_bytes());
    derive_key(sym_key, &info)
}

/// Derive symmetric key bytes from a password.
///
/// PBKDF2-HMAC-SHA256 with a fixed iteration count and an empty salt:
/// deliberately deterministic, so every node derives the same key from
/// the same password. Interop, not an oversight.
pub fn sym_key_from_password(password: &str) -> [u8; SYM_KEY_LENGTH] {
    let mut key = [0u8; SYM_KEY_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), b"", PBKDF2_ITERATIONS, &mut key);
    key
}

// ── Seal / open ───────────────────────────────────────────────────────

fn random_nonce() -> [u8; 24] {
    use chacha20poly1305::aead::rand_core::{OsRng, RngCore};
    let mut nonce = [0u8; 24];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt for a recipient identified by their Ed25519 public key.
pub fn seal_asymmetric(
    plaintext: &[u8],
    recipient_ed25519_pk: &[u8; 32],
) -> Result<CipherPayload, Error> {
    use chacha20poly1305::aead::rand_core::OsRng;

    let recipient_x25519 = X25519PublicKey::from(ed25519_to_x25519_public(recipient_ed25519_pk)?);

    let ephemeral_secret = X25519Secret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);

    let shared_secret = ephemeral_secret.diffie_hellman(&recipient_x25519);
    let key = derive_key(shared_secret.as_bytes(), HKDF_INFO_ASYM);
    let cipher = XChaCha20Poly1305::new(&key.into());

    let nonce_bytes = random_nonce();
    let ciphertext = cipher
        .encrypt(&XNonce::from(nonce_bytes), plaintext)
        .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;

    Ok(CipherPayload {
        ciphertext,
        nonce: nonce_bytes,
        ephemeral_pk: Some(ephemeral_public.to_bytes()),
    })
}

/// Trial-decrypt an asymmetric payload with one Ed25519 secret seed.
///
/// `None` on authentication failure — the ordinary "not addressed to this
/// key" outcome.
pub fn open_asymmetric(payload: &CipherPayload, recipient_seed: &[u8; 32]) -> Option<Vec<u8>> {
    let ephemeral_pk = X25519PublicKey::from(payload.ephemeral_pk?);
    let x25519_secret = X25519Secret::from(ed25519_to_x25519_secret(recipient_seed));

    let shared_secret = x25519_secret.diffie_hellman(&ephemeral_pk);
    let key = derive_key(shared_secret.as_bytes(), HKDF_INFO_ASYM);
    let cipher = XChaCha20Poly1305::new(&key.into());

    cipher
        .decrypt(&XNonce::from(payload.nonce), payload.ciphertext.as_ref())
        .ok()
}

/// Encrypt under a shared symmetric key, bound to the envelope topic.
pub fn seal_symmetric(
    plaintext: &[u8],
    sym_key: &[u8; SYM_KEY_LENGTH],
    topic: &Topic,
) -> Result<CipherPayload, Error> {
    let key = derive_topic_key(sym_key, topic);
    let cipher = XChaCha20Poly1305::new(&key.into());

    let nonce_bytes = random_nonce();
    let ciphertext = cipher
        .encrypt(&XNonce::from(nonce_bytes), plaintext)
        .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;

    Ok(CipherPayload {
        ciphertext,
        nonce: nonce_bytes,
        ephemeral_pk: None,
    })
}

/// Trial-decrypt a symmetric payload with one shared key.
pub fn open_symmetric(
    payload: &CipherPayload,
    sym_key: &[u8; SYM_KEY_LENGTH],
    topic: &Topic,
) -> Option<Vec<u8>> {
    let key = derive_topic_key(sym_key, topic);
    let cipher = XChaCha20Poly1305::new(&key.into());
    cipher
        .decrypt(&XNonce::from(payload.nonce), payload.ciphertext.as_ref())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair(seed_byte: u8) -> ([u8; 32], [u8; 32]) {
        let seed = [seed_byte; 32];
        let signing = ed25519_dalek::SigningKey::from_bytes(&seed);
        (seed, signing.verifying_key().to_bytes())
    }

    fn topic() -> Topic {
        Topic([0x27, 0xee, 0x70, 0x4f])
    }

    #[test]
    fn asymmetric_roundtrip() {
        let (sk, pk) = keypair(42);
        let sealed = seal_asymmetric(b"hello susurrus", &pk).unwrap();
        let opened = open_asymmetric(&sealed, &sk).unwrap();
        assert_eq!(opened, b"hello susurrus");
    }

    #[test]
    fn asymmetric_wrong_key_fails() {
        let (_sk1, pk1) = keypair(1);
        let (sk2, _pk2) = keypair(2);
        let sealed = seal_asymmetric(b"secret", &pk1).unwrap();
        assert!(open_asymmetric(&sealed, &sk2).is_none());
    }

    #[test]
    fn asymmetric_tampered_ciphertext_fails() {
        let (sk, pk) = keypair(3);
        let mut sealed = seal_asymmetric(b"secret", &pk).unwrap();
        sealed.ciphertext[0] ^= 0xFF;
        assert!(open_asymmetric(&sealed, &sk).is_none());
    }

    #[test]
    fn asymmetric_encryptions_differ() {
        let (_sk, pk) = keypair(6);
        let a = seal_asymmetric(b"same message", &pk).unwrap();
        let b = seal_asymmetric(b"same message", &pk).unwrap();
        assert_ne!(a.ephemeral_pk, b.ephemeral_pk);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn symmetric_roundtrip() {
        let key = [7u8; 32];
        let sealed = seal_symmetric(b"group message", &key, &topic()).unwrap();
        assert!(!sealed.is_asymmetric());
        let opened = open_symmetric(&sealed, &key, &topic()).unwrap();
        assert_eq!(opened, b"group message");
    }

    #[test]
    fn symmetric_wrong_key_fails() {
        let sealed = seal_symmetric(b"secret", &[1u8; 32], &topic()).unwrap();
        assert!(open_symmetric(&sealed, &[2u8; 32], &topic()).is_none());
    }

    #[test]
    fn symmetric_key_is_topic_bound() {
        let key = [9u8; 32];
        let sealed = seal_symmetric(b"secret", &key, &topic()).unwrap();
        let other_topic = Topic([0, 0, 0, 1]);
        assert!(open_symmetric(&sealed, &key, &other_topic).is_none());
    }

    #[test]
    fn cipher_payload_msgpack_roundtrip() {
        let (_sk, pk) = keypair(9);
        let sealed = seal_asymmetric(b"roundtrip", &pk).unwrap();
        let decoded = CipherPayload::from_bytes(&sealed.to_bytes().unwrap()).unwrap();
        assert_eq!(sealed, decoded);

        let sym = seal_symmetric(b"roundtrip", &[4u8; 32], &topic()).unwrap();
        let decoded = CipherPayload::from_bytes(&sym.to_bytes().unwrap()).unwrap();
        assert_eq!(sym, decoded);
    }

    #[test]
    fn ciphertext_overhead_is_auth_tag() {
        let sealed = seal_symmetric(b"test payload", &[1u8; 32], &topic()).unwrap();
        assert_eq!(sealed.ciphertext.len(), b"test payload".len() + 16);
    }

    #[test]
    fn ed25519_to_x25519_public_deterministic() {
        let (_sk, pk) = keypair(8);
        assert_eq!(
            ed25519_to_x25519_public(&pk).unwrap(),
            ed25519_to_x25519_public(&pk).unwrap()
        );
    }

    #[test]
    fn x25519_secret_is_clamped() {
        let secret = ed25519_to_x25519_secret(&[0xFF; 32]);
        assert_eq!(secret[0] & 7, 0);
        assert_eq!(secret[31] & 128, 0);
        assert_eq!(secret[31] & 64, 64);
    }

    #[test]
    fn dh_symmetry() {
        let (sk_a, pk_a) = keypair(20);
        let (sk_b, pk_b) = keypair(21);

        let x_sk_a = X25519Secret::from(ed25519_to_x25519_secret(&sk_a));
        let x_pk_a = X25519PublicKey::from(ed25519_to_x25519_public(&pk_a).unwrap());
        let x_sk_b = X25519Secret::from(ed25519_to_x25519_secret(&sk_b));
        let x_pk_b = X25519PublicKey::from(ed25519_to_x25519_public(&pk_b).unwrap());

        assert_eq!(
            x_sk_a.diffie_hellman(&x_pk_b).as_bytes(),
            x_sk_b.diffie_hellman(&x_pk_a).as_bytes()
        );
    }

    #[test]
    fn password_key_deterministic() {
        assert_eq!(sym_key_from_password("hunter2"), sym_key_from_password("hunter2"));
        assert_ne!(sym_key_from_password("hunter2"), sym_key_from_password("hunter3"));
    }

    #[test]
    fn plaintext_pads_to_boundary() {
        let bytes = seal_plaintext(&topic(), b"short".to_vec(), None, None).unwrap();
        let sealed = SealedPlaintext::from_bytes(&bytes).unwrap();
        assert_eq!((sealed.payload.len() + sealed.padding.len()) % 256, 0);
        assert!(!sealed.padding.is_empty());
    }

    #[test]
    fn explicit_padding_kept_verbatim() {
        let bytes =
            seal_plaintext(&topic(), b"data".to_vec(), Some(vec![0xAA; 3]), None).unwrap();
        let sealed = SealedPlaintext::from_bytes(&bytes).unwrap();
        assert_eq!(sealed.padding, vec![0xAA; 3]);
    }

    #[test]
    fn signed_plaintext_opens_with_signer() {
        let (sk, pk) = keypair(30);
        let bytes = seal_plaintext(&topic(), b"signed".to_vec(), None, Some(&sk)).unwrap();
        let sealed = open_plaintext(&topic(), &bytes).unwrap();
        assert_eq!(sealed.signer, Some(pk));
        assert_eq!(sealed.payload, b"signed");
    }

    #[test]
    fn unsigned_plaintext_opens_without_signer() {
        let bytes = seal_plaintext(&topic(), b"anon".to_vec(), None, None).unwrap();
        let sealed = open_plaintext(&topic(), &bytes).unwrap();
        assert_eq!(sealed.signer, None);
        assert_eq!(sealed.signature, None);
    }

    #[test]
    fn tampered_signed_payload_rejected() {
        let (sk, _pk) = keypair(31);
        let bytes = seal_plaintext(&topic(), b"original".to_vec(), None, Some(&sk)).unwrap();
        let mut sealed = SealedPlaintext::from_bytes(&bytes).unwrap();
        sealed.payload = b"tampered".to_vec();
        let reencoded = rmp_serde::to_vec(&sealed).unwrap();
        assert!(open_plaintext(&topic(), &reencoded).is_none());
    }

    #[test]
    fn signature_is_topic_bound() {
        let (sk, _pk) = keypair(32);
        let bytes = seal_plaintext(&topic(), b"routed".to_vec(), None, Some(&sk)).unwrap();
        assert!(open_plaintext(&topic(), &bytes).is_some());
        assert!(open_plaintext(&Topic([0, 0, 0, 9]), &bytes).is_none());
    }

    #[test]
    fn signer_without_signature_rejected() {
        let sealed = SealedPlaintext {
            payload: b"odd".to_vec(),
            padding: Vec::new(),
            signer: Some([1u8; 32]),
            signature: None,
        };
        let bytes = rmp_serde::to_vec(&sealed).unwrap();
        assert!(open_plaintext(&topic(), &bytes).is_none());
    }
}
