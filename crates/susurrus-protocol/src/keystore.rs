/// Key material owned by the relay.
///
/// One map, two entry variants — asymmetric Ed25519 identities and 32-byte
/// symmetric keys — under random 32-byte identifiers unique across both.
/// Entries are zeroized when dropped.
///
/// `try_decrypt` is the protocol's addressing mechanism: a linear scan of
/// held keys against an envelope's payload. On a multi-tenant relay most
/// envelopes open with none of them, and that is the expected `None`, not
/// a fault.
use std::collections::HashMap;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::types::{KeyId, Topic, SYM_KEY_LENGTH};

/// Attempts to mint an unused random id before giving up.
const ID_RETRIES: usize = 4;

#[derive(Zeroize, ZeroizeOnDrop)]
enum KeyEntry {
    /// Ed25519 seed; the verifying key is derived on demand, and the
    /// X25519 encryption keys via the Edwards→Montgomery conversions.
    Pair { seed: [u8; 32] },
    Sym { key: [u8; SYM_KEY_LENGTH] },
}

/// A successfully opened envelope payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedMessage {
    pub payload: Vec<u8>,
    pub padding: Vec<u8>,
    /// Ed25519 verifying key recovered from the embedded signature, when
    /// the sender signed.
    pub signer_public_key: Option<[u8; 32]>,
    /// The key that opened the envelope.
    pub key_id: KeyId,
    pub symmetric: bool,
}

#[derive(Default)]
pub struct KeyStore {
    keys: HashMap<KeyId, KeyEntry>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn insert(&mut self, entry: KeyEntry) -> Result<KeyId, Error> {
        for _ in 0..ID_RETRIES {
            let id = KeyId::random();
            if let std::collections::hash_map::Entry::Vacant(slot) = self.keys.entry(id) {
                slot.insert(entry);
                return Ok(id);
            }
        }
        Err(Error::DuplicateKeyId)
    }

    // ── Asymmetric ────────────────────────────────────────────────────

    /// Generate a fresh Ed25519 identity.
    pub fn new_key_pair(&mut self) -> Result<KeyId, Error> {
        use rand::RngCore;
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        self.insert(KeyEntry::Pair { seed })
    }

    /// Import an externally supplied 32-byte private seed.
    pub fn add_private_key(&mut self, raw: &[u8]) -> Result<KeyId, Error> {
        let seed: [u8; 32] = raw.try_into().map_err(|_| Error::InvalidKeyLength {
            expected: 32,
            actual: raw.len(),
        })?;
        self.insert(KeyEntry::Pair { seed })
    }

    pub fn public_key(&self, id: &KeyId) -> Result<[u8; 32], Error> {
        match self.keys.get(id) {
            Some(KeyEntry::Pair { seed }) => Ok(ed25519_dalek::SigningKey::from_bytes(seed)
                .verifying_key()
                .to_bytes()),
            _ => Err(Error::NotFound),
        }
    }

    pub fn private_key(&self, id: &KeyId) -> Result<[u8; 32], Error> {
        match self.keys.get(id) {
            Some(KeyEntry::Pair { seed }) => Ok(*seed),
            _ => Err(Error::NotFound),
        }
    }

    /// Never errors — a symmetric entry under this id reports `false`.
    pub fn has_key_pair(&self, id: &KeyId) -> bool {
        matches!(self.keys.get(id), Some(KeyEntry::Pair { .. }))
    }

    // ── Symmetric ─────────────────────────────────────────────────────

    pub fn new_sym_key(&mut self) -> Result<KeyId, Error> {
        use rand::RngCore;
        let mut key = [0u8; SYM_KEY_LENGTH];
        rand::rng().fill_bytes(&mut key);
        self.insert(KeyEntry::Sym { key })
    }

    pub fn add_sym_key(&mut self, raw: &[u8]) -> Result<KeyId, Error> {
        let key: [u8; SYM_KEY_LENGTH] = raw.try_into().map_err(|_| Error::InvalidKeyLength {
            expected: SYM_KEY_LENGTH,
            actual: raw.len(),
        })?;
        self.insert(KeyEntry::Sym { key })
    }

    /// Derive a symmetric key from a password. Same password, same key
    /// bytes — on this store or any other. The id is fresh either way.
    pub fn sym_key_from_password(&mut self, password: &str) -> Result<KeyId, Error> {
        let key = crypto::sym_key_from_password(password);
        self.insert(KeyEntry::Sym { key })
    }

    pub fn has_sym_key(&self, id: &KeyId) -> bool {
        matches!(self.keys.get(id), Some(KeyEntry::Sym { .. }))
    }

    pub fn sym_key(&self, id: &KeyId) -> Result<[u8; SYM_KEY_LENGTH], Error> {
        match self.keys.get(id) {
            Some(KeyEntry::Sym { key }) => Ok(*key),
            _ => Err(Error::NotFound),
        }
    }

    // ── Shared ────────────────────────────────────────────────────────

    /// Remove a key of either variant. Returns whether one was removed.
    /// Wrong-length identifiers never reach this point — `KeyId` parsing
    /// rejects them with `InvalidId` at the API boundary.
    pub fn delete(&mut self, id: &KeyId) -> bool {
        self.keys.remove(id).is_some()
    }

    // ── Encryption dispatch ───────────────────────────────────────────

    /// Build ciphertext for a publish request under a held symmetric key.
    pub fn encrypt_symmetric(
        &self,
        key_id: &KeyId,
        topic: &Topic,
        payload: Vec<u8>,
        padding: Option<Vec<u8>>,
        sig_key_id: Option<&KeyId>,
    ) -> Result<Vec<u8>, Error> {
        let key = self.sym_key(key_id)?;
        let plaintext = crypto::seal_plaintext(topic, payload, padding, self.signer(sig_key_id)?.as_ref())?;
        crypto::seal_symmetric(&plaintext, &key, topic)?.to_bytes()
    }

    /// Build ciphertext for a publish request addressed to a public key
    /// (which need not be held by this store).
    pub fn encrypt_asymmetric(
        &self,
        recipient_pk: &[u8; 32],
        topic: &Topic,
        payload: Vec<u8>,
        padding: Option<Vec<u8>>,
        sig_key_id: Option<&KeyId>,
    ) -> Result<Vec<u8>, Error> {
        let plaintext = crypto::seal_plaintext(topic, payload, padding, self.signer(sig_key_id)?.as_ref())?;
        crypto::seal_asymmetric(&plaintext, recipient_pk)?.to_bytes()
    }

    fn signer(&self, sig_key_id: Option<&KeyId>) -> Result<Option<[u8; 32]>, Error> {
        match sig_key_id {
            Some(id) => Ok(Some(self.private_key(id)?)),
            None => Ok(None),
        }
    }

    // ── Decryption dispatch ───────────────────────────────────────────

    /// Attempt every held key against an envelope's payload.
    ///
    /// The payload's shape selects the scheme (an ephemeral public key
    /// marks it asymmetric), so each key is tried at most once. First
    /// success wins; `None` means no held key opens it and the envelope
    /// should be relayed unchanged.
    pub fn try_decrypt(&self, envelope: &Envelope) -> Option<DecryptedMessage> {
        let payload = crypto::CipherPayload::from_bytes(&envelope.data).ok()?;
        let asymmetric = payload.is_asymmetric();

        for (id, entry) in &self.keys {
            let plaintext = match (entry, asymmetric) {
                (KeyEntry::Pair { seed }, true) => crypto::open_asymmetric(&payload, seed),
                (KeyEntry::Sym { key }, false) => {
                    crypto::open_symmetric(&payload, key, &envelope.topic)
                }
                _ => None,
            };

            if let Some(plaintext) = plaintext {
                let sealed = crypto::open_plaintext(&envelope.topic, &plaintext)?;
                return Some(DecryptedMessage {
                    payload: sealed.payload,
                    padding: sealed.padding,
                    signer_public_key: sealed.signer,
                    key_id: *id,
                    symmetric: !asymmetric,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_secs;

    fn envelope_with(data: Vec<u8>, topic: Topic) -> Envelope {
        Envelope::new(now_secs() + 50, 50, topic, data, 0)
    }

    fn topic() -> Topic {
        Topic([0x27, 0xee, 0x70, 0x4f])
    }

    #[test]
    fn new_key_pair_is_retrievable() {
        let mut store = KeyStore::new();
        let id = store.new_key_pair().unwrap();

        assert!(store.has_key_pair(&id));
        assert!(!store.has_sym_key(&id));

        let seed = store.private_key(&id).unwrap();
        let expected = ed25519_dalek::SigningKey::from_bytes(&seed)
            .verifying_key()
            .to_bytes();
        assert_eq!(store.public_key(&id).unwrap(), expected);
    }

    #[test]
    fn add_private_key_derives_public() {
        let mut store = KeyStore::new();
        let seed = [11u8; 32];
        let id = store.add_private_key(&seed).unwrap();

        assert_eq!(store.private_key(&id).unwrap(), seed);
        assert_eq!(
            store.public_key(&id).unwrap(),
            ed25519_dalek::SigningKey::from_bytes(&seed)
                .verifying_key()
                .to_bytes()
        );
    }

    #[test]
    fn add_private_key_wrong_length() {
        let mut store = KeyStore::new();
        let err = store.add_private_key(&[1u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidKeyLength {
                expected: 32,
                actual: 16
            }
        ));
    }

    #[test]
    fn sym_key_crud() {
        let mut store = KeyStore::new();
        let id = store.new_sym_key().unwrap();
        assert!(store.has_sym_key(&id));
        assert!(!store.has_key_pair(&id));
        assert_eq!(store.sym_key(&id).unwrap().len(), SYM_KEY_LENGTH);

        let raw = [5u8; 32];
        let imported = store.add_sym_key(&raw).unwrap();
        assert_eq!(store.sym_key(&imported).unwrap(), raw);

        assert!(matches!(
            store.add_sym_key(&[1u8; 31]).unwrap_err(),
            Error::InvalidKeyLength { .. }
        ));
    }

    #[test]
    fn lookup_miss_is_not_found() {
        let store = KeyStore::new();
        let id = KeyId::random();
        assert!(matches!(store.public_key(&id).unwrap_err(), Error::NotFound));
        assert!(matches!(store.sym_key(&id).unwrap_err(), Error::NotFound));
    }

    #[test]
    fn wrong_variant_is_not_found() {
        let mut store = KeyStore::new();
        let sym_id = store.new_sym_key().unwrap();
        let pair_id = store.new_key_pair().unwrap();

        assert!(matches!(store.public_key(&sym_id).unwrap_err(), Error::NotFound));
        assert!(matches!(store.private_key(&sym_id).unwrap_err(), Error::NotFound));
        assert!(matches!(store.sym_key(&pair_id).unwrap_err(), Error::NotFound));
    }

    #[test]
    fn delete_either_variant() {
        let mut store = KeyStore::new();
        let sym_id = store.new_sym_key().unwrap();
        let pair_id = store.new_key_pair().unwrap();

        assert!(store.delete(&sym_id));
        assert!(store.delete(&pair_id));
        assert!(!store.delete(&sym_id));
        assert!(matches!(store.sym_key(&sym_id).unwrap_err(), Error::NotFound));
        assert!(store.is_empty());
    }

    #[test]
    fn password_key_deterministic_across_stores() {
        let mut a = KeyStore::new();
        let mut b = KeyStore::new();
        let id_a = a.sym_key_from_password("open sesame").unwrap();
        let id_b = b.sym_key_from_password("open sesame").unwrap();

        assert_ne!(id_a, id_b, "ids are fresh randomness");
        assert_eq!(a.sym_key(&id_a).unwrap(), b.sym_key(&id_b).unwrap());
    }

    #[test]
    fn symmetric_roundtrip_through_envelope() {
        let mut store = KeyStore::new();
        let key_id = store.new_sym_key().unwrap();

        let data = store
            .encrypt_symmetric(&key_id, &topic(), b"hello".to_vec(), None, None)
            .unwrap();
        let envelope = envelope_with(data, topic());

        let msg = store.try_decrypt(&envelope).expect("decrypts");
        assert_eq!(msg.payload, b"hello");
        assert_eq!(msg.key_id, key_id);
        assert!(msg.symmetric);
        assert_eq!(msg.signer_public_key, None);
    }

    #[test]
    fn asymmetric_roundtrip_through_envelope() {
        let mut store = KeyStore::new();
        let key_id = store.new_key_pair().unwrap();
        let pk = store.public_key(&key_id).unwrap();

        let data = store
            .encrypt_asymmetric(&pk, &topic(), b"direct".to_vec(), None, None)
            .unwrap();
        let envelope = envelope_with(data, topic());

        let msg = store.try_decrypt(&envelope).expect("decrypts");
        assert_eq!(msg.payload, b"direct");
        assert_eq!(msg.key_id, key_id);
        assert!(!msg.symmetric);
    }

    #[test]
    fn signed_publish_surfaces_signer() {
        let mut store = KeyStore::new();
        let sym_id = store.new_sym_key().unwrap();
        let sig_id = store.new_key_pair().unwrap();
        let signer_pk = store.public_key(&sig_id).unwrap();

        let data = store
            .encrypt_symmetric(&sym_id, &topic(), b"signed".to_vec(), None, Some(&sig_id))
            .unwrap();
        let msg = store.try_decrypt(&envelope_with(data, topic())).unwrap();
        assert_eq!(msg.signer_public_key, Some(signer_pk));
    }

    #[test]
    fn try_decrypt_without_matching_key_is_none() {
        let mut sender = KeyStore::new();
        let key_id = sender.new_sym_key().unwrap();
        let data = sender
            .encrypt_symmetric(&key_id, &topic(), b"private".to_vec(), None, None)
            .unwrap();

        let mut relay = KeyStore::new();
        relay.new_sym_key().unwrap();
        relay.new_key_pair().unwrap();
        assert!(relay.try_decrypt(&envelope_with(data, topic())).is_none());
    }

    #[test]
    fn try_decrypt_garbage_data_is_none() {
        let mut store = KeyStore::new();
        store.new_sym_key().unwrap();
        assert!(store
            .try_decrypt(&envelope_with(b"not a cipher payload".to_vec(), topic()))
            .is_none());
    }

    #[test]
    fn encrypt_with_unknown_sym_key_is_not_found() {
        let store = KeyStore::new();
        let err = store
            .encrypt_symmetric(&KeyId::random(), &topic(), vec![], None, None)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[test]
    fn deleted_key_no_longer_decrypts() {
        let mut store = KeyStore::new();
        let key_id = store.new_sym_key().unwrap();
        let data = store
            .encrypt_symmetric(&key_id, &topic(), b"gone".to_vec(), None, None)
            .unwrap();
        let envelope = envelope_with(data, topic());

        assert!(store.try_decrypt(&envelope).is_some());
        store.delete(&key_id);
        assert!(store.try_decrypt(&envelope).is_none());
    }
}
