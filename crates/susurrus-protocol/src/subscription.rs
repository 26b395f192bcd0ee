/// Subscription registry — standing filters over decrypted envelopes.
///
/// Each subscription owns a bounded channel; the relay's single delivery
/// worker pushes matches with `try_send`, so one slow subscriber drops its
/// own messages instead of stalling everyone else. Arrival order per
/// subscription follows envelope processing order.
use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;

use crate::bloom::BloomFilter;
use crate::envelope::Envelope;
use crate::keystore::DecryptedMessage;
use crate::types::{EnvelopeId, KeyId, SubscriptionId, Topic};

/// Default per-subscription delivery buffer.
const DELIVERY_BUFFER: usize = 64;

/// What a subscriber asked to see.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    /// Proof-of-work floor. Stored but unenforced — the protocol reserves
    /// the field without specifying a scheme.
    pub min_pow: f64,
    /// Topics to match; an envelope must carry one of these.
    pub topics: HashSet<Topic>,
    /// Only accept envelopes opened by this key pair.
    pub private_key_id: Option<KeyId>,
    /// Only accept envelopes opened by this symmetric key.
    pub sym_key_id: Option<KeyId>,
    /// Accept envelopes that arrived via direct peer messaging rather
    /// than broadcast.
    pub allow_p2p: bool,
}

/// One delivered match.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionMessage {
    pub subscription_id: SubscriptionId,
    pub signer_public_key: Option<[u8; 32]>,
    pub topic: Topic,
    pub payload: Vec<u8>,
    pub padding: Vec<u8>,
    pub envelope_id: EnvelopeId,
    pub ttl: u64,
}

struct Subscription {
    filter: SubscriptionFilter,
    tx: mpsc::Sender<SubscriptionMessage>,
}

impl Subscription {
    fn matches(&self, msg: &DecryptedMessage, envelope: &Envelope, direct: bool) -> bool {
        if direct && !self.filter.allow_p2p {
            return false;
        }
        if !self.filter.topics.contains(&envelope.topic) {
            return false;
        }
        if let Some(key_id) = self.filter.private_key_id {
            if msg.symmetric || msg.key_id != key_id {
                return false;
            }
        }
        if let Some(key_id) = self.filter.sym_key_id {
            if !msg.symmetric || msg.key_id != key_id {
                return false;
            }
        }
        true
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<SubscriptionId, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Register a filter; returns the id and the receiving end of its
    /// delivery channel.
    pub fn subscribe(
        &mut self,
        filter: SubscriptionFilter,
    ) -> (SubscriptionId, mpsc::Receiver<SubscriptionMessage>) {
        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);

        let mut id = SubscriptionId::random();
        while self.subscriptions.contains_key(&id) {
            id = SubscriptionId::random();
        }
        self.subscriptions.insert(id, Subscription { filter, tx });
        (id, rx)
    }

    /// Cancel a subscription: future matches stop, messages already queued
    /// on the channel stay readable. Returns whether one was removed.
    pub fn unsubscribe(&mut self, id: &SubscriptionId) -> bool {
        self.subscriptions.remove(id).is_some()
    }

    /// Fan a decrypted envelope out to every matching subscription.
    ///
    /// Returns how many subscriptions were handed the message. Full
    /// buffers drop (with a warning); closed receivers are pruned.
    pub fn deliver(
        &mut self,
        msg: &DecryptedMessage,
        envelope: &Envelope,
        envelope_id: EnvelopeId,
        direct: bool,
    ) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, subscription) in &self.subscriptions {
            if !subscription.matches(msg, envelope, direct) {
                continue;
            }

            let delivery = SubscriptionMessage {
                subscription_id: *id,
                signer_public_key: msg.signer_public_key,
                topic: envelope.topic,
                payload: msg.payload.clone(),
                padding: msg.padding.clone(),
                envelope_id,
                ttl: envelope.ttl,
            };

            match subscription.tx.try_send(delivery) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subscription = %id, "subscriber buffer full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            self.subscriptions.remove(&id);
        }
        delivered
    }

    /// Union of the topic blooms of every active subscription — the
    /// node's advertised interests, and the gate for decrypt attempts.
    pub fn interest_bloom(&self) -> BloomFilter {
        let mut interests = BloomFilter::empty();
        for subscription in self.subscriptions.values() {
            for topic in &subscription.filter.topics {
                interests.merge(&BloomFilter::from_topic(topic));
            }
        }
        interests
    }
}
