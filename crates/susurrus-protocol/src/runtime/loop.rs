/// The relay worker loop.
///
/// A single async task that owns all mutable relay state and multiplexes
/// over the merged transport event queue, application commands, and the
/// dedup cleanup timer. Every envelope walks the same path: decode,
/// freshness, dedup, decrypt attempt, local delivery, bridge relay.
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::bloom::BloomFilter;
use crate::dedup::DedupTracker;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::keystore::KeyStore;
use crate::subscription::SubscriptionRegistry;
use crate::transport::{PeerId, Transport, TransportEvent, TransportId};
use crate::types::{now_secs, EnvelopeId, DEFAULT_TTL_SECS};

use super::{PostRequest, RelayCommand, RelayConfig, RelayEvent};

/// Everything the worker owns. No locks — one task, one owner.
struct RelayState {
    transports: Vec<Box<dyn Transport>>,
    keystore: KeyStore,
    subscriptions: SubscriptionRegistry,
    dedup: DedupTracker,
    /// Cached union of subscribed topic blooms.
    interests: BloomFilter,
    peers: HashMap<TransportId, HashSet<PeerId>>,
    /// Bridging requires at least two attached transports.
    bridge: bool,
    config: RelayConfig,
    event_tx: mpsc::Sender<RelayEvent>,
}

pub(super) async fn relay_loop(
    transports: Vec<Box<dyn Transport>>,
    keystore: KeyStore,
    subscriptions: SubscriptionRegistry,
    config: RelayConfig,
    mut cmd_rx: mpsc::Receiver<RelayCommand>,
    mut transport_rx: mpsc::Receiver<TransportEvent>,
    event_tx: mpsc::Sender<RelayEvent>,
) {
    let bridge = config.bridge && transports.len() > 1;
    let mut state = RelayState {
        dedup: DedupTracker::new(config.dedup_horizon),
        interests: subscriptions.interest_bloom(),
        peers: HashMap::new(),
        bridge,
        transports,
        keystore,
        subscriptions,
        config,
        event_tx,
    };

    let mut dedup_cleanup = tokio::time::interval(state.config.dedup_cleanup_interval);
    // Skip the immediate first tick.
    dedup_cleanup.tick().await;

    tracing::info!(
        transports = state.transports.len(),
        bridge = state.bridge,
        "relay loop started"
    );

    loop {
        tokio::select! {
            Some(event) = transport_rx.recv() => {
                state.handle_transport_event(event).await;
            }
            command = cmd_rx.recv() => {
                match command {
                    Some(RelayCommand::Shutdown) | None => break,
                    Some(command) => state.handle_command(command).await,
                }
            }
            _ = dedup_cleanup.tick() => {
                if let Some(cutoff) = Instant::now().checked_sub(state.config.dedup_horizon) {
                    state.dedup.evict_older_than(cutoff);
                }
            }
        }
    }

    // Stop accepting commands; drain envelopes already queued, bounded by
    // the shutdown timeout, then close the transports.
    cmd_rx.close();
    let deadline = Instant::now() + state.config.shutdown_timeout;
    while Instant::now() < deadline {
        match transport_rx.try_recv() {
            Ok(event) => state.handle_transport_event(event).await,
            Err(_) => break,
        }
    }

    for transport in state.transports.iter_mut() {
        transport.stop().await;
    }
    tracing::info!("relay loop stopped");
}

impl RelayState {
    // ── Inbound (transport → relay) ───────────────────────────────────

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerConnected { transport, peer } => {
                tracing::debug!(%transport, %peer, "peer connected");
                self.peers.entry(transport).or_default().insert(peer.clone());
                self.emit(RelayEvent::PeerConnected { transport, peer });
            }
            TransportEvent::PeerDisconnected { transport, peer } => {
                tracing::debug!(%transport, %peer, "peer disconnected");
                if let Some(connected) = self.peers.get_mut(&transport) {
                    connected.remove(&peer);
                }
                self.emit(RelayEvent::PeerDisconnected { transport, peer });
            }
            TransportEvent::EnvelopeReceived {
                transport,
                peer,
                frame,
                direct,
            } => {
                self.process_envelope(transport, peer, frame, direct).await;
            }
        }
    }

    async fn process_envelope(
        &mut self,
        transport: TransportId,
        peer: PeerId,
        frame: Bytes,
        direct: bool,
    ) {
        let envelope = match Envelope::from_bytes(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(%transport, %peer, "dropping malformed envelope: {e}");
                self.emit(RelayEvent::Dropped {
                    envelope_id: None,
                    reason: e.to_string(),
                });
                return;
            }
        };
        let id = envelope.id();

        if envelope.is_expired(now_secs()) && !self.config.trusted_peers.contains(&peer) {
            tracing::debug!(envelope = %id, %peer, "dropping expired envelope");
            self.emit(RelayEvent::Dropped {
                envelope_id: Some(id),
                reason: "expired".into(),
            });
            return;
        }

        // One horizon per transport: a re-announcement on this transport
        // ends here, a first sight on another transport does not.
        if self.dedup.seen(&transport, &id) {
            tracing::trace!(envelope = %id, %transport, "duplicate envelope");
            return;
        }
        self.dedup.record(transport, id, Instant::now());

        self.deliver_local(&envelope, id, direct);

        if self.bridge {
            self.relay_across_bridge(transport, id, frame).await;
        }
    }

    /// Try held keys and fan matches out to subscribers. The bloom gate
    /// skips the decrypt scan for topics nobody subscribed to.
    fn deliver_local(&mut self, envelope: &Envelope, id: EnvelopeId, direct: bool) {
        if !self.config.ignore_bloom && !self.interests.contains(&envelope.bloom()) {
            return;
        }
        let Some(message) = self.keystore.try_decrypt(envelope) else {
            return;
        };

        let before = self.subscriptions.len();
        let delivered = self.subscriptions.deliver(&message, envelope, id, direct);
        if self.subscriptions.len() != before {
            // deliver() pruned closed subscriptions.
            self.interests = self.subscriptions.interest_bloom();
        }
        if delivered > 0 {
            tracing::debug!(envelope = %id, subscriptions = delivered, "delivered");
            self.emit(RelayEvent::Delivered {
                envelope_id: id,
                subscriptions: delivered,
            });
        }
    }

    /// Re-broadcast a frame to every other transport that has not seen
    /// the envelope, recording it there so the far side of each leg knows
    /// this node already emitted it.
    async fn relay_across_bridge(&mut self, origin: TransportId, id: EnvelopeId, frame: Bytes) {
        for index in 0..self.transports.len() {
            let target = self.transports[index].id();
            if target == origin || self.dedup.seen(&target, &id) {
                continue;
            }
            self.dedup.record(target, id, Instant::now());

            let result = self.transports[index].broadcast(frame.clone()).await;
            match result {
                Ok(()) => {
                    tracing::debug!(envelope = %id, from = %origin, to = %target, "relayed");
                    self.emit(RelayEvent::Relayed {
                        envelope_id: id,
                        from: origin,
                        to: target,
                    });
                }
                Err(e) => {
                    tracing::warn!(envelope = %id, to = %target, "relay broadcast failed: {e}");
                    self.emit(RelayEvent::Error {
                        description: format!("relay to {target} failed: {e}"),
                    });
                }
            }
        }
    }

    // ── Commands (app → relay) ────────────────────────────────────────

    async fn handle_command(&mut self, command: RelayCommand) {
        match command {
            RelayCommand::Post { request, reply } => {
                let _ = reply.send(self.publish(request).await);
            }
            RelayCommand::Subscribe { filter, reply } => {
                let (id, rx) = self.subscriptions.subscribe(filter);
                self.interests = self.subscriptions.interest_bloom();
                tracing::debug!(subscription = %id, "subscribed");
                let _ = reply.send((id, rx));
            }
            RelayCommand::Unsubscribe { id, reply } => {
                let removed = self.subscriptions.unsubscribe(&id);
                if removed {
                    self.interests = self.subscriptions.interest_bloom();
                }
                let _ = reply.send(removed);
            }
            RelayCommand::NewKeyPair { reply } => {
                let _ = reply.send(self.keystore.new_key_pair());
            }
            RelayCommand::AddPrivateKey { raw, reply } => {
                let _ = reply.send(self.keystore.add_private_key(&raw));
            }
            RelayCommand::GetPublicKey { id, reply } => {
                let _ = reply.send(self.keystore.public_key(&id));
            }
            RelayCommand::GetPrivateKey { id, reply } => {
                let _ = reply.send(self.keystore.private_key(&id));
            }
            RelayCommand::HasKeyPair { id, reply } => {
                let _ = reply.send(self.keystore.has_key_pair(&id));
            }
            RelayCommand::NewSymKey { reply } => {
                let _ = reply.send(self.keystore.new_sym_key());
            }
            RelayCommand::AddSymKey { raw, reply } => {
                let _ = reply.send(self.keystore.add_sym_key(&raw));
            }
            RelayCommand::SymKeyFromPassword { password, reply } => {
                let _ = reply.send(self.keystore.sym_key_from_password(&password));
            }
            RelayCommand::HasSymKey { id, reply } => {
                let _ = reply.send(self.keystore.has_sym_key(&id));
            }
            RelayCommand::GetSymKey { id, reply } => {
                let _ = reply.send(self.keystore.sym_key(&id));
            }
            RelayCommand::DeleteKey { id, reply } => {
                let _ = reply.send(self.keystore.delete(&id));
            }
            RelayCommand::ConnectedPeers { reply } => {
                let connected = self
                    .peers
                    .values()
                    .flat_map(|peers| peers.iter().cloned())
                    .collect();
                let _ = reply.send(connected);
            }
            // Handled by the loop itself.
            RelayCommand::Shutdown => {}
        }
    }

    /// Encrypt, build, and inject a locally originated envelope.
    async fn publish(&mut self, request: PostRequest) -> Result<EnvelopeId, Error> {
        let PostRequest {
            sym_key_id,
            public_key,
            sig_key_id,
            ttl,
            topic,
            payload,
            padding,
            target_peer,
            ..
        } = request;

        let data = match (sym_key_id, public_key) {
            (Some(key_id), None) => self.keystore.encrypt_symmetric(
                &key_id,
                &topic,
                payload,
                padding,
                sig_key_id.as_ref(),
            )?,
            (None, Some(recipient)) => self.keystore.encrypt_asymmetric(
                &recipient,
                &topic,
                payload,
                padding,
                sig_key_id.as_ref(),
            )?,
            _ => {
                return Err(Error::InvalidRequest {
                    reason: "post needs exactly one of sym_key_id or public_key".into(),
                })
            }
        };

        let ttl = if ttl == 0 { DEFAULT_TTL_SECS } else { ttl };
        let envelope = Envelope::new(now_secs() + ttl, ttl, topic, data, 0);
        let id = envelope.id();
        let frame = Bytes::from(envelope.to_bytes()?);

        // Record our own id as seen everywhere first: the node must never
        // relay back to itself an envelope it just originated.
        let now = Instant::now();
        for transport in &self.transports {
            self.dedup.record(transport.id(), id, now);
        }

        // Local subscribers see the post exactly once — any loopback copy
        // from the network is already inside the dedup horizon.
        self.deliver_local(&envelope, id, false);

        match target_peer {
            Some(peer) => {
                for transport in &self.transports {
                    if let Err(e) = transport.send(&peer, frame.clone()).await {
                        tracing::warn!(%peer, transport = %transport.id(), "direct send failed: {e}");
                    }
                }
            }
            None => {
                for transport in &self.transports {
                    if let Err(e) = transport.broadcast(frame.clone()).await {
                        tracing::warn!(transport = %transport.id(), "broadcast failed: {e}");
                        self.emit(RelayEvent::Error {
                            description: format!("broadcast on {} failed: {e}", transport.id()),
                        });
                    }
                }
            }
        }

        tracing::debug!(envelope = %id, "posted");
        Ok(id)
    }

    /// Best-effort observability — a stalled consumer loses events, never
    /// envelopes.
    fn emit(&self, event: RelayEvent) {
        let _ = self.event_tx.try_send(event);
    }
}
