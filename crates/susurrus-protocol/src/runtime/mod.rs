/// Relay runtime — wires the key store, dedup tracker, and subscription
/// registry to one or two live transports behind a channel-based API.
///
/// All inbound envelopes from every transport funnel into a single event
/// queue consumed by one worker task, which owns every piece of mutable
/// state. Serializable processing for free, and the dedup tracker never
/// races its own read-then-write.
mod r#loop;

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::Error;
use crate::keystore::KeyStore;
use crate::subscription::{SubscriptionFilter, SubscriptionMessage, SubscriptionRegistry};
use crate::transport::{PeerId, Transport, TransportEvent, TransportId};
use crate::types::{EnvelopeId, KeyId, SubscriptionId, Topic};

/// Relay events buffer (best-effort observability stream).
const EVENT_BUFFER: usize = 64;

// ── Configuration ─────────────────────────────────────────────────────

pub struct RelayConfig {
    /// Re-broadcast envelopes between transports. Only effective with at
    /// least two attached — a single-stack node never bridges.
    pub bridge: bool,
    /// Attempt decryption of every envelope, even for topics with no
    /// local subscriber.
    pub ignore_bloom: bool,
    /// Peers whose envelopes skip the freshness check. Membership in this
    /// set is the entire trust predicate.
    pub trusted_peers: HashSet<PeerId>,
    /// How long an envelope id stays in the dedup horizon.
    pub dedup_horizon: Duration,
    /// Interval for the opportunistic dedup sweep.
    pub dedup_cleanup_interval: Duration,
    /// Grace period for draining queued envelopes on shutdown.
    pub shutdown_timeout: Duration,
    /// Command channel capacity.
    pub command_buffer: usize,
    /// Merged inbound transport event queue capacity.
    pub inbound_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bridge: false,
            ignore_bloom: false,
            trusted_peers: HashSet::new(),
            dedup_horizon: Duration::from_secs(600),
            dedup_cleanup_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
            command_buffer: 64,
            inbound_buffer: 256,
        }
    }
}

// ── Commands (app → relay) ────────────────────────────────────────────

/// A local publish request.
///
/// Exactly one of `sym_key_id` / `public_key` selects the encryption
/// target. `pow_time` and `pow_target` are carried for wire compatibility
/// and ignored — no proof-of-work scheme is specified.
#[derive(Debug, Clone, Default)]
pub struct PostRequest {
    pub sym_key_id: Option<KeyId>,
    pub public_key: Option<[u8; 32]>,
    /// Sign the plaintext with this held key pair.
    pub sig_key_id: Option<KeyId>,
    /// Seconds until expiry; `0` means the protocol default.
    pub ttl: u64,
    pub topic: Topic,
    pub payload: Vec<u8>,
    /// Explicit protocol padding; random boundary padding when `None`.
    pub padding: Option<Vec<u8>>,
    pub pow_time: Option<u64>,
    pub pow_target: Option<f64>,
    /// Send directly to one peer instead of broadcasting.
    pub target_peer: Option<PeerId>,
}

/// Commands the application sends to the relay worker.
pub enum RelayCommand {
    Post {
        request: PostRequest,
        reply: oneshot::Sender<Result<EnvelopeId, Error>>,
    },
    Subscribe {
        filter: SubscriptionFilter,
        reply: oneshot::Sender<(SubscriptionId, mpsc::Receiver<SubscriptionMessage>)>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
    NewKeyPair {
        reply: oneshot::Sender<Result<KeyId, Error>>,
    },
    AddPrivateKey {
        raw: Vec<u8>,
        reply: oneshot::Sender<Result<KeyId, Error>>,
    },
    GetPublicKey {
        id: KeyId,
        reply: oneshot::Sender<Result<[u8; 32], Error>>,
    },
    GetPrivateKey {
        id: KeyId,
        reply: oneshot::Sender<Result<[u8; 32], Error>>,
    },
    HasKeyPair {
        id: KeyId,
        reply: oneshot::Sender<bool>,
    },
    NewSymKey {
        reply: oneshot::Sender<Result<KeyId, Error>>,
    },
    AddSymKey {
        raw: Vec<u8>,
        reply: oneshot::Sender<Result<KeyId, Error>>,
    },
    SymKeyFromPassword {
        password: String,
        reply: oneshot::Sender<Result<KeyId, Error>>,
    },
    HasSymKey {
        id: KeyId,
        reply: oneshot::Sender<bool>,
    },
    GetSymKey {
        id: KeyId,
        reply: oneshot::Sender<Result<[u8; 32], Error>>,
    },
    DeleteKey {
        id: KeyId,
        reply: oneshot::Sender<bool>,
    },
    ConnectedPeers {
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    Shutdown,
}

// ── Events (relay → app) ──────────────────────────────────────────────

/// Observability stream. Best-effort: emitted with `try_send`, a stalled
/// consumer loses events, never envelopes.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    PeerConnected {
        transport: TransportId,
        peer: PeerId,
    },
    PeerDisconnected {
        transport: TransportId,
        peer: PeerId,
    },
    /// An envelope matched local subscriptions.
    Delivered {
        envelope_id: EnvelopeId,
        subscriptions: usize,
    },
    /// An envelope was re-broadcast across the bridge.
    Relayed {
        envelope_id: EnvelopeId,
        from: TransportId,
        to: TransportId,
    },
    /// An envelope was discarded before processing completed.
    Dropped {
        envelope_id: Option<EnvelopeId>,
        reason: String,
    },
    /// Non-fatal runtime trouble (transport send failures and the like).
    Error { description: String },
}

// ── RelayHandle (app-facing API) ──────────────────────────────────────

/// Handle to a running relay. Cheap to clone; every method is a channel
/// round-trip into the worker task.
#[derive(Clone)]
pub struct RelayHandle {
    cmd_tx: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RelayCommand,
    ) -> Result<T, Error> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply))
            .await
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Encrypt and inject a new envelope into every attached transport.
    /// Returns the envelope id (the externally reported message hash).
    pub async fn post(&self, request: PostRequest) -> Result<EnvelopeId, Error> {
        self.request(|reply| RelayCommand::Post { request, reply })
            .await?
    }

    /// Register a standing filter; matched messages arrive on the
    /// returned receiver.
    pub async fn subscribe(
        &self,
        filter: SubscriptionFilter,
    ) -> Result<(SubscriptionId, mpsc::Receiver<SubscriptionMessage>), Error> {
        self.request(|reply| RelayCommand::Subscribe { filter, reply })
            .await
    }

    /// Cancel a subscription. Returns whether it existed.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, Error> {
        self.request(|reply| RelayCommand::Unsubscribe { id, reply })
            .await
    }

    pub async fn new_key_pair(&self) -> Result<KeyId, Error> {
        self.request(|reply| RelayCommand::NewKeyPair { reply }).await?
    }

    pub async fn add_private_key(&self, raw: Vec<u8>) -> Result<KeyId, Error> {
        self.request(|reply| RelayCommand::AddPrivateKey { raw, reply })
            .await?
    }

    pub async fn get_public_key(&self, id: KeyId) -> Result<[u8; 32], Error> {
        self.request(|reply| RelayCommand::GetPublicKey { id, reply })
            .await?
    }

    pub async fn get_private_key(&self, id: KeyId) -> Result<[u8; 32], Error> {
        self.request(|reply| RelayCommand::GetPrivateKey { id, reply })
            .await?
    }

    pub async fn has_key_pair(&self, id: KeyId) -> Result<bool, Error> {
        self.request(|reply| RelayCommand::HasKeyPair { id, reply })
            .await
    }

    pub async fn new_sym_key(&self) -> Result<KeyId, Error> {
        self.request(|reply| RelayCommand::NewSymKey { reply }).await?
    }

    pub async fn add_sym_key(&self, raw: Vec<u8>) -> Result<KeyId, Error> {
        self.request(|reply| RelayCommand::AddSymKey { raw, reply })
            .await?
    }

    /// Derive and store a symmetric key from a password. Deterministic
    /// key bytes, fresh id.
    pub async fn sym_key_from_password(&self, password: impl Into<String>) -> Result<KeyId, Error> {
        let password = password.into();
        self.request(|reply| RelayCommand::SymKeyFromPassword { password, reply })
            .await?
    }

    pub async fn has_sym_key(&self, id: KeyId) -> Result<bool, Error> {
        self.request(|reply| RelayCommand::HasSymKey { id, reply })
            .await
    }

    pub async fn get_sym_key(&self, id: KeyId) -> Result<[u8; 32], Error> {
        self.request(|reply| RelayCommand::GetSymKey { id, reply })
            .await?
    }

    /// Remove a key of either variant. Returns whether one was removed.
    pub async fn delete_key(&self, id: KeyId) -> Result<bool, Error> {
        self.request(|reply| RelayCommand::DeleteKey { id, reply })
            .await
    }

    /// Peers currently connected across all transports.
    pub async fn connected_peers(&self) -> Vec<PeerId> {
        self.request(|reply| RelayCommand::ConnectedPeers { reply })
            .await
            .unwrap_or_default()
    }

    /// Graceful shutdown: drain queued envelopes, stop transports.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(RelayCommand::Shutdown).await;
    }
}

// ── RelayChannels / RelayManager ──────────────────────────────────────

/// Channels returned to the application when the relay starts.
pub struct RelayChannels {
    pub handle: RelayHandle,
    /// Best-effort observability events.
    pub events: mpsc::Receiver<RelayEvent>,
}

/// The relay node — spawn it and communicate via channels.
pub struct RelayManager;

impl RelayManager {
    /// Start every transport and spawn the worker task.
    ///
    /// The worker takes exclusive ownership of the key store, the
    /// subscription registry, and its own dedup tracker — there are no
    /// ambient singletons, and two relays in one process never share
    /// state.
    pub async fn spawn(
        mut transports: Vec<Box<dyn Transport>>,
        keystore: KeyStore,
        subscriptions: SubscriptionRegistry,
        config: RelayConfig,
    ) -> Result<RelayChannels, Error> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<RelayCommand>(config.command_buffer);
        let (transport_tx, transport_rx) = mpsc::channel::<TransportEvent>(config.inbound_buffer);
        let (event_tx, event_rx) = mpsc::channel::<RelayEvent>(EVENT_BUFFER);

        for transport in transports.iter_mut() {
            transport
                .start(transport_tx.clone())
                .await
                .map_err(Error::Transport)?;
        }
        // The worker holds only the receiver; senders live in transports.
        drop(transport_tx);

        tokio::spawn(r#loop::relay_loop(
            transports,
            keystore,
            subscriptions,
            config,
            cmd_rx,
            transport_rx,
            event_tx,
        ));

        Ok(RelayChannels {
            handle: RelayHandle { cmd_tx },
            events: event_rx,
        })
    }
}
