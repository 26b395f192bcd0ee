/// Per-transport envelope dedup horizon.
///
/// Each attached transport keeps its own record of envelope ids already
/// processed, with the time of first sight. The partition is what makes
/// bridging safe: an envelope seen on transport A is never reprocessed
/// from A, but may still be forwarded to transport B while B's own record
/// has not seen it.
///
/// Eviction is opportunistic — a retain sweep driven by the relay's
/// cleanup interval plus a capacity check on insert. No timer thread.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::transport::TransportId;
use crate::types::EnvelopeId;

/// Maximum entries tracked per transport before inserts force an evict.
const MAX_ENTRIES: usize = 10_000;

pub struct DedupTracker {
    /// How long an id stays remembered.
    horizon: Duration,
    tables: HashMap<TransportId, HashMap<EnvelopeId, Instant>>,
}

impl DedupTracker {
    pub fn new(horizon: Duration) -> Self {
        Self {
            horizon,
            tables: HashMap::new(),
        }
    }

    /// Has this id already been recorded for this transport?
    pub fn seen(&self, transport: &TransportId, id: &EnvelopeId) -> bool {
        self.tables
            .get(transport)
            .is_some_and(|table| table.contains_key(id))
    }

    /// Insert or refresh. Idempotent — recording twice leaves one entry.
    pub fn record(&mut self, transport: TransportId, id: EnvelopeId, now: Instant) {
        let horizon = self.horizon;
        let table = self.tables.entry(transport).or_default();

        if table.len() >= MAX_ENTRIES && !table.contains_key(&id) {
            table.retain(|_, seen_at| now.duration_since(*seen_at) < horizon);
            if table.len() >= MAX_ENTRIES {
                // Still full of fresh entries: give up the single oldest
                // slot rather than forgetting the horizon wholesale.
                if let Some(oldest) = table
                    .iter()
                    .min_by_key(|(_, seen_at)| **seen_at)
                    .map(|(id, _)| *id)
                {
                    table.remove(&oldest);
                }
            }
        }

        table.insert(id, now);
    }

    /// Drop every entry recorded before `cutoff`, on all transports.
    pub fn evict_older_than(&mut self, cutoff: Instant) {
        for table in self.tables.values_mut() {
            table.retain(|_, seen_at| *seen_at >= cutoff);
        }
    }

    /// Entries currently tracked for one transport.
    pub fn len(&self, transport: &TransportId) -> usize {
        self.tables.get(transport).map_or(0, |table| table.len())
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(|table| table.is_empty())
    }
}
