//! Stale-response guard.
//!
//! Every request that will write shared state first takes a [`Ticket`] for the
//! logical resource it targets. When the response lands, the writer asks
//! whether its ticket is still the newest one issued for that resource; if a
//! later request has been issued meanwhile, the response is dropped instead of
//! overwriting fresher data.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, PoisonError,
    },
};

use shared::domain::{ArtifactId, SceneId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    SceneListing,
    RunListing,
    ArtifactListing(SceneId),
    SceneArtifacts(SceneId),
    SceneMetrics(SceneId),
    SceneGates(SceneId),
    ArtifactUrl(ArtifactId),
    ArtifactMeta(ArtifactId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket<K> {
    pub key: K,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Current,
    Stale,
}

impl Freshness {
    pub fn is_current(self) -> bool {
        self == Freshness::Current
    }
}

pub struct RequestSequencer<K> {
    next_seq: AtomicU64,
    latest: Mutex<HashMap<K, u64>>,
}

impl<K: Eq + Hash + Clone> Default for RequestSequencer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> RequestSequencer<K> {
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(1),
            latest: Mutex::new(HashMap::new()),
        }
    }

    /// Sequence numbers grow monotonically across all keys.
    pub fn issue(&self, key: K) -> Ticket<K> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = latest.entry(key.clone()).or_insert(seq);
        if *slot < seq {
            *slot = seq;
        }
        Ticket { key, seq }
    }

    pub fn check(&self, ticket: &Ticket<K>) -> Freshness {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        match latest.get(&ticket.key) {
            Some(seq) if *seq == ticket.seq => Freshness::Current,
            // A key nobody has issued for cannot have a newer request.
            None => Freshness::Current,
            Some(_) => Freshness::Stale,
        }
    }

    pub fn latest(&self, key: &K) -> Option<u64> {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        latest.get(key).copied()
    }
}
