use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::future::{BoxFuture, FutureExt, Shared};
use shared::domain::{ArtifactId, ContentMeta, PresignedUrl};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    error::ClientResult,
    protocol_client::RemoteClient,
    sequencer::{ResourceKey, Ticket},
    state::ClientState,
};

type SharedFetch = Shared<BoxFuture<'static, ClientResult<PresignedUrl>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Resolve,
    Refresh,
}

struct CachedUrl {
    entry: PresignedUrl,
    fetched_at: Instant,
}

impl CachedUrl {
    /// `None` for direct links that never expire.
    fn deadline(&self) -> Option<Instant> {
        self.entry
            .expires_in_seconds
            .map(|secs| self.fetched_at + Duration::from_secs(secs))
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now > deadline)
    }
}

#[derive(Default)]
struct UrlSlot {
    cached: Option<CachedUrl>,
    meta: ContentMeta,
    inflight: Option<(u64, SharedFetch)>,
}

impl UrlSlot {
    /// `merge_meta` is false when a metadata fetch issued after this entry's
    /// request has already supplied newer content metadata.
    fn store(&mut self, entry: PresignedUrl, fetched_at: Instant, merge_meta: bool) {
        if merge_meta {
            self.meta.merge(&entry.meta);
        }
        self.cached = Some(CachedUrl { entry, fetched_at });
    }

    fn view(&self) -> Option<PresignedUrl> {
        self.cached.as_ref().map(|cached| PresignedUrl {
            meta: self.meta.clone(),
            ..cached.entry.clone()
        })
    }
}

/// Per-artifact cache of presigned download links.
///
/// At most one fetch per artifact is outstanding; concurrent callers await
/// the same shared future. Entries expire `expires_in_seconds` after the
/// response was received.
pub struct PresignedUrlCache {
    remote: RemoteClient,
    state: Arc<ClientState>,
    slots: Arc<Mutex<HashMap<ArtifactId, UrlSlot>>>,
}

impl PresignedUrlCache {
    pub fn new(remote: RemoteClient, state: Arc<ClientState>) -> Self {
        Self {
            remote,
            state,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn resolve(&self, artifact_id: &ArtifactId) -> ClientResult<PresignedUrl> {
        let fetch = {
            let mut slots = self.slots.lock().await;
            let slot = slots.entry(artifact_id.clone()).or_default();
            if let Some(cached) = &slot.cached {
                if !cached.is_expired(Instant::now()) {
                    debug!(artifact_id = %artifact_id, "url_cache: hit");
                    if let Some(view) = slot.view() {
                        return Ok(view);
                    }
                } else {
                    debug!(artifact_id = %artifact_id, "url_cache: entry expired");
                }
            }
            let joined = slot.inflight.as_ref().map(|(_, fetch)| fetch.clone());
            match joined {
                Some(fetch) => fetch,
                None => self.start_fetch(slot, artifact_id, FetchKind::Resolve),
            }
        };
        fetch.await
    }

    /// Re-fetches unconditionally. Resolves issued while this is in flight
    /// join it instead of starting their own fetch.
    pub async fn force_refresh(&self, artifact_id: &ArtifactId) -> ClientResult<PresignedUrl> {
        let fetch = {
            let mut slots = self.slots.lock().await;
            let slot = slots.entry(artifact_id.clone()).or_default();
            self.start_fetch(slot, artifact_id, FetchKind::Refresh)
        };
        fetch.await
    }

    /// Metadata-only fetch. Merges size/content-type/last-modified/etag into
    /// the slot without touching the cached URL or its expiry.
    pub async fn head_meta(&self, artifact_id: &ArtifactId) -> ClientResult<ContentMeta> {
        let ticket = self
            .state
            .sequencer()
            .issue(ResourceKey::ArtifactMeta(artifact_id.clone()));
        let entry = self.remote.artifact_url(artifact_id).await.map_err(|err| {
            warn!(artifact_id = %artifact_id, "url_cache: metadata fetch failed: {err}");
            err
        })?;

        let mut slots = self.slots.lock().await;
        let slot = slots.entry(artifact_id.clone()).or_default();
        if self.state.sequencer().check(&ticket).is_current() {
            slot.meta.merge(&entry.meta);
        } else {
            debug!(artifact_id = %artifact_id, seq = ticket.seq, "url_cache: dropping stale metadata response");
        }
        Ok(slot.meta.clone())
    }

    /// Stores an entry obtained elsewhere (e.g. the latest-artifact lookup).
    pub async fn seed(&self, entry: PresignedUrl) {
        let artifact_id = entry.artifact_id.clone();
        let ticket = self
            .state
            .sequencer()
            .issue(ResourceKey::ArtifactUrl(artifact_id.clone()));
        let merge_meta = meta_not_superseded(&self.state, &ticket);
        let mut slots = self.slots.lock().await;
        slots
            .entry(artifact_id)
            .or_default()
            .store(entry, Instant::now(), merge_meta);
    }

    /// Forgets an artifact; responses still in flight for it are discarded.
    pub async fn invalidate(&self, artifact_id: &ArtifactId) {
        self.state
            .sequencer()
            .issue(ResourceKey::ArtifactUrl(artifact_id.clone()));
        self.state
            .sequencer()
            .issue(ResourceKey::ArtifactMeta(artifact_id.clone()));
        self.slots.lock().await.remove(artifact_id);
    }

    /// Cached, unexpired entry without touching the network.
    pub async fn peek(&self, artifact_id: &ArtifactId) -> Option<PresignedUrl> {
        let slots = self.slots.lock().await;
        let slot = slots.get(artifact_id)?;
        match &slot.cached {
            Some(cached) if !cached.is_expired(Instant::now()) => slot.view(),
            _ => None,
        }
    }

    /// Time left before the cached entry must be re-fetched. `None` when
    /// nothing is cached or the link never expires.
    pub async fn remaining(&self, artifact_id: &ArtifactId) -> Option<Duration> {
        let slots = self.slots.lock().await;
        let deadline = slots.get(artifact_id)?.cached.as_ref()?.deadline()?;
        Some(deadline.saturating_duration_since(Instant::now()))
    }

    fn start_fetch(&self, slot: &mut UrlSlot, artifact_id: &ArtifactId, kind: FetchKind) -> SharedFetch {
        let ticket = self
            .state
            .sequencer()
            .issue(ResourceKey::ArtifactUrl(artifact_id.clone()));
        let seq = ticket.seq;
        let fetch = fetch_and_store(
            self.remote.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.slots),
            artifact_id.clone(),
            ticket,
            kind,
        )
        .boxed()
        .shared();
        slot.inflight = Some((seq, fetch.clone()));
        fetch
    }
}

async fn fetch_and_store(
    remote: RemoteClient,
    state: Arc<ClientState>,
    slots: Arc<Mutex<HashMap<ArtifactId, UrlSlot>>>,
    artifact_id: ArtifactId,
    ticket: Ticket<ResourceKey>,
    kind: FetchKind,
) -> ClientResult<PresignedUrl> {
    // Expiry counts from when the request left, not from when it returned.
    let requested_at = Instant::now();
    let result = match kind {
        FetchKind::Resolve => remote.artifact_url(&artifact_id).await,
        FetchKind::Refresh => remote.refresh_artifact_url(&artifact_id).await,
    };

    let mut slots = slots.lock().await;
    let current = state.sequencer().check(&ticket).is_current();
    let Some(slot) = slots.get_mut(&artifact_id) else {
        // Invalidated while the request was in flight.
        return result;
    };
    if slot.inflight.as_ref().map(|(seq, _)| *seq) == Some(ticket.seq) {
        slot.inflight = None;
    }

    match result {
        Ok(entry) => {
            if current {
                info!(
                    artifact_id = %artifact_id,
                    expires_in_seconds = ?entry.expires_in_seconds,
                    refreshed = kind == FetchKind::Refresh,
                    "url_cache: stored presigned url"
                );
                let merge_meta = meta_not_superseded(&state, &ticket);
                slot.store(entry.clone(), requested_at, merge_meta);
                Ok(PresignedUrl {
                    meta: slot.meta.clone(),
                    ..entry
                })
            } else {
                debug!(artifact_id = %artifact_id, seq = ticket.seq, "url_cache: dropping stale url response");
                Ok(entry)
            }
        }
        Err(err) => {
            warn!(artifact_id = %artifact_id, "url_cache: fetch failed, keeping previous entry: {err}");
            Err(err)
        }
    }
}

/// Sequence numbers are global, so a metadata ticket newer than the URL
/// ticket means a `head_meta` was issued after the URL request.
fn meta_not_superseded(state: &ClientState, ticket: &Ticket<ResourceKey>) -> bool {
    let meta_key = match &ticket.key {
        ResourceKey::ArtifactUrl(artifact_id) => ResourceKey::ArtifactMeta(artifact_id.clone()),
        _ => return true,
    };
    state
        .sequencer()
        .latest(&meta_key)
        .map_or(true, |meta_seq| meta_seq < ticket.seq)
}

#[cfg(test)]
#[path = "tests/url_cache_tests.rs"]
mod tests;
