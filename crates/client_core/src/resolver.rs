//! "Latest artifact of type T for scene S".
//!
//! The service's `/artifacts/latest` endpoint is tried first. Any failure
//! there (older service, transient error, missing `created_at` that the local
//! listing cannot supply) falls back to scanning the scene's artifact list.
//! Both paths pick the maximum `created_at`, ties going to the larger id.

use std::{cmp::Ordering, sync::Arc};

use shared::domain::{Artifact, PresignedUrl, SceneId};
use tracing::{debug, info, warn};

use crate::{
    error::{ClientError, ClientResult},
    protocol_client::RemoteClient,
    reconcile::Reconciler,
    state::ClientState,
    url_cache::PresignedUrlCache,
};

/// Which path produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    Direct,
    Scan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedArtifact {
    pub artifact: Artifact,
    pub via: ResolvedVia,
}

pub struct LatestArtifactResolver {
    remote: RemoteClient,
    state: Arc<ClientState>,
    url_cache: Arc<PresignedUrlCache>,
    reconciler: Reconciler,
    direct_lookup: bool,
}

impl LatestArtifactResolver {
    pub fn new(
        remote: RemoteClient,
        state: Arc<ClientState>,
        url_cache: Arc<PresignedUrlCache>,
        direct_lookup: bool,
    ) -> Self {
        let reconciler = Reconciler::new(remote.clone(), Arc::clone(&state));
        Self {
            remote,
            state,
            url_cache,
            reconciler,
            direct_lookup,
        }
    }

    pub async fn latest(&self, scene_id: &SceneId, artifact_type: &str) -> ClientResult<Artifact> {
        Ok(self.resolve(scene_id, artifact_type).await?.artifact)
    }

    pub async fn resolve(
        &self,
        scene_id: &SceneId,
        artifact_type: &str,
    ) -> ClientResult<ResolvedArtifact> {
        let resolved = match self.direct(scene_id, artifact_type).await {
            Some(artifact) => ResolvedArtifact {
                artifact,
                via: ResolvedVia::Direct,
            },
            None => ResolvedArtifact {
                artifact: self.scan(scene_id, artifact_type).await?,
                via: ResolvedVia::Scan,
            },
        };
        info!(
            scene_id = %scene_id,
            artifact_type,
            artifact_id = %resolved.artifact.id,
            via = ?resolved.via,
            "resolver: latest artifact selected"
        );
        self.state
            .select_artifact(resolved.artifact.id.clone())
            .await;
        Ok(resolved)
    }

    /// Latest artifact together with a usable download link.
    pub async fn latest_with_url(
        &self,
        scene_id: &SceneId,
        artifact_type: &str,
    ) -> ClientResult<(Artifact, PresignedUrl)> {
        let artifact = self.latest(scene_id, artifact_type).await?;
        let url = self.url_cache.resolve(&artifact.id).await?;
        Ok((artifact, url))
    }

    async fn direct(&self, scene_id: &SceneId, artifact_type: &str) -> Option<Artifact> {
        if !self.direct_lookup {
            return None;
        }
        let entry = match self.remote.latest_artifact_url(scene_id, artifact_type).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(scene_id = %scene_id, artifact_type, "resolver: direct lookup failed, scanning: {err}");
                return None;
            }
        };
        if entry.artifact_type != artifact_type {
            warn!(
                scene_id = %scene_id,
                artifact_type,
                returned = %entry.artifact_type,
                "resolver: direct lookup returned another type, scanning"
            );
            return None;
        }

        let created_at = match entry.created_at {
            Some(created_at) => created_at,
            None => match self.state.find_artifact(&entry.artifact_id).await {
                Some(known) => known.created_at,
                None => {
                    debug!(
                        artifact_id = %entry.artifact_id,
                        "resolver: direct lookup lacks created_at and no local listing has it"
                    );
                    return None;
                }
            },
        };
        let artifact = Artifact {
            id: entry.artifact_id.clone(),
            scene_id: Some(scene_id.clone()),
            artifact_type: entry.artifact_type.clone(),
            uri: entry.uri.clone().unwrap_or_else(|| entry.url.clone()),
            created_at,
        };
        self.url_cache.seed(entry).await;
        Some(artifact)
    }

    async fn scan(&self, scene_id: &SceneId, artifact_type: &str) -> ClientResult<Artifact> {
        let artifacts = match self.state.artifacts(scene_id).await {
            Some(artifacts) if !artifacts.is_empty() => artifacts,
            _ => self.reconciler.reconcile_artifacts(scene_id).await?,
        };
        pick_latest(&artifacts, artifact_type)
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                scene_id: scene_id.clone(),
                artifact_type: artifact_type.to_string(),
            })
    }
}

/// Exact, case-sensitive type match with the greatest `created_at`; equal
/// timestamps resolve to the larger id.
pub fn pick_latest<'a>(artifacts: &'a [Artifact], artifact_type: &str) -> Option<&'a Artifact> {
    artifacts
        .iter()
        .filter(|artifact| artifact.artifact_type == artifact_type)
        .max_by(|a, b| newer_first(a, b))
}

fn newer_first(a: &Artifact, b: &Artifact) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
#[path = "tests/resolver_tests.rs"]
mod tests;
