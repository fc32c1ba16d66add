use std::sync::Arc;

use shared::domain::{Artifact, GateSummary, Metric, SceneId};
use tracing::{debug, info};

use crate::{
    error::ClientResult,
    protocol_client::RemoteClient,
    sequencer::{ResourceKey, Ticket},
    state::ClientState,
};

/// Pulls a scene's remote collections and replaces the cached copies
/// wholesale. A response superseded by a newer reconciliation of the same
/// collection is returned to the caller but not stored.
#[derive(Clone)]
pub struct Reconciler {
    remote: RemoteClient,
    state: Arc<ClientState>,
}

impl Reconciler {
    pub fn new(remote: RemoteClient, state: Arc<ClientState>) -> Self {
        Self { remote, state }
    }

    pub async fn reconcile_artifacts(&self, scene_id: &SceneId) -> ClientResult<Vec<Artifact>> {
        let ticket = self
            .state
            .sequencer()
            .issue(ResourceKey::SceneArtifacts(scene_id.clone()));
        let detail = self.remote.scene_detail(scene_id).await?;
        let artifacts: Vec<Artifact> = detail
            .artifacts
            .into_iter()
            .map(|artifact| artifact.with_scene(scene_id))
            .collect();

        let stored = self
            .state
            .replace_artifacts_if_current(&ticket, scene_id, artifacts.clone())
            .await;
        if stored {
            info!(scene_id = %scene_id, count = artifacts.len(), "reconcile: artifacts replaced");
        } else {
            log_stale(&ticket, scene_id, "artifacts");
        }
        Ok(artifacts)
    }

    pub async fn reconcile_metrics(&self, scene_id: &SceneId) -> ClientResult<Vec<Metric>> {
        let ticket = self
            .state
            .sequencer()
            .issue(ResourceKey::SceneMetrics(scene_id.clone()));
        let metrics = self.remote.scene_detail(scene_id).await?.metrics;

        let stored = self
            .state
            .replace_metrics_if_current(&ticket, scene_id, metrics.clone())
            .await;
        if stored {
            info!(scene_id = %scene_id, count = metrics.len(), "reconcile: metrics replaced");
        } else {
            log_stale(&ticket, scene_id, "metrics");
        }
        Ok(metrics)
    }

    pub async fn reconcile_gates(&self, scene_id: &SceneId) -> ClientResult<GateSummary> {
        let ticket = self
            .state
            .sequencer()
            .issue(ResourceKey::SceneGates(scene_id.clone()));
        let gates = self.remote.gates(scene_id).await?;

        let stored = self
            .state
            .replace_gates_if_current(&ticket, scene_id, gates.clone())
            .await;
        if stored {
            info!(
                scene_id = %scene_id,
                registration = gates.registration_pass,
                segmentation = gates.segmentation_pass,
                change = gates.change_pass,
                "reconcile: gates replaced"
            );
        } else {
            log_stale(&ticket, scene_id, "gates");
        }
        Ok(gates)
    }
}

fn log_stale(ticket: &Ticket<ResourceKey>, scene_id: &SceneId, collection: &str) {
    debug!(scene_id = %scene_id, seq = ticket.seq, collection, "reconcile: dropping stale response");
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
