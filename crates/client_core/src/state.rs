use std::collections::HashMap;

use serde_json::Value;
use shared::{
    domain::{Artifact, ArtifactId, GateSummary, Metric, RunSummary, Scene, SceneId},
    protocol::{Health, ServiceConfig, ServiceStats},
};
use tokio::sync::RwLock;

use crate::{
    config::DEFAULT_ALLOWED_CRS,
    sequencer::{RequestSequencer, ResourceKey, Ticket},
};

/// Informational payloads fetched once at startup.
#[derive(Debug, Clone, Default)]
pub struct ServiceSnapshot {
    pub health: Option<Health>,
    pub meta: Option<Value>,
    pub stats: Option<ServiceStats>,
    pub config: Option<ServiceConfig>,
    pub models: Option<Value>,
}

/// Local mirror of the remote dataset shared by every coordinator.
///
/// Each collection has exactly one writer (the component owning the matching
/// remote resource); writers consult [`ClientState::sequencer`] before
/// replacing a collection so that late responses never clobber newer ones.
pub struct ClientState {
    sequencer: RequestSequencer<ResourceKey>,
    inner: RwLock<StateInner>,
}

#[derive(Default)]
struct StateInner {
    scenes: Vec<Scene>,
    scenes_total: u64,
    runs: Vec<RunSummary>,
    artifacts: HashMap<SceneId, Vec<Artifact>>,
    metrics: HashMap<SceneId, Vec<Metric>>,
    gates: HashMap<SceneId, GateSummary>,
    selected_artifact: Option<ArtifactId>,
    allowed_crs: Vec<String>,
    service: ServiceSnapshot,
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_CRS.iter().map(|crs| crs.to_string()).collect())
    }
}

impl ClientState {
    pub fn new(allowed_crs: Vec<String>) -> Self {
        Self {
            sequencer: RequestSequencer::new(),
            inner: RwLock::new(StateInner {
                allowed_crs: normalize_crs_list(allowed_crs),
                ..StateInner::default()
            }),
        }
    }

    pub fn sequencer(&self) -> &RequestSequencer<ResourceKey> {
        &self.sequencer
    }

    pub async fn scenes(&self) -> Vec<Scene> {
        self.inner.read().await.scenes.clone()
    }

    pub async fn scenes_total(&self) -> u64 {
        self.inner.read().await.scenes_total
    }

    pub async fn replace_scenes(&self, scenes: Vec<Scene>, total: u64) {
        let mut guard = self.inner.write().await;
        guard.scenes = scenes;
        guard.scenes_total = total;
    }

    pub async fn runs(&self) -> Vec<RunSummary> {
        self.inner.read().await.runs.clone()
    }

    pub async fn replace_runs(&self, runs: Vec<RunSummary>) {
        self.inner.write().await.runs = runs;
    }

    /// `None` when the scene's full listing has never been loaded.
    pub async fn artifacts(&self, scene_id: &SceneId) -> Option<Vec<Artifact>> {
        self.inner.read().await.artifacts.get(scene_id).cloned()
    }

    pub async fn replace_artifacts(&self, scene_id: &SceneId, artifacts: Vec<Artifact>) {
        self.inner
            .write()
            .await
            .artifacts
            .insert(scene_id.clone(), artifacts);
    }

    /// Stores the listing only while `ticket` is still the newest for its
    /// key. The check runs under the write lock, so it cannot interleave with
    /// [`Self::forget_scene`].
    pub async fn replace_artifacts_if_current(
        &self,
        ticket: &Ticket<ResourceKey>,
        scene_id: &SceneId,
        artifacts: Vec<Artifact>,
    ) -> bool {
        let mut guard = self.inner.write().await;
        if !self.sequencer.check(ticket).is_current() {
            return false;
        }
        guard.artifacts.insert(scene_id.clone(), artifacts);
        true
    }

    /// Scene the artifact belongs to, if any loaded listing contains it.
    pub async fn scene_of(&self, artifact_id: &ArtifactId) -> Option<SceneId> {
        let guard = self.inner.read().await;
        guard.artifacts.iter().find_map(|(scene_id, artifacts)| {
            artifacts
                .iter()
                .any(|artifact| &artifact.id == artifact_id)
                .then(|| scene_id.clone())
        })
    }

    pub async fn find_artifact(&self, artifact_id: &ArtifactId) -> Option<Artifact> {
        let guard = self.inner.read().await;
        guard
            .artifacts
            .values()
            .flatten()
            .find(|artifact| &artifact.id == artifact_id)
            .cloned()
    }

    pub async fn metrics(&self, scene_id: &SceneId) -> Option<Vec<Metric>> {
        self.inner.read().await.metrics.get(scene_id).cloned()
    }

    pub async fn replace_metrics(&self, scene_id: &SceneId, metrics: Vec<Metric>) {
        self.inner
            .write()
            .await
            .metrics
            .insert(scene_id.clone(), metrics);
    }

    pub async fn replace_metrics_if_current(
        &self,
        ticket: &Ticket<ResourceKey>,
        scene_id: &SceneId,
        metrics: Vec<Metric>,
    ) -> bool {
        let mut guard = self.inner.write().await;
        if !self.sequencer.check(ticket).is_current() {
            return false;
        }
        guard.metrics.insert(scene_id.clone(), metrics);
        true
    }

    /// Last write wins: newest `created_at`, then latest position.
    pub async fn metric(&self, scene_id: &SceneId, name: &str) -> Option<f64> {
        let guard = self.inner.read().await;
        let metrics = guard.metrics.get(scene_id)?;
        metrics
            .iter()
            .enumerate()
            .filter(|(_, metric)| metric.name == name)
            .max_by(|(a_pos, a), (b_pos, b)| a.created_at.cmp(&b.created_at).then(a_pos.cmp(b_pos)))
            .map(|(_, metric)| metric.value)
    }

    pub async fn gates(&self, scene_id: &SceneId) -> Option<GateSummary> {
        self.inner.read().await.gates.get(scene_id).cloned()
    }

    pub async fn replace_gates(&self, scene_id: &SceneId, gates: GateSummary) {
        self.inner
            .write()
            .await
            .gates
            .insert(scene_id.clone(), gates);
    }

    pub async fn replace_gates_if_current(
        &self,
        ticket: &Ticket<ResourceKey>,
        scene_id: &SceneId,
        gates: GateSummary,
    ) -> bool {
        let mut guard = self.inner.write().await;
        if !self.sequencer.check(ticket).is_current() {
            return false;
        }
        guard.gates.insert(scene_id.clone(), gates);
        true
    }

    /// Drops everything cached for a deleted scene. Reconciliations and
    /// listing loads still in flight for it become stale.
    pub async fn forget_scene(&self, scene_id: &SceneId) -> Vec<ArtifactId> {
        let mut guard = self.inner.write().await;
        for key in [
            ResourceKey::SceneArtifacts(scene_id.clone()),
            ResourceKey::SceneMetrics(scene_id.clone()),
            ResourceKey::SceneGates(scene_id.clone()),
            ResourceKey::ArtifactListing(scene_id.clone()),
        ] {
            self.sequencer.issue(key);
        }
        guard.scenes.retain(|scene| &scene.id != scene_id);
        guard.metrics.remove(scene_id);
        guard.gates.remove(scene_id);
        let removed: Vec<ArtifactId> = guard
            .artifacts
            .remove(scene_id)
            .unwrap_or_default()
            .into_iter()
            .map(|artifact| artifact.id)
            .collect();
        if guard
            .selected_artifact
            .as_ref()
            .is_some_and(|selected| removed.contains(selected))
        {
            guard.selected_artifact = None;
        }
        removed
    }

    pub async fn select_artifact(&self, artifact_id: ArtifactId) {
        self.inner.write().await.selected_artifact = Some(artifact_id);
    }

    pub async fn clear_selection_if(&self, artifact_id: &ArtifactId) {
        let mut guard = self.inner.write().await;
        if guard.selected_artifact.as_ref() == Some(artifact_id) {
            guard.selected_artifact = None;
        }
    }

    pub async fn selected_artifact(&self) -> Option<ArtifactId> {
        self.inner.read().await.selected_artifact.clone()
    }

    pub async fn allowed_crs(&self) -> Vec<String> {
        self.inner.read().await.allowed_crs.clone()
    }

    pub async fn set_allowed_crs(&self, allowed_crs: Vec<String>) {
        self.inner.write().await.allowed_crs = normalize_crs_list(allowed_crs);
    }

    pub async fn is_crs_allowed(&self, crs: &str) -> bool {
        let wanted = normalize_crs(crs);
        self.inner
            .read()
            .await
            .allowed_crs
            .iter()
            .any(|allowed| *allowed == wanted)
    }

    pub async fn service(&self) -> ServiceSnapshot {
        self.inner.read().await.service.clone()
    }

    pub async fn set_service(&self, snapshot: ServiceSnapshot) {
        self.inner.write().await.service = snapshot;
    }
}

pub fn normalize_crs(crs: &str) -> String {
    crs.trim().to_ascii_uppercase()
}

fn normalize_crs_list(allowed_crs: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = allowed_crs
        .iter()
        .map(|crs| normalize_crs(crs))
        .filter(|crs| !crs.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
