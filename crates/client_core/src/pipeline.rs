use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use serde_json::{Map, Value};
use shared::{
    domain::{Artifact, GateSummary, Metric, PipelineStep, SceneId},
    protocol::{PipelineRunRequest, PipelineRunResponse},
};
use tracing::{info, warn};

use crate::{
    error::{ClientError, ClientResult},
    protocol_client::RemoteClient,
    reconcile::Reconciler,
};

/// Everything a finished run changed, as reconciled afterwards.
#[derive(Debug, Clone)]
pub struct PipelineRunOutcome {
    pub scene_id: SceneId,
    pub steps: Vec<PipelineStep>,
    /// Orchestration plan, passed through untouched.
    pub plan: Value,
    pub response: PipelineRunResponse,
    pub artifacts: Vec<Artifact>,
    pub metrics: Vec<Metric>,
    pub gates: GateSummary,
}

#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub scene_id: SceneId,
    pub response: Value,
    pub artifacts: Vec<Artifact>,
}

/// Collapses duplicates, keeping the first occurrence of each step.
pub fn normalize_steps(steps: &[PipelineStep]) -> ClientResult<Vec<PipelineStep>> {
    if steps.is_empty() {
        return Err(ClientError::EmptySteps);
    }
    let mut seen = HashSet::new();
    Ok(steps
        .iter()
        .copied()
        .filter(|step| seen.insert(*step))
        .collect())
}

pub fn parse_steps<S: AsRef<str>>(names: &[S]) -> ClientResult<Vec<PipelineStep>> {
    let steps = names
        .iter()
        .map(|name| {
            name.as_ref()
                .parse::<PipelineStep>()
                .map_err(ClientError::UnknownPipelineStep)
        })
        .collect::<ClientResult<Vec<_>>>()?;
    normalize_steps(&steps)
}

pub struct PipelineRunCoordinator {
    remote: RemoteClient,
    reconciler: Reconciler,
    running: Arc<Mutex<HashSet<SceneId>>>,
}

/// Marks a scene busy until dropped.
struct RunClaim {
    running: Arc<Mutex<HashSet<SceneId>>>,
    scene_id: SceneId,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.scene_id);
    }
}

impl PipelineRunCoordinator {
    pub fn new(remote: RemoteClient, reconciler: Reconciler) -> Self {
        Self {
            remote,
            reconciler,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_running(&self, scene_id: &SceneId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(scene_id)
    }

    pub async fn run(
        &self,
        scene_id: &SceneId,
        steps: &[PipelineStep],
    ) -> ClientResult<PipelineRunOutcome> {
        self.run_with_overrides(scene_id, steps, Map::new()).await
    }

    pub async fn run_with_overrides(
        &self,
        scene_id: &SceneId,
        steps: &[PipelineStep],
        config_overrides: Map<String, Value>,
    ) -> ClientResult<PipelineRunOutcome> {
        let steps = normalize_steps(steps)?;
        let _claim = self.claim(scene_id)?;

        info!(
            scene_id = %scene_id,
            steps = ?steps,
            overrides = config_overrides.len(),
            "pipeline: submitting run"
        );
        let request = PipelineRunRequest {
            steps: steps.clone(),
            config_overrides,
        };
        let response = self
            .remote
            .run_pipeline(scene_id, &request)
            .await
            .map_err(|err| {
                warn!(scene_id = %scene_id, "pipeline: run failed: {err}");
                err
            })?;
        info!(
            scene_id = %scene_id,
            produced = response.artifacts.len(),
            "pipeline: run finished, reconciling"
        );

        let artifacts = self.reconciler.reconcile_artifacts(scene_id).await?;
        let metrics = self.reconciler.reconcile_metrics(scene_id).await?;
        let gates = self.reconciler.reconcile_gates(scene_id).await?;

        Ok(PipelineRunOutcome {
            scene_id: scene_id.clone(),
            steps,
            plan: response.orchestrator.plan.clone(),
            response,
            artifacts,
            metrics,
            gates,
        })
    }

    pub async fn generate_report(&self, scene_id: &SceneId) -> ClientResult<ReportOutcome> {
        info!(scene_id = %scene_id, "pipeline: generating report");
        let response = self.remote.generate_report(scene_id).await?;
        let artifacts = self.reconciler.reconcile_artifacts(scene_id).await?;
        Ok(ReportOutcome {
            scene_id: scene_id.clone(),
            response,
            artifacts,
        })
    }

    fn claim(&self, scene_id: &SceneId) -> ClientResult<RunClaim> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(scene_id.clone()) {
            warn!(scene_id = %scene_id, "pipeline: run already in flight, rejecting");
            return Err(ClientError::RunInProgress {
                scene_id: scene_id.clone(),
            });
        }
        Ok(RunClaim {
            running: Arc::clone(&self.running),
            scene_id: scene_id.clone(),
        })
    }
}

#[cfg(test)]
#[path = "tests/pipeline_tests.rs"]
mod tests;
