use std::sync::Arc;

use shared::{
    domain::{Artifact, ArtifactId, ExportType, PresignedUrl, SceneId},
    protocol::{ExportResponse, PolicyCheckRequest, PolicyDecision},
};
use tracing::{info, warn};

use crate::{
    error::{ClientError, ClientResult},
    protocol_client::RemoteClient,
    reconcile::Reconciler,
    resolver::pick_latest,
    state::ClientState,
    url_cache::PresignedUrlCache,
};

#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub scene_id: SceneId,
    pub export_type: ExportType,
    pub response: ExportResponse,
    pub artifact_id: Option<ArtifactId>,
    /// Download link for the new artifact, when it could be identified.
    pub url: Option<PresignedUrl>,
    /// The scene's artifact list after reconciliation.
    pub artifacts: Vec<Artifact>,
}

impl ExportOutcome {
    pub fn artifact(&self) -> Option<&Artifact> {
        let id = self.artifact_id.as_ref()?;
        self.artifacts.iter().find(|artifact| &artifact.id == id)
    }
}

/// The service may name the new artifact outright or only echo its `uri`.
/// Failing both, the newest artifact of the export's type is taken.
fn produced_artifact(
    response: &ExportResponse,
    export_type: ExportType,
    artifacts: &[Artifact],
) -> Option<ArtifactId> {
    if let Some(artifact_id) = &response.artifact_id {
        return Some(artifact_id.clone());
    }
    let by_uri = response
        .uri
        .as_deref()
        .and_then(|uri| artifacts.iter().find(|artifact| artifact.uri == uri));
    by_uri
        .or_else(|| pick_latest(artifacts, &export_type.artifact_type()))
        .map(|artifact| artifact.id.clone())
}

pub fn parse_export_type(name: &str) -> ClientResult<ExportType> {
    name.parse().map_err(ClientError::UnsupportedExportType)
}

pub struct ExportCoordinator {
    remote: RemoteClient,
    state: Arc<ClientState>,
    url_cache: Arc<PresignedUrlCache>,
    reconciler: Reconciler,
}

impl ExportCoordinator {
    pub fn new(
        remote: RemoteClient,
        state: Arc<ClientState>,
        url_cache: Arc<PresignedUrlCache>,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            remote,
            state,
            url_cache,
            reconciler,
        }
    }

    /// Advisory only; a refusal here does not block [`Self::request_export`].
    pub async fn check_policy(&self, export_type: ExportType, crs: &str) -> ClientResult<PolicyDecision> {
        let decision = self
            .remote
            .check_policy(&PolicyCheckRequest {
                export_type,
                crs: crs.to_string(),
            })
            .await?;
        if decision.allowed {
            info!(%export_type, crs, "export: policy allows export");
        } else {
            warn!(%export_type, crs, reason = %decision.reason, "export: policy disallows export");
        }
        Ok(decision)
    }

    pub async fn request_export(
        &self,
        scene_id: &SceneId,
        export_type: ExportType,
        crs: &str,
    ) -> ClientResult<ExportOutcome> {
        if !self.state.is_crs_allowed(crs).await {
            let allowed = self.state.allowed_crs().await;
            warn!(scene_id = %scene_id, crs, ?allowed, "export: crs outside allow-list, not sending");
            return Err(ClientError::CrsNotAllowed {
                crs: crs.to_string(),
                allowed,
            });
        }

        info!(scene_id = %scene_id, %export_type, crs, "export: requesting");
        let response = self
            .remote
            .request_export(scene_id, export_type, crs)
            .await
            .map_err(|err| {
                warn!(scene_id = %scene_id, %export_type, "export: request failed: {err}");
                err
            })?;

        // Before the URL lookup: a lookup failure must not leave the listing stale.
        let artifacts = self.reconciler.reconcile_artifacts(scene_id).await?;
        let artifact_id = produced_artifact(&response, export_type, &artifacts);
        let url = match &artifact_id {
            Some(artifact_id) => Some(self.url_cache.resolve(artifact_id).await.map_err(|err| {
                warn!(scene_id = %scene_id, artifact_id = %artifact_id, "export: url lookup failed: {err}");
                err
            })?),
            None => {
                warn!(scene_id = %scene_id, %export_type, "export: produced artifact not found in listing");
                None
            }
        };

        Ok(ExportOutcome {
            scene_id: scene_id.clone(),
            export_type,
            response,
            artifact_id,
            url,
            artifacts,
        })
    }
}

#[cfg(test)]
#[path = "tests/export_tests.rs"]
mod tests;
