//! Lifecycle client for the point-cloud pipeline service.
//!
//! [`OperatorClient`] wires one [`RemoteClient`] and one [`ClientState`]
//! through every coordinator; the individual pieces are public for callers
//! that want to compose them differently.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde_json::Value;
use shared::{
    domain::{ArtifactId, SceneId},
    protocol::{AuthPing, CleanupResponse, IngestRequest, IngestResponse, UploadResponse},
};
use tracing::{info, warn};

pub mod config;
pub mod csv_export;
pub mod error;
pub mod export;
pub mod listings;
pub mod pager;
pub mod pipeline;
pub mod presentation;
pub mod protocol_client;
pub mod reconcile;
pub mod resolver;
pub mod sequencer;
pub mod state;
pub mod transport;
pub mod url_cache;

pub use config::{load_config, load_config_from, ClientConfig};
pub use csv_export::CsvExportEmitter;
pub use error::{ClientError, ClientResult};
pub use export::{ExportCoordinator, ExportOutcome};
pub use listings::{ArtifactFilter, ArtifactPager, RunFilter, RunPager, SceneFilter, ScenePager};
pub use pager::{ListingPager, PageSource, PageView};
pub use pipeline::{PipelineRunCoordinator, PipelineRunOutcome, ReportOutcome};
pub use presentation::{ArtifactPresenter, ArtifactPreview, Presentation, PresentationRule};
pub use protocol_client::RemoteClient;
pub use reconcile::Reconciler;
pub use resolver::{LatestArtifactResolver, ResolvedArtifact, ResolvedVia};
pub use state::{ClientState, ServiceSnapshot};
pub use transport::{HttpTransport, Transport};
pub use url_cache::PresignedUrlCache;

pub struct OperatorClient {
    config: ClientConfig,
    remote: RemoteClient,
    state: Arc<ClientState>,
    url_cache: Arc<PresignedUrlCache>,
    reconciler: Reconciler,
    resolver: LatestArtifactResolver,
    pipeline: PipelineRunCoordinator,
    exports: ExportCoordinator,
    presenter: ArtifactPresenter,
    csv: CsvExportEmitter,
}

impl OperatorClient {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let remote = RemoteClient::new(transport);
        let state = Arc::new(ClientState::new(config.allowed_crs.clone()));
        let url_cache = Arc::new(PresignedUrlCache::new(remote.clone(), Arc::clone(&state)));
        let reconciler = Reconciler::new(remote.clone(), Arc::clone(&state));
        let resolver = LatestArtifactResolver::new(
            remote.clone(),
            Arc::clone(&state),
            Arc::clone(&url_cache),
            config.direct_latest_lookup,
        );
        let pipeline = PipelineRunCoordinator::new(remote.clone(), reconciler.clone());
        let exports = ExportCoordinator::new(
            remote.clone(),
            Arc::clone(&state),
            Arc::clone(&url_cache),
            reconciler.clone(),
        );
        let presenter = ArtifactPresenter::new(remote.clone(), Arc::clone(&url_cache));
        let csv = CsvExportEmitter::new(config.download_dir.clone());
        Self {
            config,
            remote,
            state,
            url_cache,
            reconciler,
            resolver,
            pipeline,
            exports,
            presenter,
            csv,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn remote(&self) -> &RemoteClient {
        &self.remote
    }

    pub fn state(&self) -> &Arc<ClientState> {
        &self.state
    }

    pub fn url_cache(&self) -> &PresignedUrlCache {
        &self.url_cache
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn resolver(&self) -> &LatestArtifactResolver {
        &self.resolver
    }

    pub fn pipeline(&self) -> &PipelineRunCoordinator {
        &self.pipeline
    }

    pub fn exports(&self) -> &ExportCoordinator {
        &self.exports
    }

    pub fn csv(&self) -> &CsvExportEmitter {
        &self.csv
    }

    pub fn scene_pager(&self) -> ScenePager {
        listings::scene_pager(self.remote.clone(), Arc::clone(&self.state), self.config.page_size)
    }

    pub fn artifact_pager(&self, scene_id: SceneId) -> ArtifactPager {
        listings::artifact_pager(
            self.remote.clone(),
            Arc::clone(&self.state),
            scene_id,
            self.config.page_size,
        )
    }

    pub fn run_pager(&self) -> RunPager {
        listings::run_pager(self.remote.clone(), Arc::clone(&self.state), self.config.page_size)
    }

    /// Startup fetches. Each one is informational: a failure is logged and
    /// leaves its slot empty. A non-empty `allowed_crs` from `/config`
    /// replaces the local allow-list.
    pub async fn bootstrap(&self) -> ServiceSnapshot {
        let snapshot = ServiceSnapshot {
            health: informational("health", self.remote.health().await),
            meta: informational("meta", self.remote.meta().await),
            stats: informational("stats", self.remote.stats().await),
            config: informational("config", self.remote.service_config().await),
            models: informational("models", self.remote.models().await),
        };
        if let Some(service_config) = &snapshot.config {
            if !service_config.allowed_crs.is_empty() {
                info!(allowed = ?service_config.allowed_crs, "bootstrap: adopting service crs allow-list");
                self.state
                    .set_allowed_crs(service_config.allowed_crs.clone())
                    .await;
            }
        }
        self.state.set_service(snapshot.clone()).await;
        snapshot
    }

    pub async fn ingest(
        &self,
        source_uri: &str,
        crs: &str,
        sensor_meta: Option<Value>,
    ) -> ClientResult<IngestResponse> {
        let response = self
            .remote
            .ingest(&IngestRequest {
                source_uri: source_uri.to_string(),
                crs: crs.to_string(),
                sensor_meta,
            })
            .await?;
        info!(scene_id = %response.scene_id, source_uri, "operator: scene ingested");
        self.reconciler
            .reconcile_artifacts(&response.scene_id)
            .await?;
        Ok(response)
    }

    pub async fn upload_file(&self, path: &Path) -> ClientResult<UploadResponse> {
        let shown = path.display().to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| ClientError::io(shown.clone(), &err))?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ClientError::Io {
                path: shown.clone(),
                message: "path has no usable file name".to_string(),
            })?;
        let response = self.remote.upload(file_name, bytes).await?;
        info!(local = %shown, remote = %response.path, "operator: file uploaded");
        Ok(response)
    }

    /// Deletes a scene remotely, then drops everything cached for it.
    pub async fn delete_scene(&self, scene_id: &SceneId) -> ClientResult<()> {
        self.remote.delete_scene(scene_id).await?;
        let removed = self.state.forget_scene(scene_id).await;
        for artifact_id in &removed {
            self.url_cache.invalidate(artifact_id).await;
        }
        info!(scene_id = %scene_id, artifacts = removed.len(), "operator: scene deleted");
        Ok(())
    }

    /// Deletes an artifact remotely, forgets its URL, and re-reads the
    /// owning scene's artifact list when that list is loaded.
    pub async fn delete_artifact(&self, artifact_id: &ArtifactId) -> ClientResult<()> {
        let owner = self.state.scene_of(artifact_id).await;
        self.remote.delete_artifact(artifact_id).await?;
        self.url_cache.invalidate(artifact_id).await;
        self.state.clear_selection_if(artifact_id).await;
        info!(artifact_id = %artifact_id, "operator: artifact deleted");
        if let Some(scene_id) = owner {
            self.reconciler.reconcile_artifacts(&scene_id).await?;
        }
        Ok(())
    }

    pub async fn open_artifact(&self, artifact_id: &ArtifactId) -> ClientResult<Presentation> {
        self.presenter.present(artifact_id).await
    }

    pub async fn export_scenes_csv(&self) -> ClientResult<PathBuf> {
        let body = self.remote.scenes_csv().await?;
        self.csv.emit(&body, "scenes.csv").await
    }

    pub async fn export_runs_csv(&self) -> ClientResult<PathBuf> {
        let body = self.remote.runs_csv().await?;
        self.csv.emit(&body, "runs.csv").await
    }

    pub async fn export_scene_metrics_csv(&self, scene_id: &SceneId) -> ClientResult<PathBuf> {
        let body = self.remote.scene_metrics_csv(scene_id).await?;
        self.csv
            .emit(&body, &format!("scene_{scene_id}_metrics.csv"))
            .await
    }

    pub async fn export_artifact_csv(&self, artifact_id: &ArtifactId) -> ClientResult<PathBuf> {
        let body = self.remote.artifact_csv(artifact_id).await?;
        self.csv
            .emit(&body, &format!("artifact_{artifact_id}.csv"))
            .await
    }

    /// Renders the scene's artifact list locally, loading it first if needed.
    pub async fn export_artifact_listing_csv(&self, scene_id: &SceneId) -> ClientResult<PathBuf> {
        let artifacts = match self.state.artifacts(scene_id).await {
            Some(artifacts) => artifacts,
            None => self.reconciler.reconcile_artifacts(scene_id).await?,
        };
        let body = csv_export::render_artifact_listing(&artifacts);
        self.csv
            .emit(&body, &format!("scene_{scene_id}_artifacts.csv"))
            .await
    }

    pub async fn auth_ping(&self) -> ClientResult<AuthPing> {
        self.remote.auth_ping().await
    }

    pub async fn admin_cleanup(&self) -> ClientResult<CleanupResponse> {
        let response = self.remote.admin_cleanup().await?;
        info!(deleted = ?response.deleted, cutoff = ?response.cutoff, "operator: cleanup finished");
        Ok(response)
    }
}

fn informational<T>(what: &str, result: ClientResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(what, "bootstrap: fetch failed: {err}");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/fake_backend.rs"]
pub(crate) mod fake_backend;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
