use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::{
    domain::{Artifact, ArtifactId, ExportType, GateSummary, Page, PresignedUrl, RunSummary, Scene, SceneId},
    protocol::{
        AuthPing, CleanupResponse, ExportResponse, Health, IngestRequest, IngestResponse,
        PipelineRunRequest, PipelineRunResponse, PolicyCheckRequest, PolicyDecision, SceneDetail,
        ServiceConfig, ServiceStats, UploadResponse,
    },
};

use crate::{
    error::{ClientError, ClientResult},
    transport::{ApiRequest, Transport},
};

/// Optional response-disposition hints for `/artifacts/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    pub filename: Option<String>,
    pub as_attachment: bool,
}

/// Typed view of the service's REST surface.
///
/// Every method is a single request; nothing here retries or caches.
#[derive(Clone)]
pub struct RemoteClient {
    transport: Arc<dyn Transport>,
}

impl RemoteClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn get<T: DeserializeOwned>(&self, request: ApiRequest) -> ClientResult<T> {
        let path = request.path.clone();
        let body = self.transport.send(request).await?;
        decode(&path, &body)
    }

    pub async fn get_text(&self, request: ApiRequest) -> ClientResult<String> {
        self.transport.send(request).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        request: ApiRequest,
        body: Option<&B>,
    ) -> ClientResult<T> {
        let path = request.path.clone();
        let request = match body {
            Some(body) => {
                let value = serde_json::to_value(body).map_err(|err| ClientError::Decode {
                    path: path.clone(),
                    message: format!("request body: {err}"),
                })?;
                request.json(value)
            }
            None => request,
        };
        let body = self.transport.send(request).await?;
        decode(&path, &body)
    }

    pub async fn delete(&self, path: impl Into<String>) -> ClientResult<Value> {
        let request = ApiRequest::delete(path);
        let path = request.path.clone();
        let body = self.transport.send(request).await?;
        decode(&path, &body)
    }

    pub async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> ClientResult<UploadResponse> {
        let body = self.transport.upload(file_name, bytes).await?;
        decode("/upload", &body)
    }

    pub async fn fetch_url_text(&self, url: &str) -> ClientResult<String> {
        self.transport.fetch_url(url).await
    }

    pub async fn health(&self) -> ClientResult<Health> {
        self.get(ApiRequest::get("/health")).await
    }

    pub async fn meta(&self) -> ClientResult<Value> {
        self.get(ApiRequest::get("/meta")).await
    }

    pub async fn stats(&self) -> ClientResult<ServiceStats> {
        self.get(ApiRequest::get("/stats")).await
    }

    pub async fn service_config(&self) -> ClientResult<ServiceConfig> {
        self.get(ApiRequest::get("/config")).await
    }

    pub async fn models(&self) -> ClientResult<Value> {
        self.get(ApiRequest::get("/models")).await
    }

    pub async fn ingest(&self, request: &IngestRequest) -> ClientResult<IngestResponse> {
        self.post(ApiRequest::post("/ingest"), Some(request)).await
    }

    pub async fn list_scenes(
        &self,
        offset: u64,
        limit: u64,
        query: Option<&str>,
    ) -> ClientResult<Page<Scene>> {
        self.get(
            ApiRequest::get("/scenes")
                .query("offset", offset)
                .query("limit", limit)
                .query_opt("q", query),
        )
        .await
    }

    pub async fn delete_scene(&self, scene_id: &SceneId) -> ClientResult<Value> {
        self.delete(format!("/scene/{scene_id}")).await
    }

    pub async fn scene_detail(&self, scene_id: &SceneId) -> ClientResult<SceneDetail> {
        self.get(ApiRequest::get(format!("/scene/{scene_id}"))).await
    }

    pub async fn list_scene_artifacts(
        &self,
        scene_id: &SceneId,
        offset: u64,
        limit: u64,
        type_contains: Option<&str>,
        exports_only: bool,
    ) -> ClientResult<Page<Artifact>> {
        let mut request = ApiRequest::get(format!("/scene/{scene_id}/artifacts"))
            .query("offset", offset)
            .query("limit", limit)
            .query_opt("type", type_contains);
        if exports_only {
            request = request.query("exports_only", true);
        }
        let page: Page<Artifact> = self.get(request).await?;
        Ok(Page {
            items: page
                .items
                .into_iter()
                .map(|artifact| artifact.with_scene(scene_id))
                .collect(),
            ..page
        })
    }

    pub async fn run_pipeline(
        &self,
        scene_id: &SceneId,
        request: &PipelineRunRequest,
    ) -> ClientResult<PipelineRunResponse> {
        self.post(
            ApiRequest::post("/pipeline/run").query("scene_id", scene_id),
            Some(request),
        )
        .await
    }

    pub async fn generate_report(&self, scene_id: &SceneId) -> ClientResult<Value> {
        self.post::<Value, Value>(
            ApiRequest::post("/report/generate").query("scene_id", scene_id),
            None,
        )
        .await
    }

    pub async fn request_export(
        &self,
        scene_id: &SceneId,
        export_type: ExportType,
        crs: &str,
    ) -> ClientResult<ExportResponse> {
        self.post::<ExportResponse, Value>(
            ApiRequest::post("/export")
                .query("scene_id", scene_id)
                .query("type", export_type)
                .query("crs", crs),
            None,
        )
        .await
    }

    pub async fn check_policy(&self, request: &PolicyCheckRequest) -> ClientResult<PolicyDecision> {
        self.post(ApiRequest::post("/policy/check"), Some(request))
            .await
    }

    pub async fn artifact_url(&self, artifact_id: &ArtifactId) -> ClientResult<PresignedUrl> {
        self.artifact_url_with(artifact_id, &DownloadOptions::default())
            .await
    }

    pub async fn artifact_url_with(
        &self,
        artifact_id: &ArtifactId,
        options: &DownloadOptions,
    ) -> ClientResult<PresignedUrl> {
        let mut request = ApiRequest::get(format!("/artifacts/{artifact_id}"))
            .query_opt("filename", options.filename.as_deref());
        if options.as_attachment {
            request = request.query("as_attachment", true);
        }
        self.get(request).await
    }

    pub async fn latest_artifact_url(
        &self,
        scene_id: &SceneId,
        artifact_type: &str,
    ) -> ClientResult<PresignedUrl> {
        self.get(
            ApiRequest::get("/artifacts/latest")
                .query("scene_id", scene_id)
                .query("type", artifact_type),
        )
        .await
    }

    pub async fn refresh_artifact_url(&self, artifact_id: &ArtifactId) -> ClientResult<PresignedUrl> {
        self.post::<PresignedUrl, Value>(
            ApiRequest::post(format!("/artifacts/refresh/{artifact_id}")),
            None,
        )
        .await
    }

    pub async fn delete_artifact(&self, artifact_id: &ArtifactId) -> ClientResult<Value> {
        self.delete(format!("/artifacts/{artifact_id}")).await
    }

    pub async fn artifact_csv(&self, artifact_id: &ArtifactId) -> ClientResult<String> {
        self.get_text(ApiRequest::get(format!("/artifacts/{artifact_id}/csv")))
            .await
    }

    pub async fn scene_metrics_csv(&self, scene_id: &SceneId) -> ClientResult<String> {
        self.get_text(ApiRequest::get(format!("/scene/{scene_id}/metrics/csv")))
            .await
    }

    pub async fn scenes_csv(&self) -> ClientResult<String> {
        self.get_text(ApiRequest::get("/scenes/csv")).await
    }

    pub async fn runs_csv(&self) -> ClientResult<String> {
        self.get_text(ApiRequest::get("/runs/csv")).await
    }

    pub async fn list_runs(
        &self,
        offset: u64,
        limit: u64,
        only_failed: bool,
        only_passed: bool,
    ) -> ClientResult<Page<RunSummary>> {
        let mut request = ApiRequest::get("/runs")
            .query("limit", limit)
            .query("offset", offset);
        if only_failed {
            request = request.query("only_failed", true);
        }
        if only_passed {
            request = request.query("only_passed", true);
        }
        self.get(request).await
    }

    pub async fn gates(&self, scene_id: &SceneId) -> ClientResult<GateSummary> {
        self.get(ApiRequest::get("/gates").query("scene_id", scene_id))
            .await
    }

    pub async fn auth_ping(&self) -> ClientResult<AuthPing> {
        self.get(ApiRequest::get("/auth/ping")).await
    }

    pub async fn admin_cleanup(&self) -> ClientResult<CleanupResponse> {
        self.post::<CleanupResponse, Value>(ApiRequest::post("/admin/cleanup"), None)
            .await
    }
}

/// Empty 2xx bodies decode as JSON `null`.
fn decode<T: DeserializeOwned>(path: &str, body: &str) -> ClientResult<T> {
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body).map_err(|err| ClientError::Decode {
        path: path.to_string(),
        message: err.to_string(),
    })
}
