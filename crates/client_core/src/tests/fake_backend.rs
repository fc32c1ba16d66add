//! In-memory stand-in for the pipeline service, implementing [`Transport`].
//!
//! Records every call as `"METHOD /path"` so tests can assert on request
//! counts and ordering.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use shared::{
    domain::{
        artifact_types, Artifact, ArtifactId, ContentMeta, GateSummary, Metric, Page, PipelineStep,
        PresignedUrl, RunId, RunSummary, Scene, SceneId,
    },
    protocol::{
        CleanupResponse, ExportResponse, IngestRequest, IngestResponse, PipelineRunRequest,
        PolicyCheckRequest, PolicyDecision, SceneDetail,
    },
};

use crate::{
    config::DEFAULT_ALLOWED_CRS,
    error::{ClientError, ClientResult},
    protocol_client::RemoteClient,
    transport::{ApiRequest, Method, Transport},
};

const EPOCH: i64 = 1_700_000_000;

pub(crate) struct FakeBackend {
    store: Mutex<Store>,
    calls: Mutex<Vec<String>>,
}

struct Store {
    next_id: u64,
    clock: i64,
    url_version: u64,
    scenes: Vec<Scene>,
    artifacts: Vec<Artifact>,
    metrics: HashMap<SceneId, Vec<Metric>>,
    gates: HashMap<SceneId, GateSummary>,
    runs: Vec<RunSummary>,
    contents: HashMap<ArtifactId, String>,
    allowed_crs: Vec<String>,
    expires_in_seconds: Option<u64>,
    latency: Option<Duration>,
    latest_enabled: bool,
    latest_includes_created_at: bool,
    failures: HashMap<String, u16>,
    held_responses: HashMap<String, Duration>,
    export_names_artifact: bool,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            next_id: 1,
            clock: EPOCH,
            url_version: 0,
            scenes: Vec::new(),
            artifacts: Vec::new(),
            metrics: HashMap::new(),
            gates: HashMap::new(),
            runs: Vec::new(),
            contents: HashMap::new(),
            allowed_crs: DEFAULT_ALLOWED_CRS.iter().map(|crs| crs.to_string()).collect(),
            expires_in_seconds: Some(3600),
            latency: None,
            latest_enabled: true,
            latest_includes_created_at: true,
            failures: HashMap::new(),
            held_responses: HashMap::new(),
            export_names_artifact: true,
        }
    }
}

impl Store {
    fn next_id(&mut self, prefix: &str) -> String {
        let id = format!("{prefix}{:04}", self.next_id);
        self.next_id += 1;
        id
    }

    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        at(self.clock)
    }

    fn scene(&self, scene_id: &SceneId) -> Option<&Scene> {
        self.scenes.iter().find(|scene| &scene.id == scene_id)
    }

    fn push_artifact(&mut self, scene_id: &SceneId, artifact_type: &str) -> ArtifactId {
        let created_at = self.tick();
        self.push_artifact_at(scene_id, artifact_type, created_at)
    }

    fn push_artifact_at(
        &mut self,
        scene_id: &SceneId,
        artifact_type: &str,
        created_at: DateTime<Utc>,
    ) -> ArtifactId {
        let id = ArtifactId::from(self.next_id("art-"));
        self.artifacts.push(Artifact {
            id: id.clone(),
            scene_id: Some(scene_id.clone()),
            artifact_type: artifact_type.to_string(),
            uri: format!("s3://roborouter/{scene_id}/{artifact_type}/{id}"),
            created_at,
        });
        id
    }

    fn push_metric(&mut self, scene_id: &SceneId, name: &str, value: f64) {
        let created_at = self.tick();
        self.metrics.entry(scene_id.clone()).or_default().push(Metric {
            name: name.to_string(),
            value,
            created_at: Some(created_at),
        });
    }

    fn artifact(&self, artifact_id: &ArtifactId) -> Option<&Artifact> {
        self.artifacts.iter().find(|artifact| &artifact.id == artifact_id)
    }

    fn latest_of(&self, scene_id: &SceneId, artifact_type: &str) -> Option<&Artifact> {
        self.artifacts
            .iter()
            .filter(|a| a.scene_id.as_ref() == Some(scene_id) && a.artifact_type == artifact_type)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
    }

    fn presign(&mut self, artifact_id: &ArtifactId) -> Option<PresignedUrl> {
        let artifact = self.artifact(artifact_id)?.clone();
        self.url_version += 1;
        let size_bytes = self
            .contents
            .get(artifact_id)
            .map(|body| body.len() as u64)
            .unwrap_or(1024);
        Some(PresignedUrl {
            artifact_id: artifact.id.clone(),
            artifact_type: artifact.artifact_type.clone(),
            url: format!(
                "https://objects.test/{}?sig={}",
                artifact.id, self.url_version
            ),
            uri: Some(artifact.uri.clone()),
            expires_in_seconds: self.expires_in_seconds,
            meta: ContentMeta {
                size_bytes: Some(size_bytes),
                content_type: Some(content_type_for(&artifact.artifact_type).to_string()),
                last_modified: Some(artifact.created_at.timestamp() as f64),
                etag: Some(format!("etag-{}", artifact.id)),
            },
            created_at: None,
        })
    }

    fn scene_gates(&self, scene_id: &SceneId) -> GateSummary {
        self.gates.get(scene_id).cloned().unwrap_or_default()
    }
}

pub(crate) fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or_else(|| panic!("timestamp {secs} out of range"))
}

fn content_type_for(artifact_type: &str) -> &'static str {
    match artifact_type {
        artifact_types::REPORT_HTML => "text/html",
        artifact_types::REPORT_PDF => "application/pdf",
        artifact_types::CHANGE_DELTA | artifact_types::SEGMENTATION_CLASSES => "application/json",
        _ => "application/octet-stream",
    }
}

fn not_found(path: &str, what: &str) -> ClientError {
    ClientError::request_failed(path, Some(404), Some(format!("{what} not found")))
}

fn bad_request(path: &str, detail: &str) -> ClientError {
    ClientError::request_failed(path, Some(400), Some(detail.to_string()))
}

fn encode<T: Serialize>(value: &T) -> ClientResult<String> {
    serde_json::to_string(value).map_err(|err| ClientError::Decode {
        path: "fake".into(),
        message: err.to_string(),
    })
}

fn paginate<T: Clone>(items: &[T], request: &ApiRequest) -> Page<T> {
    let offset: u64 = request
        .query_value("offset")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let limit: u64 = request
        .query_value("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(20);
    let total = items.len() as u64;
    let start = offset.min(total) as usize;
    let end = (offset + limit).min(total) as usize;
    Page {
        items: items[start..end].to_vec(),
        offset,
        limit,
        total,
    }
}

fn csv_line(fields: &[String]) -> String {
    fields.join(",")
}

impl FakeBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(Store::default()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn remote(self: &Arc<Self>) -> RemoteClient {
        RemoteClient::new(Arc::clone(self) as Arc<dyn Transport>)
    }

    fn with_store<R>(&self, f: impl FnOnce(&mut Store) -> R) -> R {
        let mut store = self.store.lock().unwrap_or_else(|err| err.into_inner());
        f(&mut store)
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|err| err.into_inner()).clone()
    }

    /// Number of calls recorded for exactly `"METHOD /path"`.
    pub(crate) fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|err| err.into_inner()).clear();
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        self.with_store(|store| store.latency = Some(latency));
    }

    pub(crate) fn set_expires_in(&self, expires_in_seconds: Option<u64>) {
        self.with_store(|store| store.expires_in_seconds = expires_in_seconds);
    }

    pub(crate) fn disable_latest_endpoint(&self) {
        self.with_store(|store| store.latest_enabled = false);
    }

    pub(crate) fn omit_latest_created_at(&self) {
        self.with_store(|store| store.latest_includes_created_at = false);
    }

    pub(crate) fn set_allowed_crs(&self, allowed: &[&str]) {
        self.with_store(|store| {
            store.allowed_crs = allowed.iter().map(|crs| crs.to_string()).collect();
        });
    }

    /// Next call to `"METHOD /path"` fails with `status`.
    pub(crate) fn fail_next(&self, call: &str, status: u16) {
        self.with_store(|store| {
            store.failures.insert(call.to_string(), status);
        });
    }

    /// Next call to `"METHOD /path"` is answered immediately but its
    /// response is held back for `delay`, so writes made meanwhile are not
    /// reflected in it.
    pub(crate) fn hold_next_response(&self, call: &str, delay: Duration) {
        self.with_store(|store| {
            store.held_responses.insert(call.to_string(), delay);
        });
    }

    /// `/export` answers with `{scene_id, type, uri}` only.
    pub(crate) fn omit_export_artifact_id(&self) {
        self.with_store(|store| store.export_names_artifact = false);
    }

    pub(crate) fn add_scene(&self, source_uri: &str, crs: &str) -> SceneId {
        self.with_store(|store| {
            let id = SceneId::from(store.next_id("scene-"));
            let created_at = store.tick();
            store.scenes.push(Scene {
                id: id.clone(),
                source_uri: source_uri.to_string(),
                crs: crs.to_string(),
                created_at,
                sensor_meta: None,
            });
            id
        })
    }

    pub(crate) fn add_artifact(&self, scene_id: &SceneId, artifact_type: &str) -> ArtifactId {
        self.with_store(|store| store.push_artifact(scene_id, artifact_type))
    }

    pub(crate) fn add_artifact_at(
        &self,
        scene_id: &SceneId,
        artifact_type: &str,
        created_at: DateTime<Utc>,
    ) -> ArtifactId {
        self.with_store(|store| store.push_artifact_at(scene_id, artifact_type, created_at))
    }

    pub(crate) fn set_content(&self, artifact_id: &ArtifactId, body: &str) {
        self.with_store(|store| {
            store.contents.insert(artifact_id.clone(), body.to_string());
        });
    }

    pub(crate) fn add_run(&self, overall_pass: bool) -> RunId {
        self.with_store(|store| {
            let id = RunId::from(store.next_id("run-"));
            let created_at = store.tick();
            store.runs.push(RunSummary {
                id: id.clone(),
                created_at: Some(created_at),
                rmse: Some(0.05),
                miou: Some(0.8),
                change_f1: Some(0.7),
                registration_pass: overall_pass,
                segmentation_pass: overall_pass,
                change_detection_pass: overall_pass,
                overall_pass,
            });
            id
        })
    }

    pub(crate) fn artifact_count(&self, scene_id: &SceneId) -> usize {
        self.with_store(|store| {
            store
                .artifacts
                .iter()
                .filter(|a| a.scene_id.as_ref() == Some(scene_id))
                .count()
        })
    }

    fn route(&self, request: &ApiRequest) -> ClientResult<String> {
        let path = request.path.as_str();
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let mut store = self.store.lock().unwrap_or_else(|err| err.into_inner());
        let store = &mut *store;

        match (request.method, segments.as_slice()) {
            (Method::Get, ["health"]) => encode(&json!({"status": "ok", "gpu": []})),
            (Method::Get, ["meta"]) => encode(&json!({"version": "0.0.0-test", "orchestrator": "stub"})),
            (Method::Get, ["stats"]) => encode(&json!({
                "scenes": store.scenes.len(),
                "artifacts": store.artifacts.len(),
                "metrics": store.metrics.values().map(Vec::len).sum::<usize>(),
                "exports": store.artifacts.iter().filter(|a| a.is_export()).count(),
            })),
            (Method::Get, ["config"]) => encode(&json!({
                "allowed_crs": store.allowed_crs,
                "presign_expires_seconds": store.expires_in_seconds,
                "thresholds": {"rmse_max": 0.1, "miou_min": 0.5, "change_f1_min": 0.5},
            })),
            (Method::Get, ["models"]) => encode(&json!({"segmentation": ["stub-seg"], "change": ["stub-change"]})),
            (Method::Get, ["auth", "ping"]) => encode(&json!({"authorized": true})),
            (Method::Post, ["admin", "cleanup"]) => encode(&CleanupResponse {
                deleted: BTreeMap::from([("artifacts".to_string(), 0), ("scenes".to_string(), 0)]),
                cutoff: Some("2023-11-01T00:00:00".to_string()),
            }),
            (Method::Post, ["ingest"]) => {
                let body: IngestRequest = decode_body(request)?;
                let scene_id = SceneId::from(store.next_id("scene-"));
                let created_at = store.tick();
                store.scenes.push(Scene {
                    id: scene_id.clone(),
                    source_uri: body.source_uri,
                    crs: body.crs,
                    created_at,
                    sensor_meta: body.sensor_meta,
                });
                let ingested = store.push_artifact(&scene_id, artifact_types::INGESTED);
                store.push_metric(&scene_id, "point_count", 1000.0);
                encode(&IngestResponse {
                    scene_id,
                    artifact_ids: vec![ingested],
                    metrics: BTreeMap::from([("point_count".to_string(), 1000.0)]),
                })
            }
            (Method::Get, ["scenes"]) => {
                let query = request.query_value("q").unwrap_or_default().to_string();
                let mut scenes: Vec<Scene> = store
                    .scenes
                    .iter()
                    .filter(|scene| scene.source_uri.contains(&query))
                    .cloned()
                    .collect();
                scenes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                encode(&paginate(&scenes, request))
            }
            (Method::Get, ["scenes", "csv"]) => {
                let mut lines = vec!["id,source_uri,crs,created_at".to_string()];
                lines.extend(store.scenes.iter().map(|scene| {
                    csv_line(&[
                        scene.id.to_string(),
                        scene.source_uri.clone(),
                        scene.crs.clone(),
                        scene.created_at.to_rfc3339(),
                    ])
                }));
                Ok(lines.join("\n"))
            }
            (Method::Delete, ["scene", id]) => {
                let scene_id = SceneId::from(*id);
                if store.scene(&scene_id).is_none() {
                    return Err(not_found(path, "Scene"));
                }
                store.scenes.retain(|scene| scene.id != scene_id);
                store.artifacts.retain(|a| a.scene_id.as_ref() != Some(&scene_id));
                store.metrics.remove(&scene_id);
                store.gates.remove(&scene_id);
                encode(&json!({"deleted": scene_id}))
            }
            (Method::Get, ["scene", id]) => {
                let scene_id = SceneId::from(*id);
                let scene = store.scene(&scene_id).cloned().ok_or_else(|| not_found(path, "Scene"))?;
                let mut artifacts: Vec<Artifact> = store
                    .artifacts
                    .iter()
                    .filter(|a| a.scene_id.as_ref() == Some(&scene_id))
                    .map(|a| Artifact {
                        scene_id: None,
                        ..a.clone()
                    })
                    .collect();
                artifacts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                encode(&SceneDetail {
                    id: scene.id,
                    source_uri: Some(scene.source_uri),
                    crs: Some(scene.crs),
                    created_at: Some(scene.created_at),
                    artifacts,
                    metrics: store.metrics.get(&scene_id).cloned().unwrap_or_default(),
                    audit: Vec::new(),
                })
            }
            (Method::Get, ["scene", id, "artifacts"]) => {
                let scene_id = SceneId::from(*id);
                if store.scene(&scene_id).is_none() {
                    return Err(not_found(path, "Scene"));
                }
                let type_contains = request.query_value("type").unwrap_or_default();
                let exports_only = request.query_value("exports_only") == Some("true");
                let mut artifacts: Vec<Artifact> = store
                    .artifacts
                    .iter()
                    .filter(|a| a.scene_id.as_ref() == Some(&scene_id))
                    .filter(|a| a.artifact_type.contains(type_contains))
                    .filter(|a| !exports_only || a.is_export())
                    .map(|a| Artifact {
                        scene_id: None,
                        ..a.clone()
                    })
                    .collect();
                artifacts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                encode(&paginate(&artifacts, request))
            }
            (Method::Get, ["scene", id, "metrics", "csv"]) => {
                let scene_id = SceneId::from(*id);
                let mut lines = vec!["name,value,created_at".to_string()];
                for metric in store.metrics.get(&scene_id).into_iter().flatten() {
                    lines.push(csv_line(&[
                        metric.name.clone(),
                        metric.value.to_string(),
                        metric.created_at.map(|ts| ts.to_rfc3339()).unwrap_or_default(),
                    ]));
                }
                Ok(lines.join("\n"))
            }
            (Method::Post, ["pipeline", "run"]) => {
                let scene_id = SceneId::from(request.query_value("scene_id").unwrap_or_default());
                if store.scene(&scene_id).is_none() {
                    return Err(not_found(path, "Scene"));
                }
                let body: PipelineRunRequest = decode_body(request)?;
                let mut produced = Vec::new();
                let mut metrics = BTreeMap::new();
                let mut gates = store.scene_gates(&scene_id);
                for step in &body.steps {
                    let (types, step_metrics): (&[&str], &[(&str, f64)]) = match step {
                        PipelineStep::Registration => (
                            &[artifact_types::ALIGNED, artifact_types::RESIDUALS],
                            &[("rmse", 0.05), ("inlier_ratio", 0.92), ("registration_ms", 12.0)],
                        ),
                        PipelineStep::Segmentation => (
                            &[
                                artifact_types::SEGMENTATION_CLASSES,
                                artifact_types::SEGMENTATION_CONFIDENCE,
                                artifact_types::SEGMENTATION_ENTROPY,
                            ],
                            &[("miou", 0.81)],
                        ),
                        PipelineStep::ChangeDetection => (
                            &[artifact_types::CHANGE_MASK, artifact_types::CHANGE_DELTA],
                            &[("change_f1", 0.74)],
                        ),
                    };
                    for artifact_type in types {
                        produced.push(store.push_artifact(&scene_id, artifact_type));
                    }
                    for (name, value) in step_metrics {
                        store.push_metric(&scene_id, name, *value);
                        metrics.insert(name.to_string(), json!(value));
                    }
                    match step {
                        PipelineStep::Registration => gates.registration_pass = true,
                        PipelineStep::Segmentation => gates.segmentation_pass = true,
                        PipelineStep::ChangeDetection => gates.change_pass = true,
                    }
                }
                store.gates.insert(scene_id.clone(), gates);
                let plan: Vec<Value> = body
                    .steps
                    .iter()
                    .map(|step| json!({"step": step.as_str(), "engine": "stub"}))
                    .collect();
                encode(&json!({
                    "scene_id": scene_id,
                    "steps": body.steps,
                    "artifacts": produced,
                    "metrics": metrics,
                    "orchestrator": {"plan": plan, "name": "stub"},
                }))
            }
            (Method::Post, ["report", "generate"]) => {
                let scene_id = SceneId::from(request.query_value("scene_id").unwrap_or_default());
                if store.scene(&scene_id).is_none() {
                    return Err(not_found(path, "Scene"));
                }
                let html = store.push_artifact(&scene_id, artifact_types::REPORT_HTML);
                let pdf = store.push_artifact(&scene_id, artifact_types::REPORT_PDF);
                encode(&json!({"scene_id": scene_id, "html": html, "pdf": pdf}))
            }
            (Method::Post, ["export"]) => {
                let scene_id = SceneId::from(request.query_value("scene_id").unwrap_or_default());
                if store.scene(&scene_id).is_none() {
                    return Err(not_found(path, "Scene"));
                }
                let crs = request.query_value("crs").unwrap_or_default().to_ascii_uppercase();
                if !store.allowed_crs.iter().any(|allowed| allowed.to_ascii_uppercase() == crs) {
                    return Err(bad_request(path, "CRS not allowed by policy"));
                }
                let export_type = request.query_value("type").unwrap_or_default().to_string();
                let artifact_type = format!("{}{export_type}", artifact_types::EXPORT_PREFIX);
                let artifact_id = store.push_artifact(&scene_id, &artifact_type);
                let uri = store.artifact(&artifact_id).map(|a| a.uri.clone());
                encode(&ExportResponse {
                    artifact_id: store.export_names_artifact.then_some(artifact_id),
                    scene_id: Some(scene_id),
                    export_type: Some(export_type),
                    uri,
                })
            }
            (Method::Post, ["policy", "check"]) => {
                let body: PolicyCheckRequest = decode_body(request)?;
                let crs = body.crs.to_ascii_uppercase();
                let allowed = store.allowed_crs.iter().any(|a| a.to_ascii_uppercase() == crs);
                encode(&PolicyDecision {
                    allowed,
                    reason: if allowed {
                        "ok".to_string()
                    } else {
                        format!("crs {} not permitted for {}", body.crs, body.export_type)
                    },
                })
            }
            (Method::Get, ["artifacts", "latest"]) => {
                if !store.latest_enabled {
                    return Err(not_found(path, "Route"));
                }
                let scene_id = SceneId::from(request.query_value("scene_id").unwrap_or_default());
                let artifact_type = request.query_value("type").unwrap_or_default();
                let latest = store
                    .latest_of(&scene_id, artifact_type)
                    .cloned()
                    .ok_or_else(|| not_found(path, "Artifact"))?;
                let mut entry = store
                    .presign(&latest.id)
                    .ok_or_else(|| not_found(path, "Artifact"))?;
                if store.latest_includes_created_at {
                    entry.created_at = Some(latest.created_at);
                }
                encode(&entry)
            }
            (Method::Get, ["artifacts", id, "csv"]) => {
                let artifact_id = ArtifactId::from(*id);
                let artifact = store.artifact(&artifact_id).ok_or_else(|| not_found(path, "Artifact"))?;
                if artifact.artifact_type != artifact_types::CHANGE_DELTA {
                    return Err(bad_request(path, "CSV view only supported for change_delta"));
                }
                Ok("key,count\nadded,12\nremoved,3".to_string())
            }
            (Method::Get, ["artifacts", id]) => {
                let entry = store
                    .presign(&ArtifactId::from(*id))
                    .ok_or_else(|| not_found(path, "Artifact"))?;
                encode(&entry)
            }
            (Method::Post, ["artifacts", "refresh", id]) => {
                let entry = store
                    .presign(&ArtifactId::from(*id))
                    .ok_or_else(|| not_found(path, "Artifact"))?;
                encode(&entry)
            }
            (Method::Delete, ["artifacts", id]) => {
                let artifact_id = ArtifactId::from(*id);
                if store.artifact(&artifact_id).is_none() {
                    return Err(not_found(path, "Artifact"));
                }
                store.artifacts.retain(|a| a.id != artifact_id);
                encode(&json!({"deleted": artifact_id}))
            }
            (Method::Get, ["runs"]) => {
                let only_failed = request.query_value("only_failed") == Some("true");
                let only_passed = request.query_value("only_passed") == Some("true");
                let mut runs: Vec<RunSummary> = store
                    .runs
                    .iter()
                    .filter(|run| !only_failed || !run.overall_pass)
                    .filter(|run| !only_passed || run.overall_pass)
                    .cloned()
                    .collect();
                runs.reverse();
                encode(&paginate(&runs, request))
            }
            (Method::Get, ["runs", "csv"]) => {
                let mut lines = vec!["id,overall_pass".to_string()];
                lines.extend(
                    store
                        .runs
                        .iter()
                        .map(|run| csv_line(&[run.id.to_string(), run.overall_pass.to_string()])),
                );
                Ok(lines.join("\n"))
            }
            (Method::Get, ["gates"]) => {
                let scene_id = SceneId::from(request.query_value("scene_id").unwrap_or_default());
                if store.scene(&scene_id).is_none() {
                    return Err(not_found(path, "Scene"));
                }
                encode(&store.scene_gates(&scene_id))
            }
            _ => Err(not_found(path, "Route")),
        }
    }
}

fn decode_body<T: serde::de::DeserializeOwned>(request: &ApiRequest) -> ClientResult<T> {
    let body = request.body.clone().unwrap_or(Value::Null);
    serde_json::from_value(body).map_err(|err| {
        ClientError::request_failed(request.path.clone(), Some(422), Some(err.to_string()))
    })
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, request: ApiRequest) -> ClientResult<String> {
        let call = format!("{} {}", request.method.as_str(), request.path);
        self.calls
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(call.clone());

        let (latency, failure, hold) = self.with_store(|store| {
            (
                store.latency,
                store.failures.remove(&call),
                store.held_responses.remove(&call),
            )
        });
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(status) = failure {
            return Err(ClientError::request_failed(
                request.path.clone(),
                Some(status),
                Some("injected failure".to_string()),
            ));
        }
        let response = self.route(&request);
        if let Some(hold) = hold {
            tokio::time::sleep(hold).await;
        }
        response
    }

    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> ClientResult<String> {
        self.calls
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push("POST /upload".to_string());
        encode(&json!({"path": format!("uploads/{file_name}"), "size": bytes.len()}))
    }

    async fn fetch_url(&self, url: &str) -> ClientResult<String> {
        self.calls
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(format!("FETCH {url}"));
        let id = url
            .trim_start_matches("https://objects.test/")
            .split('?')
            .next()
            .unwrap_or_default();
        self.with_store(|store| store.contents.get(&ArtifactId::from(id)).cloned())
            .ok_or_else(|| not_found(url, "Object"))
    }
}
