use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{Artifact, ArtifactId, ExportType, Metric, PipelineStep, SceneId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub source_uri: String,
    pub crs: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_meta: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub scene_id: SceneId,
    #[serde(default)]
    pub artifact_ids: Vec<ArtifactId>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    #[serde(default)]
    pub details: Value,
    #[serde(default, with = "crate::timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneDetail {
    pub id: SceneId,
    #[serde(default)]
    pub source_uri: Option<String>,
    #[serde(default)]
    pub crs: Option<String>,
    #[serde(default, with = "crate::timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunRequest {
    pub steps: Vec<PipelineStep>,
    #[serde(default)]
    pub config_overrides: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorSummary {
    /// Opaque; passed through for display.
    #[serde(default)]
    pub plan: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunResponse {
    #[serde(default)]
    pub orchestrator: OrchestratorSummary,
    #[serde(default)]
    pub artifacts: Vec<ArtifactId>,
    #[serde(default)]
    pub metrics: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportResponse {
    #[serde(default)]
    pub artifact_id: Option<ArtifactId>,
    #[serde(default)]
    pub scene_id: Option<SceneId>,
    #[serde(default, rename = "type")]
    pub export_type: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCheckRequest {
    pub export_type: ExportType,
    pub crs: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub deleted: BTreeMap<String, u64>,
    #[serde(default)]
    pub cutoff: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPing {
    pub authorized: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuInfo {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub gpu: Vec<GpuInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    #[serde(default)]
    pub scenes: u64,
    #[serde(default)]
    pub artifacts: u64,
    #[serde(default)]
    pub metrics: u64,
    #[serde(default)]
    pub exports: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub allowed_crs: Vec<String>,
    #[serde(default)]
    pub presign_expires_seconds: Option<u64>,
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
    #[serde(default)]
    pub retention_days: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
