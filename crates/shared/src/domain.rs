use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(SceneId);
id_newtype!(ArtifactId);
id_newtype!(RunId);

/// Well-known artifact type names. The set is open: the service may emit
/// types not listed here and the client treats them as plain strings.
pub mod artifact_types {
    pub const INGESTED: &str = "ingested";
    pub const ALIGNED: &str = "aligned";
    pub const RESIDUALS: &str = "residuals";
    pub const SEGMENTATION_CLASSES: &str = "segmentation_classes";
    pub const SEGMENTATION_CONFIDENCE: &str = "segmentation_confidence";
    pub const SEGMENTATION_ENTROPY: &str = "segmentation_entropy";
    pub const CHANGE_MASK: &str = "change_mask";
    pub const CHANGE_DELTA: &str = "change_delta";
    pub const EXPORT_GLTF: &str = "export_gltf";
    pub const EXPORT_POTREE: &str = "export_potree";
    pub const EXPORT_LAZ: &str = "export_laz";
    pub const EXPORT_WEBM: &str = "export_webm";
    pub const REPORT_HTML: &str = "report_html";
    pub const REPORT_PDF: &str = "report_pdf";

    pub const EXPORT_PREFIX: &str = "export_";

    pub fn is_export(artifact_type: &str) -> bool {
        artifact_type.starts_with(EXPORT_PREFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: SceneId,
    pub source_uri: String,
    pub crs: String,
    #[serde(with = "crate::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_meta: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    /// Absent when the artifact is nested inside a scene payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<SceneId>,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub uri: String,
    #[serde(with = "crate::timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn with_scene(mut self, scene_id: &SceneId) -> Self {
        if self.scene_id.is_none() {
            self.scene_id = Some(scene_id.clone());
        }
        self
    }

    pub fn is_export(&self) -> bool {
        artifact_types::is_export(&self.artifact_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    #[serde(default, with = "crate::timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateSummary {
    pub registration_pass: bool,
    pub segmentation_pass: bool,
    pub change_pass: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_pass: Option<bool>,
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
    #[serde(default)]
    pub metrics: BTreeMap<String, Option<f64>>,
}

impl GateSummary {
    pub fn all_passed(&self) -> bool {
        self.overall_pass
            .unwrap_or(self.registration_pass && self.segmentation_pass && self.change_pass)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    #[serde(default, with = "crate::timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rmse: Option<f64>,
    #[serde(default)]
    pub miou: Option<f64>,
    #[serde(default)]
    pub change_f1: Option<f64>,
    #[serde(default)]
    pub registration_pass: bool,
    #[serde(default)]
    pub segmentation_pass: bool,
    #[serde(default)]
    pub change_detection_pass: bool,
    pub overall_pass: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub offset: u64,
    pub limit: u64,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn empty(offset: u64, limit: u64) -> Self {
        Self {
            items: Vec::new(),
            offset,
            limit,
            total: 0,
        }
    }
}

/// Content metadata the object store reports for an artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentMeta {
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub last_modified: Option<f64>,
    #[serde(default)]
    pub etag: Option<String>,
}

impl ContentMeta {
    /// Overlays every field `newer` knows about; fields it lacks are kept.
    pub fn merge(&mut self, newer: &ContentMeta) {
        if newer.size_bytes.is_some() {
            self.size_bytes = newer.size_bytes;
        }
        if newer.content_type.is_some() {
            self.content_type = newer.content_type.clone();
        }
        if newer.last_modified.is_some() {
            self.last_modified = newer.last_modified;
        }
        if newer.etag.is_some() {
            self.etag = newer.etag.clone();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size_bytes.is_none()
            && self.content_type.is_none()
            && self.last_modified.is_none()
            && self.etag.is_none()
    }
}

/// A presigned (or direct) download link as issued by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresignedUrl {
    pub artifact_id: ArtifactId,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub url: String,
    #[serde(default)]
    pub uri: Option<String>,
    /// Relative to the moment the response was received. `None` means the
    /// link is a direct URI that does not expire.
    #[serde(default)]
    pub expires_in_seconds: Option<u64>,
    #[serde(flatten)]
    pub meta: ContentMeta,
    #[serde(default, with = "crate::timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Registration,
    Segmentation,
    ChangeDetection,
}

impl PipelineStep {
    /// Conventional order presented to the operator.
    pub const ALL: [PipelineStep; 3] = [
        PipelineStep::Registration,
        PipelineStep::Segmentation,
        PipelineStep::ChangeDetection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStep::Registration => "registration",
            PipelineStep::Segmentation => "segmentation",
            PipelineStep::ChangeDetection => "change_detection",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "registration" => Ok(PipelineStep::Registration),
            "segmentation" => Ok(PipelineStep::Segmentation),
            "change_detection" | "change-detection" | "change" => Ok(PipelineStep::ChangeDetection),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportType {
    Potree,
    PotreeZip,
    Laz,
    Gltf,
    Webm,
}

impl ExportType {
    pub const ALL: [ExportType; 5] = [
        ExportType::Potree,
        ExportType::PotreeZip,
        ExportType::Laz,
        ExportType::Gltf,
        ExportType::Webm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExportType::Potree => "potree",
            ExportType::PotreeZip => "potree_zip",
            ExportType::Laz => "laz",
            ExportType::Gltf => "gltf",
            ExportType::Webm => "webm",
        }
    }

    /// Artifact type the service records for a finished export.
    pub fn artifact_type(self) -> String {
        format!("{}{}", artifact_types::EXPORT_PREFIX, self.as_str())
    }
}

impl fmt::Display for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        ExportType::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == normalized)
            .ok_or(normalized)
    }
}
