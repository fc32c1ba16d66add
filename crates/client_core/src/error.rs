use shared::{domain::SceneId, error::ErrorCode};
use thiserror::Error;

/// Every failure the lifecycle client can report.
///
/// `Clone` so that one in-flight fetch can hand the same outcome to every
/// caller awaiting it.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("request {path} failed: {}", describe_failure(.status, .detail))]
    RequestFailed {
        path: String,
        /// `None` for transport-level failures (connect, TLS, reset).
        status: Option<u16>,
        detail: Option<String>,
    },
    #[error("unexpected response body from {path}: {message}")]
    Decode { path: String, message: String },
    #[error("no artifact of type '{artifact_type}' for scene {scene_id}")]
    NotFound {
        scene_id: SceneId,
        artifact_type: String,
    },
    #[error("CRS '{crs}' is not in the allowed set [{}]", join_allowed(.allowed))]
    CrsNotAllowed { crs: String, allowed: Vec<String> },
    #[error("pipeline run requires at least one step")]
    EmptySteps,
    #[error("unsupported export type '{0}'")]
    UnsupportedExportType(String),
    #[error("unknown pipeline step '{0}'")]
    UnknownPipelineStep(String),
    #[error("a pipeline run is already in flight for scene {scene_id}")]
    RunInProgress { scene_id: SceneId },
    #[error("file error at {path}: {message}")]
    Io { path: String, message: String },
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

fn describe_failure(status: &Option<u16>, detail: &Option<String>) -> String {
    match (status, detail) {
        (Some(status), Some(detail)) => format!("status {status} ({detail})"),
        (Some(status), None) => format!("status {status}"),
        (None, Some(detail)) => format!("transport error ({detail})"),
        (None, None) => "transport error".to_string(),
    }
}

fn join_allowed(allowed: &[String]) -> String {
    allowed.join(", ")
}

impl ClientError {
    pub fn request_failed(
        path: impl Into<String>,
        status: Option<u16>,
        detail: Option<String>,
    ) -> Self {
        Self::RequestFailed {
            path: path.into(),
            status,
            detail,
        }
    }

    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RequestFailed { status, .. } => *status,
            _ => None,
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        self.status().map(ErrorCode::from_status)
    }

    /// True for the "no data yet" outcomes: a resolver miss or a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. }) || self.code() == Some(ErrorCode::NotFound)
    }
}
