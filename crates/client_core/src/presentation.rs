use std::sync::Arc;

use serde_json::Value;
use shared::domain::{artifact_types, ArtifactId, PresignedUrl};
use tracing::debug;

use crate::{error::ClientResult, protocol_client::RemoteClient, url_cache::PresignedUrlCache};

/// Raw (non-JSON) previews show at most this many characters.
pub const PREVIEW_LIMIT_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationRule {
    /// Hand the URL to a browser/viewer as-is.
    OpenDirect,
    /// Fetch the content and show it inline.
    Preview,
}

impl PresentationRule {
    pub fn for_type(artifact_type: &str) -> Self {
        match artifact_type {
            artifact_types::EXPORT_POTREE | artifact_types::REPORT_HTML => PresentationRule::OpenDirect,
            _ => PresentationRule::Preview,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactPreview {
    /// Body parsed as JSON, pretty-printed.
    Structured(String),
    Raw { text: String, truncated: bool },
}

impl ArtifactPreview {
    pub fn text(&self) -> &str {
        match self {
            ArtifactPreview::Structured(text) => text,
            ArtifactPreview::Raw { text, .. } => text,
        }
    }
}

pub fn render_preview(body: &str) -> ArtifactPreview {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Ok(pretty) = serde_json::to_string_pretty(&value) {
            return ArtifactPreview::Structured(pretty);
        }
    }
    let mut chars = body.chars();
    let text: String = chars.by_ref().take(PREVIEW_LIMIT_CHARS).collect();
    ArtifactPreview::Raw {
        text,
        truncated: chars.next().is_some(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Presentation {
    Open { url: PresignedUrl },
    Preview { url: PresignedUrl, preview: ArtifactPreview },
}

impl Presentation {
    pub fn url(&self) -> &PresignedUrl {
        match self {
            Presentation::Open { url } | Presentation::Preview { url, .. } => url,
        }
    }
}

pub struct ArtifactPresenter {
    remote: RemoteClient,
    url_cache: Arc<PresignedUrlCache>,
}

impl ArtifactPresenter {
    pub fn new(remote: RemoteClient, url_cache: Arc<PresignedUrlCache>) -> Self {
        Self { remote, url_cache }
    }

    pub async fn present(&self, artifact_id: &ArtifactId) -> ClientResult<Presentation> {
        let url = self.url_cache.resolve(artifact_id).await?;
        match PresentationRule::for_type(&url.artifact_type) {
            PresentationRule::OpenDirect => {
                // The viewer keeps the link open; hand it a full lifetime.
                let url = self.url_cache.force_refresh(artifact_id).await?;
                debug!(artifact_id = %artifact_id, artifact_type = %url.artifact_type, "presentation: open directly");
                Ok(Presentation::Open { url })
            }
            PresentationRule::Preview => {
                let body = self.remote.fetch_url_text(&url.url).await?;
                let preview = render_preview(&body);
                Ok(Presentation::Preview { url, preview })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{fake_backend::FakeBackend, state::ClientState};

    #[test]
    fn only_potree_and_html_reports_open_directly() {
        assert_eq!(PresentationRule::for_type("export_potree"), PresentationRule::OpenDirect);
        assert_eq!(PresentationRule::for_type("report_html"), PresentationRule::OpenDirect);
        assert_eq!(PresentationRule::for_type("report_pdf"), PresentationRule::Preview);
        assert_eq!(PresentationRule::for_type("export_potree_zip"), PresentationRule::Preview);
    }

    #[test]
    fn json_bodies_are_pretty_printed() {
        let preview = render_preview(r#"{"added":12,"removed":3}"#);
        assert_eq!(
            preview,
            ArtifactPreview::Structured("{\n  \"added\": 12,\n  \"removed\": 3\n}".to_string())
        );
    }

    #[test]
    fn raw_bodies_are_cut_at_the_character_limit() {
        let body = "é".repeat(PREVIEW_LIMIT_CHARS + 5);
        match render_preview(&body) {
            ArtifactPreview::Raw { text, truncated } => {
                assert_eq!(text.chars().count(), PREVIEW_LIMIT_CHARS);
                assert!(truncated);
            }
            other => panic!("expected raw preview, got {other:?}"),
        }

        assert_eq!(
            render_preview("ply\nformat ascii"),
            ArtifactPreview::Raw {
                text: "ply\nformat ascii".to_string(),
                truncated: false
            }
        );
    }

    #[tokio::test]
    async fn presenter_fetches_previews_but_not_direct_artifacts() {
        let backend = FakeBackend::new();
        let scene = backend.add_scene("s3://raw/site-a.laz", "EPSG:3857");
        let delta = backend.add_artifact(&scene, "change_delta");
        backend.set_content(&delta, r#"{"added":1}"#);
        let viewer = backend.add_artifact(&scene, "export_potree");
        let state = Arc::new(ClientState::default());
        let cache = Arc::new(PresignedUrlCache::new(backend.remote(), state));
        let presenter = ArtifactPresenter::new(backend.remote(), cache);

        let preview = presenter.present(&delta).await.expect("preview");
        assert!(matches!(
            preview,
            Presentation::Preview { preview: ArtifactPreview::Structured(_), .. }
        ));

        let open = presenter.present(&viewer).await.expect("open");
        assert!(matches!(open, Presentation::Open { .. }));
        assert_eq!(backend.count(&format!("POST /artifacts/refresh/{viewer}")), 1);
        assert_eq!(open.url().url, format!("https://objects.test/{viewer}?sig=3"));
        let fetches = backend
            .calls()
            .iter()
            .filter(|call| call.starts_with("FETCH "))
            .count();
        assert_eq!(fetches, 1);
    }
}
