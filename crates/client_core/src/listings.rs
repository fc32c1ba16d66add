//! The three paginated listings the operator browses.

use std::sync::Arc;

use async_trait::async_trait;
use shared::domain::{Artifact, Page, RunSummary, Scene, SceneId};

use crate::{
    error::ClientResult,
    pager::{ListingPager, PageSource},
    protocol_client::RemoteClient,
    sequencer::ResourceKey,
    state::ClientState,
};

pub type ScenePager = ListingPager<Scene, SceneFilter, SceneSource>;
pub type ArtifactPager = ListingPager<Artifact, ArtifactFilter, ArtifactSource>;
pub type RunPager = ListingPager<RunSummary, RunFilter, RunSource>;

/// Substring match over scene source URIs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneFilter {
    pub query: Option<String>,
}

impl SceneFilter {
    pub fn matching(query: impl Into<String>) -> Self {
        let query = query.into();
        Self {
            query: (!query.trim().is_empty()).then_some(query),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactFilter {
    /// Substring of the artifact type.
    pub type_contains: Option<String>,
    pub exports_only: bool,
}

impl ArtifactFilter {
    pub fn exports() -> Self {
        Self {
            type_contains: None,
            exports_only: true,
        }
    }

    pub fn of_type(type_contains: impl Into<String>) -> Self {
        Self {
            type_contains: Some(type_contains.into()),
            exports_only: false,
        }
    }
}

/// Run filters are mutually exclusive; turning one on turns the other off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunFilter {
    #[default]
    All,
    OnlyFailed,
    OnlyPassed,
}

impl RunFilter {
    pub fn with_only_failed(self, enabled: bool) -> Self {
        match (enabled, self) {
            (true, _) => RunFilter::OnlyFailed,
            (false, RunFilter::OnlyFailed) => RunFilter::All,
            (false, other) => other,
        }
    }

    pub fn with_only_passed(self, enabled: bool) -> Self {
        match (enabled, self) {
            (true, _) => RunFilter::OnlyPassed,
            (false, RunFilter::OnlyPassed) => RunFilter::All,
            (false, other) => other,
        }
    }

    pub fn only_failed(self) -> bool {
        self == RunFilter::OnlyFailed
    }

    pub fn only_passed(self) -> bool {
        self == RunFilter::OnlyPassed
    }
}

pub struct SceneSource {
    remote: RemoteClient,
    state: Arc<ClientState>,
}

#[async_trait]
impl PageSource<Scene, SceneFilter> for SceneSource {
    fn resource_key(&self) -> ResourceKey {
        ResourceKey::SceneListing
    }

    async fn fetch(&self, offset: u64, limit: u64, filters: &SceneFilter) -> ClientResult<Page<Scene>> {
        self.remote
            .list_scenes(offset, limit, filters.query.as_deref())
            .await
    }

    async fn publish(&self, page: &Page<Scene>) {
        self.state
            .replace_scenes(page.items.clone(), page.total)
            .await;
    }
}

pub struct ArtifactSource {
    remote: RemoteClient,
    scene_id: SceneId,
}

impl ArtifactSource {
    pub fn scene_id(&self) -> &SceneId {
        &self.scene_id
    }
}

#[async_trait]
impl PageSource<Artifact, ArtifactFilter> for ArtifactSource {
    fn resource_key(&self) -> ResourceKey {
        ResourceKey::ArtifactListing(self.scene_id.clone())
    }

    async fn fetch(
        &self,
        offset: u64,
        limit: u64,
        filters: &ArtifactFilter,
    ) -> ClientResult<Page<Artifact>> {
        self.remote
            .list_scene_artifacts(
                &self.scene_id,
                offset,
                limit,
                filters.type_contains.as_deref(),
                filters.exports_only,
            )
            .await
    }
}

pub struct RunSource {
    remote: RemoteClient,
    state: Arc<ClientState>,
}

#[async_trait]
impl PageSource<RunSummary, RunFilter> for RunSource {
    fn resource_key(&self) -> ResourceKey {
        ResourceKey::RunListing
    }

    async fn fetch(&self, offset: u64, limit: u64, filters: &RunFilter) -> ClientResult<Page<RunSummary>> {
        self.remote
            .list_runs(offset, limit, filters.only_failed(), filters.only_passed())
            .await
    }

    async fn publish(&self, page: &Page<RunSummary>) {
        self.state.replace_runs(page.items.clone()).await;
    }
}

pub fn scene_pager(remote: RemoteClient, state: Arc<ClientState>, page_size: u64) -> ScenePager {
    let source = SceneSource {
        remote,
        state: Arc::clone(&state),
    };
    ListingPager::new(source, state, page_size, SceneFilter::default())
}

pub fn artifact_pager(
    remote: RemoteClient,
    state: Arc<ClientState>,
    scene_id: SceneId,
    page_size: u64,
) -> ArtifactPager {
    let source = ArtifactSource { remote, scene_id };
    ListingPager::new(source, state, page_size, ArtifactFilter::default())
}

pub fn run_pager(remote: RemoteClient, state: Arc<ClientState>, page_size: u64) -> RunPager {
    let source = RunSource {
        remote,
        state: Arc::clone(&state),
    };
    ListingPager::new(source, state, page_size, RunFilter::default())
}

#[cfg(test)]
#[path = "tests/listings_tests.rs"]
mod tests;
