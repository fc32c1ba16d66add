use std::sync::Arc;

use async_trait::async_trait;
use shared::domain::Page;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{error::ClientResult, sequencer::ResourceKey, state::ClientState};

/// One remote listing endpoint as seen by [`ListingPager`].
#[async_trait]
pub trait PageSource<T, F>: Send + Sync
where
    T: Send + Sync + 'static,
    F: Send + Sync + 'static,
{
    /// Key under which loads of this listing are sequenced.
    fn resource_key(&self) -> ResourceKey;

    async fn fetch(&self, offset: u64, limit: u64, filters: &F) -> ClientResult<Page<T>>;

    /// Called with every applied page, after the cursor has moved.
    async fn publish(&self, _page: &Page<T>) {}
}

/// Snapshot of the cursor handed back to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct PageView<T, F> {
    pub items: Vec<T>,
    pub offset: u64,
    pub limit: u64,
    pub total: u64,
    pub filters: F,
    pub has_next: bool,
    pub has_prev: bool,
}

struct Cursor<T, F> {
    items: Vec<T>,
    offset: u64,
    limit: u64,
    total: u64,
    filters: F,
}

impl<T: Clone, F: Clone> Cursor<T, F> {
    fn has_next(&self) -> bool {
        self.offset + self.limit < self.total
    }

    fn has_prev(&self) -> bool {
        self.offset > 0
    }

    fn view(&self) -> PageView<T, F> {
        PageView {
            items: self.items.clone(),
            offset: self.offset,
            limit: self.limit,
            total: self.total,
            filters: self.filters.clone(),
            has_next: self.has_next(),
            has_prev: self.has_prev(),
        }
    }
}

/// Offset of the last page that can hold items when `total` items exist.
pub fn last_page_offset(total: u64, limit: u64) -> u64 {
    if total == 0 || limit == 0 {
        return 0;
    }
    ((total - 1) / limit) * limit
}

/// Offset/limit cursor over a filtered remote listing.
///
/// Boundary moves are no-ops that issue no request. A load superseded by a
/// later one is discarded when it lands.
pub struct ListingPager<T, F, S> {
    source: S,
    state: Arc<ClientState>,
    cursor: Mutex<Cursor<T, F>>,
}

impl<T, F, S> ListingPager<T, F, S>
where
    T: Clone + Send + Sync + 'static,
    F: Clone + Send + Sync + 'static,
    S: PageSource<T, F>,
{
    pub fn new(source: S, state: Arc<ClientState>, limit: u64, filters: F) -> Self {
        Self {
            source,
            state,
            cursor: Mutex::new(Cursor {
                items: Vec::new(),
                offset: 0,
                limit: limit.max(1),
                total: 0,
                filters,
            }),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn load(&self, offset: u64, limit: u64, filters: F) -> ClientResult<PageView<T, F>> {
        self.apply(offset, limit.max(1), filters).await
    }

    pub async fn next(&self) -> ClientResult<PageView<T, F>> {
        let (offset, limit, filters) = {
            let cursor = self.cursor.lock().await;
            if !cursor.has_next() {
                debug!(offset = cursor.offset, total = cursor.total, "pager: already on last page");
                return Ok(cursor.view());
            }
            (cursor.offset + cursor.limit, cursor.limit, cursor.filters.clone())
        };
        self.apply(offset, limit, filters).await
    }

    pub async fn prev(&self) -> ClientResult<PageView<T, F>> {
        let (offset, limit, filters) = {
            let cursor = self.cursor.lock().await;
            if !cursor.has_prev() {
                debug!("pager: already on first page");
                return Ok(cursor.view());
            }
            (
                cursor.offset.saturating_sub(cursor.limit),
                cursor.limit,
                cursor.filters.clone(),
            )
        };
        self.apply(offset, limit, filters).await
    }

    /// Replaces the filters and returns to the first page.
    pub async fn set_filters(&self, filters: F) -> ClientResult<PageView<T, F>> {
        let limit = self.cursor.lock().await.limit;
        self.apply(0, limit, filters).await
    }

    /// Reloads the current page with the current filters.
    pub async fn refresh(&self) -> ClientResult<PageView<T, F>> {
        let (offset, limit, filters) = {
            let cursor = self.cursor.lock().await;
            (cursor.offset, cursor.limit, cursor.filters.clone())
        };
        self.apply(offset, limit, filters).await
    }

    pub async fn has_next(&self) -> bool {
        self.cursor.lock().await.has_next()
    }

    pub async fn has_prev(&self) -> bool {
        self.cursor.lock().await.has_prev()
    }

    pub async fn view(&self) -> PageView<T, F> {
        self.cursor.lock().await.view()
    }

    async fn apply(&self, offset: u64, limit: u64, filters: F) -> ClientResult<PageView<T, F>> {
        let key = self.source.resource_key();
        let mut offset = offset;
        let mut clamped = false;
        loop {
            let ticket = self.state.sequencer().issue(key.clone());
            let page = self
                .source
                .fetch(offset, limit, &filters)
                .await
                .map_err(|err| {
                    warn!(?key, offset, "pager: load failed: {err}");
                    err
                })?;

            let mut cursor = self.cursor.lock().await;
            if !self.state.sequencer().check(&ticket).is_current() {
                debug!(?key, seq = ticket.seq, offset, "pager: dropping superseded page");
                return Ok(cursor.view());
            }

            // The listing shrank under us: step back to the last page once.
            if page.items.is_empty() && offset > 0 && offset >= page.total && !clamped {
                let last = last_page_offset(page.total, limit);
                info!(?key, from = offset, to = last, total = page.total, "pager: clamping past end");
                clamped = true;
                offset = last;
                drop(cursor);
                continue;
            }

            cursor.offset = offset;
            cursor.limit = limit;
            cursor.total = page.total;
            cursor.filters = filters;
            cursor.items = page.items.clone();
            self.source.publish(&page).await;
            return Ok(cursor.view());
        }
    }
}

#[cfg(test)]
#[path = "tests/pager_tests.rs"]
mod tests;
