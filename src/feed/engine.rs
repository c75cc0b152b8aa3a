//! The in-memory feed: item list, cursor machine and watermark writes.
//!
//! Loads are split in two halves so the I/O can run on a spawned task:
//! `begin_*` validates the transition and returns a [`LoadRequest`], and
//! [`FeedEngine::complete`] applies whatever came back. Each request carries
//! the generation it was issued under; completions from a superseded
//! generation (filter change, reload) are dropped.

use super::cursor::{CursorMachine, Trigger};
use super::merge::{merge, newest_forum_id, oldest_forum_id};
use super::model::{Cursor, Direction, FeedFilter, FeedItem, ItemId};
use super::normalize::Normalizer;
use crate::source::{AuctionSource, FetchError, ForumSource, Page, RawForumItem, RawOffer};
use crate::storage::FeedStore;

/// Where an initial load starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialAnchor {
    /// The newest page.
    Top,
    /// The session scroll anchor from an earlier visit.
    Persisted(u64),
    /// An explicit "start from item X" request.
    StartFrom(u64),
}

impl InitialAnchor {
    pub fn cursor(self) -> Option<Cursor> {
        match self {
            InitialAnchor::Top => None,
            InitialAnchor::Persisted(id) | InitialAnchor::StartFrom(id) => Some(Cursor(id)),
        }
    }

    pub fn is_anchored(self) -> bool {
        self != InitialAnchor::Top
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub page_size: usize,
    pub offers_page_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            page_size: 20,
            offers_page_size: 50,
        }
    }
}

/// A validated fetch, ready to run off the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub direction: Direction,
    pub generation: u64,
    pub cursor: Option<Cursor>,
    pub length: usize,
    pub filter: FeedFilter,
    pub anchored: bool,
    pub include_offers: bool,
    pub offers_page_size: usize,
}

/// Raw results of a [`LoadRequest`].
#[derive(Debug, Clone)]
pub struct LoadResponse {
    pub page: Page<RawForumItem>,
    pub offers: Vec<RawOffer>,
}

impl LoadRequest {
    /// Run the fetch. Offers are fetched alongside the forum page when the
    /// request asks for them; an auction failure yields a forum-only result.
    pub async fn execute(
        &self,
        forum: &dyn ForumSource,
        auction: &dyn AuctionSource,
    ) -> Result<LoadResponse, FetchError> {
        let page = forum.fetch_page(self.cursor, self.length, Some(&self.filter));
        if !self.include_offers {
            return Ok(LoadResponse {
                page: page.await?,
                offers: Vec::new(),
            });
        }

        let (page, offers) = futures::join!(page, auction.fetch_active_offers(self.offers_page_size));
        let offers = offers.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Auction offers unavailable, showing forum items only");
            Vec::new()
        });
        Ok(LoadResponse { page: page?, offers })
    }
}

/// Outcome of [`FeedEngine::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Replaced,
    Appended(usize),
    Prepended(usize),
    Failed,
    /// Issued under an older generation; nothing changed.
    Stale,
}

pub struct FeedEngine {
    items: Vec<FeedItem>,
    cursors: CursorMachine,
    filter: FeedFilter,
    generation: u64,
    anchored: bool,
    last_anchor: Option<u64>,
    options: EngineOptions,
    normalizer: Normalizer,
    store: FeedStore,
}

impl FeedEngine {
    pub fn new(store: FeedStore, normalizer: Normalizer, options: EngineOptions) -> Self {
        Self {
            items: Vec::new(),
            cursors: CursorMachine::new(),
            filter: FeedFilter::default(),
            generation: 0,
            anchored: false,
            last_anchor: None,
            options,
            normalizer,
            store,
        }
    }

    pub fn with_filter(mut self, filter: FeedFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Every merged item, including those hidden by the tag filter.
    pub fn items(&self) -> &[FeedItem] {
        &self.items
    }

    /// Items that pass the client-side part of the filter.
    pub fn visible_items(&self) -> Vec<FeedItem> {
        self.items
            .iter()
            .filter(|item| self.filter.admits(item))
            .cloned()
            .collect()
    }

    pub fn cursors(&self) -> &CursorMachine {
        &self.cursors
    }

    pub fn filter(&self) -> &FeedFilter {
        &self.filter
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn store(&self) -> &FeedStore {
        &self.store
    }

    // ========================================================================
    // Starting Loads
    // ========================================================================

    /// First load of a session: restore or persist the root selection, then
    /// load from the session anchor, `start_from`, or the top.
    pub async fn start(&mut self, start_from: Option<u64>) -> LoadRequest {
        if self.filter.roots.is_empty() {
            self.filter.roots = self.store.root_identities().await;
        } else {
            self.store.set_root_identities(&self.filter.roots).await;
        }
        let anchor = self.resolve_initial_anchor(start_from).await;
        self.begin_reload(anchor)
    }

    /// A persisted session anchor wins over an explicit start item.
    pub async fn resolve_initial_anchor(&self, start_from: Option<u64>) -> InitialAnchor {
        if let Some(id) = self.store.scroll_anchor().await {
            return InitialAnchor::Persisted(id);
        }
        start_from.map_or(InitialAnchor::Top, InitialAnchor::StartFrom)
    }

    /// Reset cursors and latches and request a fresh first page.
    ///
    /// Supersedes anything in flight: the generation moves on, so older
    /// completions are dropped when they arrive.
    pub fn begin_reload(&mut self, anchor: InitialAnchor) -> LoadRequest {
        self.cursors.finish(Direction::Initial);
        self.cursors.begin_initial();
        self.generation += 1;
        self.anchored = anchor.is_anchored();
        tracing::debug!(generation = self.generation, ?anchor, "Reloading feed");

        LoadRequest {
            direction: Direction::Initial,
            generation: self.generation,
            cursor: anchor.cursor(),
            length: self.options.page_size,
            filter: self.filter.clone(),
            anchored: self.anchored,
            include_offers: !self.anchored && self.filter.show_auctions,
            offers_page_size: self.options.offers_page_size,
        }
    }

    pub fn begin_older(&mut self, trigger: Trigger) -> Option<LoadRequest> {
        let cursor = self.cursors.cursors().next_cursor.or_else(|| {
            oldest_forum_id(&self.items)
                .and_then(|id| id.checked_sub(1))
                .map(Cursor)
        });
        let Some(cursor) = cursor else {
            tracing::debug!("No cursor for an older page");
            return None;
        };
        if !self.cursors.begin(Direction::Older, trigger) {
            return None;
        }
        Some(self.directional(Direction::Older, Some(cursor)))
    }

    /// The upstream cannot page forwards, so a newer load always asks for the
    /// newest page and keeps what is above the current head.
    pub fn begin_newer(&mut self, trigger: Trigger) -> Option<LoadRequest> {
        if !self.cursors.begin(Direction::Newer, trigger) {
            return None;
        }
        Some(self.directional(Direction::Newer, None))
    }

    pub fn begin(&mut self, direction: Direction, trigger: Trigger) -> Option<LoadRequest> {
        match direction {
            Direction::Initial => Some(self.begin_reload(InitialAnchor::Top)),
            Direction::Older => self.begin_older(trigger),
            Direction::Newer => self.begin_newer(trigger),
        }
    }

    fn directional(&self, direction: Direction, cursor: Option<Cursor>) -> LoadRequest {
        LoadRequest {
            direction,
            generation: self.generation,
            cursor,
            length: self.options.page_size,
            filter: self.filter.clone(),
            anchored: self.anchored,
            include_offers: false,
            offers_page_size: self.options.offers_page_size,
        }
    }

    // ========================================================================
    // Completing Loads
    // ========================================================================

    pub async fn complete(
        &mut self,
        request: &LoadRequest,
        result: Result<LoadResponse, FetchError>,
    ) -> Applied {
        if request.generation != self.generation {
            tracing::debug!(
                expected = self.generation,
                got = request.generation,
                direction = ?request.direction,
                "Ignoring stale load (generation mismatch)"
            );
            return Applied::Stale;
        }

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(direction = ?request.direction, error = %e, "Feed load failed");
                self.cursors.record_failure(request.direction);
                return Applied::Failed;
            }
        };

        match request.direction {
            Direction::Initial => {
                self.apply_initial(request, response).await;
                Applied::Replaced
            }
            Direction::Older => Applied::Appended(self.apply_older(response)),
            Direction::Newer => Applied::Prepended(self.apply_newer(request, response)),
        }
    }

    async fn apply_initial(&mut self, request: &LoadRequest, response: LoadResponse) {
        let LoadResponse { page, offers } = response;
        let incoming: Vec<FeedItem> = page
            .items
            .into_iter()
            .map(|raw| self.normalizer.forum(raw))
            .chain(offers.into_iter().map(|raw| self.normalizer.offer(raw)))
            .collect();

        self.items = merge(Vec::new(), incoming, Direction::Initial);
        self.last_anchor = None;
        let newest = newest_forum_id(&self.items);
        self.cursors
            .record_initial(page.has_more, page.next_cursor, newest, request.anchored);

        if !request.anchored {
            if let Some(newest) = newest {
                self.store.advance_last_seen(newest).await;
            }
        }
        tracing::info!(
            items = self.items.len(),
            has_older = page.has_more,
            anchored = request.anchored,
            "Feed loaded"
        );
    }

    fn apply_older(&mut self, response: LoadResponse) -> usize {
        let Page {
            items,
            has_more,
            next_cursor,
        } = response.page;
        let incoming = items.into_iter().map(|raw| self.normalizer.forum(raw)).collect();

        let before = self.items.len();
        self.items = merge(std::mem::take(&mut self.items), incoming, Direction::Older);
        let fresh = self.items.len() - before;

        self.cursors.record_older(fresh, has_more, next_cursor);
        tracing::debug!(fresh, has_more, "Older page applied");
        fresh
    }

    fn apply_newer(&mut self, request: &LoadRequest, response: LoadResponse) -> usize {
        let incoming = response
            .page
            .items
            .into_iter()
            .map(|raw| self.normalizer.forum(raw))
            .collect();

        let before = self.items.len();
        self.items = merge(std::mem::take(&mut self.items), incoming, Direction::Newer);
        let fresh = self.items.len() - before;

        self.cursors
            .record_newer(fresh, request.length, newest_forum_id(&self.items));
        tracing::debug!(fresh, requested = request.length, "Newer page applied");
        fresh
    }

    // ========================================================================
    // User Actions
    // ========================================================================

    /// Replace the filter and reload from the top.
    ///
    /// A changed root selection is persisted and invalidates the detector
    /// watermark, since the counter it compares against is filter-unaware.
    pub async fn set_filter(&mut self, filter: FeedFilter) -> LoadRequest {
        if filter.roots != self.filter.roots {
            self.store.set_root_identities(&filter.roots).await;
            self.store.clear_highest_checked().await;
        }
        self.store.clear_scroll_anchor().await;
        self.last_anchor = None;
        self.filter = filter;
        self.begin_reload(InitialAnchor::Top)
    }

    /// The user clicked the "new items" banner.
    pub async fn acknowledge_new_items(&mut self) -> LoadRequest {
        self.store.clear_highest_checked().await;
        self.store.clear_scroll_anchor().await;
        self.last_anchor = None;
        self.begin_reload(InitialAnchor::Top)
    }

    /// Persist the item nearest the viewport center. Auction ids are never
    /// persisted since they cannot be used as a forum cursor.
    pub async fn record_anchor(&mut self, id: &ItemId) {
        let ItemId::Forum(id) = id else {
            return;
        };
        if self.last_anchor == Some(*id) {
            return;
        }
        self.last_anchor = Some(*id);
        self.store.set_scroll_anchor(*id).await;
    }

    /// The detector saw new items upstream; let the top edge load again.
    pub fn on_new_items_detected(&mut self) {
        self.cursors.rearm(Direction::Newer);
    }
}
