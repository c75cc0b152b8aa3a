//! In-process sources backed by plain vectors.
//!
//! They honor the same paging contract as the HTTP upstream (a page at
//! `Cursor(c)` holds items with `id <= c`, newest first) and record every
//! request, which makes them the test double for engine and session tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use super::{AuctionSource, FetchError, ForumSource, Page, RawForumItem, RawOffer};
use crate::feed::{Cursor, FeedFilter};

/// A recorded `fetch_page` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: Option<Cursor>,
    pub length: usize,
    pub filter: Option<FeedFilter>,
}

#[derive(Debug, Default)]
struct ForumState {
    /// Sorted by id, descending.
    items: Vec<RawForumItem>,
    next_id: u64,
    failures: VecDeque<String>,
    requests: Vec<PageRequest>,
    counter_calls: usize,
}

/// Forum source holding its items in memory.
#[derive(Debug, Default)]
pub struct MemoryForumSource {
    state: Mutex<ForumState>,
}

impl MemoryForumSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ForumState> {
        // A panicking test thread must not cascade into every other assertion.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert an item; the counter moves past its id.
    pub fn insert(&self, item: RawForumItem) {
        let mut state = self.lock();
        state.next_id = state.next_id.max(item.id + 1);
        let pos = state.items.partition_point(|existing| existing.id > item.id);
        if state.items.get(pos).is_some_and(|existing| existing.id == item.id) {
            state.items[pos] = item;
        } else {
            state.items.insert(pos, item);
        }
    }

    /// Advance the counter without storing an item (e.g. ids consumed by
    /// records the reader can never see).
    pub fn skip_ids(&self, count: u64) {
        self.lock().next_id += count;
    }

    /// Make the next `fetch_page`/`fetch_counter` call fail.
    pub fn fail_next(&self, reason: &str) {
        self.lock().failures.push_back(reason.to_string());
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.lock().requests.clone()
    }

    pub fn counter_calls(&self) -> usize {
        self.lock().counter_calls
    }

    fn matches(item: &RawForumItem, filter: Option<&FeedFilter>) -> bool {
        let Some(filter) = filter else {
            return true;
        };
        if !filter.roots.is_empty() && !item.root.iter().any(|r| filter.roots.contains(r)) {
            return false;
        }
        if let Some(creator) = &filter.creator {
            if item.creator.as_ref() != Some(creator) {
                return false;
            }
        }
        if let Some(search) = filter.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                let needle = search.to_lowercase();
                let haystack = item
                    .title
                    .iter()
                    .chain(item.body.iter())
                    .any(|text| text.to_lowercase().contains(&needle));
                if !haystack {
                    return false;
                }
            }
        }
        true
    }
}

#[async_trait]
impl ForumSource for MemoryForumSource {
    async fn fetch_page(
        &self,
        cursor: Option<Cursor>,
        length: usize,
        filter: Option<&FeedFilter>,
    ) -> Result<Page<RawForumItem>, FetchError> {
        let mut state = self.lock();
        state.requests.push(PageRequest {
            cursor,
            length,
            filter: filter.cloned(),
        });
        if let Some(reason) = state.failures.pop_front() {
            return Err(FetchError::Unavailable(reason));
        }

        let mut matching = state
            .items
            .iter()
            .filter(|item| cursor.map_or(true, |Cursor(c)| item.id <= c))
            .filter(|item| Self::matches(item, filter));

        let items: Vec<RawForumItem> = matching.by_ref().take(length).cloned().collect();
        let has_more = matching.next().is_some();
        let next_cursor = if has_more {
            items.last().map(|last| Cursor(last.id.saturating_sub(1)))
        } else {
            None
        };

        Ok(Page {
            items,
            has_more,
            next_cursor,
        })
    }

    async fn fetch_counter(&self) -> Result<u64, FetchError> {
        let mut state = self.lock();
        state.counter_calls += 1;
        if let Some(reason) = state.failures.pop_front() {
            return Err(FetchError::Unavailable(reason));
        }
        Ok(state.next_id)
    }
}

#[derive(Debug, Default)]
struct AuctionState {
    offers: Vec<RawOffer>,
    fail: Option<String>,
    calls: usize,
}

/// Auction source returning a fixed offer list.
#[derive(Debug, Default)]
pub struct MemoryAuctionSource {
    state: Mutex<AuctionState>,
}

impl MemoryAuctionSource {
    pub fn new(offers: Vec<RawOffer>) -> Self {
        Self {
            state: Mutex::new(AuctionState {
                offers,
                ..AuctionState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AuctionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail every call until cleared with `None`.
    pub fn set_failure(&self, reason: Option<&str>) {
        self.lock().fail = reason.map(str::to_string);
    }

    pub fn calls(&self) -> usize {
        self.lock().calls
    }
}

#[async_trait]
impl AuctionSource for MemoryAuctionSource {
    async fn fetch_active_offers(&self, page_size: usize) -> Result<Vec<RawOffer>, FetchError> {
        let mut state = self.lock();
        state.calls += 1;
        if let Some(reason) = &state.fail {
            return Err(FetchError::Unavailable(reason.clone()));
        }
        Ok(state.offers.iter().take(page_size).cloned().collect())
    }
}
