//! Background "are there items above what the user has seen" check.
//!
//! The upstream exposes a global next-id counter, so without a root filter the
//! number of new items is a subtraction. With a root filter the counter over
//! counts, and the detector pages backwards through the filtered query until it
//! crosses the last-seen watermark.

use super::model::{Cursor, FeedFilter};
use crate::source::{FetchError, ForumSource};
use crate::storage::FeedStore;

/// Result of one detector tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// No `last_seen_id` stored yet; nothing to compare against.
    FirstVisit,
    /// The newest upstream id was already accounted for by a previous tick.
    AlreadyChecked,
    /// Nothing newer than what the user has seen.
    UpToDate,
    NewItems(NewItemCount),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewItemCount {
    Exactly(u64),
    /// The filtered scan hit its page ceiling; at least this many exist.
    AtLeast(u64),
}

impl NewItemCount {
    pub fn value(self) -> u64 {
        match self {
            NewItemCount::Exactly(n) | NewItemCount::AtLeast(n) => n,
        }
    }
}

impl std::fmt::Display for NewItemCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NewItemCount::Exactly(n) => write!(f, "{n}"),
            NewItemCount::AtLeast(n) => write!(f, "{n}+"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewItemDetector {
    page_len: usize,
    max_pages: usize,
}

impl NewItemDetector {
    pub fn new(page_len: usize, max_pages: usize) -> Self {
        Self {
            page_len: page_len.max(1),
            max_pages: max_pages.max(1),
        }
    }

    /// Run one check.
    ///
    /// On success `highest_checked_id` is advanced to the newest upstream id,
    /// whichever branch answered. A fetch error leaves the watermarks alone.
    pub async fn check(
        &self,
        source: &dyn ForumSource,
        store: &FeedStore,
        filter: &FeedFilter,
    ) -> Result<Detection, FetchError> {
        let counter = source.fetch_counter().await?;
        let Some(last_created) = counter.checked_sub(1) else {
            tracing::debug!("Upstream has no items yet");
            return Ok(Detection::UpToDate);
        };

        let Some(last_seen) = store.last_seen_id().await else {
            tracing::debug!(last_created, "No last-seen watermark, skipping detection");
            return Ok(Detection::FirstVisit);
        };

        if let Some(checked) = store.highest_checked_id().await {
            if last_created <= checked {
                tracing::debug!(last_created, checked, "Already checked");
                return Ok(Detection::AlreadyChecked);
            }
        }

        if last_created <= last_seen {
            store.record_highest_checked(last_created).await;
            return Ok(Detection::UpToDate);
        }

        let count = if filter.has_root_filter() {
            match filter.parsed_roots() {
                Ok(_) => self.count_filtered(source, filter, last_created, last_seen).await?,
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed root filter, using unfiltered estimate");
                    NewItemCount::Exactly(last_created - last_seen)
                }
            }
        } else {
            NewItemCount::Exactly(last_created - last_seen)
        };

        store.record_highest_checked(last_created).await;

        if count.value() == 0 {
            return Ok(Detection::UpToDate);
        }
        tracing::info!(count = %count, last_seen, last_created, "New items detected");
        Ok(Detection::NewItems(count))
    }

    /// Count filtered items with id above `last_seen`, newest first.
    async fn count_filtered(
        &self,
        source: &dyn ForumSource,
        filter: &FeedFilter,
        last_created: u64,
        last_seen: u64,
    ) -> Result<NewItemCount, FetchError> {
        let mut cursor = Cursor(last_created);
        let mut count = 0u64;

        for page_no in 1..=self.max_pages {
            let page = source
                .fetch_page(Some(cursor), self.page_len, Some(filter))
                .await?;
            if page.items.is_empty() {
                break;
            }

            let fresh = page.items.iter().filter(|item| item.id > last_seen).count();
            count += fresh as u64;

            let crossed = fresh < page.items.len();
            let next = match page.next_cursor {
                Some(next) if page.has_more && next.0 > last_seen => next,
                _ => break,
            };
            if crossed {
                break;
            }
            if page_no == self.max_pages {
                tracing::debug!(pages = self.max_pages, count, "Filtered count hit page ceiling");
                return Ok(NewItemCount::AtLeast(count));
            }
            cursor = next;
        }

        Ok(NewItemCount::Exactly(count))
    }
}
