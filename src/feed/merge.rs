//! Combining fetched pages with the in-memory item list.
//!
//! - `Initial`: the batch (forum + auction) replaces the list, sorted by
//!   `created_at` descending. The sort is stable, so ties keep input order.
//! - `Older`: new ids are appended as-is. The tail is never re-sorted and
//!   auctions are never interleaved there.
//! - `Newer`: only forum ids above the current newest forum id that are not
//!   already present survive; they are sorted descending and prepended.

use std::collections::HashSet;

use super::model::{Direction, FeedItem, ItemId};

pub fn merge(existing: Vec<FeedItem>, incoming: Vec<FeedItem>, direction: Direction) -> Vec<FeedItem> {
    match direction {
        Direction::Initial => {
            let mut items = dedup_batch(incoming, &HashSet::new());
            items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            items
        }
        Direction::Older => {
            let present = ids(&existing);
            let mut items = existing;
            items.extend(dedup_batch(incoming, &present));
            items
        }
        Direction::Newer => {
            let present = ids(&existing);
            let newest = newest_forum_id(&existing);
            let mut fresh: Vec<FeedItem> = dedup_batch(incoming, &present)
                .into_iter()
                .filter(|item| is_newer_than(item, newest))
                .collect();
            fresh.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| b.id.forum().cmp(&a.id.forum()))
            });
            fresh.extend(existing);
            fresh
        }
    }
}

/// Highest forum id in `items`. Auction ids do not participate.
pub fn newest_forum_id(items: &[FeedItem]) -> Option<u64> {
    items.iter().filter_map(|item| item.id.forum()).max()
}

/// Lowest forum id in `items`.
pub fn oldest_forum_id(items: &[FeedItem]) -> Option<u64> {
    items.iter().filter_map(|item| item.id.forum()).min()
}

/// Whether `item` belongs above a list whose newest forum id is `newest`.
pub fn is_newer_than(item: &FeedItem, newest: Option<u64>) -> bool {
    match (item.id.forum(), newest) {
        (Some(id), Some(newest)) => id > newest,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

fn ids(items: &[FeedItem]) -> HashSet<ItemId> {
    items.iter().map(|item| item.id.clone()).collect()
}

/// Drop items already in `present` and repeats within the batch itself.
fn dedup_batch(incoming: Vec<FeedItem>, present: &HashSet<ItemId>) -> Vec<FeedItem> {
    let mut seen = HashSet::with_capacity(incoming.len());
    incoming
        .into_iter()
        .filter(|item| !present.contains(&item.id) && seen.insert(item.id.clone()))
        .collect()
}
