use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::util::{parse_identity, Identity, MalformedFilterError};

// ============================================================================
// Identifiers
// ============================================================================

/// Which upstream produced an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Forum,
    Auction,
}

/// Item identity, tagged by source.
///
/// Forum ids are dense and monotonically increasing. Auction ids live in their
/// own space and carry no ordering relative to forum ids, so the two never
/// compare as equal and auction ids are never used as cursors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemId {
    Forum(u64),
    Auction(Arc<str>),
}

impl ItemId {
    pub fn source(&self) -> SourceKind {
        match self {
            ItemId::Forum(_) => SourceKind::Forum,
            ItemId::Auction(_) => SourceKind::Auction,
        }
    }

    /// Numeric forum id, or `None` for auction items.
    pub fn forum(&self) -> Option<u64> {
        match self {
            ItemId::Forum(id) => Some(*id),
            ItemId::Auction(_) => None,
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Forum(id) => write!(f, "forum:{id}"),
            ItemId::Auction(id) => write!(f, "auction:{id}"),
        }
    }
}

/// Opaque continuation token for the forum source.
///
/// A page requested at `Cursor(c)` holds items with `id <= c`, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub u64);

/// The end of the list a load operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Initial,
    Older,
    Newer,
}

// ============================================================================
// Items
// ============================================================================

/// Forum item type, used for client-side tag filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemTag {
    Post,
    Reply,
    Poll,
    Repost,
}

impl ItemTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemTag::Post => "post",
            ItemTag::Reply => "reply",
            ItemTag::Poll => "poll",
            ItemTag::Repost => "repost",
        }
    }
}

impl FromStr for ItemTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "post" => Ok(ItemTag::Post),
            "reply" | "comment" => Ok(ItemTag::Reply),
            "poll" => Ok(ItemTag::Poll),
            "repost" => Ok(ItemTag::Repost),
            other => Err(format!("unknown item tag: {other}")),
        }
    }
}

/// Rendering fields for a forum item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForumPayload {
    pub creator: Option<Arc<str>>,
    pub root: Option<Arc<str>>,
    pub parent: Option<u64>,
    pub title: Arc<str>,
    pub body: Arc<str>,
    pub tag: ItemTag,
}

/// Rendering fields for an auction offer. Price and expiry are carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionPayload {
    pub title: Arc<str>,
    pub seller: Option<Arc<str>>,
    pub price: Option<Arc<str>>,
    pub price_token: Option<Arc<str>>,
    pub expires_at: Option<u64>,
    pub asset_labels: Vec<Arc<str>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Forum(ForumPayload),
    Auction(AuctionPayload),
}

/// One entry of the merged feed.
///
/// `created_at` is in nanoseconds. Within a source, id order and `created_at`
/// order agree; across sources only `created_at` is meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub id: ItemId,
    pub created_at: u64,
    pub payload: Payload,
}

impl FeedItem {
    pub fn source_kind(&self) -> SourceKind {
        self.id.source()
    }

    pub fn title(&self) -> &str {
        match &self.payload {
            Payload::Forum(p) => &p.title,
            Payload::Auction(p) => &p.title,
        }
    }

    /// Forum items carry a type tag; auction items have none.
    pub fn tag(&self) -> Option<ItemTag> {
        match &self.payload {
            Payload::Forum(p) => Some(p.tag),
            Payload::Auction(_) => None,
        }
    }
}

// ============================================================================
// Filter Selection
// ============================================================================

/// The user's active filter selection.
///
/// `creator`, `roots` and `search` are sent upstream; `tags` is applied
/// client-side; `show_auctions` controls whether the side-channel is merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedFilter {
    pub search: Option<String>,
    pub creator: Option<String>,
    pub roots: BTreeSet<String>,
    pub tags: BTreeSet<ItemTag>,
    pub show_auctions: bool,
}

impl Default for FeedFilter {
    fn default() -> Self {
        Self {
            search: None,
            creator: None,
            roots: BTreeSet::new(),
            tags: BTreeSet::new(),
            show_auctions: true,
        }
    }
}

impl FeedFilter {
    pub fn has_root_filter(&self) -> bool {
        !self.roots.is_empty()
    }

    /// Parse every root identity; the first malformed one fails the whole set.
    pub fn parsed_roots(&self) -> Result<Vec<Identity>, MalformedFilterError> {
        self.roots.iter().map(|r| parse_identity(r)).collect()
    }

    /// Client-side part of the filter. Auction items are governed by
    /// `show_auctions` instead of tags.
    pub fn admits(&self, item: &FeedItem) -> bool {
        match item.tag() {
            Some(tag) => self.tags.is_empty() || self.tags.contains(&tag),
            None => self.show_auctions,
        }
    }
}
