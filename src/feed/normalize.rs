//! Raw upstream records to [`FeedItem`]s.
//!
//! Pure apart from reads of the asset metadata cache. Missing or malformed
//! fields never fail normalization: they are defaulted, logged, and the
//! renderer copes with the partial item.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use super::model::{AuctionPayload, FeedItem, ForumPayload, ItemId, ItemTag, Payload};
use crate::source::{RawAsset, RawForumItem, RawOffer};
use crate::util::{excerpt, sanitize};

const TITLE_EXCERPT_CHARS: usize = 80;
const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Display metadata for a token ledger or NFT collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMetadata {
    pub symbol: Arc<str>,
    pub name: Arc<str>,
}

/// Bounded ledger/collection metadata cache, shared by every normalizer of
/// one application instance.
pub struct AssetMetadataCache {
    entries: Mutex<LruCache<String, AssetMetadata>>,
}

impl AssetMetadataCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn insert(&self, asset_id: &str, metadata: AssetMetadata) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(asset_id.to_string(), metadata);
        }
    }

    pub fn get(&self, asset_id: &str) -> Option<AssetMetadata> {
        self.entries.lock().ok()?.get(asset_id).cloned()
    }
}

impl Default for AssetMetadataCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

/// Converts forum records and auction offers into the common item shape.
#[derive(Clone)]
pub struct Normalizer {
    metadata: Arc<AssetMetadataCache>,
}

impl Normalizer {
    pub fn new(metadata: Arc<AssetMetadataCache>) -> Self {
        Self { metadata }
    }

    pub fn forum(&self, raw: RawForumItem) -> FeedItem {
        let id = raw.id;
        let created_at = raw.timestamp.unwrap_or_else(|| {
            tracing::warn!(id, "Forum item without timestamp, sorting it last");
            0
        });

        let body: Arc<str> = Arc::from(sanitize(raw.body.as_deref().unwrap_or_default()));
        let title = match single("title", id, raw.title) {
            Some(title) => Arc::from(sanitize(&title)),
            None => Arc::from(excerpt(&body, TITLE_EXCERPT_CHARS)),
        };
        let tag = match raw.kind.as_deref() {
            Some(kind) => kind.parse().unwrap_or_else(|_| {
                tracing::debug!(id, kind, "Unknown forum item kind, treating as post");
                ItemTag::Post
            }),
            None => ItemTag::Post,
        };

        FeedItem {
            id: ItemId::Forum(id),
            created_at,
            payload: Payload::Forum(ForumPayload {
                creator: raw.creator.map(Arc::from),
                root: single("root", id, raw.root).map(Arc::from),
                parent: single("parent", id, raw.parent),
                title,
                body,
                tag,
            }),
        }
    }

    pub fn offer(&self, raw: RawOffer) -> FeedItem {
        let activated = single_offer("activated_at", &raw.id, raw.activated_at);
        let created_at = activated.or(raw.created_at).unwrap_or_else(|| {
            tracing::warn!(offer = %raw.id, "Offer without activation or creation time");
            0
        });

        let title = offer_title(&raw.assets);
        let asset_labels = raw
            .assets
            .iter()
            .map(|asset| Arc::from(self.asset_label(asset)))
            .collect();

        FeedItem {
            id: ItemId::Auction(Arc::from(raw.id.as_str())),
            created_at,
            payload: Payload::Auction(AuctionPayload {
                title: Arc::from(title),
                seller: raw.seller.map(Arc::from),
                price: raw.price.map(Arc::from),
                price_token: raw.price_token.map(Arc::from),
                expires_at: single_offer("expires_at", &raw.id, raw.expires_at),
                asset_labels,
            }),
        }
    }

    fn asset_label(&self, asset: &RawAsset) -> String {
        match asset {
            RawAsset::Token { ledger, amount } => {
                let symbol = self
                    .metadata
                    .get(ledger)
                    .map(|m| m.symbol.to_string())
                    .unwrap_or_else(|| ledger.clone());
                match amount {
                    Some(amount) => format!("{amount} {symbol}"),
                    None => symbol,
                }
            }
            RawAsset::Nft {
                collection,
                token_id,
            } => {
                let name = self
                    .metadata
                    .get(collection)
                    .map(|m| m.name.to_string())
                    .unwrap_or_else(|| collection.clone());
                match token_id {
                    Some(token_id) => format!("{name} #{token_id}"),
                    None => name,
                }
            }
            RawAsset::Unknown => "Unknown asset".to_string(),
        }
    }
}

/// Human-readable title for an offer, derived from what is being sold.
pub fn offer_title(assets: &[RawAsset]) -> String {
    match assets {
        [] => "Empty Offer".to_string(),
        [RawAsset::Token { .. }] => "Token Lot for Sale".to_string(),
        [RawAsset::Nft { .. }] => "Collectible for Sale".to_string(),
        [RawAsset::Unknown] => "Asset for Sale".to_string(),
        many => format!("Bundle of {} Assets", many.len()),
    }
}

/// Unwrap a zero-or-one list into an `Option`.
fn single<T>(field: &'static str, id: u64, list: Vec<T>) -> Option<T> {
    if list.len() > 1 {
        tracing::warn!(id, field, len = list.len(), "Optional field carried several values, keeping the first");
    }
    list.into_iter().next()
}

fn single_offer<T>(field: &'static str, offer: &str, list: Vec<T>) -> Option<T> {
    if list.len() > 1 {
        tracing::warn!(offer, field, len = list.len(), "Optional field carried several values, keeping the first");
    }
    list.into_iter().next()
}
