//! Upstream sources consumed by the feed engine.
//!
//! Two narrow interfaces sit at the engine boundary:
//!
//! - [`ForumSource`] - paginated forum items plus the global "next id" counter
//! - [`AuctionSource`] - the auction side-channel, fetched whole on top-of-feed loads
//!
//! [`http`] implements both over JSON/HTTPS with retry and size limits;
//! [`memory`] implements them in-process for tests and embedding.

pub mod http;
pub mod memory;
mod types;

use async_trait::async_trait;
use thiserror::Error;

use crate::feed::{Cursor, FeedFilter};

pub use types::{Page, RawAsset, RawForumItem, RawOffer};
pub(crate) use types::{decode_records, CounterBody};

/// A directional fetch failed.
///
/// Every variant is transient from the engine's point of view: cursors stay
/// where they were, the direction's auto-trigger is disarmed, and the user can
/// retry manually.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response body was not the expected JSON shape
    #[error("Decode error: {0}")]
    Decode(String),
    /// Source refused the request (used by in-process sources)
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// Paginated forum item source.
#[async_trait]
pub trait ForumSource: Send + Sync {
    /// Fetch up to `length` items at or below `cursor` (newest page when `None`).
    ///
    /// Only the upstream parts of `filter` are honored here: creator, roots and
    /// free-text search. Tags are applied client-side.
    async fn fetch_page(
        &self,
        cursor: Option<Cursor>,
        length: usize,
        filter: Option<&FeedFilter>,
    ) -> Result<Page<RawForumItem>, FetchError>;

    /// The next id the upstream will assign. Global, not filter-aware.
    async fn fetch_counter(&self) -> Result<u64, FetchError>;
}

/// Auction side-channel source.
#[async_trait]
pub trait AuctionSource: Send + Sync {
    async fn fetch_active_offers(&self, page_size: usize) -> Result<Vec<RawOffer>, FetchError>;
}
