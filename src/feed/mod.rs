//! Feed synchronization: the merged item list and everything that keeps it
//! consistent while the reader scrolls.
//!
//! - [`model`] - `FeedItem`, ids, cursors and the filter selection
//! - [`normalize`] - raw forum records and auction offers to `FeedItem`s
//! - [`cursor`] - per-direction load states, cursors and auto-continue latches
//! - [`merge`] - combining pages with the current list, without duplicates
//! - [`detector`] - cheap "N new items" checks against the upstream counter
//! - [`reconcile`] - scroll anchoring and prepend compensation
//! - [`engine`] - item list + cursor machine + watermark writes
//! - [`session`] - async driver: spawned fetches, timers, commands
//!
//! # Example
//!
//! ```ignore
//! let engine = FeedEngine::new(store, normalizer, EngineOptions::default());
//! let mut session = FeedSession::new(engine, forum, auction, viewport, SessionOptions::default());
//! session.start(None).await;
//! session.run(commands).await;
//! ```

pub mod cursor;
pub mod detector;
pub mod engine;
pub mod merge;
pub mod model;
pub mod normalize;
pub mod reconcile;
pub mod session;

pub use cursor::{CursorMachine, CursorState, Latches, LoadState, Trigger};
pub use detector::{Detection, NewItemCount, NewItemDetector};
pub use engine::{Applied, EngineOptions, FeedEngine, InitialAnchor, LoadRequest, LoadResponse};
pub use merge::merge;
pub use model::{
    AuctionPayload, Cursor, Direction, FeedFilter, FeedItem, ForumPayload, ItemId, ItemTag,
    Payload, SourceKind,
};
pub use normalize::{offer_title, AssetMetadata, AssetMetadataCache, Normalizer};
pub use reconcile::{
    ListViewport, PrependSnapshot, ScrollDecision, ScrollReconciler, ViewportMetrics,
    ViewportProbe,
};
pub use session::{FeedCommand, FeedEvent, FeedSession, FeedUpdate, SessionOptions};
