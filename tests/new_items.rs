//! Integration tests for new-item detection: counting, watermarks and the
//! polling loop.
//!
//! Watermarks live in an in-memory SQLite database per test.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use braid::feed::{
    AssetMetadataCache, Detection, EngineOptions, FeedCommand, FeedEngine, FeedFilter,
    FeedSession, FeedUpdate, ListViewport, NewItemCount, NewItemDetector, Normalizer,
    SessionOptions,
};
use braid::source::memory::{MemoryAuctionSource, MemoryForumSource};
use braid::source::RawForumItem;
use braid::storage::{Database, FeedStore, KeyValueStore, MemoryStore};

const WATCHED: &str = "aaaaa-aa";
const OTHER: &str = "bbbbb-bb";

/// Paused-clock tests stay off SQLite: its worker thread lets the clock
/// auto-advance mid-query.
fn memory_store() -> FeedStore {
    FeedStore::new(Arc::new(MemoryStore::new()), "default")
}

async fn test_store() -> FeedStore {
    let db = Database::open(":memory:").await.unwrap();
    let kv: Arc<dyn KeyValueStore> = Arc::new(db);
    FeedStore::new(kv, "default")
}

/// Even ids live under `WATCHED`, odd ids under `OTHER`.
fn raw(id: u64) -> RawForumItem {
    let root = if id % 2 == 0 { WATCHED } else { OTHER };
    RawForumItem {
        id,
        timestamp: Some(id),
        root: vec![root.to_string()],
        ..RawForumItem::default()
    }
}

fn seeded(count: u64) -> Arc<MemoryForumSource> {
    let forum = Arc::new(MemoryForumSource::new());
    for id in 1..=count {
        forum.insert(raw(id));
    }
    forum
}

fn watching(root: &str) -> FeedFilter {
    FeedFilter {
        roots: [root.to_string()].into_iter().collect(),
        ..FeedFilter::default()
    }
}

fn engine(store: FeedStore) -> FeedEngine {
    FeedEngine::new(
        store,
        Normalizer::new(Arc::new(AssetMetadataCache::default())),
        EngineOptions {
            page_size: 10,
            offers_page_size: 10,
        },
    )
}

// ============================================================================
// Counting Tests
// ============================================================================

#[tokio::test]
async fn test_unfiltered_count_needs_no_page_fetch() {
    let store = test_store().await;
    let forum = MemoryForumSource::new();
    forum.skip_ids(106);
    store.advance_last_seen(100).await;

    let detection = NewItemDetector::new(20, 10)
        .check(&forum, &store, &FeedFilter::default())
        .await
        .unwrap();

    assert_eq!(detection, Detection::NewItems(NewItemCount::Exactly(5)));
    assert!(forum.requests().is_empty());
    assert_eq!(store.highest_checked_id().await, Some(105));
}

#[tokio::test]
async fn test_filtered_count_only_counts_matching_items() {
    let store = test_store().await;
    let forum = seeded(105);
    store.advance_last_seen(100).await;

    let detection = NewItemDetector::new(20, 10)
        .check(&*forum, &store, &watching(WATCHED))
        .await
        .unwrap();

    // 102 and 104 of 101..=105 are under the watched root.
    assert_eq!(detection, Detection::NewItems(NewItemCount::Exactly(2)));
    assert_eq!(forum.requests().len(), 1);
    assert_eq!(store.highest_checked_id().await, Some(105));
}

#[tokio::test]
async fn test_malformed_root_falls_back_to_counter_delta() {
    let store = test_store().await;
    let forum = seeded(105);
    store.advance_last_seen(100).await;

    let detection = NewItemDetector::new(20, 10)
        .check(&*forum, &store, &watching("Not An Identity!"))
        .await
        .unwrap();

    assert_eq!(detection, Detection::NewItems(NewItemCount::Exactly(5)));
    assert!(forum.requests().is_empty());
}

#[tokio::test]
async fn test_large_filtered_burst_stops_at_page_ceiling() {
    let store = test_store().await;
    let forum = seeded(200);
    store.advance_last_seen(100).await;

    let detection = NewItemDetector::new(5, 2)
        .check(&*forum, &store, &watching(WATCHED))
        .await
        .unwrap();

    let Detection::NewItems(count) = detection else {
        panic!("expected new items, got {detection:?}");
    };
    assert_eq!(count, NewItemCount::AtLeast(10));
    assert_eq!(count.to_string(), "10+");
    assert_eq!(forum.requests().len(), 2);
}

#[tokio::test]
async fn test_second_check_is_short_circuited() {
    let store = test_store().await;
    let forum = seeded(105);
    store.advance_last_seen(100).await;
    let detector = NewItemDetector::new(20, 10);

    detector
        .check(&*forum, &store, &watching(WATCHED))
        .await
        .unwrap();
    let second = detector
        .check(&*forum, &store, &watching(WATCHED))
        .await
        .unwrap();

    assert_eq!(second, Detection::AlreadyChecked);
    assert_eq!(forum.requests().len(), 1);
}

#[tokio::test]
async fn test_root_change_forces_a_fresh_check() {
    let forum = seeded(105);
    let mut engine = engine(test_store().await);
    engine.store().advance_last_seen(100).await;
    let detector = NewItemDetector::new(20, 10);

    let first = detector
        .check(&*forum, engine.store(), engine.filter())
        .await
        .unwrap();
    assert_eq!(first, Detection::NewItems(NewItemCount::Exactly(5)));

    engine.set_filter(watching(WATCHED)).await;
    let second = detector
        .check(&*forum, engine.store(), engine.filter())
        .await
        .unwrap();
    assert_eq!(second, Detection::NewItems(NewItemCount::Exactly(2)));
}

// ============================================================================
// Session Tests
// ============================================================================

fn session(forum: &Arc<MemoryForumSource>, store: FeedStore) -> FeedSession<ListViewport> {
    FeedSession::new(
        engine(store),
        forum.clone(),
        Arc::new(MemoryAuctionSource::new(Vec::new())),
        ListViewport::new(400.0, 100.0),
        SessionOptions::default(),
    )
}

#[tokio::test]
async fn test_acknowledge_clears_banner_and_checked_watermark() {
    let forum = seeded(30);
    let mut session = session(&forum, test_store().await);
    session.start(None).await;
    session.wait_idle().await;

    forum.insert(raw(31));
    forum.insert(raw(32));
    session.spawn_detection();
    session.wait_idle().await;
    assert_eq!(session.new_items(), Some(NewItemCount::Exactly(2)));
    assert_eq!(session.engine().store().highest_checked_id().await, Some(32));

    session.handle_command(FeedCommand::AcknowledgeNewItems).await;
    session.wait_idle().await;

    assert_eq!(session.new_items(), None);
    assert_eq!(session.engine().store().highest_checked_id().await, None);
    assert_eq!(session.engine().store().last_seen_id().await, Some(32));
    assert_eq!(session.engine().store().scroll_anchor().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_watch_loop_reports_each_burst() {
    let forum = seeded(30);
    let (tx, mut updates) = mpsc::channel(8);
    let mut session = session(&forum, memory_store()).with_updates(tx);
    session.start(None).await;
    session.wait_idle().await;
    assert!(matches!(
        updates.recv().await,
        Some(FeedUpdate::Replaced { items: 10, anchored: false })
    ));

    for id in 31..=33 {
        forum.insert(raw(id));
    }
    let (commands, rx) = mpsc::channel(4);
    let handle = tokio::spawn(async move {
        session.run(rx).await;
        session
    });

    assert_eq!(
        updates.recv().await,
        Some(FeedUpdate::NewItemsAvailable(NewItemCount::Exactly(3)))
    );
    // The banner is not acknowledged, so the count keeps growing.
    forum.insert(raw(34));
    forum.insert(raw(35));
    assert_eq!(
        updates.recv().await,
        Some(FeedUpdate::NewItemsAvailable(NewItemCount::Exactly(5)))
    );

    commands.send(FeedCommand::Shutdown).await.unwrap();
    let session = handle.await.unwrap();
    assert!(!session.is_alive());
    assert_eq!(forum.counter_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_quiet_upstream_produces_no_banner() {
    let forum = seeded(30);
    let (tx, mut updates) = mpsc::channel(8);
    let mut session = session(&forum, memory_store()).with_updates(tx);
    session.start(None).await;
    session.wait_idle().await;
    updates.recv().await;

    let (commands, rx) = mpsc::channel(4);
    let handle = tokio::spawn(async move {
        session.run(rx).await;
        session
    });

    tokio::time::sleep(Duration::from_secs(65)).await;
    commands.send(FeedCommand::Shutdown).await.unwrap();
    let session = handle.await.unwrap();

    assert_eq!(session.new_items(), None);
    assert!(updates.try_recv().is_err());
    // Ticks at 2s, 32s and 62s.
    assert_eq!(forum.counter_calls(), 3);
}
