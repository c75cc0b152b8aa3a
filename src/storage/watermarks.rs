use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use super::kv::{KeyValueStore, Lifetime};

const LAST_SEEN_ID: &str = "last_seen_id";
const HIGHEST_CHECKED_ID: &str = "highest_checked_id";
const SCROLL_ANCHOR_ID: &str = "scroll_anchor_id";
const ROOT_IDENTITIES: &str = "filter.root_identities";

/// Persistence adapter for the feed watermarks and filter selection.
///
/// Keys are namespaced per profile (`feed.<profile>.<key>`). Every operation is
/// best-effort: store failures are logged and read back as "not set", so a
/// broken store degrades to a first-visit experience instead of an error.
///
/// `last_seen_id` and `highest_checked_id` are monotonic; writes that would
/// lower them are ignored (read-compare-write, one key at a time).
#[derive(Clone)]
pub struct FeedStore {
    kv: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl FeedStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, profile: &str) -> Self {
        Self {
            kv,
            prefix: format!("feed.{profile}."),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    async fn read<T: FromStr>(&self, name: &str, lifetime: Lifetime) -> Option<T> {
        let key = self.key(name);
        match self.kv.get(&key, lifetime).await {
            Ok(Some(raw)) => match raw.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(key = %key, value = %raw, "Ignoring unparseable stored value");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read stored value");
                None
            }
        }
    }

    async fn write(&self, name: &str, value: impl Display, lifetime: Lifetime) -> bool {
        let key = self.key(name);
        match self.kv.set(&key, &value.to_string(), lifetime).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to persist value");
                false
            }
        }
    }

    async fn clear(&self, name: &str, lifetime: Lifetime) {
        let key = self.key(name);
        if let Err(e) = self.kv.remove(&key, lifetime).await {
            tracing::warn!(key = %key, error = %e, "Failed to clear stored value");
        }
    }

    /// Write `candidate` only if it is larger than the stored value.
    async fn advance(&self, name: &str, candidate: u64) -> bool {
        if let Some(current) = self.read::<u64>(name, Lifetime::Durable).await {
            if candidate <= current {
                return false;
            }
        }
        self.write(name, candidate, Lifetime::Durable).await
    }

    // ========================================================================
    // Watermarks
    // ========================================================================

    pub async fn last_seen_id(&self) -> Option<u64> {
        self.read(LAST_SEEN_ID, Lifetime::Durable).await
    }

    /// Advance `last_seen_id`; returns whether the stored value changed.
    pub async fn advance_last_seen(&self, id: u64) -> bool {
        let advanced = self.advance(LAST_SEEN_ID, id).await;
        if advanced {
            tracing::info!(last_seen_id = id, "Advanced last-seen watermark");
        }
        advanced
    }

    pub async fn highest_checked_id(&self) -> Option<u64> {
        self.read(HIGHEST_CHECKED_ID, Lifetime::Durable).await
    }

    /// Record a detector result; never lowers the stored value.
    pub async fn record_highest_checked(&self, id: u64) -> bool {
        self.advance(HIGHEST_CHECKED_ID, id).await
    }

    /// Forget the detector watermark so the next tick re-checks from scratch.
    pub async fn clear_highest_checked(&self) {
        self.clear(HIGHEST_CHECKED_ID, Lifetime::Durable).await;
    }

    // ========================================================================
    // Session Anchor
    // ========================================================================

    pub async fn scroll_anchor(&self) -> Option<u64> {
        self.read(SCROLL_ANCHOR_ID, Lifetime::Session).await
    }

    pub async fn set_scroll_anchor(&self, id: u64) {
        self.write(SCROLL_ANCHOR_ID, id, Lifetime::Session).await;
    }

    pub async fn clear_scroll_anchor(&self) {
        self.clear(SCROLL_ANCHOR_ID, Lifetime::Session).await;
    }

    // ========================================================================
    // Filter Selection
    // ========================================================================

    pub async fn root_identities(&self) -> BTreeSet<String> {
        let key = self.key(ROOT_IDENTITIES);
        match self.kv.get(&key, Lifetime::Durable).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(key = %key, error = %e, "Ignoring malformed stored root selection");
                BTreeSet::new()
            }),
            Ok(None) => BTreeSet::new(),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read root selection");
                BTreeSet::new()
            }
        }
    }

    pub async fn set_root_identities(&self, roots: &BTreeSet<String>) {
        match serde_json::to_string(roots) {
            Ok(encoded) => {
                self.write(ROOT_IDENTITIES, encoded, Lifetime::Durable).await;
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode root selection"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, MemoryStore};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use proptest::prelude::*;

    fn memory_store() -> (Arc<MemoryStore>, FeedStore) {
        let kv = Arc::new(MemoryStore::new());
        let store = FeedStore::new(kv.clone(), "test");
        (kv, store)
    }

    #[tokio::test]
    async fn test_last_seen_only_advances() {
        let (_, store) = memory_store();
        assert_eq!(store.last_seen_id().await, None);

        assert!(store.advance_last_seen(100).await);
        assert!(!store.advance_last_seen(90).await);
        assert!(!store.advance_last_seen(100).await);
        assert_eq!(store.last_seen_id().await, Some(100));

        assert!(store.advance_last_seen(101).await);
        assert_eq!(store.last_seen_id().await, Some(101));
    }

    #[tokio::test]
    async fn test_highest_checked_clear_then_lower_value_allowed() {
        let (_, store) = memory_store();
        store.record_highest_checked(50).await;
        store.record_highest_checked(40).await;
        assert_eq!(store.highest_checked_id().await, Some(50));

        store.clear_highest_checked().await;
        assert_eq!(store.highest_checked_id().await, None);
        store.record_highest_checked(40).await;
        assert_eq!(store.highest_checked_id().await, Some(40));
    }

    #[tokio::test]
    async fn test_scroll_anchor_is_session_scoped() {
        let (kv, store) = memory_store();
        store.set_scroll_anchor(500).await;
        store.advance_last_seen(10).await;
        assert_eq!(store.scroll_anchor().await, Some(500));

        kv.end_session();

        assert_eq!(store.scroll_anchor().await, None);
        assert_eq!(store.last_seen_id().await, Some(10));
    }

    #[tokio::test]
    async fn test_profiles_are_isolated() {
        let kv = Arc::new(MemoryStore::new());
        let alice = FeedStore::new(kv.clone(), "alice");
        let bob = FeedStore::new(kv, "bob");

        alice.advance_last_seen(7).await;
        assert_eq!(bob.last_seen_id().await, None);
    }

    #[tokio::test]
    async fn test_root_identities_round_trip_through_database() {
        let db = Arc::new(Database::open(":memory:").await.unwrap());
        let store = FeedStore::new(db, "default");
        let roots: BTreeSet<String> = ["aaaaa-aa".to_string(), "bbbbb-bb".to_string()]
            .into_iter()
            .collect();

        store.set_root_identities(&roots).await;
        assert_eq!(store.root_identities().await, roots);
    }

    #[tokio::test]
    async fn test_garbage_value_reads_as_unset() {
        let (kv, store) = memory_store();
        kv.set("feed.test.last_seen_id", "not-a-number", Lifetime::Durable)
            .await
            .unwrap();
        assert_eq!(store.last_seen_id().await, None);
    }

    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        async fn get(&self, _: &str, _: Lifetime) -> anyhow::Result<Option<String>> {
            Err(anyhow!("disk on fire"))
        }
        async fn set(&self, _: &str, _: &str, _: Lifetime) -> anyhow::Result<()> {
            Err(anyhow!("disk on fire"))
        }
        async fn remove(&self, _: &str, _: Lifetime) -> anyhow::Result<()> {
            Err(anyhow!("disk on fire"))
        }
    }

    #[tokio::test]
    async fn test_store_failures_degrade_to_unset() {
        let store = FeedStore::new(Arc::new(BrokenStore), "x");
        assert_eq!(store.last_seen_id().await, None);
        assert!(!store.advance_last_seen(3).await);
        store.clear_scroll_anchor().await;
        assert!(store.root_identities().await.is_empty());
    }

    proptest! {
        #[test]
        fn prop_last_seen_is_monotonic(writes in proptest::collection::vec(0u64..1_000, 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (_, store) = memory_store();
                let mut previous = None;
                for id in writes {
                    store.advance_last_seen(id).await;
                    let now = store.last_seen_id().await;
                    prop_assert!(now >= previous);
                    previous = now;
                }
                Ok(())
            })?;
        }
    }
}
