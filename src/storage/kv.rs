use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::schema::Database;

/// How long a persisted key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Survives application restarts.
    Durable,
    /// Survives in-app navigation, cleared on a full application start.
    Session,
}

/// Minimal persistent key-value store.
///
/// Each key is read and written independently; no multi-key transactions.
/// Invariants such as monotonic watermarks are enforced by the caller with
/// read-compare-write.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str, lifetime: Lifetime) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, lifetime: Lifetime) -> Result<()>;
    async fn remove(&self, key: &str, lifetime: Lifetime) -> Result<()>;
}

#[async_trait]
impl KeyValueStore for Database {
    async fn get(&self, key: &str, lifetime: Lifetime) -> Result<Option<String>> {
        self.get_value(lifetime, key).await
    }

    async fn set(&self, key: &str, value: &str, lifetime: Lifetime) -> Result<()> {
        self.set_value(lifetime, key, value).await
    }

    async fn remove(&self, key: &str, lifetime: Lifetime) -> Result<()> {
        self.remove_value(lifetime, key).await
    }
}

/// Process-local store, for tests and for running without a database file.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<(Lifetime, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(Lifetime, String), String>> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop every session-scoped key, as a full application restart would.
    pub fn end_session(&self) {
        self.lock()
            .retain(|(lifetime, _), _| *lifetime == Lifetime::Durable);
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str, lifetime: Lifetime) -> Result<Option<String>> {
        Ok(self.lock().get(&(lifetime, key.to_string())).cloned())
    }

    async fn set(&self, key: &str, value: &str, lifetime: Lifetime) -> Result<()> {
        self.lock()
            .insert((lifetime, key.to_string()), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str, lifetime: Lifetime) -> Result<()> {
        self.lock().remove(&(lifetime, key.to_string()));
        Ok(())
    }
}
