//! QueueStore contract
//!
//! A store holds any number of named queues. Every operation is atomic with
//! respect to concurrent callers on the same store: two claims never select
//! the same item, and an item is always in exactly one of the idle or active
//! indexes of its queue.

use crate::core::time::{SystemTimeProvider, TimeProvider};
use crate::queue::error::StoreResult;
use crate::queue::item::{IdScheme, QueueStats, StepRoster, WorkItem};
use crate::queue::memory::MemoryStore;
use crate::queue::sqlite::SqliteStore;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Atomic claim/ack/heartbeat storage over named queues
#[async_trait::async_trait]
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    /// Short backend name for diagnostics
    fn backend(&self) -> &'static str;

    /// Admit `payload` as an idle item and return its id
    async fn put(&self, queue: &str, payload: Value) -> StoreResult<String>;

    /// Move the oldest idle item to the active index on behalf of `owner`
    ///
    /// Returns `Ok(None)` when the queue has no idle item.
    async fn claim(
        &self,
        queue: &str,
        owner: &str,
        ack_timeout: Duration,
    ) -> StoreResult<Option<WorkItem>>;

    /// Renew the visibility timeout of an active item
    async fn acknowledge(&self, queue: &str, id: &str) -> StoreResult<WorkItem>;

    /// Remove an active item whose claimant has finished with it
    async fn complete(&self, queue: &str, id: &str) -> StoreResult<()>;

    /// Return every expired active item to the idle index
    ///
    /// Safe to call at any time from any number of callers; a no-op when
    /// nothing has expired. Returns the recovered ids in queue order.
    async fn recover(&self, queue: &str) -> StoreResult<Vec<String>>;

    /// Current idle and active counts
    async fn stats(&self, queue: &str) -> StoreResult<QueueStats>;

    /// Look up a single item in either index
    async fn get_item(&self, queue: &str, id: &str) -> StoreResult<Option<WorkItem>>;

    /// Record step identities against a queue and return the full roster
    async fn report_steps(
        &self,
        queue: &str,
        consumers: &[String],
        producers: &[String],
    ) -> StoreResult<StepRoster>;
}

/// Where a store keeps its queues
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite(PathBuf),
}

/// Construction options for a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub backend: StoreBackend,
    pub id_scheme: IdScheme,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            id_scheme: IdScheme::default(),
        }
    }
}

/// Open the store described by `options` using the system clock
pub fn open_store(options: &StoreOptions) -> StoreResult<Arc<dyn QueueStore>> {
    open_store_with_clock(options, Arc::new(SystemTimeProvider))
}

/// Open the store described by `options` with an explicit clock
pub fn open_store_with_clock(
    options: &StoreOptions,
    clock: Arc<dyn TimeProvider>,
) -> StoreResult<Arc<dyn QueueStore>> {
    let store: Arc<dyn QueueStore> = match &options.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::with_clock(options.id_scheme, clock)),
        StoreBackend::Sqlite(path) => {
            Arc::new(SqliteStore::open_with_clock(path, options.id_scheme, clock)?)
        }
    };
    log::debug!("Opened {} queue store", store.backend());
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_options_use_memory_backend() {
        let options = StoreOptions::default();
        assert_eq!(options.backend, StoreBackend::Memory);
        assert_eq!(options.id_scheme, IdScheme::Unique);
    }

    #[tokio::test]
    async fn test_open_store_selects_backend() {
        let memory = open_store(&StoreOptions::default()).unwrap();
        assert_eq!(memory.backend(), "memory");

        let dir = TempDir::new().unwrap();
        let options = StoreOptions {
            backend: StoreBackend::Sqlite(dir.path().join("queues.db")),
            id_scheme: IdScheme::Content,
        };
        let sqlite = open_store(&options).unwrap();
        assert_eq!(sqlite.backend(), "sqlite");
    }
}
