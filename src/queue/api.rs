//! Public API for the queue system
//!
//! External modules should import from here rather than directly from the
//! internal modules. See the module documentation for the item lifecycle.

// Store contract and backends
pub use crate::queue::store::{
    open_store, open_store_with_clock, QueueStore, StoreBackend, StoreOptions,
};
pub use crate::queue::memory::MemoryStore;
pub use crate::queue::sqlite::SqliteStore;

// Queue front-end
pub use crate::queue::work_queue::{queue_name, Queue, QueueOptions};

// Item data model
pub use crate::queue::item::{
    content_digest, IdScheme, ItemStatus, QueueStats, StepRoster, WireRecord, WorkItem,
};

// Error handling
pub use crate::queue::error::{QueueError, QueueResult, StoreError, StoreResult};
