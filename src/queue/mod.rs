//! Work queues
//!
//! A queue is a named pair of indexes, idle and active, held in a
//! [`QueueStore`]. Producers `put` payloads; consumers `claim` the oldest idle
//! item, which moves it to the active index under a visibility timeout. The
//! claimant either `complete`s the item or keeps it alive with `acknowledge`;
//! a claim that is neither renewed nor completed in time is returned to the
//! idle index by `recover` and delivered again.
//!
//! ```text
//!            put                 claim
//!  producer ─────▶ [ idle ] ─────────────▶ [ active ] ──complete──▶ (gone)
//!                     ▲                        │
//!                     └───── recover (expired) ┘
//! ```
//!
//! # Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use workline::queue::{queue_name, MemoryStore, Queue, QueueOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::default());
//! let queue = Queue::new(queue_name("demo", 0), store, QueueOptions::default());
//!
//! queue.put(serde_json::json!({"foo": "bar"})).await?;
//! let item = queue
//!     .get(false, "worker-1", Duration::from_secs(30))
//!     .await?
//!     .expect("item was just queued");
//! queue.complete(&item.id).await?;
//! assert_eq!(queue.size().await?, 0);
//! # Ok(())
//! # }
//! ```

pub mod api;
mod error;
mod item;
mod memory;
mod sqlite;
mod store;
mod work_queue;


pub use error::{QueueError, QueueResult, StoreError, StoreResult};
pub use item::{
    content_digest, IdScheme, ItemStatus, QueueStats, StepRoster, WireRecord, WorkItem,
};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{open_store, open_store_with_clock, QueueStore, StoreBackend, StoreOptions};
pub use work_queue::{queue_name, Queue, QueueOptions};
