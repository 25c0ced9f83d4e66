//! Pipelines of steps connected by queues
//!
//! ```text
//!  feed ──▶ queue 0 ──▶ step 1 ──▶ queue 1 ──▶ step 2 ──▶ queue 2 ──▶ get_result
//! ```
//!
//! Each step runs in its own task and talks to its neighbours only through
//! the queues. A step that fails on an item forwards the item downstream
//! with an error envelope and runs its rollback hook, so failed work is
//! always visible somewhere.
//!
//! # Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use workline::pipeline::{Payload, PipelineDefinition, PipelineOptions, ProcessingError, Step, StepContext};
//! use workline::queue::MemoryStore;
//!
//! #[derive(Default)]
//! struct Wrap;
//!
//! #[async_trait::async_trait]
//! impl Step for Wrap {
//!     async fn consume(&self, ctx: &StepContext, payload: Payload) -> Result<(), ProcessingError> {
//!         ctx.produce(serde_json::json!({ "ok": payload.into_value() })).await?;
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut options = PipelineOptions::default();
//! options.queue.timeout = Some(std::time::Duration::from_secs(5));
//!
//! let pipeline = PipelineDefinition::new("doc")
//!     .step::<Wrap>()
//!     .build(Arc::new(MemoryStore::default()), options)
//!     .await?;
//! pipeline.feed(serde_json::json!({"foo": "bar"})).await?;
//! let result = pipeline.get_result(true).await?;
//! assert_eq!(result, Some(serde_json::json!({"ok": {"foo": "bar"}})));
//! pipeline.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod payload;
#[allow(clippy::module_inception)]
mod pipeline;
mod registry;
mod step;
mod worker;

pub use error::{
    FailureKind, PipelineError, PipelineResult, ProcessingError, RegistryError, RegistryResult,
};
pub use payload::Payload;
pub use pipeline::{Pipeline, PipelineDefinition, PipelineOptions, PipelineShared, StepFailure};
pub use registry::PipelineRegistry;
pub use step::{Step, StepContext};
pub use worker::{StepState, ERROR_KEY};
