//! Step definition API
//!
//! A step is the business logic of one pipeline stage. It receives each
//! claimed payload in [`Step::consume`] and hands results downstream with
//! [`StepContext::produce`]. Everything else (claiming, heartbeats, error
//! envelopes, rollback, completion) is driven by the step worker.
//!
//! ```rust
//! use workline::pipeline::{Payload, ProcessingError, Step, StepContext};
//!
//! #[derive(Default)]
//! struct Wrap;
//!
//! #[async_trait::async_trait]
//! impl Step for Wrap {
//!     fn label(&self) -> Option<&str> {
//!         Some("wrap")
//!     }
//!
//!     async fn consume(&self, ctx: &StepContext, payload: Payload) -> Result<(), ProcessingError> {
//!         ctx.produce(serde_json::json!({ "ok": payload.into_value() })).await?;
//!         Ok(())
//!     }
//! }
//! ```

use crate::core::retry::retry_async;
use crate::pipeline::error::ProcessingError;
use crate::pipeline::payload::Payload;
use crate::pipeline::pipeline::PipelineShared;
use crate::queue::api::{Queue, QueueError, QueueResult};
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// One stage of a pipeline
#[async_trait::async_trait]
pub trait Step: Send + Sync + 'static {
    /// Identity override; defaults to the implementing type's path
    fn label(&self) -> Option<&str> {
        None
    }

    /// Step identity used in logs, rosters and error envelopes
    fn identity(&self) -> String {
        self.label()
            .map(str::to_string)
            .unwrap_or_else(|| std::any::type_name::<Self>().to_string())
    }

    /// Process one payload, producing downstream through `ctx`
    async fn consume(&self, ctx: &StepContext, payload: Payload) -> Result<(), ProcessingError>;

    /// Compensate for a failed `consume` of `payload`
    ///
    /// Receives the payload as it was claimed, without the error envelope.
    /// The default puts it back on the upstream queue for another attempt.
    async fn rollback(&self, ctx: &StepContext, payload: Payload) -> Result<(), ProcessingError> {
        ctx.requeue(payload.into_value()).await?;
        Ok(())
    }

    /// Called at the top of every iteration, before waiting on upstream
    async fn before_consume(&self, ctx: &StepContext) {
        log::trace!("{} is about to consume its queue", ctx.ancestry());
    }

    /// Called after a successful `consume`
    async fn after_consume(&self, ctx: &StepContext, _payload: &Payload) {
        log::trace!("{} is done", ctx.ancestry());
    }
}

/// What a running step can see of its pipeline
///
/// Queue handles are weak: the pipeline owns its queues, and a step whose
/// pipeline has been dropped gets `QueueError::Detached` instead of keeping
/// the queues alive.
#[derive(Debug, Clone)]
pub struct StepContext {
    index: usize,
    identity: String,
    ancestry: String,
    step_id: String,
    upstream: Weak<Queue>,
    downstream: Weak<Queue>,
    shared: Arc<PipelineShared>,
}

impl StepContext {
    pub(crate) fn new(
        index: usize,
        identity: String,
        upstream: &Arc<Queue>,
        downstream: &Arc<Queue>,
        shared: Arc<PipelineShared>,
    ) -> Self {
        let ancestry = format!("{}|{}", identity, shared.name());
        let step_id = format!("{}|{}|{}", shared.id(), index, ancestry);
        Self {
            index,
            identity,
            ancestry,
            step_id,
            upstream: Arc::downgrade(upstream),
            downstream: Arc::downgrade(downstream),
            shared,
        }
    }

    /// Position of the step in its pipeline
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// `identity|pipeline`
    pub fn ancestry(&self) -> &str {
        &self.ancestry
    }

    /// `host|pid|index|identity|pipeline`, the claim owner of this step
    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn pipeline_name(&self) -> &str {
        self.shared.name()
    }

    /// Blocking dequeue bound of the pipeline; `None` waits indefinitely
    pub fn timeout(&self) -> Option<Duration> {
        self.shared.options().queue.timeout
    }

    /// Send `value` to the downstream queue
    pub async fn produce(&self, value: Value) -> QueueResult<String> {
        let queue = self.downstream()?;
        self.put_with_retry(&queue, value).await
    }

    /// Put `value` back on the upstream queue
    pub async fn requeue(&self, value: Value) -> QueueResult<String> {
        let queue = self.upstream()?;
        self.put_with_retry(&queue, value).await
    }

    async fn put_with_retry(&self, queue: &Queue, value: Value) -> QueueResult<String> {
        let operation = format!("put to {}", queue.name());
        retry_async(&operation, self.shared.options().retry.clone(), || {
            queue.put(value.clone())
        })
        .await
    }

    pub(crate) fn upstream(&self) -> QueueResult<Arc<Queue>> {
        self.upstream.upgrade().ok_or_else(|| QueueError::Detached {
            queue: format!("upstream of {}", self.ancestry),
        })
    }

    pub(crate) fn downstream(&self) -> QueueResult<Arc<Queue>> {
        self.downstream.upgrade().ok_or_else(|| QueueError::Detached {
            queue: format!("downstream of {}", self.ancestry),
        })
    }

    pub(crate) fn shared(&self) -> &PipelineShared {
        &self.shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pipeline::PipelineOptions;
    use crate::queue::api::{queue_name, MemoryStore, QueueOptions};
    use serde_json::json;

    #[derive(Default)]
    struct Unlabelled;

    #[async_trait::async_trait]
    impl Step for Unlabelled {
        async fn consume(&self, _ctx: &StepContext, _payload: Payload) -> Result<(), ProcessingError> {
            Ok(())
        }
    }

    fn context() -> (StepContext, Arc<Queue>, Arc<Queue>) {
        let store = Arc::new(MemoryStore::default());
        let upstream = Arc::new(Queue::new(
            queue_name("ctx", 0),
            store.clone(),
            QueueOptions::default(),
        ));
        let downstream = Arc::new(Queue::new(
            queue_name("ctx", 1),
            store,
            QueueOptions::default(),
        ));
        let shared = Arc::new(PipelineShared::new("ctx", PipelineOptions::default()));
        let ctx = StepContext::new(0, "wrap".to_string(), &upstream, &downstream, shared);
        (ctx, upstream, downstream)
    }

    #[test]
    fn test_identity_defaults_to_type_path() {
        let identity = Unlabelled.identity();
        assert!(identity.ends_with("Unlabelled"));
        assert!(identity.contains("::"));
    }

    #[test]
    fn test_context_naming() {
        let (ctx, _up, _down) = context();
        assert_eq!(ctx.ancestry(), "wrap|ctx");
        assert!(ctx.step_id().ends_with("|0|wrap|ctx"));
        assert_eq!(ctx.pipeline_name(), "ctx");
        assert_eq!(ctx.timeout(), None);
    }

    #[tokio::test]
    async fn test_produce_and_requeue_target_adjacent_queues() {
        let (ctx, upstream, downstream) = context();
        ctx.produce(json!({"out": 1})).await.unwrap();
        ctx.requeue(json!({"again": 1})).await.unwrap();

        assert_eq!(downstream.pending().await.unwrap(), 1);
        assert_eq!(upstream.pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_default_rollback_requeues_upstream() {
        let (ctx, upstream, _down) = context();
        Unlabelled
            .rollback(&ctx, Payload::new(json!({"retry": true})))
            .await
            .unwrap();

        let item = upstream
            .get(false, "t", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.payload, json!({"retry": true}));
    }

    #[tokio::test]
    async fn test_produce_after_queues_dropped_is_detached() {
        let (ctx, upstream, downstream) = context();
        drop(upstream);
        drop(downstream);

        let err = ctx.produce(json!(1)).await.unwrap_err();
        assert!(matches!(err, QueueError::Detached { .. }));
    }
}
