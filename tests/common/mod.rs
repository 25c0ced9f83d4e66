//! Shared steps and options for the integration tests

#![allow(dead_code)]

use serde_json::{Map, Value};
use std::time::Duration;
use workline::pipeline::{Payload, PipelineOptions, ProcessingError, Step, StepContext};
use workline::queue::{
    MemoryStore, QueueOptions, QueueStats, QueueStore, StepRoster, StoreError, StoreResult,
    WorkItem,
};

/// Short poll interval and a bounded timeout so a broken pipeline fails fast
pub fn options() -> PipelineOptions {
    PipelineOptions {
        queue: QueueOptions {
            timeout: Some(Duration::from_secs(5)),
            poll_interval: Duration::from_millis(5),
            ..QueueOptions::default()
        },
        ..PipelineOptions::default()
    }
}

/// Produces `{"<key>": payload}`
pub struct WrapStep {
    key: &'static str,
}

impl WrapStep {
    pub fn new(key: &'static str) -> Self {
        Self { key }
    }
}

#[async_trait::async_trait]
impl Step for WrapStep {
    fn label(&self) -> Option<&str> {
        Some(self.key)
    }

    async fn consume(&self, ctx: &StepContext, payload: Payload) -> Result<(), ProcessingError> {
        let mut wrapped = Map::new();
        wrapped.insert(self.key.to_string(), payload.into_value());
        ctx.produce(Value::Object(wrapped)).await?;
        Ok(())
    }
}

/// Always fails with `BOOM`
#[derive(Default)]
pub struct BoomStep;

#[async_trait::async_trait]
impl Step for BoomStep {
    fn label(&self) -> Option<&str> {
        Some("boom")
    }

    async fn consume(&self, _ctx: &StepContext, _payload: Payload) -> Result<(), ProcessingError> {
        Err(ProcessingError::failed("BOOM"))
    }
}

/// Fails with `BOOM` and then fails its rollback too
#[derive(Default)]
pub struct RollbackHellStep;

#[async_trait::async_trait]
impl Step for RollbackHellStep {
    fn label(&self) -> Option<&str> {
        Some("rollback_hell")
    }

    async fn consume(&self, _ctx: &StepContext, _payload: Payload) -> Result<(), ProcessingError> {
        Err(ProcessingError::failed("BOOM"))
    }

    async fn rollback(&self, _ctx: &StepContext, _payload: Payload) -> Result<(), ProcessingError> {
        Err(ProcessingError::failed("ROLLBACK HELL"))
    }
}

/// Requires a `needed` key
#[derive(Default)]
pub struct NeedsKeyStep;

#[async_trait::async_trait]
impl Step for NeedsKeyStep {
    fn label(&self) -> Option<&str> {
        Some("needs_key")
    }

    async fn consume(&self, ctx: &StepContext, payload: Payload) -> Result<(), ProcessingError> {
        let needed = payload.get("needed")?.clone();
        ctx.produce(needed).await?;
        Ok(())
    }
}

/// Panics on every payload
#[derive(Default)]
pub struct PanicStep;

#[async_trait::async_trait]
impl Step for PanicStep {
    fn label(&self) -> Option<&str> {
        Some("panic")
    }

    async fn consume(&self, _ctx: &StepContext, payload: Payload) -> Result<(), ProcessingError> {
        panic!("cannot handle {}", payload.value());
    }

    async fn rollback(&self, _ctx: &StepContext, _payload: Payload) -> Result<(), ProcessingError> {
        Ok(())
    }
}

/// The `__error__` envelope of a result, panicking if it is absent
pub fn envelope(result: &Value) -> &Value {
    let envelope = &result[workline::pipeline::ERROR_KEY];
    assert!(envelope.is_object(), "no error envelope in {}", result);
    envelope
}

/// MemoryStore whose `put` into one queue always fails
#[derive(Debug)]
pub struct UnreachableQueueStore {
    inner: MemoryStore,
    unreachable: String,
}

impl UnreachableQueueStore {
    pub fn new(unreachable: impl Into<String>) -> Self {
        Self {
            inner: MemoryStore::default(),
            unreachable: unreachable.into(),
        }
    }
}

#[async_trait::async_trait]
impl QueueStore for UnreachableQueueStore {
    fn backend(&self) -> &'static str {
        "unreachable"
    }

    async fn put(&self, queue: &str, payload: Value) -> StoreResult<String> {
        if queue == self.unreachable {
            return Err(StoreError::Io {
                message: format!("{} is unreachable", queue),
            });
        }
        self.inner.put(queue, payload).await
    }

    async fn claim(
        &self,
        queue: &str,
        owner: &str,
        ack_timeout: Duration,
    ) -> StoreResult<Option<WorkItem>> {
        self.inner.claim(queue, owner, ack_timeout).await
    }

    async fn acknowledge(&self, queue: &str, id: &str) -> StoreResult<WorkItem> {
        self.inner.acknowledge(queue, id).await
    }

    async fn complete(&self, queue: &str, id: &str) -> StoreResult<()> {
        self.inner.complete(queue, id).await
    }

    async fn recover(&self, queue: &str) -> StoreResult<Vec<String>> {
        self.inner.recover(queue).await
    }

    async fn stats(&self, queue: &str) -> StoreResult<QueueStats> {
        self.inner.stats(queue).await
    }

    async fn get_item(&self, queue: &str, id: &str) -> StoreResult<Option<WorkItem>> {
        self.inner.get_item(queue, id).await
    }

    async fn report_steps(
        &self,
        queue: &str,
        consumers: &[String],
        producers: &[String],
    ) -> StoreResult<StepRoster> {
        self.inner.report_steps(queue, consumers, producers).await
    }
}
