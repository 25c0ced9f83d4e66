//! Step worker: the task that drives one step
//!
//! ```text
//!   Idle ──claim──▶ Processing ──ok──▶ complete ──▶ Idle
//!                       │
//!                       └─err──▶ RollingBack ──▶ complete ──▶ Idle
//!   any state ──stop (between items)──▶ Stopped
//! ```
//!
//! A failed item produces exactly one annotated record downstream, sent
//! after the rollback hook has run. A failing rollback adds its traceback
//! to that record. The upstream item is completed only once it has been
//! forwarded or rolled back; otherwise its claim is left to expire so the
//! item is delivered again.

use crate::core::shutdown::ShutdownCoordinator;
use crate::pipeline::error::{FailureKind, ProcessingError};
use crate::pipeline::payload::Payload;
use crate::pipeline::pipeline::StepFailure;
use crate::pipeline::step::{Step, StepContext};
use crate::queue::api::{Queue, WorkItem};
use futures::FutureExt;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Key under which a failure is recorded in a payload
pub const ERROR_KEY: &str = "__error__";

/// Observable state of a step worker
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum StepState {
    Idle,
    Processing,
    RollingBack,
    Stopped,
}

pub(crate) struct StepWorker {
    step: Box<dyn Step>,
    ctx: StepContext,
    shutdown: ShutdownCoordinator,
    state: watch::Sender<StepState>,
}

impl StepWorker {
    pub(crate) fn new(
        step: Box<dyn Step>,
        ctx: StepContext,
        shutdown: ShutdownCoordinator,
    ) -> (Self, watch::Receiver<StepState>) {
        let (state, state_rx) = watch::channel(StepState::Idle);
        (
            Self {
                step,
                ctx,
                shutdown,
                state,
            },
            state_rx,
        )
    }

    fn set_state(&self, state: StepState) {
        self.state.send_replace(state);
    }

    /// Claim and handle items until stopped or detached from the pipeline
    pub(crate) async fn run(self) {
        let options = self.ctx.shared().options().clone();
        log::info!("{} started", self.ctx.step_id());

        while !self.shutdown.is_shutdown_requested() {
            self.set_state(StepState::Idle);
            self.step.before_consume(&self.ctx).await;

            let upstream = match self.ctx.upstream() {
                Ok(queue) => queue,
                Err(e) => {
                    log::debug!("{} leaving: {}", self.ctx.ancestry(), e);
                    break;
                }
            };

            let claimed = upstream
                .get_until(self.ctx.step_id(), options.ack_timeout, &self.shutdown)
                .await;
            let item = match claimed {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(e) => {
                    log::error!(
                        "{} could not claim from {}: {}",
                        self.ctx.ancestry(),
                        upstream.name(),
                        e
                    );
                    self.pause(options.queue.poll_interval).await;
                    continue;
                }
            };

            self.handle(&upstream, item).await;
        }

        self.set_state(StepState::Stopped);
        log::info!("{} stopped", self.ctx.step_id());
    }

    /// Sleep that ends early on shutdown
    async fn pause(&self, duration: Duration) {
        let mut rx = self.shutdown.subscribe();
        if self.shutdown.is_shutdown_requested() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = rx.recv() => {}
        }
    }

    async fn handle(&self, upstream: &Arc<Queue>, item: WorkItem) {
        self.set_state(StepState::Processing);
        log::debug!(
            "{} claimed item {} (delivery {})",
            self.ctx.ancestry(),
            item.id,
            item.deliveries
        );

        let payload = Payload::new(item.payload.clone());
        let heartbeat = self.spawn_heartbeat(upstream, &item.id);
        let outcome = AssertUnwindSafe(self.step.consume(&self.ctx, payload.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(ProcessingError::Panicked {
                    message: panic_message(panic.as_ref()),
                })
            });
        heartbeat.abort();

        let settled = match outcome {
            Ok(()) => {
                self.step.after_consume(&self.ctx, &payload).await;
                true
            }
            Err(error) => {
                self.set_state(StepState::RollingBack);
                self.fail(upstream, &item, error).await
            }
        };

        if !settled {
            log::warn!(
                "{} left item {} claimed in {} for redelivery",
                self.ctx.ancestry(),
                item.id,
                upstream.name()
            );
            return;
        }

        if let Err(e) = upstream.complete(&item.id).await {
            // The claim expires and the item is delivered again
            log::error!(
                "{} could not complete item {} in {}: {}",
                self.ctx.ancestry(),
                item.id,
                upstream.name(),
                e
            );
        }
    }

    /// Renew the claim every third of the visibility timeout
    fn spawn_heartbeat(&self, upstream: &Arc<Queue>, id: &str) -> JoinHandle<()> {
        let queue = Arc::clone(upstream);
        let id = id.to_string();
        let owner = self.ctx.ancestry().to_string();
        let interval = (self.ctx.shared().options().ack_timeout / 3).max(Duration::from_millis(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = queue.acknowledge(&id).await {
                    log::warn!("{} stopped renewing claim on {}: {}", owner, id, e);
                    break;
                }
            }
        })
    }

    /// Report, roll back and forward a failed item
    ///
    /// Returns whether the item now lives on elsewhere, either downstream or
    /// wherever the rollback put it.
    async fn fail(
        &self,
        upstream: &Arc<Queue>,
        item: &WorkItem,
        error: ProcessingError,
    ) -> bool {
        let kind = error.kind();
        let traceback = error.traceback();
        match &error {
            ProcessingError::MissingField { key, location, .. } => log::warn!(
                "{} expected payload key '{}' at {} in pipeline '{}': {}",
                self.ctx.ancestry(),
                key,
                location,
                self.ctx.pipeline_name(),
                traceback
            ),
            _ => log::warn!(
                "{} failed while processing item {} in pipeline '{}': {}",
                self.ctx.ancestry(),
                item.id,
                self.ctx.pipeline_name(),
                traceback
            ),
        }

        // Depths are read before the rollback can requeue anything
        let mut envelope = self.envelope(upstream, kind, &traceback).await;

        let rollback = AssertUnwindSafe(
            self.step
                .rollback(&self.ctx, Payload::new(item.payload.clone())),
        )
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(ProcessingError::Panicked {
                message: panic_message(panic.as_ref()),
            })
        });

        let rolled_back = match rollback {
            Ok(()) => {
                log::debug!("{} rolled back item {}", self.ctx.ancestry(), item.id);
                true
            }
            Err(rollback_error) => {
                let rollback_traceback = rollback_error.traceback();
                log::error!(
                    "The worker {} failed to roll back item {} in pipeline '{}': {}",
                    self.ctx.identity(),
                    item.id,
                    self.ctx.pipeline_name(),
                    rollback_traceback
                );
                self.ctx.shared().report_failure(StepFailure {
                    step: self.ctx.ancestry().to_string(),
                    kind: FailureKind::Rollback,
                    traceback: rollback_traceback.clone(),
                    payload: item.payload.clone(),
                });
                envelope.insert("kind".to_string(), json!(FailureKind::Rollback.as_ref()));
                envelope.insert("rollback_traceback".to_string(), json!(rollback_traceback));
                false
            }
        };

        let forwarded = self.forward(annotate(item.payload.clone(), envelope)).await;
        forwarded || rolled_back
    }

    async fn envelope(
        &self,
        upstream: &Queue,
        kind: FailureKind,
        traceback: &str,
    ) -> Map<String, Value> {
        let consume_depth = queue_depth(upstream).await;
        let produce_depth = match self.ctx.downstream() {
            Ok(queue) => queue_depth(&queue).await,
            Err(_) => Value::Null,
        };

        let mut envelope = Map::new();
        envelope.insert("traceback".to_string(), json!(traceback));
        envelope.insert("consume_queue_depth".to_string(), consume_depth);
        envelope.insert("produce_queue_depth".to_string(), produce_depth);
        envelope.insert("step".to_string(), json!(self.ctx.ancestry()));
        envelope.insert("kind".to_string(), json!(kind.as_ref()));
        envelope
    }

    async fn forward(&self, value: Value) -> bool {
        match self.ctx.produce(value).await {
            Ok(_) => true,
            Err(e) => {
                log::error!(
                    "{} could not forward failed item downstream: {}",
                    self.ctx.ancestry(),
                    e
                );
                false
            }
        }
    }
}

/// Idle count of a queue for the error envelope, `null` when unavailable
async fn queue_depth(queue: &Queue) -> Value {
    match queue.pending().await {
        Ok(depth) => json!(depth),
        Err(e) => {
            log::warn!("Could not read depth of {}: {}", queue.name(), e);
            Value::Null
        }
    }
}

/// Merge an error envelope into a payload without losing any of its fields
///
/// Non-object payloads are wrapped as `{"payload": value}` first. An
/// envelope already present from an earlier stage is kept under `previous`.
pub(crate) fn annotate(payload: Value, mut envelope: Map<String, Value>) -> Value {
    let mut object = match payload {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other);
            map
        }
    };
    if let Some(previous) = object.remove(ERROR_KEY) {
        envelope.insert("previous".to_string(), previous);
    }
    object.insert(ERROR_KEY.to_string(), Value::Object(envelope));
    Value::Object(object)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
