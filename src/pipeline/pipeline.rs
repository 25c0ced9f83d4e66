//! Pipeline definition and runtime
//!
//! A [`PipelineDefinition`] is a name plus an ordered list of step factories.
//! Building it against a store yields a [`Pipeline`], which owns N steps and
//! the N+1 queues connecting them: step `i` consumes `queues[i]` and produces
//! into `queues[i + 1]`.

use crate::core::retry::RetryPolicy;
use crate::core::shutdown::ShutdownCoordinator;
use crate::core::sync::handle_mutex_poison;
use crate::pipeline::error::{FailureKind, PipelineError, PipelineResult};
use crate::pipeline::step::{Step, StepContext};
use crate::pipeline::worker::{StepState, StepWorker};
use crate::queue::api::{queue_name, Queue, QueueOptions, QueueStore, StoreError};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long `feed` waits for workers when the pipeline timeout is unbounded
const START_GRACE: Duration = Duration::from_secs(5);

/// Runtime options shared by every step of a pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub queue: QueueOptions,
    /// Visibility timeout granted on every claim
    pub ack_timeout: Duration,
    /// Retry policy for forwarding and requeueing
    pub retry: RetryPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            queue: QueueOptions::default(),
            ack_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// A failure a worker reported upward
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    /// Ancestry of the reporting step
    pub step: String,
    pub kind: FailureKind,
    pub traceback: String,
    /// The payload as it was claimed
    pub payload: Value,
}

/// Read-only pipeline context shared with its steps, plus the failure sink
#[derive(Debug)]
pub struct PipelineShared {
    name: String,
    id: String,
    options: PipelineOptions,
    failures: Mutex<Vec<StepFailure>>,
}

impl PipelineShared {
    pub(crate) fn new(name: &str, options: PipelineOptions) -> Self {
        Self {
            name: name.to_string(),
            id: node_id(),
            options,
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub(crate) fn report_failure(&self, failure: StepFailure) {
        match self.failures.lock() {
            Ok(mut failures) => failures.push(failure),
            Err(poisoned) => poisoned.into_inner().push(failure),
        }
    }

    fn failures(&self) -> Vec<StepFailure> {
        match self.failures.lock() {
            Ok(failures) => failures.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// `host|pid` of this process
fn node_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}|{}", host, std::process::id())
}

type StepFactory = Arc<dyn Fn() -> Box<dyn Step> + Send + Sync>;

/// Named, ordered list of step types
#[derive(Clone)]
pub struct PipelineDefinition {
    name: String,
    description: String,
    steps: Vec<StepFactory>,
}

impl fmt::Debug for PipelineDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineDefinition")
            .field("name", &self.name)
            .field("steps", &self.step_identities())
            .finish()
    }
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append a step constructed with `Default`
    pub fn step<S: Step + Default>(self) -> Self {
        self.step_with(S::default)
    }

    /// Append a step constructed by `factory` each time the pipeline is built
    pub fn step_with<S, F>(mut self, factory: F) -> Self
    where
        S: Step,
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.steps
            .push(Arc::new(move || Box::new(factory()) as Box<dyn Step>));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_identities(&self) -> Vec<String> {
        self.steps.iter().map(|factory| factory().identity()).collect()
    }

    /// Construct the queues and steps of this pipeline on `store`
    ///
    /// Steps are registered with both adjacent queues but not started.
    pub async fn build(
        &self,
        store: Arc<dyn QueueStore>,
        options: PipelineOptions,
    ) -> PipelineResult<Pipeline> {
        let shared = Arc::new(PipelineShared::new(&self.name, options));
        let queues: Vec<Arc<Queue>> = (0..=self.steps.len())
            .map(|index| {
                Arc::new(Queue::new(
                    queue_name(&self.name, index),
                    Arc::clone(&store),
                    shared.options().queue.clone(),
                ))
            })
            .collect();

        let mut slots = Vec::with_capacity(self.steps.len());
        for (index, factory) in self.steps.iter().enumerate() {
            let step = factory();
            let ctx = StepContext::new(
                index,
                step.identity(),
                &queues[index],
                &queues[index + 1],
                Arc::clone(&shared),
            );
            queues[index].adopt_consumer(ctx.step_id()).await?;
            queues[index + 1].adopt_producer(ctx.step_id()).await?;

            let (shutdown, _) = ShutdownCoordinator::new();
            let ancestry = ctx.ancestry().to_string();
            let (worker, state) = StepWorker::new(step, ctx, shutdown.clone());
            slots.push(StepSlot {
                ancestry,
                shutdown,
                state,
                worker: Some(worker),
                handle: None,
            });
        }

        log::debug!(
            "Built pipeline '{}' with {} step(s) on {} store",
            self.name,
            slots.len(),
            store.backend()
        );
        Ok(Pipeline {
            shared,
            queues,
            slots: Mutex::new(slots),
            started: AtomicBool::new(false),
        })
    }
}

struct StepSlot {
    ancestry: String,
    shutdown: ShutdownCoordinator,
    state: watch::Receiver<StepState>,
    worker: Option<StepWorker>,
    handle: Option<JoinHandle<()>>,
}

/// A built pipeline: N steps, N+1 queues
pub struct Pipeline {
    shared: Arc<PipelineShared>,
    queues: Vec<Arc<Queue>>,
    slots: Mutex<Vec<StepSlot>>,
    started: AtomicBool,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.shared.name())
            .field("queues", &self.queues.len())
            .field("started", &self.started.load(Ordering::Acquire))
            .finish()
    }
}

impl Pipeline {
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// `host|pid` of the node running this pipeline
    pub fn id(&self) -> &str {
        self.shared.id()
    }

    pub fn options(&self) -> &PipelineOptions {
        self.shared.options()
    }

    pub fn queues(&self) -> &[Arc<Queue>] {
        &self.queues
    }

    fn input(&self) -> &Arc<Queue> {
        &self.queues[0]
    }

    fn output(&self) -> &Arc<Queue> {
        &self.queues[self.queues.len() - 1]
    }

    fn lock_slots(&self) -> PipelineResult<std::sync::MutexGuard<'_, Vec<StepSlot>>> {
        Ok(handle_mutex_poison(self.slots.lock(), |message| {
            StoreError::Poisoned { message }
        })?)
    }

    /// Spawn one task per step; later calls are no-ops
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&self) -> PipelineResult<()> {
        let mut slots = self.lock_slots()?;
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for slot in slots.iter_mut() {
            if let Some(worker) = slot.worker.take() {
                slot.handle = Some(tokio::spawn(worker.run()));
            }
        }
        log::info!("Started pipeline '{}' ({} steps)", self.name(), slots.len());
        Ok(())
    }

    /// True iff every step task has been spawned and is still alive
    pub fn is_running(&self) -> bool {
        let Ok(slots) = self.lock_slots() else {
            return false;
        };
        self.started.load(Ordering::Acquire)
            && slots
                .iter()
                .all(|slot| slot.handle.as_ref().is_some_and(|h| !h.is_finished()))
    }

    /// Start if needed, wait for running workers, then enqueue `payload`
    pub async fn feed(&self, payload: Value) -> PipelineResult<String> {
        self.start()?;
        let window = self.options().queue.timeout.unwrap_or(START_GRACE);
        let started = Instant::now();
        while !self.is_running() {
            if started.elapsed() >= window {
                return Err(PipelineError::NotRunning {
                    name: self.name().to_string(),
                    waited: started.elapsed(),
                });
            }
            tokio::task::yield_now().await;
        }
        Ok(self.input().put(payload).await?)
    }

    /// Take the next result from the last queue
    ///
    /// With `wait` the call blocks up to the pipeline timeout. A returned
    /// result is removed from the queue.
    pub async fn get_result(&self, wait: bool) -> PipelineResult<Option<Value>> {
        let owner = format!("{}|result", self.id());
        let output = self.output();
        let Some(item) = output.get(wait, &owner, self.options().ack_timeout).await? else {
            return Ok(None);
        };
        output.complete(&item.id).await?;
        Ok(Some(item.payload))
    }

    /// Signal every step to stop after its current item
    pub fn stop(&self) {
        match self.slots.lock() {
            Ok(slots) => slots.iter().for_each(|slot| slot.shutdown.trigger_shutdown()),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .for_each(|slot| slot.shutdown.trigger_shutdown()),
        }
    }

    /// Stop every step and wait for the tasks to finish
    pub async fn shutdown(&self) -> PipelineResult<()> {
        self.stop();
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut slots = self.lock_slots()?;
            slots
                .iter_mut()
                .filter_map(|slot| slot.handle.take().map(|h| (slot.ancestry.clone(), h)))
                .collect()
        };

        let mut lost = None;
        for (ancestry, handle) in handles {
            if let Err(e) = handle.await {
                log::error!("Worker {} ended abnormally: {}", ancestry, e);
                lost.get_or_insert(PipelineError::WorkerLost {
                    step: ancestry,
                    message: e.to_string(),
                });
            }
        }
        log::info!("Pipeline '{}' shut down", self.name());
        lost.map_or(Ok(()), Err)
    }

    /// Failures reported by the steps so far
    pub fn failures(&self) -> Vec<StepFailure> {
        self.shared.failures()
    }

    /// Current state of every step, in pipeline order
    pub fn step_states(&self) -> Vec<(String, StepState)> {
        let Ok(slots) = self.lock_slots() else {
            return Vec::new();
        };
        slots
            .iter()
            .map(|slot| (slot.ancestry.clone(), *slot.state.borrow()))
            .collect()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
