//! Named queue front-end over a QueueStore
//!
//! A `Queue` adds the blocking dequeue loop, opportunistic recovery of
//! expired claims and the producer/consumer roster on top of the raw store
//! protocol.

use crate::core::shutdown::ShutdownCoordinator;
use crate::core::sync::handle_mutex_poison;
use crate::queue::error::{QueueError, QueueResult, StoreError};
use crate::queue::item::{QueueStats, StepRoster, WorkItem};
use crate::queue::store::QueueStore;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Deterministic name of the queue at `index` of `pipeline`
pub fn queue_name(pipeline: &str, index: usize) -> String {
    format!("workline:{}:queue:{}", pipeline, index)
}

/// Timing behaviour of a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Bound on a blocking get or a verified put; `None` waits indefinitely
    pub timeout: Option<Duration>,
    /// Sleep between claim attempts of a blocking get
    pub poll_interval: Duration,
    /// Minimum spacing of the recover pass run by waiting consumers
    pub heartbeat_interval: Duration,
    /// Wait until the store observes each put
    pub verify_put: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            poll_interval: Duration::from_millis(10),
            heartbeat_interval: Duration::from_secs(1),
            verify_put: false,
        }
    }
}

/// A named queue bound to a store
#[derive(Debug)]
pub struct Queue {
    name: String,
    store: Arc<dyn QueueStore>,
    options: QueueOptions,
    roster: Mutex<StepRoster>,
    last_recover: Mutex<Option<Instant>>,
}

impl Queue {
    pub fn new(name: impl Into<String>, store: Arc<dyn QueueStore>, options: QueueOptions) -> Self {
        Self {
            name: name.into(),
            store,
            options,
            roster: Mutex::new(StepRoster::default()),
            last_recover: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Enqueue `payload` and return the item id
    ///
    /// With `verify_put` the call waits, bounded by the queue timeout (or one
    /// heartbeat interval when the timeout is unbounded), until the store
    /// reports the item or a larger queue.
    pub async fn put(&self, payload: Value) -> QueueResult<String> {
        if !self.options.verify_put {
            return Ok(self.store.put(&self.name, payload).await?);
        }

        let before = self.store.stats(&self.name).await?.total();
        let id = self.store.put(&self.name, payload).await?;
        let window = self
            .options
            .timeout
            .unwrap_or(self.options.heartbeat_interval);
        let started = Instant::now();
        loop {
            let grown = self.store.stats(&self.name).await?.total() > before;
            if grown || self.store.get_item(&self.name, &id).await?.is_some() {
                return Ok(id);
            }
            if started.elapsed() >= window {
                return Err(QueueError::PutNotObserved {
                    queue: self.name.clone(),
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    /// Claim the next item
    ///
    /// Without `wait` this is a single claim attempt. With `wait` the claim
    /// is retried every poll interval until an item arrives or the queue
    /// timeout elapses, in which case `Ok(None)` is returned.
    pub async fn get(
        &self,
        wait: bool,
        owner: &str,
        ack_timeout: Duration,
    ) -> QueueResult<Option<WorkItem>> {
        if !wait {
            self.maybe_recover().await?;
            return Ok(self.store.claim(&self.name, owner, ack_timeout).await?);
        }
        self.claim_loop(owner, ack_timeout, None).await
    }

    /// Blocking claim that also returns `Ok(None)` once `shutdown` fires
    pub async fn get_until(
        &self,
        owner: &str,
        ack_timeout: Duration,
        shutdown: &ShutdownCoordinator,
    ) -> QueueResult<Option<WorkItem>> {
        self.claim_loop(owner, ack_timeout, Some(shutdown)).await
    }

    async fn claim_loop(
        &self,
        owner: &str,
        ack_timeout: Duration,
        shutdown: Option<&ShutdownCoordinator>,
    ) -> QueueResult<Option<WorkItem>> {
        let mut shutdown_rx = shutdown.map(|s| s.subscribe());
        let deadline = self.options.timeout.map(|t| Instant::now() + t);

        loop {
            if shutdown.is_some_and(|s| s.is_shutdown_requested()) {
                return Ok(None);
            }
            self.maybe_recover().await?;
            if let Some(item) = self.store.claim(&self.name, owner, ack_timeout).await? {
                return Ok(Some(item));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(None);
            }

            match shutdown_rx.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.options.poll_interval) => {}
                        _ = rx.recv() => return Ok(None),
                    }
                }
                None => tokio::time::sleep(self.options.poll_interval).await,
            }
        }
    }

    /// Run `recover` if the heartbeat interval has passed since the last run
    async fn maybe_recover(&self) -> QueueResult<()> {
        let due = {
            let mut last = handle_mutex_poison(self.last_recover.lock(), |message| {
                StoreError::Poisoned { message }
            })?;
            let due = last.is_none_or(|at| at.elapsed() >= self.options.heartbeat_interval);
            if due {
                *last = Some(Instant::now());
            }
            due
        };
        if due {
            self.recover().await?;
        }
        Ok(())
    }

    /// Renew the claim on an active item
    pub async fn acknowledge(&self, id: &str) -> QueueResult<WorkItem> {
        Ok(self.store.acknowledge(&self.name, id).await?)
    }

    /// Remove a handled item
    pub async fn complete(&self, id: &str) -> QueueResult<()> {
        Ok(self.store.complete(&self.name, id).await?)
    }

    /// Return expired claims to the idle index
    pub async fn recover(&self) -> QueueResult<Vec<String>> {
        let recovered = self.store.recover(&self.name).await?;
        if !recovered.is_empty() {
            log::info!(
                "Recovered {} expired item(s) in {}",
                recovered.len(),
                self.name
            );
        }
        Ok(recovered)
    }

    pub async fn stats(&self) -> QueueResult<QueueStats> {
        Ok(self.store.stats(&self.name).await?)
    }

    /// Idle plus active item count
    pub async fn size(&self) -> QueueResult<usize> {
        Ok(self.stats().await?.total())
    }

    /// Idle item count
    pub async fn pending(&self) -> QueueResult<usize> {
        Ok(self.stats().await?.idle)
    }

    pub async fn adopt_producer(&self, identity: &str) -> QueueResult<StepRoster> {
        self.roster_mut(|roster| {
            roster.producers.insert(identity.to_string());
        })?;
        self.report().await
    }

    pub async fn adopt_consumer(&self, identity: &str) -> QueueResult<StepRoster> {
        self.roster_mut(|roster| {
            roster.consumers.insert(identity.to_string());
        })?;
        self.report().await
    }

    pub fn producers(&self) -> QueueResult<Vec<String>> {
        Ok(self.roster()?.producers.into_iter().collect())
    }

    pub fn consumers(&self) -> QueueResult<Vec<String>> {
        Ok(self.roster()?.consumers.into_iter().collect())
    }

    /// Report the full local roster to the store
    pub async fn report(&self) -> QueueResult<StepRoster> {
        let roster = self.roster()?;
        let consumers: Vec<String> = roster.consumers.into_iter().collect();
        let producers: Vec<String> = roster.producers.into_iter().collect();
        Ok(self
            .store
            .report_steps(&self.name, &consumers, &producers)
            .await?)
    }

    fn roster(&self) -> QueueResult<StepRoster> {
        let roster = handle_mutex_poison(self.roster.lock(), |message| StoreError::Poisoned {
            message,
        })?;
        Ok(roster.clone())
    }

    fn roster_mut(&self, update: impl FnOnce(&mut StepRoster)) -> QueueResult<()> {
        let mut roster = handle_mutex_poison(self.roster.lock(), |message| {
            StoreError::Poisoned { message }
        })?;
        update(&mut roster);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::item::IdScheme;
    use crate::queue::memory::MemoryStore;
    use serde_json::json;

    fn queue(options: QueueOptions) -> Queue {
        Queue::new(
            queue_name("test", 0),
            Arc::new(MemoryStore::new(IdScheme::Unique)),
            options,
        )
    }

    fn bounded(timeout: Duration) -> QueueOptions {
        QueueOptions {
            timeout: Some(timeout),
            poll_interval: Duration::from_millis(5),
            ..QueueOptions::default()
        }
    }

    #[test]
    fn test_queue_name_format() {
        assert_eq!(queue_name("nightly", 2), "workline:nightly:queue:2");
    }

    #[tokio::test]
    async fn test_non_blocking_get_on_empty_queue() {
        let queue = queue(QueueOptions::default());
        let item = queue
            .get(false, "worker", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(item.is_none());
    }

    #[tokio::test]
    async fn test_blocking_get_times_out() {
        let queue = queue(bounded(Duration::from_millis(40)));
        let started = Instant::now();
        let item = queue
            .get(true, "worker", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(item.is_none());
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_blocking_get_receives_late_put() {
        let queue = Arc::new(queue(bounded(Duration::from_secs(5))));
        let producer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            producer.put(json!({"late": true})).await.unwrap();
        });

        let item = queue
            .get(true, "worker", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.payload, json!({"late": true}));
        assert_eq!(queue.stats().await.unwrap(), QueueStats { idle: 0, active: 1 });
    }

    #[tokio::test]
    async fn test_get_until_returns_on_shutdown() {
        let queue = Arc::new(queue(QueueOptions::default()));
        let (shutdown, _rx) = ShutdownCoordinator::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.trigger_shutdown();
        });

        let item = tokio::time::timeout(
            Duration::from_secs(5),
            queue.get_until("worker", Duration::from_secs(1), &shutdown),
        )
        .await
        .expect("get_until should observe shutdown")
        .unwrap();
        assert!(item.is_none());
    }

    #[tokio::test]
    async fn test_waiting_consumer_recovers_expired_items() {
        let options = QueueOptions {
            heartbeat_interval: Duration::ZERO,
            ..bounded(Duration::from_secs(5))
        };
        let queue = queue(options);
        let id = queue.put(json!({"job": 1})).await.unwrap();

        let abandoned = queue
            .get(false, "crashed", Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(abandoned.id, id);

        let rescued = queue
            .get(true, "rescuer", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rescued.id, id);
        assert_eq!(rescued.owner.as_deref(), Some("rescuer"));
    }

    #[tokio::test]
    async fn test_verified_put_and_counts() {
        let queue = queue(QueueOptions {
            verify_put: true,
            ..bounded(Duration::from_millis(200))
        });
        queue.put(json!(1)).await.unwrap();
        let id = queue.put(json!(2)).await.unwrap();
        assert_eq!(queue.size().await.unwrap(), 2);
        assert_eq!(queue.pending().await.unwrap(), 2);

        let item = queue
            .get(false, "w", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(item.id, id);
        queue.acknowledge(&item.id).await.unwrap();
        queue.complete(&item.id).await.unwrap();
        assert_eq!(queue.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_roster_is_reported() {
        let queue = queue(QueueOptions::default());
        queue.adopt_consumer("step-b").await.unwrap();
        let roster = queue.adopt_producer("step-a").await.unwrap();

        assert_eq!(queue.producers().unwrap(), vec!["step-a"]);
        assert_eq!(queue.consumers().unwrap(), vec!["step-b"]);
        assert!(roster.producers.contains("step-a"));
        assert!(roster.consumers.contains("step-b"));
    }
}
