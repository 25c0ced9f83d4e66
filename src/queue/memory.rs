//! In-process QueueStore
//!
//! All queues of a store live behind one mutex, and each operation runs as a
//! single critical section. That makes claim, acknowledge and recover atomic
//! relative to each other without any finer-grained locking.

use crate::core::sync::handle_mutex_poison;
use crate::core::time::{SystemTimeProvider, TimeProvider};
use crate::queue::error::{StoreError, StoreResult};
use crate::queue::item::{IdScheme, ItemStatus, QueueStats, StepRoster, WorkItem};
use crate::queue::store::QueueStore;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct QueueState {
    items: HashMap<String, WorkItem>,
    /// Idle index ordered by insertion sequence; the first entry is the head
    idle: BTreeMap<u64, String>,
    active: HashSet<String>,
    roster: StepRoster,
}

impl QueueState {
    fn stats(&self) -> QueueStats {
        QueueStats {
            idle: self.idle.len(),
            active: self.active.len(),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    queues: HashMap<String, QueueState>,
    next_sequence: u64,
}

/// QueueStore kept entirely in memory
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    id_scheme: IdScheme,
    clock: Arc<dyn TimeProvider>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(IdScheme::default())
    }
}

impl MemoryStore {
    pub fn new(id_scheme: IdScheme) -> Self {
        Self::with_clock(id_scheme, Arc::new(SystemTimeProvider))
    }

    pub fn with_clock(id_scheme: IdScheme, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            id_scheme,
            clock,
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, StoreState>> {
        handle_mutex_poison(self.state.lock(), |message| StoreError::Poisoned { message })
    }

    fn active_item<'a>(
        state: &'a mut StoreState,
        queue: &str,
        id: &str,
    ) -> StoreResult<&'a mut WorkItem> {
        let item = state
            .queues
            .get_mut(queue)
            .and_then(|q| q.items.get_mut(id))
            .ok_or_else(|| StoreError::ItemNotFound {
                queue: queue.to_string(),
                id: id.to_string(),
            })?;
        if item.status != ItemStatus::Active {
            return Err(StoreError::NotActive {
                queue: queue.to_string(),
                id: id.to_string(),
            });
        }
        Ok(item)
    }
}

#[async_trait::async_trait]
impl QueueStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, queue: &str, payload: Value) -> StoreResult<String> {
        let mut state = self.lock()?;
        state.next_sequence += 1;
        let sequence = state.next_sequence;
        let id = self.id_scheme.item_id(&payload, sequence)?;

        let entry = state.queues.entry(queue.to_string()).or_default();
        if entry.items.contains_key(&id) {
            log::trace!("Item {} already present in {}, put is an upsert", id, queue);
            return Ok(id);
        }
        entry.idle.insert(sequence, id.clone());
        entry
            .items
            .insert(id.clone(), WorkItem::new_idle(queue, id.clone(), payload, sequence));
        Ok(id)
    }

    async fn claim(
        &self,
        queue: &str,
        owner: &str,
        ack_timeout: Duration,
    ) -> StoreResult<Option<WorkItem>> {
        let now = self.clock.epoch_millis();
        let mut state = self.lock()?;
        let Some(entry) = state.queues.get_mut(queue) else {
            return Ok(None);
        };
        let Some((_, id)) = entry.idle.pop_first() else {
            return Ok(None);
        };
        let Some(item) = entry.items.get_mut(&id) else {
            return Err(StoreError::ItemNotFound {
                queue: queue.to_string(),
                id,
            });
        };
        item.mark_claimed(owner, ack_timeout, now);
        let claimed = item.clone();
        entry.active.insert(id);
        Ok(Some(claimed))
    }

    async fn acknowledge(&self, queue: &str, id: &str) -> StoreResult<WorkItem> {
        let now = self.clock.epoch_millis();
        let mut state = self.lock()?;
        let item = Self::active_item(&mut state, queue, id)?;
        item.mark_acknowledged(now);
        Ok(item.clone())
    }

    async fn complete(&self, queue: &str, id: &str) -> StoreResult<()> {
        let mut state = self.lock()?;
        Self::active_item(&mut state, queue, id)?;
        if let Some(entry) = state.queues.get_mut(queue) {
            entry.active.remove(id);
            entry.items.remove(id);
        }
        Ok(())
    }

    async fn recover(&self, queue: &str) -> StoreResult<Vec<String>> {
        let now = self.clock.epoch_millis();
        let mut state = self.lock()?;
        let Some(entry) = state.queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let mut expired: Vec<(u64, String)> = entry
            .active
            .iter()
            .filter_map(|id| entry.items.get(id))
            .filter(|item| item.is_expired(now))
            .map(|item| (item.sequence, item.id.clone()))
            .collect();
        expired.sort();

        for (sequence, id) in &expired {
            if let Some(item) = entry.items.get_mut(id) {
                item.mark_recovered();
            }
            entry.active.remove(id);
            entry.idle.insert(*sequence, id.clone());
        }
        Ok(expired.into_iter().map(|(_, id)| id).collect())
    }

    async fn stats(&self, queue: &str) -> StoreResult<QueueStats> {
        let state = self.lock()?;
        Ok(state
            .queues
            .get(queue)
            .map(QueueState::stats)
            .unwrap_or_default())
    }

    async fn get_item(&self, queue: &str, id: &str) -> StoreResult<Option<WorkItem>> {
        let state = self.lock()?;
        Ok(state
            .queues
            .get(queue)
            .and_then(|q| q.items.get(id))
            .cloned())
    }

    async fn report_steps(
        &self,
        queue: &str,
        consumers: &[String],
        producers: &[String],
    ) -> StoreResult<StepRoster> {
        let mut state = self.lock()?;
        let entry = state.queues.entry(queue.to_string()).or_default();
        entry.roster.consumers.extend(consumers.iter().cloned());
        entry.roster.producers.extend(producers.iter().cloned());
        Ok(entry.roster.clone())
    }
}
