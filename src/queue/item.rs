//! Work item data model
//!
//! A `WorkItem` is the unit moving through a queue. Once admitted it lives in
//! exactly one of the queue's two indexes, idle or active, until its claimant
//! completes it.

use crate::queue::error::StoreResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::time::Duration;

/// Index an item currently belongs to
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ItemStatus {
    Idle,
    Active,
}

/// How a store derives the id of a newly put item
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IdScheme {
    /// Content digest prefix plus the store sequence: every put is a new item
    #[default]
    Unique,
    /// Full content digest: putting an identical payload again is an upsert
    Content,
}

impl IdScheme {
    /// Id for `payload` admitted with insertion `sequence`
    pub fn item_id(&self, payload: &Value, sequence: u64) -> StoreResult<String> {
        let digest = content_digest(payload)?;
        Ok(match self {
            IdScheme::Unique => format!("{}-{}", &digest[..16], sequence),
            IdScheme::Content => digest,
        })
    }
}

/// SHA-256 hex digest of the serialized payload
///
/// Object keys serialize in sorted order, so structurally equal payloads
/// share a digest regardless of how they were built.
pub fn content_digest(payload: &Value) -> StoreResult<String> {
    let bytes = serde_json::to_vec(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// A queued unit of work with its claim bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub id: String,
    pub queue: String,
    pub payload: Value,
    pub status: ItemStatus,
    /// Claimant identity; stale while idle
    pub owner: Option<String>,
    /// Visibility timeout granted to the current claimant; stale while idle
    pub ack_timeout: Duration,
    /// Milliseconds since the epoch of the last claim or heartbeat
    pub last_ack: i64,
    /// Insertion order within the queue
    pub sequence: u64,
    /// Number of times the item has been claimed
    pub deliveries: u32,
}

impl WorkItem {
    /// A freshly admitted idle item
    pub fn new_idle(queue: &str, id: String, payload: Value, sequence: u64) -> Self {
        Self {
            id,
            queue: queue.to_string(),
            payload,
            status: ItemStatus::Idle,
            owner: None,
            ack_timeout: Duration::ZERO,
            last_ack: 0,
            sequence,
            deliveries: 0,
        }
    }

    /// True if the item is active and its claim has not been renewed in time
    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.status == ItemStatus::Active
            && now_millis.saturating_sub(self.last_ack) > self.ack_timeout.as_millis() as i64
    }

    /// Transition idle -> active for `owner`
    pub(crate) fn mark_claimed(&mut self, owner: &str, ack_timeout: Duration, now_millis: i64) {
        self.status = ItemStatus::Active;
        self.owner = Some(owner.to_string());
        self.ack_timeout = ack_timeout;
        self.last_ack = now_millis;
        self.deliveries = self.deliveries.saturating_add(1);
    }

    /// Renew the claim; `last_ack` never moves backwards
    pub(crate) fn mark_acknowledged(&mut self, now_millis: i64) {
        self.last_ack = self.last_ack.max(now_millis);
    }

    /// Transition active -> idle after the claim expired
    pub(crate) fn mark_recovered(&mut self) {
        self.status = ItemStatus::Idle;
    }

    /// Flat persisted/transmitted shape of the item
    pub fn to_wire(&self) -> StoreResult<WireRecord> {
        Ok(WireRecord {
            id: self.id.clone(),
            data: serde_json::to_string(&self.payload)?,
            status: self.status,
            owner: self.owner.clone(),
            ack_timeout: self.ack_timeout.as_millis() as u64,
            last_ack: self.last_ack,
            sequence: self.sequence,
            deliveries: self.deliveries,
        })
    }

    /// Rebuild an item of `queue` from its wire record
    pub fn from_wire(queue: &str, record: WireRecord) -> StoreResult<Self> {
        Ok(Self {
            payload: serde_json::from_str(&record.data)?,
            id: record.id,
            queue: queue.to_string(),
            status: record.status,
            owner: record.owner,
            ack_timeout: Duration::from_millis(record.ack_timeout),
            last_ack: record.last_ack,
            sequence: record.sequence,
            deliveries: record.deliveries,
        })
    }
}

/// Wire shape of a work item; `data` is the JSON-serialized payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRecord {
    pub id: String,
    pub data: String,
    pub status: ItemStatus,
    pub owner: Option<String>,
    /// Milliseconds
    pub ack_timeout: u64,
    /// Milliseconds since the epoch
    pub last_ack: i64,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub deliveries: u32,
}

/// Index sizes of one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub idle: usize,
    pub active: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.idle + self.active
    }
}

/// Step identities registered against a queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepRoster {
    pub consumers: BTreeSet<String>,
    pub producers: BTreeSet<String>,
}
