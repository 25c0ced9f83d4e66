//! Queue and store error types

/// Failure of the backing store itself
///
/// Callers must be able to tell "queue empty" (`Ok(None)`) from "store
/// unavailable"; every store operation surfaces the latter as a `StoreError`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O failed: {message}")]
    Io { message: String },

    #[error("Store state unavailable: {message}")]
    Poisoned { message: String },

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Item {id} not found in queue {queue}")]
    ItemNotFound { queue: String, id: String },

    #[error("Item {id} in queue {queue} is not active")]
    NotActive { queue: String, id: String },

    #[error("Store schema version {found} does not match expected version {expected}")]
    SchemaMismatch { found: u32, expected: u32 },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Io {
            message: err.to_string(),
        }
    }
}

/// Errors raised by the `Queue` front-end
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Put to queue {queue} was not observed by the store within {waited:?}")]
    PutNotObserved {
        queue: String,
        waited: std::time::Duration,
    },

    #[error("Queue {queue} no longer exists")]
    Detached { queue: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

pub type QueueResult<T> = Result<T, QueueError>;
