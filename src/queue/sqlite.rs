//! SQLite-backed QueueStore
//!
//! Items of every queue share one `work_items` table keyed by `(queue, id)`.
//! Claim, put and recover run inside `BEGIN IMMEDIATE` transactions so the
//! head selection and the index move commit together even when several
//! processes share the database file.

use crate::core::sync::handle_mutex_poison;
use crate::core::time::{SystemTimeProvider, TimeProvider};
use crate::core::version::record_schema_version;
use crate::queue::error::{StoreError, StoreResult};
use crate::queue::item::{IdScheme, ItemStatus, QueueStats, StepRoster, WireRecord, WorkItem};
use crate::queue::store::QueueStore;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS work_items (
        queue TEXT NOT NULL,
        id TEXT NOT NULL,
        data TEXT NOT NULL,
        status TEXT NOT NULL,
        owner TEXT,
        ack_timeout INTEGER NOT NULL DEFAULT 0,
        last_ack INTEGER NOT NULL DEFAULT 0,
        sequence INTEGER NOT NULL,
        deliveries INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (queue, id)
    );

    CREATE INDEX IF NOT EXISTS idx_work_items_head
        ON work_items(queue, status, sequence);

    CREATE TABLE IF NOT EXISTS queue_roster (
        queue TEXT NOT NULL,
        role TEXT NOT NULL,
        step TEXT NOT NULL,
        PRIMARY KEY (queue, role, step)
    );

    CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );
"#;

const ITEM_COLUMNS: &str = "id, data, status, owner, ack_timeout, last_ack, sequence, deliveries";

/// QueueStore persisted in a SQLite database file
#[derive(Debug)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    id_scheme: IdScheme,
    clock: Arc<dyn TimeProvider>,
}

impl SqliteStore {
    pub fn open(path: &Path, id_scheme: IdScheme) -> StoreResult<Self> {
        Self::open_with_clock(path, id_scheme, Arc::new(SystemTimeProvider))
    }

    pub fn open_with_clock(
        path: &Path,
        id_scheme: IdScheme,
        clock: Arc<dyn TimeProvider>,
    ) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 30000;
        "#,
        )?;
        conn.execute_batch(SCHEMA)?;
        Self::check_schema_version(&conn)?;

        log::debug!("Opened sqlite queue store at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
            id_scheme,
            clock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_schema_version(conn: &Connection) -> StoreResult<()> {
        let expected = record_schema_version();
        let found: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if found == 0 {
            conn.pragma_update(None, "user_version", expected)?;
        } else if found != expected {
            return Err(StoreError::SchemaMismatch { found, expected });
        }
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_connection<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard =
                handle_mutex_poison(conn.lock(), |message| StoreError::Poisoned { message })?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Io {
            message: format!("store task failed: {}", e),
        })?
    }
}

fn read_record(row: &Row) -> rusqlite::Result<(WireRecord, String)> {
    let status: String = row.get(2)?;
    Ok((
        WireRecord {
            id: row.get(0)?,
            data: row.get(1)?,
            status: ItemStatus::Idle,
            owner: row.get(3)?,
            ack_timeout: row.get::<_, i64>(4)? as u64,
            last_ack: row.get(5)?,
            sequence: row.get::<_, i64>(6)? as u64,
            deliveries: row.get(7)?,
        },
        status,
    ))
}

fn into_item(queue: &str, (mut record, status): (WireRecord, String)) -> StoreResult<WorkItem> {
    record.status = ItemStatus::from_str(&status).map_err(|e| StoreError::Io {
        message: format!("invalid status '{}' for item {}: {}", status, record.id, e),
    })?;
    WorkItem::from_wire(queue, record)
}

fn load_item(conn: &Connection, queue: &str, id: &str) -> StoreResult<Option<WorkItem>> {
    let sql = format!(
        "SELECT {} FROM work_items WHERE queue = ?1 AND id = ?2",
        ITEM_COLUMNS
    );
    conn.query_row(&sql, params![queue, id], read_record)
        .optional()?
        .map(|raw| into_item(queue, raw))
        .transpose()
}

fn load_active_item(conn: &Connection, queue: &str, id: &str) -> StoreResult<WorkItem> {
    let item = load_item(conn, queue, id)?.ok_or_else(|| StoreError::ItemNotFound {
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

fn save_claim(conn: &Connection, item: &WorkItem) -> StoreResult<()> {
    conn.execute(
        "UPDATE work_items
            SET status = ?3, owner = ?4, ack_timeout = ?5, last_ack = ?6, deliveries = ?7
          WHERE queue = ?1 AND id = ?2",
        params![
            item.queue,
            item.id,
            item.status.as_ref(),
            item.owner,
            item.ack_timeout.as_millis() as i64,
            item.last_ack,
            item.deliveries,
        ],
    )?;
    Ok(())
}

#[async_trait::async_trait]
impl QueueStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn put(&self, queue: &str, payload: Value) -> StoreResult<String> {
        let queue = queue.to_string();
        let scheme = self.id_scheme;
        self.with_connection(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let sequence: i64 = tx.query_row(
                "INSERT INTO store_meta (key, value) VALUES ('sequence', 1)
                 ON CONFLICT(key) DO UPDATE SET value = value + 1
                 RETURNING value",
                [],
                |row| row.get(0),
            )?;
            let id = scheme.item_id(&payload, sequence as u64)?;
            let data = serde_json::to_string(&payload)?;
            let inserted = tx.execute(
                "INSERT INTO work_items (queue, id, data, status, sequence)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(queue, id) DO NOTHING",
                params![queue, id, data, ItemStatus::Idle.as_ref(), sequence],
            )?;
            tx.commit()?;
            if inserted == 0 {
                log::trace!("Item {} already present in {}, put is an upsert", id, queue);
            }
            Ok(id)
        })
        .await
    }

    async fn claim(
        &self,
        queue: &str,
        owner: &str,
        ack_timeout: Duration,
    ) -> StoreResult<Option<WorkItem>> {
        let queue = queue.to_string();
        let owner = owner.to_string();
        let now = self.clock.epoch_millis();
        self.with_connection(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let sql = format!(
                "SELECT {} FROM work_items WHERE queue = ?1 AND status = ?2
                 ORDER BY sequence LIMIT 1",
                ITEM_COLUMNS
            );
            let head = tx
                .query_row(
                    &sql,
                    params![queue, ItemStatus::Idle.as_ref()],
                    read_record,
                )
                .optional()?;
            let Some(raw) = head else {
                return Ok(None);
            };
            let mut item = into_item(&queue, raw)?;
            item.mark_claimed(&owner, ack_timeout, now);
            save_claim(&tx, &item)?;
            tx.commit()?;
            Ok(Some(item))
        })
        .await
    }

    async fn acknowledge(&self, queue: &str, id: &str) -> StoreResult<WorkItem> {
        let queue = queue.to_string();
        let id = id.to_string();
        let now = self.clock.epoch_millis();
        self.with_connection(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut item = load_active_item(&tx, &queue, &id)?;
            item.mark_acknowledged(now);
            tx.execute(
                "UPDATE work_items SET last_ack = ?3 WHERE queue = ?1 AND id = ?2",
                params![queue, id, item.last_ack],
            )?;
            tx.commit()?;
            Ok(item)
        })
        .await
    }

    async fn complete(&self, queue: &str, id: &str) -> StoreResult<()> {
        let queue = queue.to_string();
        let id = id.to_string();
        self.with_connection(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            load_active_item(&tx, &queue, &id)?;
            tx.execute(
                "DELETE FROM work_items WHERE queue = ?1 AND id = ?2",
                params![queue, id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn recover(&self, queue: &str) -> StoreResult<Vec<String>> {
        let queue = queue.to_string();
        let now = self.clock.epoch_millis();
        self.with_connection(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let sql = format!(
                "SELECT {} FROM work_items WHERE queue = ?1 AND status = ?2 ORDER BY sequence",
                ITEM_COLUMNS
            );
            let active = {
                let mut stmt = tx.prepare(&sql)?;
                let rows = stmt.query_map(
                    params![queue, ItemStatus::Active.as_ref()],
                    read_record,
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let mut recovered = Vec::new();
            for raw in active {
                let item = into_item(&queue, raw)?;
                if item.is_expired(now) {
                    tx.execute(
                        "UPDATE work_items SET status = ?3 WHERE queue = ?1 AND id = ?2",
                        params![queue, item.id, ItemStatus::Idle.as_ref()],
                    )?;
                    recovered.push(item.id);
                }
            }
            tx.commit()?;
            Ok(recovered)
        })
        .await
    }

    async fn stats(&self, queue: &str) -> StoreResult<QueueStats> {
        let queue = queue.to_string();
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM work_items WHERE queue = ?1 GROUP BY status",
            )?;
            let rows = stmt.query_map(params![queue], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut stats = QueueStats::default();
            for row in rows {
                let (status, count) = row?;
                match ItemStatus::from_str(&status) {
                    Ok(ItemStatus::Idle) => stats.idle = count as usize,
                    Ok(ItemStatus::Active) => stats.active = count as usize,
                    Err(e) => {
                        return Err(StoreError::Io {
                            message: format!("invalid status '{}' in {}: {}", status, queue, e),
                        })
                    }
                }
            }
            Ok(stats)
        })
        .await
    }

    async fn get_item(&self, queue: &str, id: &str) -> StoreResult<Option<WorkItem>> {
        let queue = queue.to_string();
        let id = id.to_string();
        self.with_connection(move |conn| load_item(conn, &queue, &id))
            .await
    }

    async fn report_steps(
        &self,
        queue: &str,
        consumers: &[String],
        producers: &[String],
    ) -> StoreResult<StepRoster> {
        let queue = queue.to_string();
        let consumers = consumers.to_vec();
        let producers = producers.to_vec();
        self.with_connection(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            for (role, steps) in [("consumer", &consumers), ("producer", &producers)] {
                for step in steps {
                    tx.execute(
                        "INSERT OR IGNORE INTO queue_roster (queue, role, step) VALUES (?1, ?2, ?3)",
                        params![queue, role, step],
                    )?;
                }
            }

            let mut roster = StepRoster::default();
            {
                let mut stmt =
                    tx.prepare("SELECT role, step FROM queue_roster WHERE queue = ?1")?;
                let rows = stmt.query_map(params![queue], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                for row in rows {
                    let (role, step) = row?;
                    if role == "consumer" {
                        roster.consumers.insert(step);
                    } else {
                        roster.producers.insert(step);
                    }
                }
            }
            tx.commit()?;
            Ok(roster)
        })
        .await
    }
}
