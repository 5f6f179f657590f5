//! # Outbox Relay
//!
//! Moves committed change-log rows onto the [`ChangeBus`].
//!
//! ## Relay Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         OutboxRelay                                     │
//! │                                                                         │
//! │  cursor = last published seq (resumes after restart)                   │
//! │                                                                         │
//! │  every poll_interval:                                                  │
//! │    1. rows = change_log WHERE seq > cursor ORDER BY seq LIMIT batch    │
//! │    2. for row in rows:                                                 │
//! │         decode → bus.publish(event)     (corrupt: log, skip)           │
//! │         cursor = row.seq                                               │
//! │    3. mark_published(cursor)                                           │
//! │    4. repeat until a batch comes back empty                            │
//! │    5. bus.flush() → pending Resync notices                             │
//! │                                                                         │
//! │  every PURGE_EVERY_TICKS ticks:                                        │
//! │    purge published rows older than retain_published                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One relay per database. Rows are published strictly in seq order, which
//! is commit order, so every subscriber sees each row's changes in the
//! order they happened.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tavola_db::Database;

use crate::bus::ChangeBus;
use crate::error::{SyncError, SyncResult};

/// Purge runs once per this many poll ticks.
const PURGE_EVERY_TICKS: u64 = 240;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    /// Rows read per query.
    pub batch_size: i64,
    /// How long published rows are kept before purging.
    pub retain_published: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            poll_interval: Duration::from_millis(250),
            batch_size: 200,
            retain_published: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> SyncResult<()> {
        if self.batch_size <= 0 {
            return Err(SyncError::InvalidConfig(format!(
                "batch_size must be positive, got {}",
                self.batch_size
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Relay
// =============================================================================

pub struct OutboxRelay {
    db: Database,
    bus: ChangeBus,
    config: RelayConfig,
    /// Highest seq handed to the bus. Held across a whole pump so two
    /// callers can never publish the same rows.
    cursor: Mutex<i64>,
}

/// Handle for stopping a spawned relay.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl RelayHandle {
    /// Asks the relay loop to stop after its current tick.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Relay shutdown channel closed".into()))
    }
}

impl OutboxRelay {
    /// Creates a relay resuming after the last published row.
    pub async fn new(db: Database, bus: ChangeBus, config: RelayConfig) -> SyncResult<Self> {
        config.validate()?;
        let cursor = db.change_log().last_published_seq().await?;
        info!(cursor, "Outbox relay initialised");

        Ok(OutboxRelay {
            db,
            bus,
            config,
            cursor: Mutex::new(cursor),
        })
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// Current cursor position.
    pub async fn cursor(&self) -> i64 {
        *self.cursor.lock().await
    }

    /// Publishes one batch. Returns the number of rows consumed.
    pub async fn pump(&self) -> SyncResult<usize> {
        let mut cursor = self.cursor.lock().await;
        let rows = self
            .db
            .change_log()
            .fetch_after(*cursor, self.config.batch_size)
            .await?;

        if rows.is_empty() {
            return Ok(0);
        }

        for row in &rows {
            match row.decode() {
                Ok(event) => {
                    let delivered = self.bus.publish(event);
                    debug!(seq = row.seq, table = %row.table_name, delivered, "Change published");
                }
                Err(e) => {
                    error!(seq = row.seq, table = %row.table_name, error = %e, "Skipping undecodable change");
                }
            }
            *cursor = row.seq;
        }

        self.db.change_log().mark_published(*cursor).await?;
        Ok(rows.len())
    }

    /// Pumps until the log is caught up. Returns rows consumed.
    pub async fn drain(&self) -> SyncResult<usize> {
        let mut total = 0;
        loop {
            let n = self.pump().await?;
            total += n;
            if n == 0 {
                break;
            }
        }
        self.bus.flush();
        Ok(total)
    }

    /// Deletes published rows older than the retention window.
    pub async fn purge(&self) -> SyncResult<u64> {
        let retain = chrono::Duration::from_std(self.config.retain_published)
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        let purged = self.db.change_log().purge_published(Utc::now() - retain).await?;
        Ok(purged)
    }

    /// Spawns the poll loop on the current runtime.
    pub fn spawn(self: Arc<Self>) -> (JoinHandle<()>, RelayHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(self.run(shutdown_rx));
        (task, RelayHandle { shutdown_tx })
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            poll_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Outbox relay starting"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    ticks += 1;
                    if let Err(e) = self.drain().await {
                        if e.is_retryable() {
                            warn!(error = %e, "Relay tick failed, retrying next tick");
                        } else {
                            error!(error = %e, "Relay tick failed");
                        }
                    }
                    if ticks % PURGE_EVERY_TICKS == 0 {
                        if let Err(e) = self.purge().await {
                            error!(error = %e, "Change log purge failed");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Outbox relay shutting down");
                    break;
                }
            }
        }

        // publish whatever committed before shutdown
        if let Err(e) = self.drain().await {
            error!(error = %e, "Final relay drain failed");
        }
        info!("Outbox relay stopped");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Delivery;
    use tavola_core::{ChangeFilter, ChangeTable};
    use tavola_db::DbConfig;

    async fn setup() -> (Database, ChangeBus) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.settings().create_shop("shop-1", "Test Kitchen").await.unwrap();
        (db, ChangeBus::new(64))
    }

    #[tokio::test]
    async fn test_drain_publishes_in_seq_order() {
        let (db, bus) = setup().await;
        let mut sub = bus.subscribe(ChangeFilter::shop(ChangeTable::Tables, "shop-1"));
        let relay = OutboxRelay::new(db.clone(), bus.clone(), RelayConfig::default())
            .await
            .unwrap();

        db.tables().create("shop-1", "T1").await.unwrap();
        db.tables().create("shop-1", "T2").await.unwrap();
        relay.drain().await.unwrap();

        let labels: Vec<String> = sub
            .drain()
            .into_iter()
            .filter_map(|d| match d {
                Delivery::Change(e) => e.new_row.as_ref().and_then(|r| r.as_table()).map(|t| t.label.clone()),
                Delivery::Resync { .. } => None,
            })
            .collect();
        assert_eq!(labels, vec!["T1", "T2"]);
        assert_eq!(db.change_log().pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_restart_resumes_after_published() {
        let (db, bus) = setup().await;
        db.tables().create("shop-1", "T1").await.unwrap();

        let first = OutboxRelay::new(db.clone(), bus.clone(), RelayConfig::default())
            .await
            .unwrap();
        first.drain().await.unwrap();
        let published = first.cursor().await;

        db.tables().create("shop-1", "T2").await.unwrap();
        let mut sub = bus.subscribe(ChangeFilter::shop(ChangeTable::Tables, "shop-1"));

        let second = OutboxRelay::new(db.clone(), bus.clone(), RelayConfig::default())
            .await
            .unwrap();
        assert_eq!(second.cursor().await, published);
        second.drain().await.unwrap();

        // only T2, committed while no relay ran
        assert_eq!(sub.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_skipped() {
        let (db, bus) = setup().await;
        insert_corrupt_row(&db).await;
        db.tables().create("shop-1", "T1").await.unwrap();

        let mut sub = bus.subscribe(ChangeFilter::shop(ChangeTable::Tables, "shop-1"));
        let relay = OutboxRelay::new(db.clone(), bus.clone(), RelayConfig::default())
            .await
            .unwrap();
        relay.drain().await.unwrap();

        assert_eq!(sub.drain().len(), 1);
        assert_eq!(relay.cursor().await, db.change_log().head_seq().await.unwrap());
    }

    #[tokio::test]
    async fn test_small_batches_still_catch_up() {
        let (db, bus) = setup().await;
        for n in 1..=5 {
            db.tables().create("shop-1", &format!("T{}", n)).await.unwrap();
        }
        let config = RelayConfig {
            batch_size: 2,
            ..RelayConfig::default()
        };
        let relay = OutboxRelay::new(db.clone(), bus, config).await.unwrap();
        relay.drain().await.unwrap();
        assert_eq!(db.change_log().pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_spawned_relay_delivers_and_stops() {
        let (db, bus) = setup().await;
        let mut sub = bus.subscribe(ChangeFilter::shop(ChangeTable::Tables, "shop-1"));
        let config = RelayConfig {
            poll_interval: Duration::from_millis(10),
            ..RelayConfig::default()
        };
        let relay = Arc::new(OutboxRelay::new(db.clone(), bus, config).await.unwrap());
        let (task, handle) = relay.spawn();

        db.tables().create("shop-1", "T1").await.unwrap();
        let delivery = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap();
        assert!(matches!(delivery, Some(Delivery::Change(_))));

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[test]
    fn test_config_validation() {
        let bad = RelayConfig {
            batch_size: 0,
            ..RelayConfig::default()
        };
        assert!(matches!(bad.validate(), Err(SyncError::InvalidConfig(_))));
        assert!(RelayConfig::default().validate().is_ok());
    }

    async fn insert_corrupt_row(db: &Database) {
        // image kind disagrees with table_name
        sqlx::query(
            "INSERT INTO change_log (shop_id, table_name, row_id, operation, new_row, committed_at)
             VALUES ('shop-1', 'tables', 'x', 'update', '{\"kind\":\"order\",\"row\":{}}', ?1)",
        )
        .bind(Utc::now())
        .execute(db.pool())
        .await
        .unwrap();
    }
}
