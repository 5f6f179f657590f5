//! # Engine Commands
//!
//! Each command runs as a single transaction: read, check with
//! `tavola-core`, write, append change-log rows, commit. A failed command
//! drops its transaction, so nothing it wrote survives.
//!
//! ## Concurrency
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every update is a compare-and-set on the sync_version read in the     │
//! │  same transaction. When another writer got there first:                │
//! │                                                                         │
//! │  last_write_wins  → re-read and re-apply (bounded attempts); the later │
//! │                     commit wins if the move is still legal             │
//! │  version_checked  → ConcurrencyConflict to the caller                  │
//! │  advance_if_version → always ConcurrencyConflict on mismatch           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transactions take the SQLite write lock at `BEGIN`, so commands on one
//! database queue behind each other and read what the previous one
//! committed. A writer that waited past the busy timeout surfaces as the
//! same conflict and is re-run the same way.

pub mod inventory;
pub mod orders;
pub mod tables;

use std::future::Future;
use tracing::debug;

use tavola_core::ConcurrencyPolicy;

use crate::error::{EngineError, EngineResult};
use crate::Engine;

/// Attempts before a last-write-wins command gives up on a busy row.
const MAX_ATTEMPTS: u32 = 3;

/// Runs `op`, re-running it on a version conflict when the engine is
/// configured for last-write-wins.
pub(crate) async fn with_concurrency_policy<T, F, Fut>(engine: &Engine, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let policy = engine.config().orders.concurrency;
    let mut attempt = 1;

    loop {
        match op().await {
            Err(EngineError::ConcurrencyConflict(reason))
                if policy == ConcurrencyPolicy::LastWriteWins && attempt < MAX_ATTEMPTS =>
            {
                debug!(attempt, reason = %reason, "Version conflict, re-applying");
                attempt += 1;
            }
            other => return other,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tavola_core::OrderStatus;
    use tavola_db::{Database, DbConfig};

    use super::orders::{advance, place_order, OrderLine};
    use super::*;
    use crate::config::EngineConfig;
    use crate::test_support::{chef, file_engine, menu_item, waiter, SHOP};

    fn quick_busy(path: &std::path::Path) -> DbConfig {
        DbConfig::new(path).busy_timeout(Duration::from_millis(200))
    }

    /// A second handle on the same file, holding the write lock.
    async fn hold_write_lock(path: &std::path::Path) -> sqlx::Transaction<'static, sqlx::Sqlite> {
        let other = Database::new(DbConfig::new(path).run_migrations(false))
            .await
            .unwrap();
        other.begin().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_orders_all_commit() {
        let dir = tempfile::tempdir().unwrap();
        let db_config = DbConfig::new(dir.path().join("tavola.db"));
        let engine = file_engine(db_config, EngineConfig::default()).await;
        let chai = menu_item(&engine, "Chai", 2000).await;

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let engine = engine.clone();
                let line = OrderLine::new(&chai.id, 1);
                tokio::spawn(async move {
                    place_order(&engine, SHOP, None, &[line], &waiter()).await
                })
            })
            .collect();

        let mut numbers = Vec::new();
        for task in tasks {
            numbers.push(task.await.unwrap().unwrap().order_number);
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_advances_both_apply() {
        let dir = tempfile::tempdir().unwrap();
        let db_config = DbConfig::new(dir.path().join("tavola.db"));
        let engine = file_engine(db_config, EngineConfig::default()).await;
        let chai = menu_item(&engine, "Chai", 2000).await;

        for _ in 0..10 {
            let order = place_order(&engine, SHOP, None, &[OrderLine::new(&chai.id, 1)], &waiter())
                .await
                .unwrap();
            let (chef_a, chef_b) = (chef(), chef());
            let (a, b) = tokio::join!(
                advance(&engine, &order.id, &chef_a),
                advance(&engine, &order.id, &chef_b)
            );
            a.unwrap();
            b.unwrap();

            let stored = engine.db().orders().get_by_id(&order.id).await.unwrap();
            assert_eq!(stored.status, OrderStatus::Ready);
            assert_eq!(stored.sync_version, 3);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_last_write_wins_reruns_after_busy_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tavola.db");
        let engine = file_engine(quick_busy(&path), EngineConfig::default()).await;
        let chai = menu_item(&engine, "Chai", 2000).await;
        let order = place_order(&engine, SHOP, None, &[OrderLine::new(&chai.id, 1)], &waiter())
            .await
            .unwrap();

        // first attempt times out at 200ms, the re-run gets the lock at 300ms
        let held = hold_write_lock(&path).await;
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            tavola_db::commit(held).await.unwrap();
        });

        let advanced = advance(&engine, &order.id, &chef()).await.unwrap();
        assert_eq!(advanced.status, OrderStatus::Preparing);
        release.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_version_checked_reports_busy_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tavola.db");
        let mut config = EngineConfig::default();
        config.orders.concurrency = ConcurrencyPolicy::VersionChecked;
        let engine = file_engine(quick_busy(&path), config).await;
        let chai = menu_item(&engine, "Chai", 2000).await;
        let order = place_order(&engine, SHOP, None, &[OrderLine::new(&chai.id, 1)], &waiter())
            .await
            .unwrap();

        let held = hold_write_lock(&path).await;
        let err = advance(&engine, &order.id, &chef()).await.unwrap_err();
        assert!(matches!(err, EngineError::ConcurrencyConflict(_)), "got {:?}", err);
        tavola_db::commit(held).await.unwrap();

        let stored = engine.db().orders().get_by_id(&order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Queued);
        assert_eq!(stored.sync_version, 1);
    }

    #[tokio::test]
    async fn test_policy_gives_up_after_bounded_attempts() {
        let engine = crate::test_support::engine().await;
        let mut calls = 0;
        let result: EngineResult<()> = with_concurrency_policy(&engine, || {
            calls += 1;
            async { Err(EngineError::ConcurrencyConflict("row moved".into())) }
        })
        .await;

        assert!(matches!(result, Err(EngineError::ConcurrencyConflict(_))));
        assert_eq!(calls, MAX_ATTEMPTS);
    }
}
