//! # Change Log Repository
//!
//! The outbox every mutation writes to, and the relay reads from.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  ENGINE OPERATION (e.g., advance order)                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. UPDATE orders SET status = 'ready' WHERE id = ?            │   │
//! │  │                                                                 │   │
//! │  │  2. INSERT INTO change_log (table_name, row_id, new_row, ...)  │   │
//! │  │     seq assigned here → commit order                           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← Both succeed or both fail                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            OUTBOX RELAY (tavola-sync, async)                    │   │
//! │  │                                                                 │   │
//! │  │  1. SELECT * FROM change_log WHERE seq > cursor ORDER BY seq   │   │
//! │  │  2. Publish each event on the bus                              │   │
//! │  │  3. UPDATE change_log SET published_at = NOW() WHERE seq <= ?  │   │
//! │  │  4. Purge published rows past retention                        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use tavola_core::{ChangeEvent, ChangeOperation, ChangeTable, RowImage};

// =============================================================================
// Writing
// =============================================================================

/// Appends a change row inside the caller's transaction.
///
/// At least one image is required; identity (shop, table, row) is taken from
/// the new image, or the old one for deletes.
pub async fn append(
    conn: &mut SqliteConnection,
    operation: ChangeOperation,
    new_row: Option<&RowImage>,
    old_row: Option<&RowImage>,
) -> DbResult<i64> {
    let identity = new_row
        .or(old_row)
        .ok_or_else(|| DbError::Internal("change without a row image".to_string()))?;

    let new_json = new_row
        .map(RowImage::encode)
        .transpose()
        .map_err(|e| DbError::Internal(e.to_string()))?;
    let old_json = old_row
        .map(RowImage::encode)
        .transpose()
        .map_err(|e| DbError::Internal(e.to_string()))?;

    let seq: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO change_log (
            shop_id, table_name, row_id, operation, new_row, old_row, committed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        RETURNING seq
        "#,
    )
    .bind(identity.shop_id())
    .bind(identity.table().as_str())
    .bind(identity.row_id())
    .bind(operation.as_str())
    .bind(new_json)
    .bind(old_json)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    debug!(
        seq,
        table = %identity.table(),
        row_id = %identity.row_id(),
        operation = operation.as_str(),
        "Change logged"
    );

    Ok(seq)
}

// =============================================================================
// Reading
// =============================================================================

/// A stored change row before its images are validated.
#[derive(Debug, Clone, FromRow)]
pub struct ChangeLogRow {
    pub seq: i64,
    pub shop_id: String,
    pub table_name: String,
    pub row_id: String,
    pub operation: String,
    pub new_row: Option<String>,
    pub old_row: Option<String>,
    pub committed_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl ChangeLogRow {
    /// Validates the row into a typed event.
    pub fn decode(&self) -> DbResult<ChangeEvent> {
        let table: ChangeTable = self
            .table_name
            .parse()
            .map_err(|e| DbError::corrupt("change_log", e))?;
        let operation: ChangeOperation = self
            .operation
            .parse()
            .map_err(|e| DbError::corrupt("change_log", e))?;
        let decode_image = |json: &Option<String>| -> DbResult<Option<RowImage>> {
            json.as_deref()
                .map(|j| RowImage::decode(table, j))
                .transpose()
                .map_err(|e| DbError::corrupt("change_log", format!("seq {}: {}", self.seq, e)))
        };

        Ok(ChangeEvent {
            seq: self.seq,
            shop_id: self.shop_id.clone(),
            table,
            row_id: self.row_id.clone(),
            operation,
            new_row: decode_image(&self.new_row)?,
            old_row: decode_image(&self.old_row)?,
            committed_at: self.committed_at,
        })
    }
}

/// Repository for change-log reads and housekeeping.
#[derive(Debug, Clone)]
pub struct ChangeLogRepository {
    pool: SqlitePool,
}

impl ChangeLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ChangeLogRepository { pool }
    }

    /// Rows with `seq > cursor`, in seq order.
    pub async fn fetch_after(&self, cursor: i64, limit: i64) -> DbResult<Vec<ChangeLogRow>> {
        let rows = sqlx::query_as::<_, ChangeLogRow>(
            r#"
            SELECT seq, shop_id, table_name, row_id, operation,
                   new_row, old_row, committed_at, published_at
            FROM change_log
            WHERE seq > ?1
            ORDER BY seq
            LIMIT ?2
            "#,
        )
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Highest seq already published, or 0.
    ///
    /// A restarted relay resumes after this point, so events committed while
    /// it was down are still delivered.
    pub async fn last_published_seq(&self) -> DbResult<i64> {
        let seq: Option<i64> =
            sqlx::query_scalar("SELECT MAX(seq) FROM change_log WHERE published_at IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(seq.unwrap_or(0))
    }

    /// Highest seq written, or 0.
    pub async fn head_seq(&self) -> DbResult<i64> {
        let seq: Option<i64> = sqlx::query_scalar("SELECT MAX(seq) FROM change_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(seq.unwrap_or(0))
    }

    /// Marks every row up to and including `seq` as published.
    pub async fn mark_published(&self, seq: i64) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE change_log SET published_at = ?1 WHERE seq <= ?2 AND published_at IS NULL",
        )
        .bind(Utc::now())
        .bind(seq)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes published rows older than `before`. The newest row is always
    /// kept so AUTOINCREMENT never hands out a seq twice.
    pub async fn purge_published(&self, before: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM change_log
            WHERE published_at IS NOT NULL
              AND published_at < ?1
              AND seq < (SELECT MAX(seq) FROM change_log)
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(purged = result.rows_affected(), "Purged published changes");
        }

        Ok(result.rows_affected())
    }

    /// Rows not yet published.
    pub async fn pending_count(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM change_log WHERE published_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::commit;
    use crate::repository::test_support::{seed_shop, seed_table};
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_append_and_fetch_in_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_shop(&db, "shop-1").await;
        let table = seed_table(&db, "shop-1", "T1").await;
        let image = RowImage::Table(table);

        let mut tx = db.begin().await.unwrap();
        let first = append(&mut tx, ChangeOperation::Update, Some(&image), None)
            .await
            .unwrap();
        let second = append(&mut tx, ChangeOperation::Update, Some(&image), Some(&image))
            .await
            .unwrap();
        commit(tx).await.unwrap();
        assert!(second > first);

        let rows = db.change_log().fetch_after(first - 1, 10).await.unwrap();
        let seqs: Vec<i64> = rows.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![first, second]);

        let event = rows[1].decode().unwrap();
        assert_eq!(event.table, ChangeTable::Tables);
        assert!(event.old_row.is_some());
    }

    #[tokio::test]
    async fn test_rolled_back_changes_are_never_seen() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_shop(&db, "shop-1").await;
        let table = seed_table(&db, "shop-1", "T1").await;
        let head = db.change_log().head_seq().await.unwrap();

        {
            let mut tx = db.begin().await.unwrap();
            append(&mut tx, ChangeOperation::Update, Some(&RowImage::Table(table)), None)
                .await
                .unwrap();
        }

        assert!(db.change_log().fetch_after(head, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_and_purge() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_shop(&db, "shop-1").await;
        seed_table(&db, "shop-1", "T1").await;
        seed_table(&db, "shop-1", "T2").await;

        let log = db.change_log();
        let head = log.head_seq().await.unwrap();
        assert!(log.pending_count().await.unwrap() >= 2);

        log.mark_published(head).await.unwrap();
        assert_eq!(log.pending_count().await.unwrap(), 0);
        assert_eq!(log.last_published_seq().await.unwrap(), head);

        log.purge_published(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        // newest row survives
        assert_eq!(log.head_seq().await.unwrap(), head);
    }

    #[tokio::test]
    async fn test_corrupt_image_is_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        sqlx::query(
            "INSERT INTO change_log (shop_id, table_name, row_id, operation, new_row, committed_at)
             VALUES ('s', 'orders', 'o', 'update', '{\"kind\":\"order\",\"row\":{}}', ?1)",
        )
        .bind(Utc::now())
        .execute(db.pool())
        .await
        .unwrap();

        let rows = db.change_log().fetch_after(0, 10).await.unwrap();
        assert!(matches!(rows[0].decode(), Err(DbError::Corrupt { .. })));
    }
}
