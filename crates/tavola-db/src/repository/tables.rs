//! # Table Repository
//!
//! Dining tables, their seated sessions and admission codes.
//!
//! The session list is a JSON column on the table row, so status and
//! membership always change together in one UPDATE. Codes live in
//! `table_secrets`; nothing here ever puts one into a row image.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::{change_log, from_json, parse_text, to_json};
use crate::error::{DbError, DbResult};
use crate::pool::begin_immediate;
use tavola_core::session::generate_otp;
use tavola_core::{ActiveSession, ChangeOperation, DiningTable, RowImage, TableStatus};

#[derive(Debug, FromRow)]
struct TableRow {
    id: String,
    shop_id: String,
    label: String,
    status: String,
    active_sessions: String,
    updated_at: DateTime<Utc>,
    sync_version: i64,
}

impl TryFrom<TableRow> for DiningTable {
    type Error = DbError;

    fn try_from(row: TableRow) -> DbResult<Self> {
        let status: TableStatus = parse_text("tables", &row.status)?;
        let active_sessions: Vec<ActiveSession> =
            from_json("tables", "active_sessions", &row.active_sessions)?;
        Ok(DiningTable {
            id: row.id,
            shop_id: row.shop_id,
            label: row.label,
            status,
            active_sessions,
            updated_at: row.updated_at,
            sync_version: row.sync_version,
        })
    }
}

const SELECT_TABLE: &str = r#"
    SELECT id, shop_id, label, status, active_sessions, updated_at, sync_version
    FROM tables
"#;

// =============================================================================
// Transaction Functions
// =============================================================================

pub async fn fetch(conn: &mut SqliteConnection, table_id: &str) -> DbResult<DiningTable> {
    sqlx::query_as::<_, TableRow>(&format!("{} WHERE id = ?1", SELECT_TABLE))
        .bind(table_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Table", table_id))?
        .try_into()
}

pub async fn insert(conn: &mut SqliteConnection, table: &DiningTable) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO tables (id, shop_id, label, status, active_sessions, updated_at, sync_version)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&table.id)
    .bind(&table.shop_id)
    .bind(&table.label)
    .bind(table.status)
    .bind(to_json(&table.active_sessions)?)
    .bind(table.updated_at)
    .bind(table.sync_version)
    .execute(&mut *conn)
    .await?;

    change_log::append(
        conn,
        ChangeOperation::Insert,
        Some(&RowImage::Table(table.clone())),
        None,
    )
    .await?;

    Ok(())
}

/// Writes `after` over `before` and logs the change.
///
/// Guarded on `before.sync_version`; returns the stored row with its new
/// version.
pub async fn update(
    conn: &mut SqliteConnection,
    before: &DiningTable,
    mut after: DiningTable,
) -> DbResult<DiningTable> {
    let result = sqlx::query(
        r#"
        UPDATE tables SET
            status = ?2,
            active_sessions = ?3,
            updated_at = ?4,
            sync_version = sync_version + 1
        WHERE id = ?1 AND sync_version = ?5
        "#,
    )
    .bind(&after.id)
    .bind(after.status)
    .bind(to_json(&after.active_sessions)?)
    .bind(after.updated_at)
    .bind(before.sync_version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::StaleVersion {
            entity: "Table".to_string(),
            id: before.id.clone(),
            expected: before.sync_version,
        });
    }

    after.sync_version = before.sync_version + 1;
    change_log::append(
        conn,
        ChangeOperation::Update,
        Some(&RowImage::Table(after.clone())),
        Some(&RowImage::Table(before.clone())),
    )
    .await?;

    Ok(after)
}

/// Current admission code, if one was ever set.
pub async fn fetch_otp(conn: &mut SqliteConnection, table_id: &str) -> DbResult<Option<String>> {
    let otp: Option<String> = sqlx::query_scalar("SELECT otp FROM table_secrets WHERE table_id = ?1")
        .bind(table_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(otp)
}

/// Stores a new admission code. No change-log row: codes are never published.
pub async fn set_otp(
    conn: &mut SqliteConnection,
    table_id: &str,
    otp: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO table_secrets (table_id, otp, rotated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT (table_id) DO UPDATE SET otp = excluded.otp, rotated_at = excluded.rotated_at
        "#,
    )
    .bind(table_id)
    .bind(otp)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for table reads and setup.
#[derive(Debug, Clone)]
pub struct TableRepository {
    pool: SqlitePool,
}

impl TableRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TableRepository { pool }
    }

    /// Creates an empty table with a fresh admission code.
    pub async fn create(&self, shop_id: &str, label: &str) -> DbResult<DiningTable> {
        let now = Utc::now();
        let table = DiningTable {
            id: Uuid::new_v4().to_string(),
            shop_id: shop_id.to_string(),
            label: label.trim().to_string(),
            status: TableStatus::Empty,
            active_sessions: Vec::new(),
            updated_at: now,
            sync_version: 1,
        };

        let mut tx = begin_immediate(&self.pool).await?;
        insert(&mut tx, &table).await?;
        set_otp(&mut tx, &table.id, &generate_otp(), now).await?;
        tx.commit().await?;

        info!(table_id = %table.id, shop_id = %shop_id, label = %table.label, "Table created");
        Ok(table)
    }

    pub async fn get_by_id(&self, table_id: &str) -> DbResult<DiningTable> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, table_id).await
    }

    pub async fn list_by_shop(&self, shop_id: &str) -> DbResult<Vec<DiningTable>> {
        debug!(shop_id = %shop_id, "Listing tables");
        let rows = sqlx::query_as::<_, TableRow>(&format!(
            "{} WHERE shop_id = ?1 ORDER BY label",
            SELECT_TABLE
        ))
        .bind(shop_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DiningTable::try_from).collect()
    }

    /// Current admission code for the staff display.
    pub async fn otp(&self, table_id: &str) -> DbResult<String> {
        let mut conn = self.pool.acquire().await?;
        fetch_otp(&mut conn, table_id)
            .await?
            .ok_or_else(|| DbError::not_found("Table OTP", table_id))
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
    async fn test_create_table_has_code_but_image_does_not() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_shop(&db, "shop-1").await;
        let table = seed_table(&db, "shop-1", "T1").await;

        let otp = db.tables().otp(&table.id).await.unwrap();
        assert_eq!(otp.len(), tavola_core::OTP_LENGTH);

        let rows = db.change_log().fetch_after(0, 10).await.unwrap();
        let raw = rows[0].new_row.clone().unwrap();
        assert!(!raw.contains("otp"));
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_logs() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_shop(&db, "shop-1").await;
        let before = seed_table(&db, "shop-1", "T1").await;

        let mut after = before.clone();
        after.status = TableStatus::Occupied;
        after.active_sessions.push(ActiveSession {
            session_id: "s1".into(),
            display_name: "Asha".into(),
            joined_at: Utc::now(),
        });

        let mut tx = db.begin().await.unwrap();
        let saved = update(&mut tx, &before, after).await.unwrap();
        commit(tx).await.unwrap();

        assert_eq!(saved.sync_version, before.sync_version + 1);
        let stored = db.tables().get_by_id(&before.id).await.unwrap();
        assert_eq!(stored, saved);
    }

    #[tokio::test]
    async fn test_stale_update_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_shop(&db, "shop-1").await;
        let table = seed_table(&db, "shop-1", "T1").await;

        let mut stale = table.clone();
        stale.sync_version += 5;
        let mut tx = db.begin().await.unwrap();
        let result = update(&mut tx, &stale, table.clone()).await;
        assert!(matches!(result, Err(DbError::StaleVersion { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_label_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_shop(&db, "shop-1").await;
        seed_table(&db, "shop-1", "T1").await;
        assert!(matches!(
            db.tables().create("shop-1", "T1").await,
            Err(DbError::UniqueViolation { .. })
        ));
    }
}
