//! # Settings Repository
//!
//! Shops and their billing / admission settings.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::pool::begin_immediate;
use tavola_core::validation::{validate_otp_format, validate_rate_bps};
use tavola_core::{Charge, Money, Rate, ShopSettings, ValidationError};

#[derive(Debug, FromRow)]
struct SettingsRow {
    shop_id: String,
    currency: String,
    tax_rate_bps: i64,
    service_charge_bps: i64,
    tax_included_in_price: bool,
    otp_enabled: bool,
    per_table_otp: bool,
    shop_otp: Option<String>,
    max_item_quantity: i64,
    packaging_charge_type: String,
    packaging_charge_amount: i64,
    delivery_charge_type: String,
    delivery_charge_amount: i64,
    #[allow(dead_code)]
    updated_at: DateTime<Utc>,
}

impl TryFrom<SettingsRow> for ShopSettings {
    type Error = DbError;

    fn try_from(row: SettingsRow) -> DbResult<Self> {
        let rate = |bps: i64| {
            u32::try_from(bps).map_err(|_| DbError::corrupt("settings", format!("rate {}", bps)))
        };
        Ok(ShopSettings {
            shop_id: row.shop_id,
            currency: row.currency,
            tax_rate: Rate::from_bps(rate(row.tax_rate_bps)?),
            service_charge_rate: Rate::from_bps(rate(row.service_charge_bps)?),
            tax_included_in_price: row.tax_included_in_price,
            otp_enabled: row.otp_enabled,
            per_table_otp: row.per_table_otp,
            shop_otp: row.shop_otp,
            max_item_quantity: row.max_item_quantity,
            packaging_charge: charge(&row.packaging_charge_type, row.packaging_charge_amount)?,
            delivery_charge: charge(&row.delivery_charge_type, row.delivery_charge_amount)?,
        })
    }
}

fn charge(kind: &str, amount: i64) -> DbResult<Charge> {
    match kind {
        "flat" => Ok(Charge::Flat(Money::from_cents(amount))),
        "percent" => u32::try_from(amount)
            .map(|bps| Charge::Percent(Rate::from_bps(bps)))
            .map_err(|_| DbError::corrupt("settings", format!("charge rate {}", amount))),
        other => Err(DbError::corrupt("settings", format!("charge type {}", other))),
    }
}

/// Stored (type, amount) for a charge.
fn charge_columns(charge: &Charge) -> (&'static str, i64) {
    match charge {
        Charge::Flat(amount) => ("flat", amount.cents()),
        Charge::Percent(rate) => ("percent", rate.bps() as i64),
    }
}

const SELECT_SETTINGS: &str = r#"
    SELECT shop_id, currency, tax_rate_bps, service_charge_bps,
           tax_included_in_price, otp_enabled, per_table_otp, shop_otp,
           max_item_quantity, packaging_charge_type, packaging_charge_amount,
           delivery_charge_type, delivery_charge_amount, updated_at
    FROM settings
    WHERE shop_id = ?1
"#;

/// Reads a shop's settings inside a transaction.
pub async fn fetch(conn: &mut SqliteConnection, shop_id: &str) -> DbResult<ShopSettings> {
    sqlx::query_as::<_, SettingsRow>(SELECT_SETTINGS)
        .bind(shop_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Settings", shop_id))?
        .try_into()
}

/// Repository for shop and settings operations.
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SettingsRepository { pool }
    }

    /// Creates a shop with default settings.
    pub async fn create_shop(&self, shop_id: &str, name: &str) -> DbResult<ShopSettings> {
        let now = Utc::now();
        let settings = ShopSettings::new(shop_id);
        let mut tx = begin_immediate(&self.pool).await?;

        sqlx::query("INSERT INTO shops (id, name, created_at) VALUES (?1, ?2, ?3)")
            .bind(shop_id)
            .bind(name)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        upsert(&mut tx, &settings, now).await?;
        tx.commit().await?;

        info!(shop_id = %shop_id, name = %name, "Shop created");
        Ok(settings)
    }

    pub async fn get(&self, shop_id: &str) -> DbResult<ShopSettings> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, shop_id).await
    }

    /// Saves settings. Stored breakdowns are unaffected by later changes here.
    pub async fn save(&self, settings: &ShopSettings) -> DbResult<()> {
        validate_rate_bps("tax_rate", settings.tax_rate.bps())?;
        validate_rate_bps("service_charge_rate", settings.service_charge_rate.bps())?;
        if let Some(otp) = &settings.shop_otp {
            validate_otp_format(otp)?;
        }
        validate_charge("packaging_charge", &settings.packaging_charge)?;
        validate_charge("delivery_charge", &settings.delivery_charge)?;

        let mut conn = self.pool.acquire().await?;
        upsert(&mut conn, settings, Utc::now()).await?;
        debug!(shop_id = %settings.shop_id, "Settings saved");
        Ok(())
    }
}

fn validate_charge(field: &str, charge: &Charge) -> DbResult<()> {
    match charge {
        Charge::Flat(amount) if amount.is_negative() => Err(ValidationError::MustBePositive {
            field: field.to_string(),
        }
        .into()),
        Charge::Flat(_) => Ok(()),
        Charge::Percent(rate) => Ok(validate_rate_bps(field, rate.bps())?),
    }
}

async fn upsert(
    conn: &mut SqliteConnection,
    settings: &ShopSettings,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let (packaging_type, packaging_amount) = charge_columns(&settings.packaging_charge);
    let (delivery_type, delivery_amount) = charge_columns(&settings.delivery_charge);

    sqlx::query(
        r#"
        INSERT INTO settings (
            shop_id, currency, tax_rate_bps, service_charge_bps,
            tax_included_in_price, otp_enabled, per_table_otp, shop_otp,
            max_item_quantity, packaging_charge_type, packaging_charge_amount,
            delivery_charge_type, delivery_charge_amount, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT (shop_id) DO UPDATE SET
            currency = excluded.currency,
            tax_rate_bps = excluded.tax_rate_bps,
            service_charge_bps = excluded.service_charge_bps,
            tax_included_in_price = excluded.tax_included_in_price,
            otp_enabled = excluded.otp_enabled,
            per_table_otp = excluded.per_table_otp,
            shop_otp = excluded.shop_otp,
            max_item_quantity = excluded.max_item_quantity,
            packaging_charge_type = excluded.packaging_charge_type,
            packaging_charge_amount = excluded.packaging_charge_amount,
            delivery_charge_type = excluded.delivery_charge_type,
            delivery_charge_amount = excluded.delivery_charge_amount,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&settings.shop_id)
    .bind(&settings.currency)
    .bind(settings.tax_rate.bps() as i64)
    .bind(settings.service_charge_rate.bps() as i64)
    .bind(settings.tax_included_in_price)
    .bind(settings.otp_enabled)
    .bind(settings.per_table_otp)
    .bind(&settings.shop_otp)
    .bind(settings.max_item_quantity)
    .bind(packaging_type)
    .bind(packaging_amount)
    .bind(delivery_type)
    .bind(delivery_amount)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_create_and_update_settings() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let created = db.settings().create_shop("shop-1", "Dosa Corner").await.unwrap();
        assert_eq!(created.max_item_quantity, tavola_core::DEFAULT_MAX_ITEM_QUANTITY);

        let mut settings = db.settings().get("shop-1").await.unwrap();
        settings.tax_rate = Rate::from_percent(5);
        settings.tax_included_in_price = true;
        db.settings().save(&settings).await.unwrap();

        let reloaded = db.settings().get("shop-1").await.unwrap();
        assert_eq!(reloaded.tax_rate, Rate::from_percent(5));
        assert!(reloaded.tax_included_in_price);
    }

    #[tokio::test]
    async fn test_packaging_and_delivery_charges() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut settings = db.settings().create_shop("shop-1", "Dosa Corner").await.unwrap();
        assert_eq!(settings.packaging_charge, Charge::Flat(Money::zero()));

        settings.packaging_charge = Charge::Flat(Money::from_cents(1500));
        settings.delivery_charge = Charge::Percent(Rate::from_percent(5));
        db.settings().save(&settings).await.unwrap();
        assert_eq!(db.settings().get("shop-1").await.unwrap(), settings);

        settings.delivery_charge = Charge::Flat(Money::from_cents(-100));
        assert!(matches!(
            db.settings().save(&settings).await,
            Err(DbError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_shop() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(matches!(
            db.settings().get("nope").await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_bad_shop_otp() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut settings = db.settings().create_shop("shop-1", "Dosa Corner").await.unwrap();
        settings.shop_otp = Some("12".into());
        assert!(db.settings().save(&settings).await.is_err());
    }
}
