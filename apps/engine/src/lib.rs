//! # Tavola Engine
//!
//! Order lifecycle and table session coordination for a restaurant shop.
//! Every command is one SQLite transaction; committed changes reach
//! observers through the outbox relay and the change bus.
//!
//! ## Module Organization
//! ```text
//! tavola_engine/
//! ├── lib.rs          ◄─── You are here (Engine handle, run loop)
//! ├── config.rs       ◄─── engine.toml + environment overrides
//! ├── error.rs        ◄─── EngineError taxonomy
//! ├── commands/
//! │   ├── mod.rs      ◄─── Concurrency policy helper
//! │   ├── orders.rs   ◄─── place, advance, retreat, cancel, bill, settle
//! │   ├── tables.rs   ◄─── join, clear, validate_session, OTP
//! │   └── inventory.rs◄─── deduction, adjust_stock, bulk_adjust, low_stock
//! └── state/
//!     ├── mod.rs      ◄─── Client state exports
//!     ├── customer.rs ◄─── CustomerContext (seated device)
//!     └── kitchen.rs  ◄─── KitchenBoard (KDS)
//! ```
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  command ──▶ BEGIN                                                     │
//! │               read rows ─▶ tavola-core rule ─▶ write rows              │
//! │               change_log rows (same transaction)                       │
//! │             COMMIT ──────────────────────────────┐                     │
//! │                                                  ▼                     │
//! │                                   OutboxRelay ─▶ ChangeBus ─▶ observers│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod state;

use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tavola_core::ChangeFilter;
use tavola_db::{Database, DbConfig};
use tavola_sync::{ChangeBus, OutboxRelay, RelayHandle, Subscription};

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, ErrorCode};
pub use state::{CustomerContext, KitchenBoard};

// =============================================================================
// Engine
// =============================================================================

/// Shared handle to the store, the bus and the relay. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    db: Database,
    bus: ChangeBus,
    relay: Arc<OutboxRelay>,
    config: Arc<EngineConfig>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("bus", &self.bus)
            .field("config", &self.config)
            .finish()
    }
}

impl Engine {
    /// Wires an engine over an open database.
    pub async fn new(db: Database, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let bus = ChangeBus::new(config.bus.capacity);
        let relay = OutboxRelay::new(db.clone(), bus.clone(), config.relay_config()).await?;

        Ok(Engine {
            db,
            bus,
            relay: Arc::new(relay),
            config: Arc::new(config),
        })
    }

    /// Opens the configured database file (running migrations) and wires
    /// the engine over it.
    pub async fn open(config: EngineConfig) -> EngineResult<Self> {
        let db_config = config.db_config()?;
        info!(path = ?db_config.database_path, "Opening database");
        let db = Database::new(db_config).await?;
        Self::new(db, config).await
    }

    /// An engine over a fresh in-memory database.
    pub async fn in_memory(config: EngineConfig) -> EngineResult<Self> {
        let db = Database::new(DbConfig::in_memory()).await?;
        Self::new(db, config).await
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registers a filtered subscription on the change bus.
    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        self.bus.subscribe(filter)
    }

    /// Publishes every committed change not yet on the bus. Returns the
    /// number of change-log rows consumed.
    pub async fn publish_pending(&self) -> EngineResult<usize> {
        Ok(self.relay.drain().await?)
    }

    /// Starts the background relay loop.
    pub fn spawn_relay(&self) -> (JoinHandle<()>, RelayHandle) {
        Arc::clone(&self.relay).spawn()
    }
}

// =============================================================================
// Run
// =============================================================================

/// Runs the engine until Ctrl-C.
///
/// ## Startup Sequence
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  1. Load engine.toml ─────────────────────────────────────────────────► │
/// │     • defaults, then file, then TAVOLA_* environment overrides          │
/// │                                                                         │
/// │  2. Open Database ────────────────────────────────────────────────────► │
/// │     • SQLite with WAL mode                                              │
/// │     • Run pending migrations                                            │
/// │                                                                         │
/// │  3. Start Relay ──────────────────────────────────────────────────────► │
/// │     • resumes after the last published change-log row                   │
/// │                                                                         │
/// │  4. Wait for Ctrl-C, drain the relay, close the pool                    │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
pub async fn run(config_path: Option<PathBuf>) -> EngineResult<()> {
    let config = EngineConfig::load(config_path)?;
    info!(
        stock_affecting_status = %config.orders.stock_affecting_status,
        concurrency = ?config.orders.concurrency,
        "Engine configuration loaded"
    );

    let engine = Engine::open(config).await?;
    let (relay_task, relay) = engine.spawn_relay();
    info!("Tavola engine running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutting down");
    relay.shutdown().await?;
    if let Err(e) = relay_task.await {
        error!(error = %e, "Relay task ended abnormally");
    }
    engine.db().close().await;

    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=tavola_engine=trace` - Trace the engine only
/// - Default: INFO, debug for tavola crates, sqlx at WARN
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tavola=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// =============================================================================
// Test Support
// =============================================================================

#[cfg(test)]
pub(crate) mod test_support {
    //! Fixtures shared by command and state tests.

    use tavola_core::{
        Actor, DiningTable, InventoryItem, MenuItem, Money, Quantity, Rate, Role, ShopSettings,
    };
    use tavola_db::{Database, DbConfig};

    use crate::{Engine, EngineConfig};

    pub const SHOP: &str = "shop-1";

    pub fn chef() -> Actor {
        Actor::staff("u-chef", "Ravi", Role::Kitchen)
    }

    pub fn waiter() -> Actor {
        Actor::staff("u-waiter", "Asha", Role::Waiter)
    }

    pub fn admin() -> Actor {
        Actor::staff("u-admin", "Priya", Role::Admin)
    }

    pub async fn engine() -> Engine {
        engine_with(EngineConfig::default()).await
    }

    pub async fn engine_with(config: EngineConfig) -> Engine {
        let engine = Engine::in_memory(config).await.unwrap();
        engine.db().settings().create_shop(SHOP, "Test Kitchen").await.unwrap();
        engine
    }

    /// An engine over a database file, so several connections write at once.
    pub async fn file_engine(db_config: DbConfig, config: EngineConfig) -> Engine {
        let db = Database::new(db_config).await.unwrap();
        let engine = Engine::new(db, config).await.unwrap();
        engine.db().settings().create_shop(SHOP, "Test Kitchen").await.unwrap();
        engine
    }

    /// 10% exclusive tax, 5% service, OTP checks off.
    pub async fn with_policy(engine: &Engine, inclusive: bool) -> ShopSettings {
        let mut settings = engine.db().settings().get(SHOP).await.unwrap();
        settings.tax_rate = Rate::from_percent(10);
        settings.service_charge_rate = Rate::from_percent(5);
        settings.tax_included_in_price = inclusive;
        engine.db().settings().save(&settings).await.unwrap();
        settings
    }

    pub async fn table(engine: &Engine, label: &str) -> DiningTable {
        engine.db().tables().create(SHOP, label).await.unwrap()
    }

    pub async fn menu_item(engine: &Engine, name: &str, cents: i64) -> MenuItem {
        engine
            .db()
            .menu()
            .create_item(SHOP, name, Money::from_cents(cents))
            .await
            .unwrap()
    }

    pub async fn stock(engine: &Engine, name: &str, milli: i64) -> InventoryItem {
        engine
            .db()
            .inventory()
            .create_item(SHOP, name, "kg", Quantity::from_milli(milli), Quantity::from_milli(500))
            .await
            .unwrap()
    }
}
