//! # tavola-db: Database Layer for Tavola
//!
//! Durable state for the coordination engine. Every row lives in SQLite;
//! nothing authoritative is held in memory.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tavola Data Flow                                 │
//! │                                                                         │
//! │  Engine operation (advance, join, bulk_adjust, ...)                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tavola-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │ (orders.rs)   │    │  (embedded)  │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ SqlitePool    │    │ tables.rs     │    │ 001_init.sql │  │   │
//! │  │   │ Transactions  │◄───│ inventory.rs  │    │              │  │   │
//! │  │   │               │    │ change_log.rs │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  ┌──────────────────────┐     ┌──────────────────────────────────┐     │
//! │  │   SQLite Database    │     │ change_log → tavola-sync relay   │     │
//! │  └──────────────────────┘     └──────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations and transaction functions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tavola_db::{commit, Database, DbConfig};
//! use tavola_db::repository::orders;
//!
//! let db = Database::new(DbConfig::new("path/to/tavola.db")).await?;
//!
//! // Reads go through repositories
//! let active = db.orders().list_active("shop-1").await?;
//!
//! // Writes go through transaction functions
//! let mut tx = db.begin().await?;
//! let order = orders::fetch(&mut tx, "order-id").await?;
//! commit(tx).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{commit, Database, DbConfig};

// Repository re-exports for convenience
pub use repository::bills::BillRepository;
pub use repository::change_log::{ChangeLogRepository, ChangeLogRow};
pub use repository::inventory::{InventoryRepository, NewAdjustment};
pub use repository::menu::MenuRepository;
pub use repository::orders::OrderRepository;
pub use repository::settings::SettingsRepository;
pub use repository::tables::TableRepository;
