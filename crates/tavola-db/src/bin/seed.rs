//! # Seed Data Generator
//!
//! Populates the database with a demo shop for manual runs.
//!
//! ## Usage
//! ```bash
//! # Seed the default shop
//! cargo run -p tavola-db --bin seed
//!
//! # Choose the shop id and table count
//! cargo run -p tavola-db --bin seed -- --shop demo --tables 12
//!
//! # Specify database path
//! cargo run -p tavola-db --bin seed -- --db ./data/tavola.db
//! ```
//!
//! ## Generated Data
//! - Settings: 5% exclusive tax, 10% service charge, per-table OTP on
//! - Tables `T1..Tn`, each with its own admission code
//! - A short South Indian menu, each dish with a recipe
//! - Inventory items the recipes draw from, with opening stock

use std::env;
use tavola_core::{Charge, Money, Quantity, Rate};
use tavola_db::{Database, DbConfig, DbError};

/// (name, unit, opening stock milli, low-stock threshold milli)
const INVENTORY: &[(&str, &str, i64, i64)] = &[
    ("Dosa Batter", "kg", 20_000, 4_000),
    ("Idli Batter", "kg", 15_000, 3_000),
    ("Potato Masala", "kg", 8_000, 2_000),
    ("Coconut Chutney", "kg", 5_000, 1_000),
    ("Sambar", "L", 12_000, 3_000),
    ("Coffee Decoction", "L", 4_000, 1_000),
    ("Milk", "L", 10_000, 2_000),
    ("Paneer", "kg", 5_000, 1_000),
];

/// (name, price cents, recipe: inventory name → milli per portion)
const MENU: &[(&str, i64, &[(&str, i64)])] = &[
    (
        "Masala Dosa",
        12_000,
        &[("Dosa Batter", 150), ("Potato Masala", 100), ("Coconut Chutney", 40), ("Sambar", 150)],
    ),
    ("Plain Dosa", 9_000, &[("Dosa Batter", 150), ("Coconut Chutney", 40), ("Sambar", 150)]),
    ("Idli (2 pcs)", 6_000, &[("Idli Batter", 120), ("Coconut Chutney", 40), ("Sambar", 150)]),
    ("Paneer Dosa", 15_000, &[("Dosa Batter", 150), ("Paneer", 80), ("Sambar", 150)]),
    ("Filter Coffee", 4_000, &[("Coffee Decoction", 30), ("Milk", 120)]),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut shop_id = String::from("demo");
    let mut table_count: usize = 8;
    let mut db_path = String::from("./tavola_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--shop" | "-s" => {
                if i + 1 < args.len() {
                    shop_id = args[i + 1].clone();
                    i += 1;
                }
            }
            "--tables" | "-t" => {
                if i + 1 < args.len() {
                    table_count = args[i + 1].parse().unwrap_or(8);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tavola Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -s, --shop <ID>     Shop id to create (default: demo)");
                println!("  -t, --tables <N>    Number of tables (default: 8)");
                println!("  -d, --db <PATH>     Database file path (default: ./tavola_dev.db)");
                println!("  -h, --help          Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Tavola Seed Data Generator");
    println!("============================");
    println!("Database: {}", db_path);
    println!("Shop:     {}", shop_id);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    match db.settings().get(&shop_id).await {
        Ok(_) => {
            println!("⚠ Shop '{}' already exists", shop_id);
            println!("  Skipping seed to avoid duplicates.");
            return Ok(());
        }
        Err(DbError::NotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    // Shop and settings
    let mut settings = db.settings().create_shop(&shop_id, "Tavola Demo Kitchen").await?;
    settings.tax_rate = Rate::from_bps(500);
    settings.service_charge_rate = Rate::from_bps(1000);
    settings.otp_enabled = true;
    settings.per_table_otp = true;
    settings.packaging_charge = Charge::Flat(Money::from_cents(1000));
    settings.delivery_charge = Charge::Percent(Rate::from_percent(5));
    db.settings().save(&settings).await?;
    println!("✓ Settings saved (tax 5%, service 10%, packaging 10.00, delivery 5%, per-table OTP)");

    // Tables
    println!();
    println!("Creating tables...");
    for n in 1..=table_count {
        let table = db.tables().create(&shop_id, &format!("T{}", n)).await?;
        let otp = db.tables().otp(&table.id).await?;
        println!("  {:<4} code {}", table.label, otp);
    }

    // Inventory
    println!();
    println!("Stocking inventory...");
    let mut stock = Vec::with_capacity(INVENTORY.len());
    for (name, unit, opening, threshold) in INVENTORY {
        let item = db
            .inventory()
            .create_item(
                &shop_id,
                name,
                unit,
                Quantity::from_milli(*opening),
                Quantity::from_milli(*threshold),
            )
            .await?;
        println!("  {:<18} {} {}", item.name, item.stock_quantity, item.unit);
        stock.push(item);
    }

    // Menu and recipes
    println!();
    println!("Writing menu...");
    for (name, cents, recipe) in MENU {
        let item = db.menu().create_item(&shop_id, name, Money::from_cents(*cents)).await?;

        let lines: Vec<(String, Quantity)> = recipe
            .iter()
            .filter_map(|(ingredient, milli)| {
                stock
                    .iter()
                    .find(|s| s.name == *ingredient)
                    .map(|s| (s.id.clone(), Quantity::from_milli(*milli)))
            })
            .collect();
        db.menu().set_recipe(&item.id, &lines).await?;

        println!("  {:<16} {} ({} ingredients)", item.name, item.price, lines.len());
    }

    println!();
    println!("✓ Seed complete!");

    Ok(())
}
