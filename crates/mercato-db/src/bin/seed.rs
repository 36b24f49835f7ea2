//! # Seed Data Generator
//!
//! Populates a development database with one tenant, a few stores and
//! opening stock in the default pool.
//!
//! ## Usage
//! ```bash
//! # Three stores, 40 SKUs each (default)
//! cargo run -p mercato-db --bin seed
//!
//! # More SKUs per store
//! cargo run -p mercato-db --bin seed -- --skus 200
//!
//! # Specify database path
//! cargo run -p mercato-db --bin seed -- --db ./data/mercato.db
//! ```
//!
//! Every SKU gets a PENDING bucket and, for even indexes, a handful of
//! RFID-tagged units with EPCs of the form `E280{store}{sku}{unit}`.

use chrono::Utc;
use std::env;

use mercato_core::{StockOp, StockSelector, DEFAULT_POOL};
use mercato_db::{Database, DbConfig, LevelFilter, Store};

const TENANT_ID: &str = "tenant-demo";

/// (id, name, utc offset in minutes)
const STORES: &[(&str, &str, i32)] = &[
    ("store-centro", "Centro", -300),
    ("store-norte", "Norte", -300),
    ("store-online", "Online", 0),
];

const EPCS_PER_SKU: usize = 3;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut skus: usize = 40;
    let mut db_path = String::from("./mercato_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--skus" | "-s" => {
                if i + 1 < args.len() {
                    skus = args[i + 1].parse().unwrap_or(40);
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
                println!("Mercato Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -s, --skus <N>     SKUs per store (default: 40)");
                println!("  -d, --db <PATH>    Database file path (default: ./mercato_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Mercato Seed Data Generator");
    println!("===========================");
    println!("Database: {}", db_path);
    println!("SKUs per store: {}", skus);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let now = Utc::now();
    let mut uow = db.begin().await?;

    if uow.tenancy().find_tenant(TENANT_ID).await?.is_some() {
        println!("⚠ Tenant {} already exists", TENANT_ID);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    uow.tenancy().insert_tenant(TENANT_ID, "Mercato Demo", now).await?;
    for (id, name, offset) in STORES {
        uow.tenancy()
            .insert_store(&Store {
                id: id.to_string(),
                tenant_id: TENANT_ID.to_string(),
                name: name.to_string(),
                utc_offset_minutes: *offset,
                created_at: now,
            })
            .await?;
    }
    println!("✓ Tenant and {} stores", STORES.len());

    let start = std::time::Instant::now();
    let mut ops = 0usize;

    for (store_idx, (store_id, _, _)) in STORES.iter().enumerate() {
        for sku_idx in 0..skus {
            let sku = format!("SKU-{:05}", sku_idx);

            let bucket = StockOp::Credit {
                selector: StockSelector::sku(&sku, *store_id, DEFAULT_POOL),
                qty: 5 + (sku_idx % 20) as i64,
            };
            uow.stock().apply(TENANT_ID, &bucket, now).await?;
            ops += 1;

            if sku_idx % 2 == 0 {
                for unit in 0..EPCS_PER_SKU {
                    let register = StockOp::Register {
                        epc: format!("E280{:04X}{:08X}{:04X}", store_idx, sku_idx, unit),
                        sku: sku.clone(),
                        location_id: store_id.to_string(),
                        pool: DEFAULT_POOL.to_string(),
                    };
                    uow.stock().apply(TENANT_ID, &register, now).await?;
                    ops += 1;
                }
            }
        }
    }

    let levels = uow.stock().levels(TENANT_ID, &LevelFilter::default()).await?;
    uow.commit().await?;

    let elapsed = start.elapsed();
    println!();
    println!("✓ Applied {} stock operations in {:?}", ops, elapsed);
    println!("  Stock cells: {}", levels.len());
    println!(
        "  Units on hand: {}",
        levels.iter().map(|l| l.total).sum::<i64>()
    );
    println!();
    println!("✓ Seed complete!");

    Ok(())
}
