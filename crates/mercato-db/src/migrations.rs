//! # Database Migrations
//!
//! Embedded SQL migrations for Mercato.
//!
//! ## Migration Set
//! ```text
//! migrations/sqlite/
//! ├── 001_tenancy_idempotency_audit.sql  tenants, stores, policies,
//! │                                      idempotency records, audit trail
//! ├── 002_stock_and_transfers.sql        stock units/totals, transfers
//! ├── 003_pos.sql                        sales, cash sessions, day closes
//! └── 004_inventory_counts.sql           counts, locks, scans, deltas
//! ```
//!
//! ## Adding New Migrations
//!
//! 1. Create a new file in `migrations/sqlite/` with the next sequence number
//! 2. **NEVER** modify existing migrations - always add new ones
//! 3. Constraints the engine relies on (unique OPEN session, unique day
//!    close, append-only audit) live here, not only in Rust

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded migrations from the `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations, in filename order.
///
/// Idempotent; each migration runs in its own transaction.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns `(total_migrations, applied_migrations)`.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await?;

    Ok((total, applied as usize))
}
