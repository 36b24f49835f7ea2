//! # mercato-db: Persistence for the Mercato engine
//!
//! SQLite storage through sqlx. Every mutation runs inside one
//! [`UnitOfWork`]: a transaction held together with a process-wide writer
//! gate, so concurrent requests observe each other's claims and ledger
//! writes in a total order.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  mercato-engine (MutationGateway)                                       │
//! │       │  db.begin()                                                     │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    mercato-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐   │   │
//! │  │   │   Database    │    │  UnitOfWork   │    │  Migrations  │   │   │
//! │  │   │   (pool.rs)   │───►│  tx + gate    │    │  (embedded)  │   │   │
//! │  │   └───────────────┘    │  repositories │    └──────────────┘   │   │
//! │  │                        └───────────────┘                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL, foreign keys, CHECKs, triggers)                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, configuration and the writer gate
//! - [`unit_of_work`] - Transaction wrapper handing out repositories
//! - [`migrations`] - Embedded schema migrations
//! - [`error`] - Database error types
//! - [`repository`] - One repository per aggregate
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mercato_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("mercato.db")).await?;
//! let mut uow = db.begin().await?;
//! let store = uow.tenancy().find_store("s-1").await?;
//! uow.commit().await?;
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod unit_of_work;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use unit_of_work::UnitOfWork;

pub use repository::audit::{AuditEvent, AuditRepository, AuditResult, NewAuditEvent};
pub use repository::cash::{CashMovement, CashRepository};
pub use repository::idempotency::{
    ClaimOutcome, IdempotencyRecord, IdempotencyRepository, IdempotencyScope, IdempotencyState,
};
pub use repository::inventory_count::CountRepository;
pub use repository::sale::SaleRepository;
pub use repository::stock::{LevelFilter, StockLedger, StockLevel, StockScope, StockUnit};
pub use repository::tenancy::{Store, TenancyRepository, Tenant};
pub use repository::transfer::TransferRepository;
