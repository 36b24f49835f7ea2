//! # Repository Module
//!
//! One repository per aggregate, each borrowing the unit of work's
//! connection for its lifetime.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  UnitOfWork (one SQLite transaction)                                    │
//! │       │                                                                 │
//! │       ├── idempotency()  IdempotencyRepository   claim / complete      │
//! │       ├── audit()        AuditRepository         append-only events    │
//! │       ├── tenancy()      TenancyRepository       tenants, stores       │
//! │       ├── stock()        StockLedger             units + totals        │
//! │       ├── transfers()    TransferRepository      header + lines        │
//! │       ├── sales()        SaleRepository          lines, payments, adj. │
//! │       ├── cash()         CashRepository          sessions, day closes  │
//! │       └── counts()       CountRepository         counts, lock, scans   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audit;
pub mod cash;
pub mod idempotency;
pub mod inventory_count;
pub mod sale;
pub mod stock;
pub mod tenancy;
pub mod transfer;
