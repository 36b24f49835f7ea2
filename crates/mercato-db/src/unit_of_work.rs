//! # Unit of Work
//!
//! One SQLite transaction plus the process-wide writer gate.
//!
//! ```text
//! db.begin() ──► [gate locked] BEGIN
//!                   │
//!                   ├── uow.idempotency() ...
//!                   ├── uow.stock() ...
//!                   ├── uow.audit() ...
//!                   │
//!        commit() ──┴──► COMMIT   [gate released]
//!        drop     ──────► ROLLBACK [gate released]
//! ```

use sqlx::{Sqlite, SqliteConnection, Transaction};
use tokio::sync::OwnedMutexGuard;

use crate::error::{DbError, DbResult};
use crate::repository::audit::AuditRepository;
use crate::repository::cash::CashRepository;
use crate::repository::idempotency::IdempotencyRepository;
use crate::repository::inventory_count::CountRepository;
use crate::repository::sale::SaleRepository;
use crate::repository::stock::StockLedger;
use crate::repository::tenancy::TenancyRepository;
use crate::repository::transfer::TransferRepository;

/// An open write transaction.
///
/// Field order matters: the transaction is dropped (rolled back) before the
/// gate is released.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
    _gate: OwnedMutexGuard<()>,
}

impl UnitOfWork {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>, gate: OwnedMutexGuard<()>) -> Self {
        UnitOfWork { tx, _gate: gate }
    }

    /// Raw connection for statements no repository covers.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub fn idempotency(&mut self) -> IdempotencyRepository<'_> {
        IdempotencyRepository::new(&mut self.tx)
    }

    pub fn audit(&mut self) -> AuditRepository<'_> {
        AuditRepository::new(&mut self.tx)
    }

    pub fn tenancy(&mut self) -> TenancyRepository<'_> {
        TenancyRepository::new(&mut self.tx)
    }

    pub fn stock(&mut self) -> StockLedger<'_> {
        StockLedger::new(&mut self.tx)
    }

    pub fn transfers(&mut self) -> TransferRepository<'_> {
        TransferRepository::new(&mut self.tx)
    }

    pub fn sales(&mut self) -> SaleRepository<'_> {
        SaleRepository::new(&mut self.tx)
    }

    pub fn cash(&mut self) -> CashRepository<'_> {
        CashRepository::new(&mut self.tx)
    }

    pub fn counts(&mut self) -> CountRepository<'_> {
        CountRepository::new(&mut self.tx)
    }

    /// Commits every write made through this unit of work.
    pub async fn commit(self) -> DbResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))
    }

    /// Rolls back explicitly. Dropping has the same effect.
    pub async fn rollback(self) -> DbResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))
    }
}
