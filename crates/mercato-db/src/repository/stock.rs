//! # Stock Pool Ledger
//!
//! Applies [`StockOp`]s to `stock_units` / `stock_totals` and checks that
//! every touched `(sku, location, pool)` still satisfies
//!
//! ```text
//! TOTAL == count(RFID units) + sum(PENDING bucket qty)
//! ```
//!
//! ## Unit Rows
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  epc set, qty 1      RFID ──debit──► SOLD / IN_TRANSIT / LOST           │
//! │                        ▲                                                │
//! │                        └──credit── IN_TRANSIT                           │
//! │                      RFID / SOLD ──migrate──► NON_REUSABLE_LABEL        │
//! │                                                                         │
//! │  epc NULL            PENDING bucket per (sku, location, pool);          │
//! │                      row removed when qty reaches 0                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Preconditions that fail (unit not on the shelf, bucket too small, EPC
//! already issued) come back as [`DbError::Rejected`] with a reason code.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use mercato_core::machines::inventory_count::{ExpectedStock, KnownEpc};
use mercato_core::{
    CoreError, Disposition, MigrateTarget, ReasonCode, StockOp, StockSelector, StockStatus,
    UnitRef,
};

/// One `(sku, location, pool)` cell of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StockScope {
    pub sku: String,
    pub location_id: String,
    pub pool: String,
}

impl StockScope {
    fn new(sku: &str, location_id: &str, pool: &str) -> Self {
        StockScope {
            sku: sku.to_string(),
            location_id: location_id.to_string(),
            pool: pool.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StockUnit {
    pub id: String,
    pub tenant_id: String,
    pub sku: String,
    pub epc: Option<String>,
    pub location_id: String,
    pub pool: String,
    pub status: StockStatus,
    pub qty: i64,
    pub updated_at: DateTime<Utc>,
}

/// Advertised level of one ledger cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct StockLevel {
    pub sku: String,
    pub location_id: String,
    pub pool: String,
    pub total: i64,
    pub rfid: i64,
    pub pending: i64,
}

/// Optional filters for [`StockLedger::levels`].
#[derive(Debug, Clone, Default)]
pub struct LevelFilter {
    pub sku: Option<String>,
    pub location_id: Option<String>,
    pub pool: Option<String>,
}

fn unavailable(message: String) -> DbError {
    DbError::Rejected(CoreError::rule(ReasonCode::UnitNotAvailable, message))
}

pub struct StockLedger<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> StockLedger<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        StockLedger { conn }
    }

    // =========================================================================
    // Apply
    // =========================================================================

    /// Applies one operation and returns the cells it touched.
    pub async fn apply(
        &mut self,
        tenant_id: &str,
        op: &StockOp,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<StockScope>> {
        debug!(tenant_id = %tenant_id, ?op, "Applying stock op");
        match op {
            StockOp::Debit {
                selector,
                qty,
                disposition,
            } => self.debit(tenant_id, selector, *qty, *disposition, now).await,
            StockOp::Credit { selector, qty } => self.credit(tenant_id, selector, *qty, now).await,
            StockOp::Register {
                epc,
                sku,
                location_id,
                pool,
            } => self
                .register(tenant_id, epc, sku, location_id, pool, now)
                .await
                .map(|scope| vec![scope]),
            StockOp::Migrate { epc, target, pool } => {
                self.migrate(tenant_id, epc, target, pool.as_deref(), now).await
            }
            StockOp::WriteOff { epc } => {
                self.write_off(tenant_id, epc, now).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn debit(
        &mut self,
        tenant_id: &str,
        selector: &StockSelector,
        qty: i64,
        disposition: Disposition,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<StockScope>> {
        match &selector.unit {
            UnitRef::Epc(epc) => {
                let unit = self.shelf_unit(tenant_id, epc, selector, qty).await?;
                self.set_status(&unit.id, disposition.status(), &unit.location_id, &unit.pool, now)
                    .await?;
                self.adjust_total(tenant_id, &unit.sku, &selector.location_id, &selector.pool, -1, now)
                    .await?;
                Ok(vec![StockScope::new(&unit.sku, &selector.location_id, &selector.pool)])
            }
            UnitRef::Sku(sku) => {
                let available = self
                    .bucket_qty(tenant_id, sku, &selector.location_id, &selector.pool)
                    .await?;
                if available < qty {
                    return Err(DbError::Rejected(CoreError::rule(
                        ReasonCode::InsufficientStock,
                        format!(
                            "SKU {sku} has {available} PENDING at {}/{}, {qty} requested",
                            selector.location_id, selector.pool
                        ),
                    )));
                }
                self.bucket_add(tenant_id, sku, &selector.location_id, &selector.pool, -qty, now)
                    .await?;
                self.adjust_total(tenant_id, sku, &selector.location_id, &selector.pool, -qty, now)
                    .await?;
                Ok(vec![StockScope::new(sku, &selector.location_id, &selector.pool)])
            }
        }
    }

    async fn credit(
        &mut self,
        tenant_id: &str,
        selector: &StockSelector,
        qty: i64,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<StockScope>> {
        match &selector.unit {
            UnitRef::Epc(epc) => {
                let unit = self
                    .find_epc(tenant_id, epc)
                    .await?
                    .ok_or_else(|| unavailable(format!("EPC {epc} is not registered")))?;
                if unit.status != StockStatus::InTransit {
                    return Err(unavailable(format!(
                        "EPC {epc} is {} and cannot be received",
                        unit.status
                    )));
                }
                self.set_status(&unit.id, StockStatus::Rfid, &selector.location_id, &selector.pool, now)
                    .await?;
                self.adjust_total(tenant_id, &unit.sku, &selector.location_id, &selector.pool, 1, now)
                    .await?;
                Ok(vec![StockScope::new(&unit.sku, &selector.location_id, &selector.pool)])
            }
            UnitRef::Sku(sku) => {
                self.bucket_add(tenant_id, sku, &selector.location_id, &selector.pool, qty, now)
                    .await?;
                self.adjust_total(tenant_id, sku, &selector.location_id, &selector.pool, qty, now)
                    .await?;
                Ok(vec![StockScope::new(sku, &selector.location_id, &selector.pool)])
            }
        }
    }

    /// Issues a never-seen EPC as an RFID unit.
    async fn register(
        &mut self,
        tenant_id: &str,
        epc: &str,
        sku: &str,
        location_id: &str,
        pool: &str,
        now: DateTime<Utc>,
    ) -> DbResult<StockScope> {
        if let Some(existing) = self.find_epc(tenant_id, epc).await? {
            return Err(DbError::Rejected(CoreError::rule(
                ReasonCode::DuplicateUnit,
                format!("EPC {epc} was already issued (currently {})", existing.status),
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO stock_units (id, tenant_id, sku, epc, location_id, pool, status, qty, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'RFID', 1, ?7)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(sku)
        .bind(epc)
        .bind(location_id)
        .bind(pool)
        .bind(now)
        .execute(&mut *self.conn)
        .await?;

        self.adjust_total(tenant_id, sku, location_id, pool, 1, now).await?;
        Ok(StockScope::new(sku, location_id, pool))
    }

    /// Retires an RFID or SOLD label and re-homes the unit at the same
    /// location, in `pool_override` when given.
    async fn migrate(
        &mut self,
        tenant_id: &str,
        epc: &str,
        target: &MigrateTarget,
        pool_override: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<StockScope>> {
        let unit = self
            .find_epc(tenant_id, epc)
            .await?
            .ok_or_else(|| unavailable(format!("EPC {epc} is not registered")))?;
        if !matches!(unit.status, StockStatus::Rfid | StockStatus::Sold) {
            return Err(unavailable(format!(
                "EPC {epc} is {} and cannot be migrated",
                unit.status
            )));
        }

        let mut touched = Vec::new();
        self.set_status(
            &unit.id,
            StockStatus::NonReusableLabel,
            &unit.location_id,
            &unit.pool,
            now,
        )
        .await?;
        if unit.status == StockStatus::Rfid {
            self.adjust_total(tenant_id, &unit.sku, &unit.location_id, &unit.pool, -1, now)
                .await?;
            touched.push(StockScope::new(&unit.sku, &unit.location_id, &unit.pool));
        }

        let pool = pool_override.unwrap_or(&unit.pool);
        match target {
            MigrateTarget::Pending => {
                self.bucket_add(tenant_id, &unit.sku, &unit.location_id, pool, 1, now)
                    .await?;
                self.adjust_total(tenant_id, &unit.sku, &unit.location_id, pool, 1, now)
                    .await?;
                touched.push(StockScope::new(&unit.sku, &unit.location_id, pool));
            }
            MigrateTarget::Rfid { new_epc } => {
                let scope = self
                    .register(tenant_id, new_epc, &unit.sku, &unit.location_id, pool, now)
                    .await?;
                touched.push(scope);
            }
        }
        Ok(touched)
    }

    async fn write_off(&mut self, tenant_id: &str, epc: &str, now: DateTime<Utc>) -> DbResult<()> {
        let unit = self
            .find_epc(tenant_id, epc)
            .await?
            .ok_or_else(|| unavailable(format!("EPC {epc} is not registered")))?;
        if unit.status != StockStatus::InTransit {
            return Err(unavailable(format!(
                "EPC {epc} is {} and cannot be written off",
                unit.status
            )));
        }
        self.set_status(&unit.id, StockStatus::Lost, &unit.location_id, &unit.pool, now)
            .await
    }

    // =========================================================================
    // Row helpers
    // =========================================================================

    /// The EPC row, provided it is RFID exactly where the selector says.
    async fn shelf_unit(
        &mut self,
        tenant_id: &str,
        epc: &str,
        selector: &StockSelector,
        qty: i64,
    ) -> DbResult<StockUnit> {
        if qty != 1 {
            return Err(DbError::Rejected(CoreError::rule(
                ReasonCode::InvalidInput,
                format!("EPC {epc} quantity must be 1"),
            )));
        }
        let unit = self
            .find_epc(tenant_id, epc)
            .await?
            .ok_or_else(|| unavailable(format!("EPC {epc} is not registered")))?;
        if unit.status != StockStatus::Rfid
            || unit.location_id != selector.location_id
            || unit.pool != selector.pool
        {
            return Err(unavailable(format!(
                "EPC {epc} is {} at {}/{}, expected RFID at {}/{}",
                unit.status, unit.location_id, unit.pool, selector.location_id, selector.pool
            )));
        }
        Ok(unit)
    }

    async fn set_status(
        &mut self,
        unit_id: &str,
        status: StockStatus,
        location_id: &str,
        pool: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE stock_units SET status = ?1, location_id = ?2, pool = ?3, updated_at = ?4 WHERE id = ?5",
        )
        .bind(status)
        .bind(location_id)
        .bind(pool)
        .bind(now)
        .bind(unit_id)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// Adds `delta` to the PENDING bucket, creating or removing the row.
    async fn bucket_add(
        &mut self,
        tenant_id: &str,
        sku: &str,
        location_id: &str,
        pool: &str,
        delta: i64,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let current = self.bucket_qty(tenant_id, sku, location_id, pool).await?;
        let next = current + delta;
        if next < 0 {
            return Err(DbError::InvariantViolation(format!(
                "PENDING bucket {sku} at {location_id}/{pool} would go negative"
            )));
        }

        let query = match (current, next) {
            (_, 0) => sqlx::query(
                "DELETE FROM stock_units WHERE tenant_id = ?1 AND sku = ?2 AND location_id = ?3 AND pool = ?4 AND epc IS NULL",
            ),
            (0, _) => sqlx::query(
                r#"
                INSERT INTO stock_units (tenant_id, sku, location_id, pool, qty, updated_at, id, epc, status)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, 'PENDING')
                "#,
            ),
            _ => sqlx::query(
                r#"
                UPDATE stock_units SET qty = ?5, updated_at = ?6
                WHERE tenant_id = ?1 AND sku = ?2 AND location_id = ?3 AND pool = ?4 AND epc IS NULL
                "#,
            ),
        };

        let mut query = query.bind(tenant_id).bind(sku).bind(location_id).bind(pool);
        if next != 0 {
            query = query.bind(next).bind(now);
            if current == 0 {
                query = query.bind(Uuid::new_v4().to_string());
            }
        }
        query.execute(&mut *self.conn).await?;
        Ok(())
    }

    async fn adjust_total(
        &mut self,
        tenant_id: &str,
        sku: &str,
        location_id: &str,
        pool: &str,
        delta: i64,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE stock_totals SET total = total + ?5, updated_at = ?6
            WHERE tenant_id = ?1 AND sku = ?2 AND location_id = ?3 AND pool = ?4
            "#,
        )
        .bind(tenant_id)
        .bind(sku)
        .bind(location_id)
        .bind(pool)
        .bind(delta)
        .bind(now)
        .execute(&mut *self.conn)
        .await?
        .rows_affected();

        if updated == 0 {
            sqlx::query(
                r#"
                INSERT INTO stock_totals (tenant_id, sku, location_id, pool, total, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(tenant_id)
            .bind(sku)
            .bind(location_id)
            .bind(pool)
            .bind(delta)
            .bind(now)
            .execute(&mut *self.conn)
            .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn find_epc(&mut self, tenant_id: &str, epc: &str) -> DbResult<Option<StockUnit>> {
        let unit = sqlx::query_as::<_, StockUnit>(
            r#"
            SELECT id, tenant_id, sku, epc, location_id, pool, status, qty, updated_at
            FROM stock_units WHERE tenant_id = ?1 AND epc = ?2
            "#,
        )
        .bind(tenant_id)
        .bind(epc)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(unit)
    }

    pub async fn bucket_qty(
        &mut self,
        tenant_id: &str,
        sku: &str,
        location_id: &str,
        pool: &str,
    ) -> DbResult<i64> {
        let qty: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT qty FROM stock_units
            WHERE tenant_id = ?1 AND sku = ?2 AND location_id = ?3 AND pool = ?4 AND epc IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(sku)
        .bind(location_id)
        .bind(pool)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(qty.unwrap_or(0))
    }

    /// Ledger rows of the given EPCs, keyed by EPC. Unknown EPCs are absent.
    pub async fn known_epcs(&mut self, tenant_id: &str, epcs: &[&str]) -> DbResult<HashMap<String, KnownEpc>> {
        let mut known = HashMap::new();
        for &epc in epcs {
            if let Some(unit) = self.find_epc(tenant_id, epc).await? {
                known.insert(
                    epc.to_string(),
                    KnownEpc {
                        sku: unit.sku,
                        status: unit.status,
                        location_id: unit.location_id,
                        pool: unit.pool,
                    },
                );
            }
        }
        Ok(known)
    }

    /// RFID units and PENDING buckets currently at `(location, pool)`.
    pub async fn expected_at(
        &mut self,
        tenant_id: &str,
        location_id: &str,
        pool: &str,
    ) -> DbResult<ExpectedStock> {
        let rows: Vec<(String, Option<String>, i64)> = sqlx::query_as(
            r#"
            SELECT sku, epc, qty FROM stock_units
            WHERE tenant_id = ?1 AND location_id = ?2 AND pool = ?3 AND status IN ('RFID', 'PENDING')
            "#,
        )
        .bind(tenant_id)
        .bind(location_id)
        .bind(pool)
        .fetch_all(&mut *self.conn)
        .await?;

        let mut epcs = BTreeMap::new();
        let mut buckets = BTreeMap::new();
        for (sku, epc, qty) in rows {
            match epc {
                Some(epc) => {
                    epcs.insert(epc, sku);
                }
                None => {
                    buckets.insert(sku, qty);
                }
            }
        }
        Ok(ExpectedStock { epcs, buckets })
    }

    pub async fn levels(&mut self, tenant_id: &str, filter: &LevelFilter) -> DbResult<Vec<StockLevel>> {
        let levels = sqlx::query_as::<_, StockLevel>(
            r#"
            SELECT t.sku, t.location_id, t.pool, t.total,
                   (SELECT COUNT(*) FROM stock_units u
                     WHERE u.tenant_id = t.tenant_id AND u.sku = t.sku
                       AND u.location_id = t.location_id AND u.pool = t.pool
                       AND u.status = 'RFID') AS rfid,
                   (SELECT COALESCE(SUM(u.qty), 0) FROM stock_units u
                     WHERE u.tenant_id = t.tenant_id AND u.sku = t.sku
                       AND u.location_id = t.location_id AND u.pool = t.pool
                       AND u.status = 'PENDING') AS pending
            FROM stock_totals t
            WHERE t.tenant_id = ?1
              AND (?2 IS NULL OR t.sku = ?2)
              AND (?3 IS NULL OR t.location_id = ?3)
              AND (?4 IS NULL OR t.pool = ?4)
            ORDER BY t.location_id, t.pool, t.sku
            "#,
        )
        .bind(tenant_id)
        .bind(filter.sku.as_deref())
        .bind(filter.location_id.as_deref())
        .bind(filter.pool.as_deref())
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(levels)
    }

    // =========================================================================
    // Invariant
    // =========================================================================

    /// Checks `TOTAL == RFID + PENDING` for one cell.
    pub async fn verify(&mut self, tenant_id: &str, scope: &StockScope) -> DbResult<()> {
        let (total, rfid, pending): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE((SELECT total FROM stock_totals
                           WHERE tenant_id = ?1 AND sku = ?2 AND location_id = ?3 AND pool = ?4), 0),
                (SELECT COUNT(*) FROM stock_units
                  WHERE tenant_id = ?1 AND sku = ?2 AND location_id = ?3 AND pool = ?4
                    AND status = 'RFID'),
                (SELECT COALESCE(SUM(qty), 0) FROM stock_units
                  WHERE tenant_id = ?1 AND sku = ?2 AND location_id = ?3 AND pool = ?4
                    AND status = 'PENDING')
            "#,
        )
        .bind(tenant_id)
        .bind(&scope.sku)
        .bind(&scope.location_id)
        .bind(&scope.pool)
        .fetch_one(&mut *self.conn)
        .await?;

        if total != rfid + pending {
            error!(
                tenant_id = %tenant_id,
                sku = %scope.sku,
                location_id = %scope.location_id,
                pool = %scope.pool,
                total, rfid, pending,
                "Stock total out of balance"
            );
            return Err(DbError::InvariantViolation(format!(
                "TOTAL {total} != RFID {rfid} + PENDING {pending} for {} at {}/{}",
                scope.sku, scope.location_id, scope.pool
            )));
        }
        Ok(())
    }

    /// Verifies every distinct cell in `scopes`.
    pub async fn verify_all<'s>(
        &mut self,
        tenant_id: &str,
        scopes: impl IntoIterator<Item = &'s StockScope>,
    ) -> DbResult<()> {
        let mut seen = std::collections::BTreeSet::new();
        for scope in scopes {
            if seen.insert(scope) {
                self.verify(tenant_id, scope).await?;
            }
        }
        Ok(())
    }
}
