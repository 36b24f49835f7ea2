//! # Inventory Count Repository
//!
//! Count headers, the per-store count lock, raw scans and the deltas
//! written at reconciliation.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use mercato_core::machines::inventory_count::{
    CountDelta, CountStatus, DeltaKind, InventoryCount, ScanItem,
};
use mercato_core::{CoreError, ReasonCode};

#[derive(Debug, sqlx::FromRow)]
struct CountRow {
    id: String,
    tenant_id: String,
    store_id: String,
    pool: String,
    name: String,
    status: CountStatus,
    scan_count: i64,
    created_by: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    reconciled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct DeltaRow {
    kind: DeltaKind,
    sku: String,
    epc: Option<String>,
    expected_qty: i64,
    counted_qty: i64,
    delta: i64,
}

impl From<DeltaRow> for CountDelta {
    fn from(row: DeltaRow) -> Self {
        CountDelta {
            kind: row.kind,
            sku: row.sku,
            epc: row.epc,
            expected_qty: row.expected_qty,
            counted_qty: row.counted_qty,
            delta: row.delta,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ScanRow {
    sku: String,
    epc: Option<String>,
    qty: i64,
}

pub struct CountRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> CountRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        CountRepository { conn }
    }

    pub async fn insert(&mut self, count: &InventoryCount) -> DbResult<()> {
        debug!(id = %count.id, store_id = %count.store_id, "Inserting inventory count");

        sqlx::query(
            r#"
            INSERT INTO inventory_counts (
                id, tenant_id, store_id, pool, name, status, scan_count,
                created_by, created_at, started_at, closed_at, reconciled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&count.id)
        .bind(&count.tenant_id)
        .bind(&count.store_id)
        .bind(&count.pool)
        .bind(&count.name)
        .bind(count.status)
        .bind(count.scan_count)
        .bind(&count.created_by)
        .bind(count.created_at)
        .bind(count.started_at)
        .bind(count.closed_at)
        .bind(count.reconciled_at)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// Writes status, scan counter and timestamps. Deltas go through
    /// [`CountRepository::insert_deltas`].
    pub async fn update(&mut self, count: &InventoryCount) -> DbResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE inventory_counts
            SET status = ?1, scan_count = ?2, started_at = ?3, closed_at = ?4, reconciled_at = ?5
            WHERE id = ?6 AND tenant_id = ?7
            "#,
        )
        .bind(count.status)
        .bind(count.scan_count)
        .bind(count.started_at)
        .bind(count.closed_at)
        .bind(count.reconciled_at)
        .bind(&count.id)
        .bind(&count.tenant_id)
        .execute(&mut *self.conn)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(DbError::not_found("InventoryCount", &count.id));
        }
        Ok(())
    }

    pub async fn get(&mut self, tenant_id: &str, id: &str) -> DbResult<Option<InventoryCount>> {
        let row = sqlx::query_as::<_, CountRow>(
            r#"
            SELECT id, tenant_id, store_id, pool, name, status, scan_count,
                   created_by, created_at, started_at, closed_at, reconciled_at
            FROM inventory_counts WHERE id = ?1 AND tenant_id = ?2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&mut *self.conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let deltas = sqlx::query_as::<_, DeltaRow>(
            r#"
            SELECT kind, sku, epc, expected_qty, counted_qty, delta
            FROM inventory_count_deltas WHERE count_id = ?1 ORDER BY id
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.conn)
        .await?
        .into_iter()
        .map(CountDelta::from)
        .collect();

        Ok(Some(InventoryCount {
            id: row.id,
            tenant_id: row.tenant_id,
            store_id: row.store_id,
            pool: row.pool,
            name: row.name,
            status: row.status,
            scan_count: row.scan_count,
            deltas,
            created_by: row.created_by,
            created_at: row.created_at,
            started_at: row.started_at,
            closed_at: row.closed_at,
            reconciled_at: row.reconciled_at,
        }))
    }

    // =========================================================================
    // Store lock
    // =========================================================================

    pub async fn acquire_lock(&mut self, count: &InventoryCount, now: DateTime<Utc>) -> DbResult<()> {
        debug!(count_id = %count.id, store_id = %count.store_id, "Acquiring store count lock");

        sqlx::query(
            r#"
            INSERT INTO inventory_count_locks (tenant_id, store_id, count_id, acquired_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&count.tenant_id)
        .bind(&count.store_id)
        .bind(&count.id)
        .bind(now)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| match DbError::from(e) {
            err if err.is_unique_violation() => DbError::Rejected(CoreError::rule(
                ReasonCode::StoreLocked,
                format!("store {} is locked by another count", count.store_id),
            )),
            err => err,
        })?;
        Ok(())
    }

    pub async fn release_lock(&mut self, count: &InventoryCount) -> DbResult<()> {
        debug!(count_id = %count.id, store_id = %count.store_id, "Releasing store count lock");

        sqlx::query(
            "DELETE FROM inventory_count_locks WHERE tenant_id = ?1 AND store_id = ?2 AND count_id = ?3",
        )
        .bind(&count.tenant_id)
        .bind(&count.store_id)
        .bind(&count.id)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// Id of the count holding the store, if any.
    pub async fn lock_holder(&mut self, tenant_id: &str, store_id: &str) -> DbResult<Option<String>> {
        let holder = sqlx::query_scalar(
            "SELECT count_id FROM inventory_count_locks WHERE tenant_id = ?1 AND store_id = ?2",
        )
        .bind(tenant_id)
        .bind(store_id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(holder)
    }

    // =========================================================================
    // Scans and deltas
    // =========================================================================

    pub async fn insert_scans(
        &mut self,
        count_id: &str,
        items: &[ScanItem],
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        for item in items {
            sqlx::query(
                "INSERT INTO inventory_count_scans (count_id, sku, epc, qty, scanned_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(count_id)
            .bind(&item.sku)
            .bind(&item.epc)
            .bind(item.qty)
            .bind(now)
            .execute(&mut *self.conn)
            .await?;
        }
        Ok(())
    }

    pub async fn scans(&mut self, count_id: &str) -> DbResult<Vec<ScanItem>> {
        let rows = sqlx::query_as::<_, ScanRow>(
            "SELECT sku, epc, qty FROM inventory_count_scans WHERE count_id = ?1 ORDER BY id",
        )
        .bind(count_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ScanItem {
                sku: r.sku,
                epc: r.epc,
                qty: r.qty,
            })
            .collect())
    }

    pub async fn insert_deltas(&mut self, count_id: &str, deltas: &[CountDelta]) -> DbResult<()> {
        for delta in deltas {
            sqlx::query(
                r#"
                INSERT INTO inventory_count_deltas (count_id, kind, sku, epc, expected_qty, counted_qty, delta)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(count_id)
            .bind(delta.kind)
            .bind(&delta.sku)
            .bind(&delta.epc)
            .bind(delta.expected_qty)
            .bind(delta.counted_qty)
            .bind(delta.delta)
            .execute(&mut *self.conn)
            .await?;
        }
        Ok(())
    }
}
