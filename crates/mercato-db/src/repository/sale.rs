//! # Sale Repository
//!
//! Database operations for POS sales.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE DRAFT        insert()       header + lines                   │
//! │  2. EDIT LINES          save()         lines rewritten                  │
//! │  3. CHECKOUT            save()         status PAID + tenders            │
//! │  4. REFUND / EXCHANGE   save()         returned_qty + adjustment row    │
//! │     (or CANCEL while DRAFT)                                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Adjustments are append-only: `save()` inserts the ones it has not seen and
//! never rewrites an existing row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use mercato_core::machines::sale::{
    AdjustmentKind, LineOrigin, PaymentInput, ReturnedItem, Sale, SaleAdjustment, SaleLine,
    SaleStatus, SaleTotals,
};
use mercato_core::{Money, PaymentMethod};

#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    id: String,
    tenant_id: String,
    store_id: String,
    cashier_id: String,
    receipt_number: String,
    pool: String,
    status: SaleStatus,
    subtotal: Money,
    discount_total: Money,
    total_due: Money,
    change_due: Money,
    created_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    canceled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct LineRow {
    id: String,
    line_no: i64,
    sku: String,
    epc: Option<String>,
    qty: i64,
    unit_price: Money,
    discount: Money,
    returned_qty: i64,
    origin: LineOrigin,
}

impl From<LineRow> for SaleLine {
    fn from(row: LineRow) -> Self {
        SaleLine {
            id: row.id,
            line_no: row.line_no,
            sku: row.sku,
            epc: row.epc,
            qty: row.qty,
            unit_price: row.unit_price,
            discount: row.discount,
            returned_qty: row.returned_qty,
            origin: row.origin,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AdjustmentRow {
    id: String,
    kind: AdjustmentKind,
    returned_subtotal: Money,
    restocking_fee: Money,
    refund_amount: Money,
    new_items_total: Money,
    net_adjustment: Money,
    refund_method: Option<PaymentMethod>,
    manager_override: bool,
    detail_json: String,
    created_at: DateTime<Utc>,
}

/// List-valued parts of an adjustment, kept as one JSON column.
#[derive(Debug, Serialize, Deserialize)]
struct AdjustmentDetail {
    returned: Vec<ReturnedItem>,
    added_line_ids: Vec<String>,
    payments: Vec<PaymentInput>,
}

impl TryFrom<AdjustmentRow> for SaleAdjustment {
    type Error = DbError;

    fn try_from(row: AdjustmentRow) -> Result<Self, Self::Error> {
        let detail: AdjustmentDetail = serde_json::from_str(&row.detail_json)?;
        Ok(SaleAdjustment {
            id: row.id,
            kind: row.kind,
            returned: detail.returned,
            added_line_ids: detail.added_line_ids,
            returned_subtotal: row.returned_subtotal,
            restocking_fee: row.restocking_fee,
            refund_amount: row.refund_amount,
            new_items_total: row.new_items_total,
            net_adjustment: row.net_adjustment,
            refund_method: row.refund_method,
            payments: detail.payments,
            manager_override: row.manager_override,
            created_at: row.created_at,
        })
    }
}

pub struct SaleRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SaleRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        SaleRepository { conn }
    }

    /// Next receipt number for a store: `<store>-000001`, `<store>-000002`, ...
    ///
    /// Only safe inside a unit of work, which serializes writers.
    pub async fn next_receipt_number(&mut self, tenant_id: &str, store_id: &str) -> DbResult<String> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pos_sales WHERE tenant_id = ?1 AND store_id = ?2")
                .bind(tenant_id)
                .bind(store_id)
                .fetch_one(&mut *self.conn)
                .await?;
        Ok(format!("{}-{:06}", store_id, count + 1))
    }

    pub async fn insert(&mut self, sale: &Sale, now: DateTime<Utc>) -> DbResult<()> {
        debug!(id = %sale.id, receipt_number = %sale.receipt_number, "Inserting sale");

        sqlx::query(
            r#"
            INSERT INTO pos_sales (
                id, tenant_id, store_id, cashier_id, receipt_number, pool, status,
                subtotal, discount_total, total_due, change_due,
                created_at, paid_at, canceled_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.tenant_id)
        .bind(&sale.store_id)
        .bind(&sale.cashier_id)
        .bind(&sale.receipt_number)
        .bind(&sale.pool)
        .bind(sale.status)
        .bind(sale.totals.subtotal)
        .bind(sale.totals.discount_total)
        .bind(sale.totals.total_due)
        .bind(sale.change_due)
        .bind(sale.created_at)
        .bind(sale.paid_at)
        .bind(sale.canceled_at)
        .bind(now)
        .execute(&mut *self.conn)
        .await?;

        self.write_children(sale).await
    }

    /// Writes the header, rewrites lines and tenders, appends new adjustments.
    pub async fn save(&mut self, sale: &Sale, now: DateTime<Utc>) -> DbResult<()> {
        debug!(id = %sale.id, status = %sale.status, "Saving sale");

        let updated = sqlx::query(
            r#"
            UPDATE pos_sales
            SET status = ?1, subtotal = ?2, discount_total = ?3, total_due = ?4,
                change_due = ?5, paid_at = ?6, canceled_at = ?7, updated_at = ?8
            WHERE id = ?9 AND tenant_id = ?10
            "#,
        )
        .bind(sale.status)
        .bind(sale.totals.subtotal)
        .bind(sale.totals.discount_total)
        .bind(sale.totals.total_due)
        .bind(sale.change_due)
        .bind(sale.paid_at)
        .bind(sale.canceled_at)
        .bind(now)
        .bind(&sale.id)
        .bind(&sale.tenant_id)
        .execute(&mut *self.conn)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(DbError::not_found("Sale", &sale.id));
        }

        sqlx::query("DELETE FROM pos_sale_lines WHERE sale_id = ?1")
            .bind(&sale.id)
            .execute(&mut *self.conn)
            .await?;
        sqlx::query("DELETE FROM pos_sale_payments WHERE sale_id = ?1")
            .bind(&sale.id)
            .execute(&mut *self.conn)
            .await?;

        self.write_children(sale).await
    }

    async fn write_children(&mut self, sale: &Sale) -> DbResult<()> {
        for line in &sale.lines {
            sqlx::query(
                r#"
                INSERT INTO pos_sale_lines (
                    id, sale_id, line_no, sku, epc, qty, unit_price, discount, returned_qty, origin
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(&line.id)
            .bind(&sale.id)
            .bind(line.line_no)
            .bind(&line.sku)
            .bind(&line.epc)
            .bind(line.qty)
            .bind(line.unit_price)
            .bind(line.discount)
            .bind(line.returned_qty)
            .bind(line.origin)
            .execute(&mut *self.conn)
            .await?;
        }

        for (seq, payment) in sale.payments.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO pos_sale_payments (sale_id, seq, method, amount, payment_json)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(&sale.id)
            .bind(seq as i64)
            .bind(payment.method())
            .bind(payment.amount())
            .bind(serde_json::to_string(payment)?)
            .execute(&mut *self.conn)
            .await?;
        }

        for adjustment in &sale.adjustments {
            let detail = AdjustmentDetail {
                returned: adjustment.returned.clone(),
                added_line_ids: adjustment.added_line_ids.clone(),
                payments: adjustment.payments.clone(),
            };
            sqlx::query(
                r#"
                INSERT INTO pos_sale_adjustments (
                    id, sale_id, kind, returned_subtotal, restocking_fee, refund_amount,
                    new_items_total, net_adjustment, refund_method, manager_override,
                    detail_json, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&adjustment.id)
            .bind(&sale.id)
            .bind(adjustment.kind)
            .bind(adjustment.returned_subtotal)
            .bind(adjustment.restocking_fee)
            .bind(adjustment.refund_amount)
            .bind(adjustment.new_items_total)
            .bind(adjustment.net_adjustment)
            .bind(adjustment.refund_method)
            .bind(adjustment.manager_override)
            .bind(serde_json::to_string(&detail)?)
            .bind(adjustment.created_at)
            .execute(&mut *self.conn)
            .await?;
        }
        Ok(())
    }

    pub async fn get(&mut self, tenant_id: &str, id: &str) -> DbResult<Option<Sale>> {
        let row = sqlx::query_as::<_, SaleRow>(
            r#"
            SELECT id, tenant_id, store_id, cashier_id, receipt_number, pool, status,
                   subtotal, discount_total, total_due, change_due,
                   created_at, paid_at, canceled_at
            FROM pos_sales WHERE id = ?1 AND tenant_id = ?2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&mut *self.conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, LineRow>(
            r#"
            SELECT id, line_no, sku, epc, qty, unit_price, discount, returned_qty, origin
            FROM pos_sale_lines WHERE sale_id = ?1 ORDER BY line_no
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.conn)
        .await?
        .into_iter()
        .map(SaleLine::from)
        .collect();

        let payment_json: Vec<String> = sqlx::query_scalar(
            "SELECT payment_json FROM pos_sale_payments WHERE sale_id = ?1 ORDER BY seq",
        )
        .bind(id)
        .fetch_all(&mut *self.conn)
        .await?;
        let payments = payment_json
            .iter()
            .map(|json| serde_json::from_str::<PaymentInput>(json))
            .collect::<Result<Vec<_>, _>>()?;

        let adjustments = sqlx::query_as::<_, AdjustmentRow>(
            r#"
            SELECT id, kind, returned_subtotal, restocking_fee, refund_amount, new_items_total,
                   net_adjustment, refund_method, manager_override, detail_json, created_at
            FROM pos_sale_adjustments WHERE sale_id = ?1 ORDER BY created_at, rowid
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.conn)
        .await?
        .into_iter()
        .map(SaleAdjustment::try_from)
        .collect::<DbResult<Vec<_>>>()?;

        Ok(Some(Sale {
            id: row.id,
            tenant_id: row.tenant_id,
            store_id: row.store_id,
            cashier_id: row.cashier_id,
            receipt_number: row.receipt_number,
            pool: row.pool,
            status: row.status,
            lines,
            totals: SaleTotals {
                subtotal: row.subtotal,
                discount_total: row.discount_total,
                total_due: row.total_due,
            },
            payments,
            change_due: row.change_due,
            adjustments,
            created_at: row.created_at,
            paid_at: row.paid_at,
            canceled_at: row.canceled_at,
        }))
    }
}
