//! # Transfer Repository
//!
//! Persists [`Transfer`] headers and their lines. Quantities are written
//! exactly as the state machine computed them; the table constraints
//! re-check conservation on every write.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use mercato_core::machines::transfer::{Transfer, TransferLine, TransferStatus};
use mercato_core::UnitRef;

#[derive(Debug, sqlx::FromRow)]
struct TransferRow {
    id: String,
    tenant_id: String,
    origin_store_id: String,
    destination_store_id: String,
    pool: String,
    status: TransferStatus,
    created_at: DateTime<Utc>,
    dispatched_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct LineRow {
    id: String,
    line_no: i64,
    unit_kind: String,
    unit_value: String,
    qty: i64,
    dispatched_qty: i64,
    received_qty: i64,
    outstanding_qty: i64,
    shortage_qty: i64,
    lost_qty: i64,
}

impl TryFrom<LineRow> for TransferLine {
    type Error = DbError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        let unit = match row.unit_kind.as_str() {
            "EPC" => UnitRef::Epc(row.unit_value),
            "SKU" => UnitRef::Sku(row.unit_value),
            other => {
                return Err(DbError::Internal(format!(
                    "transfer line {} has unit kind {other}",
                    row.id
                )))
            }
        };
        Ok(TransferLine {
            id: row.id,
            line_no: row.line_no,
            unit,
            qty: row.qty,
            dispatched_qty: row.dispatched_qty,
            received_qty: row.received_qty,
            outstanding_qty: row.outstanding_qty,
            shortage_qty: row.shortage_qty,
            lost_qty: row.lost_qty,
        })
    }
}

fn unit_columns(unit: &UnitRef) -> (&'static str, &str) {
    match unit {
        UnitRef::Epc(epc) => ("EPC", epc),
        UnitRef::Sku(sku) => ("SKU", sku),
    }
}

pub struct TransferRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> TransferRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        TransferRepository { conn }
    }

    pub async fn insert(&mut self, transfer: &Transfer, now: DateTime<Utc>) -> DbResult<()> {
        debug!(id = %transfer.id, lines = transfer.lines.len(), "Inserting transfer");

        sqlx::query(
            r#"
            INSERT INTO transfers (
                id, tenant_id, origin_store_id, destination_store_id, pool, status,
                created_at, dispatched_at, completed_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&transfer.id)
        .bind(&transfer.tenant_id)
        .bind(&transfer.origin_store_id)
        .bind(&transfer.destination_store_id)
        .bind(&transfer.pool)
        .bind(transfer.status)
        .bind(transfer.created_at)
        .bind(transfer.dispatched_at)
        .bind(transfer.completed_at)
        .bind(now)
        .execute(&mut *self.conn)
        .await?;

        for line in &transfer.lines {
            let (kind, value) = unit_columns(&line.unit);
            sqlx::query(
                r#"
                INSERT INTO transfer_lines (
                    id, transfer_id, line_no, unit_kind, unit_value, qty,
                    dispatched_qty, received_qty, outstanding_qty, shortage_qty, lost_qty
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )
            .bind(&line.id)
            .bind(&transfer.id)
            .bind(line.line_no)
            .bind(kind)
            .bind(value)
            .bind(line.qty)
            .bind(line.dispatched_qty)
            .bind(line.received_qty)
            .bind(line.outstanding_qty)
            .bind(line.shortage_qty)
            .bind(line.lost_qty)
            .execute(&mut *self.conn)
            .await?;
        }
        Ok(())
    }

    /// Writes status, timestamps and line quantities.
    pub async fn update(&mut self, transfer: &Transfer, now: DateTime<Utc>) -> DbResult<()> {
        debug!(id = %transfer.id, status = %transfer.status, "Updating transfer");

        let updated = sqlx::query(
            r#"
            UPDATE transfers
            SET status = ?1, dispatched_at = ?2, completed_at = ?3, updated_at = ?4
            WHERE id = ?5 AND tenant_id = ?6
            "#,
        )
        .bind(transfer.status)
        .bind(transfer.dispatched_at)
        .bind(transfer.completed_at)
        .bind(now)
        .bind(&transfer.id)
        .bind(&transfer.tenant_id)
        .execute(&mut *self.conn)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(DbError::not_found("Transfer", &transfer.id));
        }

        for line in &transfer.lines {
            sqlx::query(
                r#"
                UPDATE transfer_lines
                SET dispatched_qty = ?1, received_qty = ?2, outstanding_qty = ?3,
                    shortage_qty = ?4, lost_qty = ?5
                WHERE id = ?6 AND transfer_id = ?7
                "#,
            )
            .bind(line.dispatched_qty)
            .bind(line.received_qty)
            .bind(line.outstanding_qty)
            .bind(line.shortage_qty)
            .bind(line.lost_qty)
            .bind(&line.id)
            .bind(&transfer.id)
            .execute(&mut *self.conn)
            .await?;
        }
        Ok(())
    }

    pub async fn get(&mut self, tenant_id: &str, id: &str) -> DbResult<Option<Transfer>> {
        let row = sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT id, tenant_id, origin_store_id, destination_store_id, pool, status,
                   created_at, dispatched_at, completed_at
            FROM transfers WHERE id = ?1 AND tenant_id = ?2
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
            SELECT id, line_no, unit_kind, unit_value, qty, dispatched_qty, received_qty,
                   outstanding_qty, shortage_qty, lost_qty
            FROM transfer_lines WHERE transfer_id = ?1 ORDER BY line_no
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.conn)
        .await?
        .into_iter()
        .map(TransferLine::try_from)
        .collect::<DbResult<Vec<_>>>()?;

        Ok(Some(Transfer {
            id: row.id,
            tenant_id: row.tenant_id,
            origin_store_id: row.origin_store_id,
            destination_store_id: row.destination_store_id,
            pool: row.pool,
            status: row.status,
            lines,
            created_at: row.created_at,
            dispatched_at: row.dispatched_at,
            completed_at: row.completed_at,
        }))
    }
}
