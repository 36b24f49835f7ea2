//! # Cash Repository
//!
//! Cash sessions, their drawer movements and store day closes.
//!
//! Two uniqueness rules live in the schema and surface here as rejections:
//! one OPEN session per cashier per store, one day close per store per
//! business date.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use mercato_core::machines::cash_session::{CashSession, CashSessionStatus, MovementKind};
use mercato_core::machines::day_close::{DayClose, DayCloseSnapshot, ForceCloseMode};
use mercato_core::{CoreError, Money, ReasonCode};

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: String,
    tenant_id: String,
    store_id: String,
    cashier_id: String,
    status: CashSessionStatus,
    business_date: NaiveDate,
    opening_amount: Money,
    expected_cash: Money,
    counted_cash: Option<Money>,
    difference: Option<Money>,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    closed_by_day_close: bool,
}

impl From<SessionRow> for CashSession {
    fn from(row: SessionRow) -> Self {
        CashSession {
            id: row.id,
            tenant_id: row.tenant_id,
            store_id: row.store_id,
            cashier_id: row.cashier_id,
            status: row.status,
            business_date: row.business_date,
            opening_amount: row.opening_amount,
            expected_cash: row.expected_cash,
            counted_cash: row.counted_cash,
            difference: row.difference,
            opened_at: row.opened_at,
            closed_at: row.closed_at,
            closed_by_day_close: row.closed_by_day_close,
        }
    }
}

const SELECT_SESSION: &str = r#"
    SELECT id, tenant_id, store_id, cashier_id, status, business_date, opening_amount,
           expected_cash, counted_cash, difference, opened_at, closed_at, closed_by_day_close
    FROM pos_cash_sessions
"#;

/// One drawer movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CashMovement {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub session_id: String,
    pub kind: MovementKind,
    pub amount: Money,
    pub business_date: NaiveDate,
    pub reason: Option<String>,
    pub sale_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct DayCloseRow {
    id: String,
    tenant_id: String,
    store_id: String,
    business_date: NaiveDate,
    forced: bool,
    reason: Option<String>,
    force_close_mode: Option<ForceCloseMode>,
    snapshot_json: String,
    closed_by: String,
    closed_at: DateTime<Utc>,
}

impl TryFrom<DayCloseRow> for DayClose {
    type Error = DbError;

    fn try_from(row: DayCloseRow) -> Result<Self, Self::Error> {
        let snapshot: DayCloseSnapshot = serde_json::from_str(&row.snapshot_json)?;
        Ok(DayClose {
            id: row.id,
            tenant_id: row.tenant_id,
            store_id: row.store_id,
            business_date: row.business_date,
            forced: row.forced,
            reason: row.reason,
            force_close_mode: row.force_close_mode,
            snapshot,
            closed_by: row.closed_by,
            closed_at: row.closed_at,
        })
    }
}

pub struct CashRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> CashRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        CashRepository { conn }
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub async fn insert_session(&mut self, session: &CashSession) -> DbResult<()> {
        debug!(id = %session.id, cashier_id = %session.cashier_id, "Opening cash session");

        sqlx::query(
            r#"
            INSERT INTO pos_cash_sessions (
                id, tenant_id, store_id, cashier_id, status, business_date, opening_amount,
                expected_cash, counted_cash, difference, opened_at, closed_at, closed_by_day_close
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&session.id)
        .bind(&session.tenant_id)
        .bind(&session.store_id)
        .bind(&session.cashier_id)
        .bind(session.status)
        .bind(session.business_date)
        .bind(session.opening_amount)
        .bind(session.expected_cash)
        .bind(session.counted_cash)
        .bind(session.difference)
        .bind(session.opened_at)
        .bind(session.closed_at)
        .bind(session.closed_by_day_close)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| match DbError::from(e) {
            err if err.is_unique_violation() => DbError::Rejected(CoreError::rule(
                ReasonCode::SessionAlreadyOpen,
                format!(
                    "cashier {} already has an OPEN session at store {}",
                    session.cashier_id, session.store_id
                ),
            )),
            err => err,
        })?;
        Ok(())
    }

    pub async fn update_session(&mut self, session: &CashSession) -> DbResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE pos_cash_sessions
            SET status = ?1, expected_cash = ?2, counted_cash = ?3, difference = ?4,
                closed_at = ?5, closed_by_day_close = ?6
            WHERE id = ?7 AND tenant_id = ?8
            "#,
        )
        .bind(session.status)
        .bind(session.expected_cash)
        .bind(session.counted_cash)
        .bind(session.difference)
        .bind(session.closed_at)
        .bind(session.closed_by_day_close)
        .bind(&session.id)
        .bind(&session.tenant_id)
        .execute(&mut *self.conn)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(DbError::not_found("CashSession", &session.id));
        }
        Ok(())
    }

    pub async fn get_session(&mut self, tenant_id: &str, id: &str) -> DbResult<Option<CashSession>> {
        let sql = format!("{SELECT_SESSION} WHERE id = ?1 AND tenant_id = ?2");
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(row.map(CashSession::from))
    }

    /// The cashier's OPEN session at the store, if any.
    pub async fn find_open_session(
        &mut self,
        tenant_id: &str,
        store_id: &str,
        cashier_id: &str,
    ) -> DbResult<Option<CashSession>> {
        let sql = format!(
            "{SELECT_SESSION} WHERE tenant_id = ?1 AND store_id = ?2 AND cashier_id = ?3 AND status = 'OPEN'"
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(tenant_id)
            .bind(store_id)
            .bind(cashier_id)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(row.map(CashSession::from))
    }

    /// Sessions dated `business_date` plus older sessions still OPEN.
    pub async fn sessions_for_day_close(
        &mut self,
        tenant_id: &str,
        store_id: &str,
        business_date: NaiveDate,
    ) -> DbResult<Vec<CashSession>> {
        let sql = format!(
            r#"{SELECT_SESSION}
            WHERE tenant_id = ?1 AND store_id = ?2
              AND (business_date = ?3 OR (status = 'OPEN' AND business_date < ?3))
            ORDER BY opened_at, id"#
        );
        let rows = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(tenant_id)
            .bind(store_id)
            .bind(business_date)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rows.into_iter().map(CashSession::from).collect())
    }

    // =========================================================================
    // Movements
    // =========================================================================

    pub async fn insert_movement(&mut self, movement: &CashMovement) -> DbResult<()> {
        debug!(
            session_id = %movement.session_id,
            kind = ?movement.kind,
            amount = %movement.amount,
            "Recording cash movement"
        );

        sqlx::query(
            r#"
            INSERT INTO pos_cash_movements (
                id, tenant_id, store_id, session_id, kind, amount,
                business_date, reason, sale_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&movement.id)
        .bind(&movement.tenant_id)
        .bind(&movement.store_id)
        .bind(&movement.session_id)
        .bind(movement.kind)
        .bind(movement.amount)
        .bind(movement.business_date)
        .bind(&movement.reason)
        .bind(&movement.sale_id)
        .bind(movement.created_at)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    pub async fn movements(&mut self, tenant_id: &str, session_id: &str) -> DbResult<Vec<CashMovement>> {
        let movements = sqlx::query_as::<_, CashMovement>(
            r#"
            SELECT id, tenant_id, store_id, session_id, kind, amount,
                   business_date, reason, sale_id, created_at
            FROM pos_cash_movements
            WHERE tenant_id = ?1 AND session_id = ?2
            ORDER BY created_at, rowid
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(movements)
    }

    // =========================================================================
    // Day closes
    // =========================================================================

    pub async fn insert_day_close(&mut self, close: &DayClose) -> DbResult<()> {
        debug!(
            store_id = %close.store_id,
            business_date = %close.business_date,
            forced = close.forced,
            "Recording day close"
        );

        sqlx::query(
            r#"
            INSERT INTO pos_cash_day_closes (
                id, tenant_id, store_id, business_date, forced, reason,
                force_close_mode, snapshot_json, closed_by, closed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&close.id)
        .bind(&close.tenant_id)
        .bind(&close.store_id)
        .bind(close.business_date)
        .bind(close.forced)
        .bind(&close.reason)
        .bind(close.force_close_mode)
        .bind(serde_json::to_string(&close.snapshot)?)
        .bind(&close.closed_by)
        .bind(close.closed_at)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| match DbError::from(e) {
            err if err.is_unique_violation() => DbError::Rejected(CoreError::rule(
                ReasonCode::DayAlreadyClosed,
                format!(
                    "business date {} is already closed for store {}",
                    close.business_date, close.store_id
                ),
            )),
            err => err,
        })?;
        Ok(())
    }

    pub async fn find_day_close(
        &mut self,
        tenant_id: &str,
        store_id: &str,
        business_date: NaiveDate,
    ) -> DbResult<Option<DayClose>> {
        let row = sqlx::query_as::<_, DayCloseRow>(
            r#"
            SELECT id, tenant_id, store_id, business_date, forced, reason,
                   force_close_mode, snapshot_json, closed_by, closed_at
            FROM pos_cash_day_closes
            WHERE tenant_id = ?1 AND store_id = ?2 AND business_date = ?3
            "#,
        )
        .bind(tenant_id)
        .bind(store_id)
        .bind(business_date)
        .fetch_optional(&mut *self.conn)
        .await?;
        row.map(DayClose::try_from).transpose()
    }

    /// Latest closed business date for the store.
    pub async fn last_closed_date(&mut self, tenant_id: &str, store_id: &str) -> DbResult<Option<NaiveDate>> {
        let date: Option<NaiveDate> = sqlx::query_scalar(
            "SELECT MAX(business_date) FROM pos_cash_day_closes WHERE tenant_id = ?1 AND store_id = ?2",
        )
        .bind(tenant_id)
        .bind(store_id)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(date)
    }
}
