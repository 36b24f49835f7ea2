//! # Idempotency Repository
//!
//! Durable records keyed by `(tenant, endpoint, method, Idempotency-Key)`.
//!
//! ## Record Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  claim() ──► in_progress ──► complete() ──► completed (immutable)       │
//! │                   │                                                     │
//! │                   ├──► release()  ──► row deleted (retry allowed)       │
//! │                   │                                                     │
//! │                   └──► reclaim_stale() when the holder died             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The claim is an `INSERT ... ON CONFLICT DO NOTHING`; the UNIQUE index on
//! the scope is what guarantees a single winner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyState {
    InProgress,
    Completed,
}

/// What uniquely identifies one logical request.
#[derive(Debug, Clone, Copy)]
pub struct IdempotencyScope<'a> {
    pub tenant_id: &'a str,
    pub endpoint: &'a str,
    pub method: &'a str,
    pub key: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct IdempotencyRecord {
    pub id: i64,
    pub tenant_id: String,
    pub endpoint: String,
    pub method: String,
    pub idempotency_key: String,
    pub fingerprint: String,
    pub state: IdempotencyState,
    pub transaction_id: String,
    pub response_status: Option<i64>,
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller inserted the in-progress record.
    Claimed,
    /// Somebody got there first.
    Existing(IdempotencyRecord),
}

pub struct IdempotencyRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> IdempotencyRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        IdempotencyRepository { conn }
    }

    /// Inserts an in-progress record, or returns the one already there.
    pub async fn claim(
        &mut self,
        scope: IdempotencyScope<'_>,
        fingerprint: &str,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<ClaimOutcome> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_records (
                tenant_id, endpoint, method, idempotency_key,
                fingerprint, state, transaction_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'in_progress', ?6, ?7)
            ON CONFLICT (tenant_id, endpoint, method, idempotency_key) DO NOTHING
            "#,
        )
        .bind(scope.tenant_id)
        .bind(scope.endpoint)
        .bind(scope.method)
        .bind(scope.key)
        .bind(fingerprint)
        .bind(transaction_id)
        .bind(now)
        .execute(&mut *self.conn)
        .await?
        .rows_affected();

        if inserted == 1 {
            debug!(key = %scope.key, endpoint = %scope.endpoint, "Idempotency key claimed");
            return Ok(ClaimOutcome::Claimed);
        }

        let existing = self
            .find(scope)
            .await?
            .ok_or_else(|| DbError::not_found("IdempotencyRecord", scope.key))?;
        Ok(ClaimOutcome::Existing(existing))
    }

    pub async fn find(&mut self, scope: IdempotencyScope<'_>) -> DbResult<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT id, tenant_id, endpoint, method, idempotency_key, fingerprint,
                   state, transaction_id, response_status, response_body,
                   created_at, completed_at
            FROM idempotency_records
            WHERE tenant_id = ?1 AND endpoint = ?2 AND method = ?3 AND idempotency_key = ?4
            "#,
        )
        .bind(scope.tenant_id)
        .bind(scope.endpoint)
        .bind(scope.method)
        .bind(scope.key)
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(record)
    }

    /// Takes over an in-progress record whose holder went away.
    ///
    /// Only succeeds when the record is still in progress, carries the same
    /// fingerprint and was claimed before `stale_before`.
    pub async fn reclaim_stale(
        &mut self,
        record_id: i64,
        fingerprint: &str,
        transaction_id: &str,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET created_at = ?1, transaction_id = ?2
            WHERE id = ?3 AND state = 'in_progress' AND fingerprint = ?4 AND created_at < ?5
            "#,
        )
        .bind(now)
        .bind(transaction_id)
        .bind(record_id)
        .bind(fingerprint)
        .bind(stale_before)
        .execute(&mut *self.conn)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    /// Stores the final response and freezes the record.
    pub async fn complete(
        &mut self,
        scope: IdempotencyScope<'_>,
        response_status: u16,
        response_body: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET state = 'completed', response_status = ?1, response_body = ?2, completed_at = ?3
            WHERE tenant_id = ?4 AND endpoint = ?5 AND method = ?6 AND idempotency_key = ?7
              AND state = 'in_progress'
            "#,
        )
        .bind(i64::from(response_status))
        .bind(response_body)
        .bind(now)
        .bind(scope.tenant_id)
        .bind(scope.endpoint)
        .bind(scope.method)
        .bind(scope.key)
        .execute(&mut *self.conn)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(DbError::not_found("IdempotencyRecord", scope.key));
        }
        Ok(())
    }

    /// Drops an in-progress claim so the client may retry.
    pub async fn release(&mut self, scope: IdempotencyScope<'_>) -> DbResult<()> {
        sqlx::query(
            r#"
            DELETE FROM idempotency_records
            WHERE tenant_id = ?1 AND endpoint = ?2 AND method = ?3 AND idempotency_key = ?4
              AND state = 'in_progress'
            "#,
        )
        .bind(scope.tenant_id)
        .bind(scope.endpoint)
        .bind(scope.method)
        .bind(scope.key)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Deletes completed records older than `completed_before`.
    pub async fn prune_completed(&mut self, completed_before: DateTime<Utc>) -> DbResult<u64> {
        let deleted = sqlx::query(
            "DELETE FROM idempotency_records WHERE state = 'completed' AND completed_at < ?1",
        )
        .bind(completed_before)
        .execute(&mut *self.conn)
        .await?
        .rows_affected();

        Ok(deleted)
    }
}
