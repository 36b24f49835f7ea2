//! # Audit Repository
//!
//! Append-only trail of committed state changes. UPDATE and DELETE are
//! refused by triggers; this repository only inserts and reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::error::DbResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditResult {
    Success,
    Rejected,
}

/// Event to append.
#[derive(Debug, Clone)]
pub struct NewAuditEvent<'a> {
    pub tenant_id: &'a str,
    pub actor_id: &'a str,
    pub actor_role: &'a str,
    pub action: &'a str,
    pub entity_type: &'a str,
    pub entity_id: &'a str,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub transaction_id: &'a str,
    pub trace_id: &'a str,
    pub result: AuditResult,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct AuditRow {
    id: String,
    tenant_id: String,
    actor_id: String,
    actor_role: String,
    action: String,
    entity_type: String,
    entity_id: String,
    before_json: Option<String>,
    after_json: Option<String>,
    transaction_id: String,
    trace_id: String,
    result: AuditResult,
    created_at: DateTime<Utc>,
}

/// Stored audit event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub id: String,
    pub tenant_id: String,
    pub actor_id: String,
    pub actor_role: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub transaction_id: String,
    pub trace_id: String,
    pub result: AuditResult,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEvent {
    type Error = serde_json::Error;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let before: Option<Value> = row.before_json.as_deref().map(serde_json::from_str).transpose()?;
        let after: Option<Value> = row.after_json.as_deref().map(serde_json::from_str).transpose()?;
        Ok(AuditEvent {
            id: row.id,
            tenant_id: row.tenant_id,
            actor_id: row.actor_id,
            actor_role: row.actor_role,
            action: row.action,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            before,
            after,
            transaction_id: row.transaction_id,
            trace_id: row.trace_id,
            result: row.result,
            created_at: row.created_at,
        })
    }
}

const SELECT_AUDIT: &str = r#"
    SELECT id, tenant_id, actor_id, actor_role, action, entity_type, entity_id,
           before_json, after_json, transaction_id, trace_id, result, created_at
    FROM audit_events
"#;

pub struct AuditRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> AuditRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        AuditRepository { conn }
    }

    /// Appends one event and returns its id.
    pub async fn record(&mut self, event: NewAuditEvent<'_>) -> DbResult<String> {
        let id = Uuid::new_v4().to_string();
        let before = event.before.as_ref().map(serde_json::to_string).transpose()?;
        let after = event.after.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO audit_events (
                id, tenant_id, actor_id, actor_role, action, entity_type, entity_id,
                before_json, after_json, transaction_id, trace_id, result, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&id)
        .bind(event.tenant_id)
        .bind(event.actor_id)
        .bind(event.actor_role)
        .bind(event.action)
        .bind(event.entity_type)
        .bind(event.entity_id)
        .bind(before)
        .bind(after)
        .bind(event.transaction_id)
        .bind(event.trace_id)
        .bind(event.result)
        .bind(event.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(id)
    }

    /// Events for one entity, oldest first.
    pub async fn for_entity(
        &mut self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> DbResult<Vec<AuditEvent>> {
        let sql = format!(
            "{SELECT_AUDIT} WHERE tenant_id = ?1 AND entity_type = ?2 AND entity_id = ?3 ORDER BY created_at, rowid"
        );
        let rows = sqlx::query_as::<_, AuditRow>(&sql)
            .bind(tenant_id)
            .bind(entity_type)
            .bind(entity_id)
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(AuditEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Events written under one transaction id.
    pub async fn for_transaction(&mut self, transaction_id: &str) -> DbResult<Vec<AuditEvent>> {
        let sql = format!("{SELECT_AUDIT} WHERE transaction_id = ?1 ORDER BY created_at, rowid");
        let rows = sqlx::query_as::<_, AuditRow>(&sql)
            .bind(transaction_id)
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(AuditEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn count(&mut self, tenant_id: &str) -> DbResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM audit_events WHERE tenant_id = ?1")
            .bind(tenant_id)
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count)
    }
}
