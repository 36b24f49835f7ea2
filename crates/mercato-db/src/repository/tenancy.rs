//! # Tenancy Repository
//!
//! Tenants, their stores and the per-tenant return policy.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;
use mercato_core::ReturnPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Store {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    /// Offset used to derive the store's business date.
    pub utc_offset_minutes: i32,
    pub created_at: DateTime<Utc>,
}

pub struct TenancyRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> TenancyRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        TenancyRepository { conn }
    }

    pub async fn insert_tenant(&mut self, id: &str, name: &str, now: DateTime<Utc>) -> DbResult<()> {
        debug!(tenant_id = %id, "Inserting tenant");
        sqlx::query("INSERT INTO tenants (id, name, created_at) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind(name)
            .bind(now)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    pub async fn find_tenant(&mut self, id: &str) -> DbResult<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>(
            "SELECT id, name, created_at FROM tenants WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(tenant)
    }

    pub async fn insert_store(&mut self, store: &Store) -> DbResult<()> {
        debug!(store_id = %store.id, tenant_id = %store.tenant_id, "Inserting store");
        sqlx::query(
            r#"
            INSERT INTO stores (id, tenant_id, name, utc_offset_minutes, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&store.id)
        .bind(&store.tenant_id)
        .bind(&store.name)
        .bind(store.utc_offset_minutes)
        .bind(store.created_at)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// Looks a store up by id regardless of tenant.
    ///
    /// Callers compare `tenant_id` themselves so a foreign store can be told
    /// apart from a missing one.
    pub async fn find_store(&mut self, store_id: &str) -> DbResult<Option<Store>> {
        let store = sqlx::query_as::<_, Store>(
            "SELECT id, tenant_id, name, utc_offset_minutes, created_at FROM stores WHERE id = ?1",
        )
        .bind(store_id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(store)
    }

    /// The tenant's return policy, or the default when none is stored.
    pub async fn return_policy(&mut self, tenant_id: &str) -> DbResult<ReturnPolicy> {
        let json: Option<String> = sqlx::query_scalar(
            "SELECT policy_json FROM tenant_return_policies WHERE tenant_id = ?1",
        )
        .bind(tenant_id)
        .fetch_optional(&mut *self.conn)
        .await?;

        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(ReturnPolicy::default()),
        }
    }

    pub async fn set_return_policy(
        &mut self,
        tenant_id: &str,
        policy: &ReturnPolicy,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let json = serde_json::to_string(policy)?;
        sqlx::query(
            r#"
            INSERT INTO tenant_return_policies (tenant_id, policy_json, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (tenant_id) DO UPDATE
            SET policy_json = excluded.policy_json, updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(json)
        .bind(now)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }
}
