//! Tenant and store scope checks.
//!
//! Run before any service touches state. A store named in the payload must
//! exist and belong to the actor's tenant; the store the actor acts at must
//! be inside the actor's store scope. Entities loaded by id are always looked
//! up under the actor's tenant, so a foreign id reads as not found; their
//! store is checked with [`ensure_store_permitted`] once loaded.

use tracing::warn;

use mercato_core::Actor;
use mercato_db::UnitOfWork;

use crate::command::Command;
use crate::error::{EngineError, EngineResult, ScopeViolation};

pub async fn authorize(uow: &mut UnitOfWork, actor: &Actor, command: &Command) -> EngineResult<()> {
    if uow.tenancy().find_tenant(&actor.tenant_id).await?.is_none() {
        warn!(tenant_id = %actor.tenant_id, "Unknown tenant");
        return Err(ScopeViolation::CrossTenant {
            tenant_id: actor.tenant_id.clone(),
            resource: format!("tenant {}", actor.tenant_id),
        }
        .into());
    }

    for store_id in command.referenced_stores() {
        let store = uow
            .tenancy()
            .find_store(store_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Store", store_id))?;
        if store.tenant_id != actor.tenant_id {
            warn!(
                tenant_id = %actor.tenant_id,
                store_id = %store_id,
                owner = %store.tenant_id,
                "Cross-tenant store reference"
            );
            return Err(ScopeViolation::CrossTenant {
                tenant_id: actor.tenant_id.clone(),
                resource: format!("store {}", store_id),
            }
            .into());
        }
    }

    if let Some(store_id) = command.acting_store() {
        ensure_store_permitted(actor, store_id)?;
    }
    Ok(())
}

pub fn ensure_store_permitted(actor: &Actor, store_id: &str) -> EngineResult<()> {
    if actor.store_scope.permits(store_id) {
        Ok(())
    } else {
        warn!(user_id = %actor.user_id, store_id = %store_id, "Store scope mismatch");
        Err(ScopeViolation::StoreMismatch {
            store_id: store_id.to_string(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CreateTransfer, OpenCashSession};
    use crate::testing::seeded;
    use mercato_core::{Money, Role, StoreScope};

    fn actor(scope: StoreScope) -> Actor {
        Actor {
            user_id: "u-1".into(),
            tenant_id: "t-1".into(),
            role: Role::Cashier,
            store_scope: scope,
        }
    }

    fn open_at(store: &str) -> Command {
        Command::OpenCashSession(OpenCashSession {
            store_id: store.into(),
            opening_amount: Money::from_cents(0),
        })
    }

    #[tokio::test]
    async fn test_foreign_store_is_cross_tenant() {
        let db = seeded().await;
        let mut uow = db.begin().await.unwrap();
        let err = authorize(&mut uow, &actor(StoreScope::All), &open_at("s-9"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CROSS_TENANT_ACCESS_DENIED");
    }

    #[tokio::test]
    async fn test_unknown_store_is_not_found() {
        let db = seeded().await;
        let mut uow = db.begin().await.unwrap();
        let err = authorize(&mut uow, &actor(StoreScope::All), &open_at("s-404"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn test_store_restricted_actor() {
        let db = seeded().await;
        let mut uow = db.begin().await.unwrap();
        let restricted = actor(StoreScope::Stores(vec!["s-1".into()]));

        authorize(&mut uow, &restricted, &open_at("s-1")).await.unwrap();
        let err = authorize(&mut uow, &restricted, &open_at("s-2"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORE_SCOPE_MISMATCH");
    }

    #[tokio::test]
    async fn test_transfer_destination_outside_scope_is_allowed() {
        let db = seeded().await;
        let mut uow = db.begin().await.unwrap();
        let restricted = actor(StoreScope::Stores(vec!["s-1".into()]));
        let cmd = Command::CreateTransfer(CreateTransfer {
            origin_store_id: "s-1".into(),
            destination_store_id: "s-2".into(),
            pool: None,
            lines: vec![],
        });
        authorize(&mut uow, &restricted, &cmd).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_tenant_denied() {
        let db = seeded().await;
        let mut uow = db.begin().await.unwrap();
        let mut ghost = actor(StoreScope::All);
        ghost.tenant_id = "t-ghost".into();
        let err = authorize(&mut uow, &ghost, &open_at("s-1")).await.unwrap_err();
        assert_eq!(err.code(), "CROSS_TENANT_ACCESS_DENIED");
    }
}
