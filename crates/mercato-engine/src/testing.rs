//! Fixtures shared by the service tests.
//!
//! Tenant `t-1` owns stores `s-1` and `s-2`; tenant `t-2` owns `s-9` and `s-8`.

use chrono::Utc;

use mercato_core::{Actor, Role, StoreScope};
use mercato_db::{Database, DbConfig, Store};

use crate::config::EngineConfig;
use crate::services::Context;

pub(crate) async fn seeded() -> Database {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let now = Utc::now();
    let mut uow = db.begin().await.unwrap();
    for (tenant, stores) in [("t-1", ["s-1", "s-2"]), ("t-2", ["s-9", "s-8"])] {
        uow.tenancy().insert_tenant(tenant, tenant, now).await.unwrap();
        for id in stores {
            uow.tenancy()
                .insert_store(&Store {
                    id: id.to_string(),
                    tenant_id: tenant.to_string(),
                    name: id.to_string(),
                    utc_offset_minutes: 0,
                    created_at: now,
                })
                .await
                .unwrap();
        }
    }
    uow.commit().await.unwrap();
    db
}

pub(crate) fn actor(role: Role, scope: StoreScope) -> Actor {
    Actor {
        user_id: "u-1".into(),
        tenant_id: "t-1".into(),
        role,
        store_scope: scope,
    }
}

pub(crate) fn manager() -> Actor {
    actor(Role::Manager, StoreScope::All)
}

pub(crate) fn ctx<'a>(actor: &'a Actor, config: &'a EngineConfig, action: &str) -> Context<'a> {
    Context {
        actor,
        config,
        action: action.to_string(),
        now: Utc::now(),
    }
}
