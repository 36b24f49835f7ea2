//! Inventory counts and the per-store count lock.

use tracing::info;

use mercato_core::machines::inventory_count::{self, lock_change, InventoryCount, LockChange, NewCount};
use mercato_core::validation::validate_pool;
use mercato_core::{EntityType, Transition, DEFAULT_POOL};
use mercato_db::UnitOfWork;

use super::effects::apply_stock;
use super::{new_id, Applied, AuditEntry, Context};
use crate::command::{CountRef, CreateCount, ScanCount, TransitionCount};
use crate::error::{EngineError, EngineResult};
use crate::scope::ensure_store_permitted;

pub async fn create(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &CreateCount) -> EngineResult<Applied> {
    let pool = cmd.pool.as_deref().unwrap_or(DEFAULT_POOL);
    validate_pool(pool)?;

    let count = inventory_count::create(NewCount {
        id: new_id(),
        tenant_id: ctx.tenant_id().to_string(),
        store_id: cmd.store_id.clone(),
        pool: pool.to_string(),
        name: cmd.name.clone(),
        created_by: ctx.actor.user_id.clone(),
        now: ctx.now,
    })?;
    uow.counts().insert(&count).await?;

    let event = AuditEntry::new(&ctx.action, EntityType::InventoryCount, &count.id, None, &count)?;
    Ok(Applied::of(&count)?.with_event(event))
}

/// START, PAUSE, RESUME, CLOSE and CANCEL. Entering ACTIVE/PAUSED takes the
/// store lock; leaving them gives it back.
pub async fn transition(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &TransitionCount) -> EngineResult<Applied> {
    let current = load(uow, ctx, &cmd.count_id).await?;
    let t = inventory_count::transition(&current, cmd.action.action(), ctx.now)?;

    match lock_change(t.before.status, t.after.status) {
        LockChange::Acquire => uow.counts().acquire_lock(&t.after, ctx.now).await?,
        LockChange::Release => uow.counts().release_lock(&t.after).await?,
        LockChange::Keep => {}
    }
    info!(
        count_id = %t.after.id,
        store_id = %t.after.store_id,
        from = %t.before.status,
        to = %t.after.status,
        "Inventory count status changed"
    );
    commit(uow, ctx, t, Vec::new()).await
}

pub async fn scan(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &ScanCount) -> EngineResult<Applied> {
    let current = load(uow, ctx, &cmd.count_id).await?;
    let t = inventory_count::scan(&current, &cmd.items, ctx.now)?;
    uow.counts().insert_scans(&current.id, &cmd.items, ctx.now).await?;
    commit(uow, ctx, t, Vec::new()).await
}

/// CLOSED → RECONCILED: the ledger is brought in line with what was scanned.
pub async fn reconcile(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &CountRef) -> EngineResult<Applied> {
    let current = load(uow, ctx, &cmd.count_id).await?;
    let tenant_id = ctx.tenant_id();

    let scans = uow.counts().scans(&current.id).await?;
    let expected = uow
        .stock()
        .expected_at(tenant_id, &current.store_id, &current.pool)
        .await?;
    let unexpected: Vec<&str> = scans
        .iter()
        .filter_map(|s| s.epc.as_deref())
        .filter(|epc| !expected.epcs.contains_key(*epc))
        .collect();
    let known = uow.stock().known_epcs(tenant_id, &unexpected).await?;

    let t = inventory_count::reconcile(&current, &expected, &scans, &known, ctx.now)?;
    let scopes = apply_stock(uow, ctx, t.stock_ops()).await?;
    uow.counts().insert_deltas(&current.id, &t.after.deltas).await?;
    info!(
        count_id = %current.id,
        scans = scans.len(),
        deltas = t.after.deltas.len(),
        "Inventory count reconciled"
    );
    commit(uow, ctx, t, scopes).await
}

async fn load(uow: &mut UnitOfWork, ctx: &Context<'_>, id: &str) -> EngineResult<InventoryCount> {
    let count = uow
        .counts()
        .get(ctx.tenant_id(), id)
        .await?
        .ok_or_else(|| EngineError::not_found("InventoryCount", id))?;
    ensure_store_permitted(ctx.actor, &count.store_id)?;
    Ok(count)
}

async fn commit(
    uow: &mut UnitOfWork,
    ctx: &Context<'_>,
    t: Transition<InventoryCount>,
    scopes: Vec<mercato_db::StockScope>,
) -> EngineResult<Applied> {
    uow.counts().update(&t.after).await?;
    let event = AuditEntry::new(&ctx.action, EntityType::InventoryCount, &t.after.id, Some(&t.before), &t.after)?;
    Ok(Applied::of(&t.after)?.with_scopes(scopes).with_event(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CountLifecycle;
    use crate::config::EngineConfig;
    use crate::testing::{ctx, manager, seeded};
    use mercato_core::machines::inventory_count::{CountStatus, DeltaKind, ScanItem};
    use mercato_core::{ReasonCode, StockOp, StockSelector, StockStatus};

    async fn drafted(uow: &mut UnitOfWork, ctx: &Context<'_>, name: &str) -> String {
        let applied = create(
            uow,
            ctx,
            &CreateCount {
                store_id: "s-1".into(),
                pool: None,
                name: name.into(),
            },
        )
        .await
        .unwrap();
        applied.data["id"].as_str().unwrap().to_string()
    }

    async fn step(uow: &mut UnitOfWork, ctx: &Context<'_>, id: &str, action: CountLifecycle) -> EngineResult<Applied> {
        transition(
            uow,
            ctx,
            &TransitionCount {
                count_id: id.to_string(),
                action,
            },
        )
        .await
    }

    #[tokio::test]
    async fn test_second_count_on_locked_store_is_rejected() {
        let db = seeded().await;
        let config = EngineConfig::default();
        let manager = manager();
        let ctx = ctx(&manager, &config, "COUNT_START");
        let mut uow = db.begin().await.unwrap();

        let first = drafted(&mut uow, &ctx, "aisle 1").await;
        let second = drafted(&mut uow, &ctx, "aisle 2").await;
        step(&mut uow, &ctx, &first, CountLifecycle::Start).await.unwrap();
        step(&mut uow, &ctx, &first, CountLifecycle::Pause).await.unwrap();

        let err = step(&mut uow, &ctx, &second, CountLifecycle::Start).await.unwrap_err();
        assert_eq!(err.reason_code(), Some(ReasonCode::StoreLocked));

        step(&mut uow, &ctx, &first, CountLifecycle::Cancel).await.unwrap();
        assert!(uow.counts().lock_holder("t-1", "s-1").await.unwrap().is_none());
        let applied = step(&mut uow, &ctx, &second, CountLifecycle::Start).await.unwrap();
        assert_eq!(applied.data["status"], "ACTIVE");
    }

    #[tokio::test]
    async fn test_reconcile_applies_deltas() {
        let db = seeded().await;
        let config = EngineConfig::default();
        let manager = manager();
        let ctx = ctx(&manager, &config, "COUNT_RECONCILE");
        let mut uow = db.begin().await.unwrap();

        let ops = [
            StockOp::Register {
                epc: "E2800000000000000000AAAA".into(),
                sku: "SKU-1".into(),
                location_id: "s-1".into(),
                pool: DEFAULT_POOL.into(),
            },
            StockOp::Credit {
                selector: StockSelector::sku("SKU-2", "s-1", DEFAULT_POOL),
                qty: 4,
            },
        ];
        for op in &ops {
            uow.stock().apply("t-1", op, ctx.now).await.unwrap();
        }

        let id = drafted(&mut uow, &ctx, "full store").await;
        step(&mut uow, &ctx, &id, CountLifecycle::Start).await.unwrap();
        scan(
            &mut uow,
            &ctx,
            &ScanCount {
                count_id: id.clone(),
                items: vec![
                    ScanItem {
                        sku: "SKU-3".into(),
                        epc: Some("E2800000000000000000BBBB".into()),
                        qty: 1,
                    },
                    ScanItem {
                        sku: "SKU-2".into(),
                        epc: None,
                        qty: 6,
                    },
                ],
            },
        )
        .await
        .unwrap();
        step(&mut uow, &ctx, &id, CountLifecycle::Close).await.unwrap();

        let applied = reconcile(&mut uow, &ctx, &CountRef { count_id: id.clone() })
            .await
            .unwrap();
        assert_eq!(applied.data["status"], "RECONCILED");
        uow.stock().verify_all("t-1", &applied.scopes).await.unwrap();

        let stored = uow.counts().get("t-1", &id).await.unwrap().unwrap();
        assert_eq!(stored.status, CountStatus::Reconciled);
        let kinds: Vec<DeltaKind> = stored.deltas.iter().map(|d| d.kind).collect();
        assert!(kinds.contains(&DeltaKind::MissingEpc));
        assert!(kinds.contains(&DeltaKind::FoundEpc));

        let missing = uow
            .stock()
            .find_epc("t-1", "E2800000000000000000AAAA")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(missing.status, StockStatus::Lost);
        assert_eq!(uow.stock().bucket_qty("t-1", "SKU-2", "s-1", DEFAULT_POOL).await.unwrap(), 6);
    }
}
